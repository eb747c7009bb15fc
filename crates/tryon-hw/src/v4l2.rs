//! V4L2 camera backend via the `v4l` crate.
//!
//! V4L2 has no notion of facing, so the backend is configured with one device
//! node per facing. Frames are negotiated as YUYV and converted to RGB.

use crate::camera::{CameraBackend, CameraDevice, CameraStream, DeviceError, Facing, Resolution, ResolutionRange};
use crate::frame::{self, FrameBuffer};
use std::io;
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Dequeue poll interval; a few frame periods at 30 fps.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

const ENOENT: i32 = 2;
const EACCES: i32 = 13;
const EBUSY: i32 = 16;

/// Info about a discovered V4L2 capture node.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Camera backend over `/dev/videoN` nodes.
#[derive(Debug, Clone, Default)]
pub struct V4l2Backend {
    front: Option<String>,
    rear: Option<String>,
}

impl V4l2Backend {
    pub fn new(front: Option<String>, rear: Option<String>) -> Self {
        Self { front, rear }
    }

    fn configured(&self) -> impl Iterator<Item = (&str, Facing)> {
        self.front
            .as_deref()
            .map(|p| (p, Facing::Front))
            .into_iter()
            .chain(self.rear.as_deref().map(|p| (p, Facing::Rear)))
    }
}

impl CameraBackend for V4l2Backend {
    fn enumerate(&self) -> Vec<CameraDevice> {
        self.configured()
            .filter_map(|(path, facing)| {
                let dev = Device::with_path(path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(CameraDevice {
                    id: path.to_string(),
                    name: caps.card.clone(),
                    facing,
                    resolutions: frame_size_range(&dev),
                })
            })
            .collect()
    }

    fn open(&self, device: &CameraDevice) -> Result<Box<dyn CameraStream>, DeviceError> {
        let path = device.id.as_str();
        if !Path::new(path).exists() {
            return Err(DeviceError::NoDeviceFound(device.facing));
        }

        let dev = Device::with_path(path).map_err(|e| map_open_error(&e, device.facing))?;

        let mut fmt = dev
            .format()
            .map_err(|e| DeviceError::Disconnected(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = dev
            .set_format(&fmt)
            .map_err(|e| map_open_error(&e, device.facing))?;
        if negotiated.fourcc != FourCC::new(b"YUYV") {
            return Err(DeviceError::Disconnected(format!(
                "unsupported pixel format: {:?} (need YUYV)",
                negotiated.fourcc
            )));
        }

        tracing::info!(
            device = path,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let mut stream = MmapStream::with_buffers(&dev, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| map_open_error(&e, device.facing))?;
        stream.set_timeout(POLL_TIMEOUT);

        Ok(Box::new(V4l2Stream {
            device: device.clone(),
            width: negotiated.width,
            height: negotiated.height,
            stream,
            _dev: dev,
        }))
    }
}

struct V4l2Stream {
    device: CameraDevice,
    width: u32,
    height: u32,
    stream: MmapStream<'static>,
    _dev: Device,
}

impl CameraStream for V4l2Stream {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DeviceError> {
        let (buf, meta) = match self.stream.next() {
            Ok(dequeued) => dequeued,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => {
                return Err(DeviceError::Disconnected(format!(
                    "failed to dequeue buffer: {e}"
                )))
            }
        };
        let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)
            .map_err(|e| DeviceError::Disconnected(format!("YUYV conversion failed: {e}")))?;
        Ok(Some(FrameBuffer::new(rgb, self.width, self.height, meta.sequence)))
    }
}

fn map_open_error(err: &io::Error, facing: Facing) -> DeviceError {
    match err.raw_os_error() {
        Some(EACCES) => DeviceError::PermissionDenied,
        Some(EBUSY) => DeviceError::DeviceBusy,
        Some(ENOENT) => DeviceError::NoDeviceFound(facing),
        _ if err.kind() == io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied,
        _ => DeviceError::Disconnected(err.to_string()),
    }
}

fn frame_size_range(dev: &Device) -> ResolutionRange {
    let sizes: Vec<Resolution> = dev
        .enum_framesizes(FourCC::new(b"YUYV"))
        .unwrap_or_default()
        .into_iter()
        .flat_map(|fs| fs.size.to_discrete())
        .map(|d| Resolution {
            width: d.width,
            height: d.height,
        })
        .collect();

    let min = sizes.iter().min_by_key(|r| r.width * r.height).copied();
    let max = sizes.iter().max_by_key(|r| r.width * r.height).copied();
    match (min, max) {
        (Some(min), Some(max)) => ResolutionRange { min, max },
        _ => ResolutionRange::fixed(REQUESTED_WIDTH, REQUESTED_HEIGHT),
    }
}

/// List available V4L2 video capture nodes.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}
