//! Synthetic camera backend.
//!
//! Generates a test pattern (gradient background with a skin-toned face
//! ellipse) at a fixed cadence. Failures can be injected at runtime through
//! any clone of the backend, which makes it the harness for device-manager and
//! session tests as well as the `tryon demo` camera.

use crate::camera::{CameraBackend, CameraDevice, CameraStream, DeviceError, Facing, ResolutionRange};
use crate::frame::{FrameBuffer, CHANNELS};
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);
const SKIN: [f32; 3] = [224.0, 172.0, 140.0];

#[derive(Debug, Default)]
struct Behaviour {
    permission_denied: bool,
    acquire_delay: Duration,
    /// Streams report a disconnect after this many frames.
    fail_after: Option<u32>,
    /// Streams go silent after this many frames without reporting an error.
    stall_after: Option<u32>,
    noise: u8,
}

#[derive(Debug)]
struct Shared {
    devices: Vec<CameraDevice>,
    frame_interval: Duration,
    behaviour: Mutex<Behaviour>,
    /// Device ids currently opened by any stream from this backend.
    held: Mutex<HashSet<String>>,
}

/// In-process camera that produces generated frames.
#[derive(Clone, Debug)]
pub struct SyntheticBackend {
    shared: Arc<Shared>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    /// One front and one rear camera at 640x480, ~30 fps.
    pub fn new() -> Self {
        Self::with_devices(vec![
            synthetic_device("synthetic:front", Facing::Front),
            synthetic_device("synthetic:rear", Facing::Rear),
        ])
    }

    pub fn with_devices(devices: Vec<CameraDevice>) -> Self {
        Self::with_devices_and_interval(devices, DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_devices_and_interval(devices: Vec<CameraDevice>, frame_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                devices,
                frame_interval,
                behaviour: Mutex::new(Behaviour::default()),
                held: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Make subsequent `open` calls fail as if the user refused access.
    pub fn set_permission_denied(&self, denied: bool) {
        self.behaviour().permission_denied = denied;
    }

    /// Make subsequent `open` calls block for `delay` before succeeding.
    pub fn set_acquire_delay(&self, delay: Duration) {
        self.behaviour().acquire_delay = delay;
    }

    /// Streams opened after this call disconnect after `frames` frames.
    pub fn set_fail_after(&self, frames: Option<u32>) {
        self.behaviour().fail_after = frames;
    }

    /// Streams opened after this call stop delivering frames after `frames`
    /// frames, without ever reporting an error.
    pub fn set_stall_after(&self, frames: Option<u32>) {
        self.behaviour().stall_after = frames;
    }

    /// Per-channel uniform noise amplitude added to generated frames.
    pub fn set_noise(&self, amplitude: u8) {
        self.behaviour().noise = amplitude;
    }

    /// Number of devices currently held open.
    pub fn held_count(&self) -> usize {
        lock(&self.shared.held).len()
    }

    fn behaviour(&self) -> MutexGuard<'_, Behaviour> {
        lock(&self.shared.behaviour)
    }
}

/// A 640x480 synthetic device descriptor.
pub fn synthetic_device(id: &str, facing: Facing) -> CameraDevice {
    CameraDevice {
        id: id.to_string(),
        name: format!("Synthetic {facing} camera"),
        facing,
        resolutions: ResolutionRange::fixed(DEFAULT_WIDTH, DEFAULT_HEIGHT),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CameraBackend for SyntheticBackend {
    fn enumerate(&self) -> Vec<CameraDevice> {
        self.shared.devices.clone()
    }

    fn open(&self, device: &CameraDevice) -> Result<Box<dyn CameraStream>, DeviceError> {
        let (denied, delay, fail_after, stall_after, noise) = {
            let b = self.behaviour();
            (
                b.permission_denied,
                b.acquire_delay,
                b.fail_after,
                b.stall_after,
                b.noise,
            )
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if denied {
            return Err(DeviceError::PermissionDenied);
        }
        if !self.shared.devices.iter().any(|d| d.id == device.id) {
            return Err(DeviceError::NoDeviceFound(device.facing));
        }
        if !lock(&self.shared.held).insert(device.id.clone()) {
            return Err(DeviceError::DeviceBusy);
        }

        tracing::debug!(device = %device.id, "synthetic camera opened");
        Ok(Box::new(SyntheticStream {
            device: device.clone(),
            shared: Arc::clone(&self.shared),
            sequence: 0,
            fail_after,
            stall_after,
            noise,
        }))
    }
}

struct SyntheticStream {
    device: CameraDevice,
    shared: Arc<Shared>,
    sequence: u32,
    fail_after: Option<u32>,
    stall_after: Option<u32>,
    noise: u8,
}

/// How long a stalled synthetic stream waits before reporting an empty poll.
const STALL_POLL: Duration = Duration::from_millis(5);

impl CameraStream for SyntheticStream {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DeviceError> {
        if self.stall_after.is_some_and(|n| self.sequence >= n) {
            std::thread::sleep(STALL_POLL);
            return Ok(None);
        }
        if self.fail_after.is_some_and(|n| self.sequence >= n) {
            return Err(DeviceError::Disconnected(format!(
                "{} stopped after {} frames",
                self.device.id, self.sequence
            )));
        }
        std::thread::sleep(self.shared.frame_interval);

        let res = self.device.resolutions.max;
        let data = render_pattern(res.width, res.height, self.device.facing, self.noise);
        let frame = FrameBuffer::new(data, res.width, res.height, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        lock(&self.shared.held).remove(&self.device.id);
        tracing::debug!(device = %self.device.id, "synthetic camera released");
    }
}

/// Background tint per facing so tests can tell the cameras apart by pixels.
pub fn background_tint(facing: Facing) -> [f32; 3] {
    match facing {
        Facing::Front => [40.0, 60.0, 120.0],
        Facing::Rear => [40.0, 120.0, 60.0],
    }
}

fn render_pattern(width: u32, height: u32, facing: Facing, noise: u8) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let tint = background_tint(facing);
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (rx, ry) = (w as f32 * 0.18, h as f32 * 0.32);
    let mut rng = rand::thread_rng();

    let mut data = Vec::with_capacity(w * h * CHANNELS);
    for y in 0..h {
        let shade = 0.6 + 0.4 * (y as f32 / h.max(1) as f32);
        for x in 0..w {
            let dx = (x as f32 - cx) / rx;
            let dy = (y as f32 - cy) / ry;
            let base = if dx * dx + dy * dy <= 1.0 {
                SKIN
            } else {
                [tint[0] * shade, tint[1] * shade, tint[2] * shade]
            };
            for channel in base {
                let jitter = if noise > 0 {
                    rng.gen_range(-(noise as f32)..=noise as f32)
                } else {
                    0.0
                };
                data.push((channel + jitter).round().clamp(0.0, 255.0) as u8);
            }
        }
    }
    data
}
