//! Device manager: exclusive camera ownership and freshest-frame delivery.
//!
//! The manager holds at most one open camera. While held, a dedicated capture
//! thread pulls frames from the backend and publishes each one into a
//! single-slot `watch` channel, overwriting any frame the consumer has not
//! picked up yet. Dropping the held device (via [`DeviceManager::stop`], a
//! facing switch, or dropping the manager) stops the thread, which drops the
//! backend stream and releases the hardware.

use crate::camera::{select_device, CameraBackend, CameraDevice, CameraStream, DeviceError, Facing};
use crate::frame::FrameBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Latest event published by the capture thread.
#[derive(Clone, Debug)]
enum FrameEvent {
    Frame(Arc<FrameBuffer>),
    Lost(DeviceError),
}

type FrameSlot = watch::Sender<Option<FrameEvent>>;

/// A stream silent for longer than this is reported as disconnected.
pub const DEFAULT_STALL_LIMIT: Duration = Duration::from_secs(3);

/// Consumer side of the single-slot frame channel.
pub struct FrameReceiver {
    rx: watch::Receiver<Option<FrameEvent>>,
}

impl FrameReceiver {
    /// Wait for the freshest frame not yet returned.
    ///
    /// Frames published while the caller was busy are skipped, never queued.
    /// Returns `Some(Err(..))` once if the stream is lost, and `None` after the
    /// device has been released.
    pub async fn next(&mut self) -> Option<Result<Arc<FrameBuffer>, DeviceError>> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            let event = self.rx.borrow_and_update().clone();
            match event {
                Some(FrameEvent::Frame(frame)) => return Some(Ok(frame)),
                Some(FrameEvent::Lost(err)) => return Some(Err(err)),
                None => continue,
            }
        }
    }
}

/// A held camera. Dropping it releases the device.
struct HeldDevice {
    device: CameraDevice,
    running: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    _slot: Arc<FrameSlot>,
}

impl Drop for HeldDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.capture.take() {
            if handle.join().is_err() {
                tracing::warn!(device = %self.device.id, "capture thread panicked");
            }
        }
        tracing::info!(device = %self.device.id, "camera released");
    }
}

/// Owns the camera for a try-on session.
pub struct DeviceManager {
    backend: Arc<dyn CameraBackend>,
    held: Option<HeldDevice>,
    /// Facing of the most recent start request; switching flips this.
    facing: Facing,
    acquire_timeout: Option<Duration>,
    stall_limit: Duration,
}

impl DeviceManager {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            held: None,
            facing: Facing::Front,
            acquire_timeout: None,
            stall_limit: DEFAULT_STALL_LIMIT,
        }
    }

    /// Fail acquisitions that take longer than `timeout` with [`DeviceError::Timeout`].
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Report [`DeviceError::Disconnected`] once a held stream has delivered
    /// nothing for `limit`.
    pub fn with_stall_limit(mut self, limit: Duration) -> Self {
        self.stall_limit = limit;
        self
    }

    /// List the cameras the backend currently exposes.
    pub fn enumerate(&self) -> Vec<CameraDevice> {
        self.backend.enumerate()
    }

    /// The device currently held, if any.
    pub fn current(&self) -> Option<&CameraDevice> {
        self.held.as_ref().map(|h| &h.device)
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// Facing of the last start request.
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Acquire a camera with the preferred facing and start frame delivery.
    ///
    /// Fails fast with [`DeviceError::DeviceBusy`] if a device is already held.
    /// If the returned future is dropped before completion, any device the
    /// in-flight acquisition opens is released as soon as it finishes.
    pub async fn start(
        &mut self,
        preferred: Facing,
    ) -> Result<(CameraDevice, FrameReceiver), DeviceError> {
        if let Some(held) = &self.held {
            tracing::warn!(device = %held.device.id, "start requested while a camera is held");
            return Err(DeviceError::DeviceBusy);
        }
        self.facing = preferred;

        let backend = Arc::clone(&self.backend);
        let acquisition = tokio::task::spawn_blocking(move || {
            let device = select_device(&backend.enumerate(), preferred)?;
            tracing::debug!(device = %device.id, facing = %preferred, "opening camera");
            backend.open(&device)
        });

        // Dropping the JoinHandle detaches the task; its output (an opened
        // stream) is then dropped on completion.
        let joined = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, acquisition)
                .await
                .map_err(|_| {
                    tracing::warn!(timeout_ms = limit.as_millis() as u64, "camera acquisition timed out");
                    DeviceError::Timeout
                })?,
            None => acquisition.await,
        };
        let stream = joined
            .map_err(|e| DeviceError::Disconnected(format!("acquisition task failed: {e}")))??;

        let device = stream.device().clone();
        let (tx, rx) = watch::channel(None);
        let slot = Arc::new(tx);
        let running = Arc::new(AtomicBool::new(true));
        let stall_limit = self.stall_limit;

        let capture = std::thread::Builder::new()
            .name("tryon-capture".into())
            .spawn({
                let slot = Arc::clone(&slot);
                let running = Arc::clone(&running);
                move || capture_loop(stream, slot, running, stall_limit)
            })
            .map_err(|e| DeviceError::Disconnected(format!("failed to spawn capture thread: {e}")))?;

        tracing::info!(
            device = %device.id,
            name = %device.name,
            facing = %device.facing,
            "camera started"
        );

        self.held = Some(HeldDevice {
            device: device.clone(),
            running,
            capture: Some(capture),
            _slot: slot,
        });

        Ok((device, FrameReceiver { rx }))
    }

    /// Release the held camera. Idempotent.
    pub fn stop(&mut self) {
        if self.held.take().is_none() {
            tracing::debug!("stop requested with no camera held");
        }
    }

    /// Release the current camera and start the one facing the other way.
    ///
    /// On failure the manager is left holding nothing.
    pub async fn switch_facing(&mut self) -> Result<(CameraDevice, FrameReceiver), DeviceError> {
        let target = self.facing.opposite();
        self.stop();
        tracing::info!(facing = %target, "switching camera facing");
        self.start(target).await
    }
}

fn capture_loop(
    mut stream: Box<dyn CameraStream>,
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    stall_limit: Duration,
) {
    tracing::debug!(device = %stream.device().id, "capture thread started");
    let mut last_frame = Instant::now();
    while running.load(Ordering::Acquire) {
        match stream.next_frame() {
            Ok(Some(frame)) => {
                last_frame = Instant::now();
                slot.send_replace(Some(FrameEvent::Frame(Arc::new(frame))));
            }
            Ok(None) if last_frame.elapsed() < stall_limit => {}
            Ok(None) => {
                let silent_ms = last_frame.elapsed().as_millis() as u64;
                tracing::warn!(device = %stream.device().id, silent_ms, "camera stream stalled");
                slot.send_replace(Some(FrameEvent::Lost(DeviceError::Disconnected(format!(
                    "{} delivered no frame for {silent_ms} ms",
                    stream.device().id
                )))));
                break;
            }
            Err(err) => {
                tracing::warn!(device = %stream.device().id, error = %err, "camera stream lost");
                slot.send_replace(Some(FrameEvent::Lost(err)));
                break;
            }
        }
    }
    tracing::debug!(device = %stream.device().id, "capture thread exiting");
}
