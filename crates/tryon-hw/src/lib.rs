//! tryon-hw — Hardware abstraction for camera acquisition.
//!
//! Provides the camera backend seam (V4L2 behind the `v4l2` feature, plus a
//! synthetic test-pattern camera), RGB frame conversion, and the device
//! manager that owns the active camera and delivers its freshest frame.

pub mod camera;
pub mod frame;
pub mod manager;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use camera::{
    select_device, CameraBackend, CameraDevice, CameraStream, DeviceError, Facing, Resolution,
    ResolutionRange,
};
pub use frame::FrameBuffer;
pub use manager::{DeviceManager, FrameReceiver};
pub use synthetic::SyntheticBackend;
