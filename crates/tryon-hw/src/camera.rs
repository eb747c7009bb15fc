//! Camera descriptors and the backend seam used by the device manager.

use crate::frame::FrameBuffer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no {0} camera found")]
    NoDeviceFound(Facing),
    #[error("device busy")]
    DeviceBusy,
    #[error("camera acquisition timed out")]
    Timeout,
    #[error("camera disconnected: {0}")]
    Disconnected(String),
}

/// Which way a camera points relative to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Selfie camera, looking at the viewer.
    Front,
    /// Environment camera.
    Rear,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Front => Facing::Rear,
            Facing::Rear => Facing::Front,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => f.write_str("front"),
            Facing::Rear => f.write_str("rear"),
        }
    }
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Ok(Facing::Front),
            "rear" | "back" | "environment" => Ok(Facing::Rear),
            other => Err(format!("unknown camera facing: {other:?} (expected front or rear)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Inclusive range of capture resolutions a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRange {
    pub min: Resolution,
    pub max: Resolution,
}

impl ResolutionRange {
    /// A device that only captures at one size.
    pub fn fixed(width: u32, height: u32) -> Self {
        let r = Resolution { width, height };
        Self { min: r, max: r }
    }

    pub fn contains(&self, res: Resolution) -> bool {
        (self.min.width..=self.max.width).contains(&res.width)
            && (self.min.height..=self.max.height).contains(&res.height)
    }
}

/// A camera the backend can open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Backend-specific identifier (a device node path for V4L2).
    pub id: String,
    pub name: String,
    pub facing: Facing,
    pub resolutions: ResolutionRange,
}

/// Platform camera access. Opening a device is the only operation in the
/// system that touches hardware, and it may block for an unbounded time
/// (e.g. a permission prompt).
pub trait CameraBackend: Send + Sync {
    /// List the cameras currently available.
    fn enumerate(&self) -> Vec<CameraDevice>;

    /// Acquire exclusive access to `device`. Dropping the returned stream
    /// releases the device.
    fn open(&self, device: &CameraDevice) -> Result<Box<dyn CameraStream>, DeviceError>;
}

/// An open, exclusively held camera delivering frames at its own cadence.
pub trait CameraStream: Send {
    fn device(&self) -> &CameraDevice;

    /// Block until the next frame is available or the stream's poll interval
    /// elapses. `Ok(None)` means nothing arrived in time; the caller decides
    /// how long a silent stream is tolerated.
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DeviceError>;
}

/// Pick the first device with the requested facing.
pub fn select_device(devices: &[CameraDevice], facing: Facing) -> Result<CameraDevice, DeviceError> {
    devices
        .iter()
        .find(|d| d.facing == facing)
        .cloned()
        .ok_or(DeviceError::NoDeviceFound(facing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, facing: Facing) -> CameraDevice {
        CameraDevice {
            id: id.into(),
            name: id.into(),
            facing,
            resolutions: ResolutionRange::fixed(640, 480),
        }
    }

    #[test]
    fn test_opposite_is_involution() {
        for facing in [Facing::Front, Facing::Rear] {
            assert_eq!(facing.opposite().opposite(), facing);
            assert_ne!(facing.opposite(), facing);
        }
    }

    #[test]
    fn test_parse_facing_aliases() {
        assert_eq!("user".parse::<Facing>().unwrap(), Facing::Front);
        assert_eq!(" Front ".parse::<Facing>().unwrap(), Facing::Front);
        assert_eq!("environment".parse::<Facing>().unwrap(), Facing::Rear);
        assert!("sideways".parse::<Facing>().is_err());
    }

    #[test]
    fn test_select_device_by_facing() {
        let devices = vec![device("a", Facing::Rear), device("b", Facing::Front)];
        assert_eq!(select_device(&devices, Facing::Front).unwrap().id, "b");
        assert_eq!(select_device(&devices, Facing::Rear).unwrap().id, "a");
    }

    #[test]
    fn test_select_device_missing_facing() {
        let devices = vec![device("a", Facing::Front)];
        assert_eq!(
            select_device(&devices, Facing::Rear),
            Err(DeviceError::NoDeviceFound(Facing::Rear))
        );
    }

    #[test]
    fn test_resolution_range_contains() {
        let range = ResolutionRange {
            min: Resolution { width: 320, height: 240 },
            max: Resolution { width: 1280, height: 720 },
        };
        assert!(range.contains(Resolution { width: 640, height: 480 }));
        assert!(!range.contains(Resolution { width: 1920, height: 1080 }));
    }
}
