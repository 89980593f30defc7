//! Rotation compensation for frames handed to the detector
//!
//! The detector wants frames upright. How far a frame must be turned depends
//! on how the display is rotated, how the sensor is mounted, and whether the
//! lens faces the user (front lenses see the world mirrored).

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A quarter-turn rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u32) -> Option<Rotation> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// The rotation seen through a mirror.
    pub fn mirrored(self) -> Rotation {
        match self {
            Rotation::Deg0 => Rotation::Deg0,
            Rotation::Deg90 => Rotation::Deg270,
            Rotation::Deg180 => Rotation::Deg180,
            Rotation::Deg270 => Rotation::Deg90,
        }
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> u32 {
        rotation.degrees()
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        Rotation::from_degrees(degrees).ok_or_else(|| format!("not a quarter turn: {degrees}"))
    }
}

/// Base compensation per display rotation.
fn base_compensation(device_rotation: Rotation) -> u32 {
    match device_rotation {
        Rotation::Deg0 => 90,
        Rotation::Deg90 => 0,
        Rotation::Deg180 => 270,
        Rotation::Deg270 => 180,
    }
}

/// Rotation the detector must apply to a frame to see it upright.
///
/// Always one of the four quarter turns; a sensor mount that is not a
/// multiple of 90 degrees is logged and treated as no rotation.
pub fn resolve(device_rotation: Rotation, sensor_mount: u32, front_facing: bool) -> Rotation {
    let device_rotation = if front_facing {
        device_rotation.mirrored()
    } else {
        device_rotation
    };

    let compensation = (base_compensation(device_rotation) + sensor_mount % 360 + 270) % 360;

    Rotation::from_degrees(compensation).unwrap_or_else(|| {
        warn!(
            compensation,
            sensor_mount,
            device_rotation = device_rotation.degrees(),
            "Bad rotation value, using 0"
        );
        Rotation::Deg0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_camera_portrait() {
        // Typical phone: sensor mounted at 90, display upright.
        assert_eq!(resolve(Rotation::Deg0, 90, false), Rotation::Deg90);
        assert_eq!(resolve(Rotation::Deg90, 90, false), Rotation::Deg0);
        assert_eq!(resolve(Rotation::Deg180, 90, false), Rotation::Deg270);
        assert_eq!(resolve(Rotation::Deg270, 90, false), Rotation::Deg180);
    }

    #[test]
    fn front_camera_mirrors_device_rotation() {
        assert_eq!(resolve(Rotation::Deg0, 270, true), Rotation::Deg270);
        assert_eq!(resolve(Rotation::Deg90, 270, true), Rotation::Deg0);
        assert_eq!(resolve(Rotation::Deg270, 270, true), Rotation::Deg180);
    }

    #[test]
    fn odd_mount_falls_back_to_zero() {
        assert_eq!(resolve(Rotation::Deg0, 45, false), Rotation::Deg0);
        assert_eq!(resolve(Rotation::Deg90, 91, true), Rotation::Deg0);
    }

    #[test]
    fn always_a_quarter_turn_and_deterministic() {
        for rotation in Rotation::ALL {
            for mount in 0..720 {
                for front in [false, true] {
                    let first = resolve(rotation, mount, front);
                    assert!(Rotation::ALL.contains(&first));
                    assert_eq!(first, resolve(rotation, mount, front));
                }
            }
        }
    }

    #[test]
    fn serializes_as_degrees() {
        assert_eq!(serde_json::to_string(&Rotation::Deg270).unwrap(), "270");
        assert_eq!(serde_json::from_str::<Rotation>("90").unwrap(), Rotation::Deg90);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }
}
