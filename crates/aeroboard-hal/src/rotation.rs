use core::f32::consts::{FRAC_PI_2, PI};
use nalgebra::{Rotation3, Vector3};

/// Mounting orientation of a sensor relative to the airframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rotation {
    #[default]
    None,
    Yaw90,
    Yaw180,
    Yaw270,
    Roll180,
    Pitch180,
    Roll180Yaw90,
    Roll180Yaw270,
}

impl Rotation {
    fn euler(self) -> (f32, f32, f32) {
        match self {
            Rotation::None => (0.0, 0.0, 0.0),
            Rotation::Yaw90 => (0.0, 0.0, FRAC_PI_2),
            Rotation::Yaw180 => (0.0, 0.0, PI),
            Rotation::Yaw270 => (0.0, 0.0, -FRAC_PI_2),
            Rotation::Roll180 => (PI, 0.0, 0.0),
            Rotation::Pitch180 => (0.0, PI, 0.0),
            Rotation::Roll180Yaw90 => (PI, 0.0, FRAC_PI_2),
            Rotation::Roll180Yaw270 => (PI, 0.0, -FRAC_PI_2),
        }
    }

    pub fn matrix(self) -> Rotation3<f32> {
        let (roll, pitch, yaw) = self.euler();
        Rotation3::from_euler_angles(roll, pitch, yaw)
    }

    /// Rotate a body vector. Quarter turns are exact, the matrix is only used
    /// for the combined orientations.
    pub fn apply(self, v: Vector3<f32>) -> Vector3<f32> {
        match self {
            Rotation::None => v,
            Rotation::Yaw90 => Vector3::new(-v.y, v.x, v.z),
            Rotation::Yaw180 => Vector3::new(-v.x, -v.y, v.z),
            Rotation::Yaw270 => Vector3::new(v.y, -v.x, v.z),
            Rotation::Roll180 => Vector3::new(v.x, -v.y, -v.z),
            Rotation::Pitch180 => Vector3::new(-v.x, v.y, -v.z),
            _ => self.matrix() * v,
        }
    }
}
