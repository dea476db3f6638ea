#![no_std]

#[cfg(test)]
extern crate std;

mod fmt;

pub mod baro;
pub mod compass;
pub mod error;
pub mod imu;

pub use baro::{BaroBackend, PressureSource};
pub use compass::{CompassShared, FieldAccumulator, Hmc5843, HmcIsr, HmcType, Mag3110};
pub use error::{SensorError, SensorResult};
pub use imu::{ImuIsr, ImuShared, ImuStats, Invensense, InvensenseType};
