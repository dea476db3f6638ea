#![no_std]
#[cfg(test)]
extern crate std;

mod fmt;

pub mod accumulator;
pub mod config;
pub mod health;
pub mod lowpass;
pub mod outlier;
pub mod rc;
pub mod registry;
pub mod ring;
pub mod scheduler;
pub mod sync;

pub use accumulator::Accumulator;
pub use config::BoardConfig;
pub use health::{HealthConfig, HealthStatus, HealthTracker};
pub use outlier::{OutlierConfig, OutlierFilter, RejectPolicy};
pub use registry::InstanceRegistry;
pub use ring::{OverflowPolicy, SampleRing};
pub use scheduler::{Deferred, Periodic};
pub use sync::Shared;
