#![no_std]
#[cfg(any(test, feature = "mock"))]
extern crate std;

pub mod bus;
pub mod clock;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod rotation;
pub mod semaphore;
pub mod sensor;

pub use bus::{BlockReadBus, BusError, BusSpeed, I2cRegisterBus, RegisterBus, SpiRegisterBus};
pub use clock::Clock;
pub use rotation::Rotation;
pub use semaphore::{AtomicSemaphore, Semaphore, SemaphoreGuard};
