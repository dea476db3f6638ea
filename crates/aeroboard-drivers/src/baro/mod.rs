//! Barometer backends share one frontend [`HealthTracker`] per board.
//!
//! [`HealthTracker`]: aeroboard_core::HealthTracker

pub mod backend;

pub use backend::BaroBackend;

/// A barometer that produces finished conversions.
pub trait PressureSource {
    /// Next conversion as pressure in Pa and temperature in °C, None when
    /// nothing new is available.
    fn next_sample(&mut self) -> Option<(f32, f32)>;
}

impl<T: PressureSource + ?Sized> PressureSource for &mut T {
    fn next_sample(&mut self) -> Option<(f32, f32)> {
        (**self).next_sample()
    }
}
