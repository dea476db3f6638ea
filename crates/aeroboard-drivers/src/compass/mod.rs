//! Magnetometer backends.
//!
//! Both parts sum corrected samples into a [`FieldAccumulator`] from their
//! sampling context; `read()` swaps the average out under the same semaphore
//! and publishes it.

pub mod hmc5843;
pub mod mag3110;

pub use hmc5843::{Hmc5843, HmcIsr, HmcType};
pub use mag3110::Mag3110;

use aeroboard_core::{Accumulator, Deferred, OverflowPolicy, SampleRing, Shared};
use aeroboard_hal::semaphore::{BLOCK_FOREVER, Semaphore};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use nalgebra::Vector3;

/// Slots in the HMC sample queue
pub const COMPASS_QUEUE_LEN: usize = 8;

/// Raw output words in register order
pub type MagSample = [i16; 3];

/// Corrected field summed between two reads.
pub struct FieldAccumulator<S> {
    inner: Shared<Accumulator, S>,
}

impl<S: Semaphore> FieldAccumulator<S> {
    pub fn new(ceiling: u16, sem: S) -> Self {
        Self {
            inner: Shared::new(Accumulator::new(ceiling), sem),
        }
    }

    /// Sampling side, may wait for the reader.
    pub fn add(&self, field: Vector3<f32>) -> bool {
        let Some(mut acc) = self.inner.lock(BLOCK_FOREVER) else {
            return false;
        };
        acc.add(field);
        true
    }

    /// Reader side. None while the sampling side holds the lock or nothing
    /// was accumulated.
    pub fn take_average(&self) -> Option<Vector3<f32>> {
        self.inner.try_lock()?.take_average()
    }

    pub fn count(&self) -> u16 {
        self.inner.lock(BLOCK_FOREVER).map(|acc| acc.count()).unwrap_or(0)
    }

    pub fn reset(&self) {
        if let Some(mut acc) = self.inner.lock(BLOCK_FOREVER) {
            acc.reset();
        }
    }
}

/// State shared by the interrupt half and the task half of an interrupt
/// driven compass.
pub struct CompassShared<S, const N: usize = COMPASS_QUEUE_LEN> {
    queue: SampleRing<MagSample, N>,
    in_progress: AtomicBool,
    retries: AtomicU32,
    pending: Deferred,
    field: FieldAccumulator<S>,
}

impl<S: Semaphore, const N: usize> CompassShared<S, N> {
    /// `ceiling` is the accumulator sample count at which the sum is halved
    pub fn new(ceiling: u16, sem: S) -> Self {
        Self {
            queue: SampleRing::new(OverflowPolicy::DropOldest),
            in_progress: AtomicBool::new(false),
            retries: AtomicU32::new(0),
            pending: Deferred::new(),
            field: FieldAccumulator::new(ceiling, sem),
        }
    }

    pub fn field(&self) -> &FieldAccumulator<S> {
        &self.field
    }

    /// True when a sample was queued since the last call
    pub fn take_pending(&self) -> bool {
        self.pending.take()
    }

    pub async fn wait(&self) {
        self.pending.wait().await
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Samples replaced by newer ones before they were read
    pub fn overflows(&self) -> u32 {
        self.queue.overflows()
    }

    /// Timer ticks that found the previous transfer unfinished
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeroboard_hal::AtomicSemaphore;

    #[test]
    fn test_reader_skips_while_sampler_holds_lock() {
        let sem = AtomicSemaphore::new();
        let field = FieldAccumulator::new(14, &sem);
        field.add(Vector3::new(1.0, 2.0, 3.0));

        assert!(sem.take_nonblocking());
        assert_eq!(field.take_average(), None);
        sem.give();

        assert_eq!(field.take_average(), Some(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(field.count(), 0);
    }

    #[test]
    fn test_queue_keeps_newest_samples() {
        let shared: CompassShared<AtomicSemaphore, 2> = CompassShared::new(14, AtomicSemaphore::new());
        for i in 0..3 {
            shared.queue.push([i, 0, 0]);
        }
        assert_eq!(shared.overflows(), 1);
        assert_eq!(shared.queue.pop(), Some([1, 0, 0]));
        assert_eq!(shared.queue.pop(), Some([2, 0, 0]));
    }
}
