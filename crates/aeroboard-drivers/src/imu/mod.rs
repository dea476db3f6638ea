//! Interrupt driven inertial sensor acquisition.
//!
//! The data-ready interrupt starts a DMA block read through [`ImuIsr`]. The
//! transfer-complete interrupt hands the received bytes back, they are pushed
//! into the ring of an [`ImuShared`] and the drain task is signalled. The
//! sensor driver itself runs in task context and only ever pops from the ring.

pub mod invensense;

pub use invensense::{Invensense, InvensenseType};

use aeroboard_core::config::IMU_RING_LEN;
use aeroboard_core::{Deferred, OverflowPolicy, SampleRing};
use aeroboard_hal::{BlockReadBus, BusError};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Accel, temperature and gyro output registers, big endian
pub const SAMPLE_LEN: usize = 14;

pub type RawSample = [u8; SAMPLE_LEN];

/// State shared by the interrupt half and the task half of one IMU.
pub struct ImuShared<const N: usize = IMU_RING_LEN> {
    ring: SampleRing<RawSample, N>,
    in_flight: AtomicBool,
    retries: AtomicU32,
    pending: Deferred,
}

impl<const N: usize> Default for ImuShared<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ImuShared<N> {
    pub const fn new() -> Self {
        Self {
            ring: SampleRing::new(OverflowPolicy::DropNewest),
            in_flight: AtomicBool::new(false),
            retries: AtomicU32::new(0),
            pending: Deferred::new(),
        }
    }

    /// True when the ring was filled since the last call
    pub fn take_pending(&self) -> bool {
        self.pending.take()
    }

    pub async fn wait(&self) {
        self.pending.wait().await
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn overflows(&self) -> u32 {
        self.ring.overflows()
    }

    /// Data-ready edges that arrived while a transfer was still running
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn pop(&self) -> Option<RawSample> {
        self.ring.pop()
    }

    pub(crate) fn request_drain(&self) {
        self.pending.signal();
    }
}

/// Interrupt half of an IMU.
pub struct ImuIsr<'a, B, const N: usize = IMU_RING_LEN> {
    bus: B,
    shared: &'a ImuShared<N>,
    reg: u8,
}

impl<'a, B: BlockReadBus, const N: usize> ImuIsr<'a, B, N> {
    /// `reg` is the first output register of a sample
    pub fn new(bus: B, shared: &'a ImuShared<N>, reg: u8) -> Self {
        Self { bus, shared, reg }
    }

    /// Data-ready interrupt.
    ///
    /// While a transfer is still in flight its completion has not been seen,
    /// so the same read is started again rather than queueing another one.
    pub fn on_data_ready(&mut self) -> Result<(), BusError> {
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            self.shared.retries.fetch_add(1, Ordering::Relaxed);
        }
        let started = self.bus.start_block_read(self.reg, SAMPLE_LEN);
        if started.is_err() {
            self.shared.in_flight.store(false, Ordering::Release);
        }
        started
    }

    /// Transfer-complete interrupt, `sample` is the received block.
    pub fn on_transfer_complete(&mut self, sample: &RawSample) {
        if !self.shared.ring.push(*sample) {
            trace!("imu ring overflow");
        }
        self.shared.in_flight.store(false, Ordering::Release);
        self.shared.pending.signal();
    }

    pub fn release(self) -> B {
        self.bus
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuStats {
    /// Samples accepted by the last drain
    pub last_drain: u16,
    pub last_drain_us: u32,
    pub restarts: u32,
    /// Samples dropped because the ring was full
    pub overflows: u32,
    pub retried_transfers: u32,
    pub clipped: u32,
    pub accel_rejects: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeroboard_hal::mock::MockDmaBus;

    #[test]
    fn test_completed_transfer_lands_in_ring() {
        let shared: ImuShared<4> = ImuShared::new();
        let mut isr = ImuIsr::new(MockDmaBus::new(), &shared, 0x3B);
        isr.on_data_ready().unwrap();
        assert!(shared.in_flight());
        isr.on_transfer_complete(&[7; SAMPLE_LEN]);
        assert!(!shared.in_flight());
        assert!(shared.take_pending());
        assert_eq!(shared.pop(), Some([7; SAMPLE_LEN]));
        assert_eq!(isr.release().started(), &[(0x3B, SAMPLE_LEN)]);
    }

    #[test]
    fn test_overlapping_data_ready_retries_transfer() {
        let shared: ImuShared<4> = ImuShared::new();
        let mut isr = ImuIsr::new(MockDmaBus::new(), &shared, 0x3B);
        isr.on_data_ready().unwrap();
        isr.on_data_ready().unwrap();
        assert_eq!(shared.retries(), 1);
        assert!(shared.is_empty());
        assert_eq!(isr.release().started().len(), 2);
    }

    #[test]
    fn test_failed_start_clears_in_flight() {
        let shared: ImuShared<4> = ImuShared::new();
        let mut dma = MockDmaBus::new();
        dma.fail_next_starts(1);
        let mut isr = ImuIsr::new(dma, &shared, 0x3B);
        assert_eq!(isr.on_data_ready(), Err(BusError::Timeout));
        assert!(!shared.in_flight());
        isr.on_data_ready().unwrap();
        assert_eq!(shared.retries(), 0);
    }

    #[test]
    fn test_full_ring_keeps_oldest() {
        let shared: ImuShared<2> = ImuShared::new();
        let mut isr = ImuIsr::new(MockDmaBus::new(), &shared, 0x3B);
        for i in 0..3u8 {
            isr.on_data_ready().unwrap();
            isr.on_transfer_complete(&[i; SAMPLE_LEN]);
        }
        assert_eq!(shared.overflows(), 1);
        assert_eq!(shared.pop(), Some([0; SAMPLE_LEN]));
        assert_eq!(shared.pop(), Some([1; SAMPLE_LEN]));
        assert_eq!(shared.pop(), None);
    }
}
