use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// What a push does when every slot holds an unread sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverflowPolicy {
    /// Refuse the new sample. Unread data keeps its order.
    DropNewest,
    /// Overwrite the oldest unread sample.
    DropOldest,
}

/// Single-producer / single-consumer ring handing samples from an interrupt
/// handler to a task.
///
/// The producer is assumed to preempt the consumer, never the other way
/// round. Indices run over `0..2N` so a full ring is distinguishable from an
/// empty one without sacrificing a slot.
pub struct SampleRing<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    read: AtomicUsize,
    write: AtomicUsize,
    overflows: AtomicU32,
    policy: OverflowPolicy,
}

unsafe impl<T: Send, const N: usize> Sync for SampleRing<T, N> {}

impl<T: Copy, const N: usize> SampleRing<T, N> {
    pub const fn new(policy: OverflowPolicy) -> Self {
        assert!(N > 0);
        Self {
            slots: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            overflows: AtomicU32::new(0),
            policy,
        }
    }

    #[inline]
    fn advance(index: usize) -> usize {
        (index + 1) % (2 * N)
    }

    #[inline]
    fn distance(write: usize, read: usize) -> usize {
        (write + 2 * N - read) % (2 * N)
    }

    /// Producer side. Returns false when the sample was dropped.
    pub fn push(&self, sample: T) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);

        if Self::distance(write, read) == N {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                OverflowPolicy::DropNewest => {
                    trace!("ring full, sample dropped");
                    return false;
                }
                OverflowPolicy::DropOldest => {
                    // a failed exchange means the consumer freed the slot itself
                    let _ = self.read.compare_exchange(
                        read,
                        Self::advance(read),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                }
            }
        }

        // SAFETY: the slot at `write` is not visible to the consumer until the
        // index below is published.
        unsafe {
            (*self.slots[write % N].get()).write(sample);
        }
        self.write.store(Self::advance(write), Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<T> {
        loop {
            let read = self.read.load(Ordering::Acquire);
            let write = self.write.load(Ordering::Acquire);
            if read == write {
                return None;
            }
            // SAFETY: `read != write` so the slot was published by the producer.
            let sample = unsafe { (*self.slots[read % N].get()).assume_init_read() };
            // the producer may have dropped this slot while we copied it
            if self
                .read
                .compare_exchange(read, Self::advance(read), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(sample);
            }
        }
    }

    pub fn len(&self) -> usize {
        Self::distance(
            self.write.load(Ordering::Acquire),
            self.read.load(Ordering::Acquire),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of pushes that found the ring full
    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Consumer side: discard everything unread.
    pub fn clear(&self) {
        let write = self.write.load(Ordering::Acquire);
        self.read.store(write, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_fifo_order_with_interleaving() {
        let ring: SampleRing<u32, 4> = SampleRing::new(OverflowPolicy::DropNewest);
        assert!(ring.pop().is_none());
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.pop(), Some(1));
        ring.push(3);
        ring.push(4);
        ring.push(5);
        assert_eq!(ring.len(), 4);
        let drained: Vec<u32> = core::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(drained, [2, 3, 4, 5]);
        assert_eq!(ring.overflows(), 0);
    }

    #[test]
    fn test_drop_newest_keeps_unread_data() {
        let ring: SampleRing<u8, 3> = SampleRing::new(OverflowPolicy::DropNewest);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.overflows(), 2);
        let drained: Vec<u8> = core::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(drained, [0, 1, 2]);
    }

    #[test]
    fn test_drop_oldest_overwrites_unread_data() {
        let ring: SampleRing<u8, 3> = SampleRing::new(OverflowPolicy::DropOldest);
        for i in 0..5 {
            assert!(ring.push(i));
        }
        assert_eq!(ring.overflows(), 2);
        assert_eq!(ring.len(), 3);
        let drained: Vec<u8> = core::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(drained, [2, 3, 4]);
    }

    #[test]
    fn test_indices_wrap_many_times() {
        let ring: SampleRing<u16, 5> = SampleRing::new(OverflowPolicy::DropNewest);
        for i in 0..1000u16 {
            assert!(ring.push(i));
            if i % 3 == 2 {
                assert!(ring.push(i + 10_000));
                assert_eq!(ring.pop(), Some(i));
                assert_eq!(ring.pop(), Some(i + 10_000));
            } else {
                assert_eq!(ring.pop(), Some(i));
            }
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_clear_discards_unread() {
        let ring: SampleRing<u8, 4> = SampleRing::new(OverflowPolicy::DropNewest);
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert!(ring.is_empty());
        ring.push(3);
        assert_eq!(ring.pop(), Some(3));
    }
}
