use core::sync::atomic::{AtomicBool, Ordering};

/// Timeout value meaning "wait until the semaphore is given".
pub const BLOCK_FOREVER: u32 = u32::MAX;

/// Binary semaphore shared between a sensor's ISR side and task side.
pub trait Semaphore {
    /// Try to take the semaphore, waiting at most `timeout_us`.
    fn take(&self, timeout_us: u32) -> bool;

    fn take_nonblocking(&self) -> bool;

    fn give(&self);
}

impl<S: Semaphore + ?Sized> Semaphore for &S {
    fn take(&self, timeout_us: u32) -> bool {
        (**self).take(timeout_us)
    }

    fn take_nonblocking(&self) -> bool {
        (**self).take_nonblocking()
    }

    fn give(&self) {
        (**self).give()
    }
}

/// Gives the semaphore back when dropped.
pub struct SemaphoreGuard<'a, S: Semaphore + ?Sized> {
    sem: &'a S,
}

impl<'a, S: Semaphore + ?Sized> SemaphoreGuard<'a, S> {
    pub fn take(sem: &'a S, timeout_us: u32) -> Option<Self> {
        sem.take(timeout_us).then_some(Self { sem })
    }

    pub fn try_take(sem: &'a S) -> Option<Self> {
        sem.take_nonblocking().then_some(Self { sem })
    }
}

impl<S: Semaphore + ?Sized> Drop for SemaphoreGuard<'_, S> {
    fn drop(&mut self) {
        self.sem.give();
    }
}

/// Lock-free semaphore over a single flag.
///
/// A blocking take spins roughly once per microsecond of timeout; there is no
/// scheduler to yield to.
pub struct AtomicSemaphore {
    taken: AtomicBool,
}

impl AtomicSemaphore {
    pub const fn new() -> Self {
        Self {
            taken: AtomicBool::new(false),
        }
    }

    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::Relaxed)
    }
}

impl Default for AtomicSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore for AtomicSemaphore {
    fn take(&self, timeout_us: u32) -> bool {
        let mut spins = 0u32;
        loop {
            if self.take_nonblocking() {
                return true;
            }
            if timeout_us != BLOCK_FOREVER {
                if spins >= timeout_us {
                    return false;
                }
                spins += 1;
            }
            core::hint::spin_loop();
        }
    }

    fn take_nonblocking(&self) -> bool {
        self.taken
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn give(&self) {
        self.taken.store(false, Ordering::Release);
    }
}
