use aeroboard_hal::semaphore::{Semaphore, SemaphoreGuard};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// State shared between contexts, reachable only while holding its semaphore.
///
/// Interrupt handlers must use [`Shared::try_lock`]; tasks may block in
/// [`Shared::lock`].
pub struct Shared<T, S> {
    sem: S,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send, S: Sync> Sync for Shared<T, S> {}

impl<T, S: Semaphore> Shared<T, S> {
    pub const fn new(value: T, sem: S) -> Self {
        Self {
            sem,
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self, timeout_us: u32) -> Option<SharedGuard<'_, T, S>> {
        let guard = SemaphoreGuard::take(&self.sem, timeout_us)?;
        Some(self.guarded(guard))
    }

    pub fn try_lock(&self) -> Option<SharedGuard<'_, T, S>> {
        let guard = SemaphoreGuard::try_take(&self.sem)?;
        Some(self.guarded(guard))
    }

    fn guarded<'a>(&'a self, guard: SemaphoreGuard<'a, S>) -> SharedGuard<'a, T, S> {
        SharedGuard {
            _guard: guard,
            // SAFETY: the semaphore is held for as long as the reference lives
            value: unsafe { &mut *self.value.get() },
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

pub struct SharedGuard<'a, T, S: Semaphore> {
    value: &'a mut T,
    _guard: SemaphoreGuard<'a, S>,
}

impl<T, S: Semaphore> Deref for SharedGuard<'_, T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T, S: Semaphore> DerefMut for SharedGuard<'_, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeroboard_hal::AtomicSemaphore;

    #[test]
    fn test_second_lock_fails_while_held() {
        let shared = Shared::new(0u32, AtomicSemaphore::new());
        {
            let mut guard = shared.try_lock().unwrap();
            *guard += 1;
            assert!(shared.try_lock().is_none());
            assert!(shared.lock(5).is_none());
        }
        assert_eq!(*shared.try_lock().unwrap(), 1);
    }
}
