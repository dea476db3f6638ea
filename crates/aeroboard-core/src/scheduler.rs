use aeroboard_hal::clock::elapsed;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Work requested from interrupt context and carried out by a task.
///
/// Repeated requests before the task runs collapse into one.
pub struct Deferred {
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl Deferred {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// Interrupt side
    pub fn signal(&self) {
        self.signal.signal(());
    }

    /// Task side, true when work was requested since the last call
    pub fn take(&self) -> bool {
        self.signal.try_take().is_some()
    }

    pub fn pending(&self) -> bool {
        self.signal.signaled()
    }

    /// Task side for async executors
    pub async fn wait(&self) {
        self.signal.wait().await
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic callback driven by polling a microsecond clock.
///
/// Keeps its phase while it is polled on time and resynchronises after a
/// missed period.
#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    period_us: u32,
    last_us: Option<u32>,
}

impl Periodic {
    pub const fn new(period_us: u32) -> Self {
        Self {
            period_us,
            last_us: None,
        }
    }

    pub const fn from_hz(rate_hz: u32) -> Self {
        Self::new(1_000_000 / rate_hz)
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// True at most once per period. The first poll always fires.
    pub fn poll(&mut self, now_us: u32) -> bool {
        let Some(last) = self.last_us else {
            self.last_us = Some(now_us);
            return true;
        };
        let since = elapsed(now_us, last);
        if since < self.period_us {
            return false;
        }
        self.last_us = Some(if since < self.period_us.saturating_mul(2) {
            last.wrapping_add(self.period_us)
        } else {
            now_us
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_deferred_collapses_requests() {
        let work = Deferred::new();
        assert!(!work.take());
        work.signal();
        work.signal();
        assert!(work.pending());
        assert!(work.take());
        assert!(!work.take());
    }

    #[test]
    fn test_deferred_wait_returns_after_signal() {
        let work = Deferred::new();
        work.signal();
        block_on(work.wait());
        assert!(!work.pending());
    }

    #[test]
    fn test_periodic_keeps_phase() {
        let mut timer = Periodic::new(1000);
        assert!(timer.poll(0));
        assert!(!timer.poll(999));
        assert!(timer.poll(1200));
        // next deadline is 2000, not 2200
        assert!(timer.poll(2000));
        assert!(!timer.poll(2500));
    }

    #[test]
    fn test_periodic_resyncs_and_wraps() {
        let mut timer = Periodic::from_hz(1000);
        assert!(timer.poll(u32::MAX - 100));
        assert!(!timer.poll(u32::MAX));
        assert!(timer.poll(899));
        assert!(timer.poll(50_000));
        assert!(!timer.poll(50_500));
    }
}
