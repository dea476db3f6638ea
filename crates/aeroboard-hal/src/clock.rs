/// Monotonic time source. Both counters are free running and wrap at `u32::MAX`.
pub trait Clock {
    fn millis(&self) -> u32;
    fn micros(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn millis(&self) -> u32 {
        (**self).millis()
    }

    fn micros(&self) -> u32 {
        (**self).micros()
    }
}

/// Time since `since`, correct across one counter wrap.
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}
