use super::PressureSource;
use aeroboard_core::config::BaroConfig;
use aeroboard_core::health::{HealthStatus, HealthTracker, Reading};
use aeroboard_core::OutlierFilter;
use aeroboard_hal::semaphore::Semaphore;
use aeroboard_hal::Clock;

/// One barometer instance: filters the conversions of its source and
/// publishes the average of the accepted ones.
pub struct BaroBackend<'a, P, C, S, const N: usize> {
    source: P,
    clock: C,
    frontend: &'a HealthTracker<S, N>,
    instance: u8,
    pressure_check: OutlierFilter,
}

impl<'a, P, C, S, const N: usize> BaroBackend<'a, P, C, S, N>
where
    P: PressureSource,
    C: Clock,
    S: Semaphore,
{
    /// `instance` comes from [`HealthTracker::register`]
    pub fn new(
        source: P,
        clock: C,
        frontend: &'a HealthTracker<S, N>,
        instance: u8,
        config: BaroConfig,
    ) -> Self {
        Self {
            source,
            clock,
            frontend,
            instance,
            pressure_check: OutlierFilter::new(config.pressure_check),
        }
    }

    /// Sanity check a pressure against the running mean
    pub fn pressure_ok(&mut self, pressure: f32) -> bool {
        self.pressure_check.filter(pressure)
    }

    pub fn copy_to_frontend(&self, pressure: f32, temperature: f32) -> bool {
        let reading = Reading {
            value: pressure,
            aux: temperature,
        };
        self.frontend
            .copy_to_frontend(self.instance, reading, self.clock.millis())
    }

    /// Drain the source and publish the mean of the accepted conversions.
    /// Returns how many were accepted.
    pub fn update(&mut self) -> u32 {
        let mut pressure = 0.0;
        let mut temperature = 0.0;
        let mut count = 0u32;
        while let Some((p, t)) = self.source.next_sample() {
            if !self.pressure_ok(p) {
                continue;
            }
            pressure += p;
            temperature += t;
            count += 1;
        }
        if count > 0 {
            self.copy_to_frontend(pressure / count as f32, temperature / count as f32);
        }
        count
    }

    pub fn update_healthy_flag(&self) {
        self.frontend
            .update_healthy_flag(self.instance, self.clock.millis());
    }

    /// Regular entry point from the scheduler
    pub fn backend_update(&mut self) -> u32 {
        let count = self.update();
        self.update_healthy_flag();
        count
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    pub fn healthy(&self) -> bool {
        self.frontend.healthy(self.instance)
    }

    pub fn status(&self) -> Option<HealthStatus> {
        self.frontend.status(self.instance)
    }

    pub fn mean_pressure(&self) -> f32 {
        self.pressure_check.mean()
    }

    /// Conversions rejected by the pressure check
    pub fn error_count(&self) -> u32 {
        self.pressure_check.error_count()
    }

    pub fn release(self) -> (P, C) {
        (self.source, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeroboard_core::HealthConfig;
    use aeroboard_hal::AtomicSemaphore;
    use aeroboard_hal::mock::MockClock;
    use std::collections::VecDeque;

    struct Script(VecDeque<(f32, f32)>);

    impl PressureSource for Script {
        fn next_sample(&mut self) -> Option<(f32, f32)> {
            self.0.pop_front()
        }
    }

    #[test]
    fn test_outlier_is_left_out_of_the_average() {
        let mut tracker: HealthTracker<AtomicSemaphore, 2> =
            HealthTracker::new(HealthConfig::default(), AtomicSemaphore::new());
        let instance = tracker.register();
        let clock = MockClock::at_us(1_000_000);
        let source = Script(VecDeque::from([(101_325.0, 20.0), (50_000.0, 20.0), (101_315.0, 22.0)]));
        let mut baro = BaroBackend::new(source, &clock, &tracker, instance, BaroConfig::default());

        assert_eq!(baro.update(), 2);
        assert_eq!(baro.error_count(), 1);
        let reading = tracker.reading(instance).unwrap();
        assert_eq!(reading.value, 101_320.0);
        assert_eq!(reading.aux, 21.0);
    }
}
