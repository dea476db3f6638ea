use crate::registry::InstanceRegistry;
use crate::sync::Shared;
use aeroboard_hal::clock::elapsed;
use aeroboard_hal::semaphore::{BLOCK_FOREVER, Semaphore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// A sensor must report at least this often
    pub update_timeout_ms: u32,
    /// and its value must change at least this often
    pub change_timeout_ms: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            update_timeout_ms: 500,
            change_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_update_ms: u32,
    pub last_change_ms: u32,
}

/// Latest value published by a backend: pressure and temperature for a baro.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub value: f32,
    pub aux: f32,
}

#[derive(Default)]
struct Slot {
    reading: Reading,
    status: HealthStatus,
}

/// Frontend side of a sensor family: the readings of every instance plus their
/// freshness, guarded by one semaphore.
pub struct HealthTracker<S, const N: usize> {
    config: HealthConfig,
    sensors: Shared<InstanceRegistry<Slot, N>, S>,
}

impl<S: Semaphore, const N: usize> HealthTracker<S, N> {
    pub const fn new(config: HealthConfig, sem: S) -> Self {
        Self {
            config,
            sensors: Shared::new(InstanceRegistry::new(), sem),
        }
    }

    /// Panics when more than `N` instances are registered.
    pub fn register(&mut self) -> u8 {
        self.sensors.get_mut().register(Slot::default())
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Publish a reading. `last_change_ms` only moves when the reading differs
    /// from the previous one. Returns false for an unknown instance.
    pub fn copy_to_frontend(&self, instance: u8, reading: Reading, now_ms: u32) -> bool {
        let Some(mut sensors) = self.sensors.lock(BLOCK_FOREVER) else {
            return false;
        };
        let Some(slot) = sensors.get_mut(instance) else {
            return false;
        };
        if slot.reading != reading {
            slot.status.last_change_ms = now_ms;
        }
        slot.reading = reading;
        slot.status.last_update_ms = now_ms;
        true
    }

    /// Recompute the healthy flag. Skipped silently when the semaphore is
    /// contended or the instance is unknown.
    pub fn update_healthy_flag(&self, instance: u8, now_ms: u32) {
        let Some(mut sensors) = self.sensors.try_lock() else {
            return;
        };
        let Some(slot) = sensors.get_mut(instance) else {
            return;
        };
        let status = &mut slot.status;
        let healthy = elapsed(now_ms, status.last_update_ms) < self.config.update_timeout_ms
            && elapsed(now_ms, status.last_change_ms) < self.config.change_timeout_ms
            && slot.reading.value != 0.0;
        if status.healthy && !healthy {
            warn!("sensor {} unhealthy", instance);
        }
        status.healthy = healthy;
    }

    pub fn status(&self, instance: u8) -> Option<HealthStatus> {
        let sensors = self.sensors.lock(BLOCK_FOREVER)?;
        sensors.get(instance).map(|s| s.status)
    }

    pub fn reading(&self, instance: u8) -> Option<Reading> {
        let sensors = self.sensors.lock(BLOCK_FOREVER)?;
        sensors.get(instance).map(|s| s.reading)
    }

    pub fn healthy(&self, instance: u8) -> bool {
        self.status(instance).is_some_and(|s| s.healthy)
    }

    pub fn len(&self) -> usize {
        self.sensors
            .lock(BLOCK_FOREVER)
            .map(|sensors| sensors.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeroboard_hal::AtomicSemaphore;

    fn tracker() -> HealthTracker<AtomicSemaphore, 2> {
        HealthTracker::new(HealthConfig::default(), AtomicSemaphore::new())
    }

    fn reading(value: f32) -> Reading {
        Reading { value, aux: 20.0 }
    }

    #[test]
    fn test_fresh_and_changing_is_healthy() {
        let mut t = tracker();
        let i = t.register();
        t.copy_to_frontend(i, reading(101_325.0), 1000);
        t.update_healthy_flag(i, 1100);
        assert!(t.healthy(i));
    }

    #[test]
    fn test_frozen_value_is_unhealthy_despite_updates() {
        let mut t = tracker();
        let i = t.register();
        t.copy_to_frontend(i, reading(101_325.0), 1000);
        // identical readings keep arriving
        for now in (1100..=3500).step_by(100) {
            t.copy_to_frontend(i, reading(101_325.0), now);
            t.update_healthy_flag(i, now);
        }
        let status = t.status(i).unwrap();
        assert_eq!(status.last_update_ms, 3500);
        assert_eq!(status.last_change_ms, 1000);
        assert!(!status.healthy);
    }

    #[test]
    fn test_stale_update_is_unhealthy() {
        let mut t = tracker();
        let i = t.register();
        t.copy_to_frontend(i, reading(1.0), 1000);
        t.update_healthy_flag(i, 1600);
        assert!(!t.healthy(i));
    }

    #[test]
    fn test_zero_value_is_unhealthy() {
        let mut t = tracker();
        let i = t.register();
        t.copy_to_frontend(i, reading(0.0), 10);
        t.update_healthy_flag(i, 20);
        assert!(!t.healthy(i));
    }

    #[test]
    fn test_timeouts_survive_clock_wrap() {
        let mut t = tracker();
        let i = t.register();
        t.copy_to_frontend(i, reading(5.0), u32::MAX - 50);
        t.update_healthy_flag(i, 100);
        assert!(t.healthy(i));
    }

    #[test]
    fn test_contended_update_is_skipped() {
        let sem = AtomicSemaphore::new();
        let mut t: HealthTracker<&AtomicSemaphore, 1> =
            HealthTracker::new(HealthConfig::default(), &sem);
        let i = t.register();
        t.copy_to_frontend(i, reading(5.0), 0);
        assert!(sem.take_nonblocking());
        t.update_healthy_flag(i, 10);
        sem.give();
        assert!(!t.healthy(i));
        t.update_healthy_flag(i, 10);
        assert!(t.healthy(i));
    }

    #[test]
    fn test_unknown_instance_is_ignored() {
        let t = tracker();
        t.update_healthy_flag(7, 0);
        assert!(!t.copy_to_frontend(7, reading(1.0), 0));
        assert!(t.status(7).is_none());
    }
}
