//! Tunables for every sensor pipeline, kept together so a parameter store
//! can persist them as one blob.

use crate::health::HealthConfig;
use crate::outlier::OutlierConfig;
use crate::rc::RcConfig;
use serde::{Deserialize, Serialize};

/// Slots in the IMU sample ring
pub const IMU_RING_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuConfig {
    /// Ring entries processed per drain
    pub drain_budget: u8,
    /// No sample for this long restarts the sensor
    pub stall_timeout_us: u32,
    pub fast_sampling: bool,
    /// Raw samples summed per published sample in fast sampling mode
    pub decimation: u8,
    /// m/s², any axis above counts as a clip
    pub clip_limit: f32,
    pub accel_filter_hz: f32,
    pub gyro_filter_hz: f32,
    pub accel_check: OutlierConfig,
    pub backend_rate_hz: u16,
    pub temp_filter_alpha: f32,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            drain_budget: 4,
            stall_timeout_us: 20_000,
            fast_sampling: false,
            decimation: 8,
            clip_limit: 152.0,
            accel_filter_hz: 188.0,
            gyro_filter_hz: 188.0,
            accel_check: OutlierConfig::accel(),
            backend_rate_hz: 1000,
            temp_filter_alpha: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompassConfig {
    /// Samples summed before the sum is halved
    pub accumulate_ceiling: u16,
    /// Field-length sanity check. Only the polled MAG3110 applies it; the
    /// HMC58x3 publishes every non-overflowed sample.
    pub length_check: OutlierConfig,
    pub calibration_attempts: u8,
    /// Mounted away from the flight controller
    pub external: bool,
}

impl Default for CompassConfig {
    fn default() -> Self {
        Self {
            accumulate_ceiling: 14,
            length_check: OutlierConfig::compass(),
            calibration_attempts: 25,
            external: false,
        }
    }
}

impl CompassConfig {
    /// Polled MAG3110
    pub fn mag3110() -> Self {
        Self {
            accumulate_ceiling: 10,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaroConfig {
    pub pressure_check: OutlierConfig,
}

impl Default for BaroConfig {
    fn default() -> Self {
        Self {
            pressure_check: OutlierConfig::baro(10.0),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub imu: ImuConfig,
    pub compass: CompassConfig,
    pub baro: BaroConfig,
    pub health: HealthConfig,
    pub rc: RcConfig,
}

impl BoardConfig {
    /// Serialize into `buf`, returning the used prefix.
    pub fn save<'a>(&self, buf: &'a mut [u8]) -> postcard::Result<&'a mut [u8]> {
        postcard::to_slice(self, buf)
    }

    pub fn load(bytes: &[u8]) -> postcard::Result<Self> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc::Protocol;

    #[test]
    fn test_board_config_survives_storage() {
        let mut config = BoardConfig::default();
        config.imu.fast_sampling = true;
        config.compass.external = true;
        config.rc.priority = [Protocol::Sbus, Protocol::Ppm, Protocol::Dsm];

        let mut buf = [0u8; 256];
        let used = config.save(&mut buf).unwrap().len();
        assert_eq!(BoardConfig::load(&buf[..used]).unwrap(), config);
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let mut buf = [0u8; 256];
        let used = BoardConfig::default().save(&mut buf).unwrap().len();
        assert!(BoardConfig::load(&buf[..used / 2]).is_err());
    }
}
