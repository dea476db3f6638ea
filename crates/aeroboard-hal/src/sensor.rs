use nalgebra::Vector3;

/// Scaling and rate configuration of an inertial sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorConfig {
    pub gyro_scale: f32,
    pub accel_scale: f32,
    pub temp_sensitivity: f32,
    pub temp_zero: f32,
    pub backend_rate_hz: u16,
    pub sampling_rate_hz: u32,
    pub fast_sampling: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gyro_scale: 0.0,
            accel_scale: 0.0,
            temp_sensitivity: 1.0 / 340.0,
            temp_zero: 36.53,
            backend_rate_hz: 1000,
            sampling_rate_hz: 1000,
            fast_sampling: false,
        }
    }
}

/// One inertial sample after scaling, in sensor axes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSensorData {
    pub accel: Vector3<f32>,
    pub gyro: Vector3<f32>,
    pub temperature: f32,
}

/// Sink for accelerometer and gyroscope instances.
///
/// Instance numbers come from the `register_*` calls and are only valid on the
/// frontend that issued them.
pub trait InertialFrontend {
    /// Register an accelerometer instance and return its number
    fn register_accel(&mut self, rate_hz: u16, dev_id: u32) -> u8;

    /// Register a gyroscope instance and return its number
    fn register_gyro(&mut self, rate_hz: u16, dev_id: u32) -> u8;

    /// Apply board orientation and calibration to a raw accel sample
    fn rotate_and_correct_accel(&mut self, instance: u8, accel: Vector3<f32>) -> Vector3<f32>;

    /// Apply board orientation and calibration to a raw gyro sample
    fn rotate_and_correct_gyro(&mut self, instance: u8, gyro: Vector3<f32>) -> Vector3<f32>;

    fn publish_accel(&mut self, instance: u8, accel: Vector3<f32>);

    fn publish_gyro(&mut self, instance: u8, gyro: Vector3<f32>);

    fn publish_temperature(&mut self, instance: u8, temperature: f32);

    /// An accelerometer sample hit the clip limit
    fn increment_clip_count(&mut self, instance: u8);
}

/// Sink for magnetometer instances
pub trait CompassFrontend {
    fn register_compass(&mut self, dev_id: u32) -> u8;

    /// Apply board orientation
    fn rotate_field(&mut self, instance: u8, field: Vector3<f32>) -> Vector3<f32>;

    /// Record an un-corrected sample, used by calibration
    fn publish_raw_field(&mut self, instance: u8, field: Vector3<f32>);

    /// Apply offsets and soft-iron correction
    fn correct_field(&mut self, instance: u8, field: Vector3<f32>) -> Vector3<f32>;

    fn publish_filtered_field(&mut self, instance: u8, field: Vector3<f32>);
}

impl<T: InertialFrontend + ?Sized> InertialFrontend for &mut T {
    fn register_accel(&mut self, rate_hz: u16, dev_id: u32) -> u8 {
        (**self).register_accel(rate_hz, dev_id)
    }

    fn register_gyro(&mut self, rate_hz: u16, dev_id: u32) -> u8 {
        (**self).register_gyro(rate_hz, dev_id)
    }

    fn rotate_and_correct_accel(&mut self, instance: u8, accel: Vector3<f32>) -> Vector3<f32> {
        (**self).rotate_and_correct_accel(instance, accel)
    }

    fn rotate_and_correct_gyro(&mut self, instance: u8, gyro: Vector3<f32>) -> Vector3<f32> {
        (**self).rotate_and_correct_gyro(instance, gyro)
    }

    fn publish_accel(&mut self, instance: u8, accel: Vector3<f32>) {
        (**self).publish_accel(instance, accel)
    }

    fn publish_gyro(&mut self, instance: u8, gyro: Vector3<f32>) {
        (**self).publish_gyro(instance, gyro)
    }

    fn publish_temperature(&mut self, instance: u8, temperature: f32) {
        (**self).publish_temperature(instance, temperature)
    }

    fn increment_clip_count(&mut self, instance: u8) {
        (**self).increment_clip_count(instance)
    }
}

impl<T: CompassFrontend + ?Sized> CompassFrontend for &mut T {
    fn register_compass(&mut self, dev_id: u32) -> u8 {
        (**self).register_compass(dev_id)
    }

    fn rotate_field(&mut self, instance: u8, field: Vector3<f32>) -> Vector3<f32> {
        (**self).rotate_field(instance, field)
    }

    fn publish_raw_field(&mut self, instance: u8, field: Vector3<f32>) {
        (**self).publish_raw_field(instance, field)
    }

    fn correct_field(&mut self, instance: u8, field: Vector3<f32>) -> Vector3<f32> {
        (**self).correct_field(instance, field)
    }

    fn publish_filtered_field(&mut self, instance: u8, field: Vector3<f32>) {
        (**self).publish_filtered_field(instance, field)
    }
}
