//! Invensense MPU6000 / MPU6500 / MPU9250 / ICM2060x over SPI with the
//! data-ready pin wired to an interrupt. The on-chip FIFO is not used; every
//! data-ready edge fetches one sample through [`super::ImuIsr`].

use super::{ImuShared, ImuStats, RawSample};
use crate::error::{SensorError, SensorResult};
use aeroboard_core::config::{IMU_RING_LEN, ImuConfig};
use aeroboard_core::lowpass::{LowPassFilter, LowPassFilter2p};
use aeroboard_core::OutlierFilter;
use aeroboard_hal::clock::elapsed;
use aeroboard_hal::sensor::{InertialFrontend, RawSensorData, SensorConfig};
use aeroboard_hal::{BusSpeed, Clock, RegisterBus};
use embedded_hal::delay::DelayNs;
#[allow(unused_imports)]
use micromath::F32Ext;
use nalgebra::Vector3;

#[allow(dead_code)]
mod registers {
    pub const PRODUCT_ID: u8 = 0x0C;
    pub const SMPLRT_DIV: u8 = 0x19;
    pub const CONFIG: u8 = 0x1A;
    pub const CONFIG_FIFO_MODE_STOP: u8 = 0x40;
    pub const GYRO_CONFIG: u8 = 0x1B;
    pub const GYRO_FS_2000DPS: u8 = 0x18;
    pub const ACCEL_CONFIG: u8 = 0x1C;
    /// ±4 g on rev D, ±8 g on rev C parts
    pub const ACCEL_FS_8G_REV_C: u8 = 1 << 3;
    pub const ACCEL_FS_16G: u8 = 3 << 3;
    pub const I2C_SLV4_CTRL: u8 = 0x34;
    pub const INT_PIN_CFG: u8 = 0x37;
    pub const INT_RD_CLEAR: u8 = 0x10;
    pub const LATCH_INT_EN: u8 = 0x20;
    pub const INT_ENABLE: u8 = 0x38;
    pub const RAW_RDY_EN: u8 = 0x01;
    pub const INT_STATUS: u8 = 0x3A;
    pub const ACCEL_XOUT_H: u8 = 0x3B;
    pub const USER_CTRL: u8 = 0x6A;
    pub const USER_CTRL_I2C_IF_DIS: u8 = 0x10;
    pub const USER_CTRL_I2C_MST_EN: u8 = 0x20;
    pub const PWR_MGMT_1: u8 = 0x6B;
    pub const PWR_MGMT_1_CLK_ZGYRO: u8 = 0x03;
    pub const PWR_MGMT_1_DEVICE_RESET: u8 = 0x80;
    pub const PWR_MGMT_2: u8 = 0x6C;
    pub const WHOAMI: u8 = 0x75;

    // ICM2060x
    pub const ICM_ACCEL_CONFIG2: u8 = 0x1D;
    pub const ICM_ACC_DLPF_CFG_218HZ: u8 = 0x01;
    pub const ICM_ACC_FCHOICE_B: u8 = 0x08;
    /// Undocumented, a wrong value leaves a 2.7 m/s² offset on accel Y
    pub const ICM_UNDOC1: u8 = 0x11;
    pub const ICM_UNDOC1_VALUE: u8 = 0xC9;

    pub const DLPF_CFG_256HZ_NOLPF2: u8 = 0x00;
    pub const DLPF_CFG_188HZ: u8 = 0x01;

    // WHOAMI values
    pub const ID_MPU6000: u8 = 0x68;
    pub const ID_ICM20608: u8 = 0xAF;
    pub const ID_ICM20602: u8 = 0x12;
    pub const ID_MPU6500: u8 = 0x70;
    pub const ID_MPU9250: u8 = 0x71;
    pub const ID_MPU9255: u8 = 0x73;

    /// MPU6000 revisions with half the accel sensitivity of rev D
    pub const MPU6000_REV_C: [u8; 4] = [0x14, 0x15, 0x54, 0x55];
}

/// First register of a sample, for [`super::ImuIsr::new`]
pub const SAMPLE_REG: u8 = registers::ACCEL_XOUT_H;

const GRAVITY_MSS: f32 = 9.80665;
/// 16.4 LSB per °/s at ±2000 °/s
const GYRO_SCALE: f32 = 0.0174532 / 16.4;
const RESET_TRIES: u8 = 5;
const RUN_RETRIES: u8 = 3;

const DEVTYPE_ACC_MPU6000: u8 = 0x13;
const DEVTYPE_ACC_MPU9250: u8 = 0x16;
const DEVTYPE_GYR_MPU6000: u8 = 0x21;
const DEVTYPE_GYR_MPU9250: u8 = 0x24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InvensenseType {
    Mpu6000,
    Mpu6500,
    /// Also the MPU9255
    Mpu9250,
    Icm20608,
    Icm20602,
}

impl InvensenseType {
    pub fn from_whoami(id: u8) -> Option<Self> {
        match id {
            registers::ID_MPU6000 => Some(Self::Mpu6000),
            registers::ID_MPU6500 => Some(Self::Mpu6500),
            registers::ID_MPU9250 | registers::ID_MPU9255 => Some(Self::Mpu9250),
            registers::ID_ICM20608 => Some(Self::Icm20608),
            registers::ID_ICM20602 => Some(Self::Icm20602),
            _ => None,
        }
    }

    fn is_icm(self) -> bool {
        matches!(self, Self::Icm20608 | Self::Icm20602)
    }

    /// (sensitivity °C/LSB, zero °C)
    fn temperature(self) -> (f32, f32) {
        match self {
            Self::Mpu9250 => (1.0 / 340.0, 21.0),
            Self::Mpu6000 | Self::Mpu6500 => (1.0 / 340.0, 36.53),
            Self::Icm20608 | Self::Icm20602 => (1.0 / 326.8, 25.0),
        }
    }

    /// (accel, gyro) device types reported to the frontend
    fn devtypes(self) -> (u8, u8) {
        match self {
            Self::Mpu9250 => (DEVTYPE_ACC_MPU9250, DEVTYPE_GYR_MPU9250),
            _ => (DEVTYPE_ACC_MPU6000, DEVTYPE_GYR_MPU6000),
        }
    }
}

fn int16(raw: &RawSample, index: usize) -> i16 {
    i16::from_be_bytes([raw[2 * index], raw[2 * index + 1]])
}

/// Sensor axes to board axes for the three words starting at `first`
fn remap(raw: &RawSample, first: usize) -> Vector3<f32> {
    Vector3::new(
        int16(raw, first + 1) as f32,
        int16(raw, first) as f32,
        -(int16(raw, first + 2) as f32),
    )
}

/// Sums for fast sampling. Both filters run at 8 kHz; accel is summed at 4 kHz.
struct FastAccumulator {
    accel: Vector3<f32>,
    gyro: Vector3<f32>,
    count: u8,
    accel_count: u8,
    accel_filter: LowPassFilter2p,
    gyro_filter: LowPassFilter2p,
}

impl FastAccumulator {
    fn new(config: &ImuConfig) -> Self {
        Self {
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
            count: 0,
            accel_count: 0,
            accel_filter: LowPassFilter2p::new(8000.0, config.accel_filter_hz),
            gyro_filter: LowPassFilter2p::new(8000.0, config.gyro_filter_hz),
        }
    }

    fn reset(&mut self) {
        self.accel = Vector3::zeros();
        self.gyro = Vector3::zeros();
        self.count = 0;
        self.accel_count = 0;
        self.accel_filter.reset();
        self.gyro_filter.reset();
    }
}

/// Task half of an Invensense IMU.
pub struct Invensense<'a, B, C, D, const N: usize = IMU_RING_LEN> {
    bus: B,
    clock: C,
    delay: D,
    shared: &'a ImuShared<N>,
    config: ImuConfig,
    bus_id: u32,
    kind: Option<InvensenseType>,
    product_id: u8,
    sensor: SensorConfig,
    started: bool,
    accel_instance: u8,
    gyro_instance: u8,
    accel_check: OutlierFilter,
    temp_filter: LowPassFilter,
    temp_filtered: f32,
    fast: FastAccumulator,
    last_sample_us: u32,
    stats: ImuStats,
}

impl<'a, B, C, D, const N: usize> Invensense<'a, B, C, D, N>
where
    B: RegisterBus,
    C: Clock,
    D: DelayNs,
{
    pub fn new(
        bus: B,
        clock: C,
        delay: D,
        shared: &'a ImuShared<N>,
        config: ImuConfig,
        bus_id: u32,
    ) -> Self {
        Self {
            bus,
            clock,
            delay,
            shared,
            bus_id,
            kind: None,
            product_id: 0,
            sensor: SensorConfig {
                gyro_scale: GYRO_SCALE,
                accel_scale: GRAVITY_MSS / 2048.0,
                backend_rate_hz: config.backend_rate_hz,
                ..SensorConfig::default()
            },
            started: false,
            accel_instance: 0,
            gyro_instance: 0,
            accel_check: OutlierFilter::new(config.accel_check),
            temp_filter: LowPassFilter::new(config.temp_filter_alpha),
            temp_filtered: 0.0,
            fast: FastAccumulator::new(&config),
            last_sample_us: 0,
            stats: ImuStats::default(),
            config,
        }
    }

    /// Identify the part and bring it out of reset.
    pub fn init(&mut self) -> SensorResult<InvensenseType> {
        self.bus.set_retries(RUN_RETRIES);
        self.bus.set_speed(BusSpeed::Low);

        let whoami = self.bus.read_register(registers::WHOAMI)?;
        let Some(kind) = InvensenseType::from_whoami(whoami) else {
            self.bus.set_speed(BusSpeed::High);
            error!("invensense: unknown whoami {=u8:#x}", whoami);
            return Err(SensorError::WhoAmI(whoami));
        };

        let reset = self.reset();
        self.bus.set_speed(BusSpeed::High);
        reset?;

        if kind.is_icm() {
            self.bus
                .write_register(registers::ICM_UNDOC1, registers::ICM_UNDOC1_VALUE)?;
        }
        info!("invensense: found {}", kind);
        self.kind = Some(kind);
        Ok(kind)
    }

    fn reset(&mut self) -> SensorResult<()> {
        for _ in 0..RESET_TRIES {
            let mut user_ctrl = self.bus.read_register(registers::USER_CTRL)?;

            // a running I2C master can hang slaves on the aux bus
            if user_ctrl & registers::USER_CTRL_I2C_MST_EN != 0 {
                user_ctrl &= !registers::USER_CTRL_I2C_MST_EN;
                self.bus.write_register(registers::USER_CTRL, user_ctrl)?;
                self.delay.delay_ms(10);
            }

            self.bus
                .write_register(registers::PWR_MGMT_1, registers::PWR_MGMT_1_DEVICE_RESET)?;
            self.delay.delay_ms(100);

            // SPI only, disable the I2C interface right after reset
            user_ctrl |= registers::USER_CTRL_I2C_IF_DIS;
            self.bus.write_register(registers::USER_CTRL, user_ctrl)?;

            // wake up with the Z gyro as clock source
            self.bus
                .write_register(registers::PWR_MGMT_1, registers::PWR_MGMT_1_CLK_ZGYRO)?;
            self.delay.delay_ms(5);

            if self.bus.read_register(registers::PWR_MGMT_1)? == registers::PWR_MGMT_1_CLK_ZGYRO {
                return Ok(());
            }
            self.delay.delay_ms(10);
        }
        error!("invensense: failed to boot {} times", RESET_TRIES);
        Err(SensorError::NotResponding)
    }

    /// Register the instances with the frontend and start sampling. The
    /// data-ready interrupt may be enabled once this returns.
    pub fn start<F: InertialFrontend>(&mut self, frontend: &mut F) -> SensorResult<()> {
        let kind = self.kind.ok_or(SensorError::NotInitialised)?;

        self.bus.set_speed(BusSpeed::Low);
        // only used for wake-up in accel-only low power mode
        self.bus.write_register(registers::PWR_MGMT_2, 0x00)?;
        self.delay.delay_ms(1);

        let (sensitivity, zero) = kind.temperature();
        self.sensor.temp_sensitivity = sensitivity;
        self.sensor.temp_zero = zero;

        let (accel_dev, gyro_dev) = kind.devtypes();
        let rate = self.sensor.backend_rate_hz;
        self.gyro_instance = frontend.register_gyro(rate, self.dev_id(gyro_dev));
        self.accel_instance = frontend.register_accel(rate, self.dev_id(accel_dev));

        self.product_id = self.bus.read_register(registers::PRODUCT_ID)?;
        self.configure()?;

        // clear a pending interrupt request
        self.bus.read_register(registers::INT_STATUS)?;
        self.last_sample_us = self.clock.micros();
        self.started = true;
        Ok(())
    }

    fn dev_id(&self, devtype: u8) -> u32 {
        ((devtype as u32) << 16) | (self.bus_id & 0xFFFF)
    }

    /// Sample rate, ranges, filters and interrupt setup. Also used to restart
    /// a stalled sensor.
    fn configure(&mut self) -> SensorResult<()> {
        let kind = self.kind.ok_or(SensorError::NotInitialised)?;
        self.bus.set_speed(BusSpeed::Low);
        let result = self.write_configuration(kind);
        self.bus.set_speed(BusSpeed::High);

        self.fast.reset();
        self.accel_check.reset();
        result
    }

    fn write_configuration(&mut self, kind: InvensenseType) -> SensorResult<()> {
        self.set_filter_register(kind)?;

        // 1 kHz, 8 kHz gyro when fast sampling
        self.bus.write_register(registers::SMPLRT_DIV, 0)?;
        self.delay.delay_us(10);

        self.bus
            .write_register(registers::GYRO_CONFIG, registers::GYRO_FS_2000DPS)?;
        self.delay.delay_us(10);

        let rev_c = kind == InvensenseType::Mpu6000
            && registers::MPU6000_REV_C.contains(&self.product_id);
        if rev_c {
            self.bus
                .write_register(registers::ACCEL_CONFIG, registers::ACCEL_FS_8G_REV_C)?;
            self.sensor.accel_scale = GRAVITY_MSS / 4096.0;
        } else {
            self.bus
                .write_register(registers::ACCEL_CONFIG, registers::ACCEL_FS_16G)?;
            self.sensor.accel_scale = GRAVITY_MSS / 2048.0;
        }
        self.delay.delay_us(10);

        if kind.is_icm() {
            self.bus
                .write_register(registers::ICM_UNDOC1, registers::ICM_UNDOC1_VALUE)?;
        }

        self.bus
            .write_register(registers::INT_ENABLE, registers::RAW_RDY_EN)?;
        self.delay.delay_us(10);

        // clear on any read, hold the pin until then
        let pin_cfg = self.bus.read_register(registers::INT_PIN_CFG)?;
        self.bus.write_register(
            registers::INT_PIN_CFG,
            pin_cfg | registers::INT_RD_CLEAR | registers::LATCH_INT_EN,
        )?;
        Ok(())
    }

    fn set_filter_register(&mut self, kind: InvensenseType) -> SensorResult<()> {
        let fast = self.config.fast_sampling && kind != InvensenseType::Mpu6000;
        if fast {
            info!("invensense: fast sampling enabled");
            // slows the slave sensor, ~7760 Hz gyro and ~3880 Hz accel
            self.bus.write_register(registers::I2C_SLV4_CTRL, 0x1F)?;
        }
        self.sensor.fast_sampling = fast;
        self.sensor.sampling_rate_hz = if fast { 8000 } else { 1000 };

        let dlpf = if fast {
            registers::DLPF_CFG_256HZ_NOLPF2
        } else {
            registers::DLPF_CFG_188HZ
        };
        self.bus
            .write_register(registers::CONFIG, dlpf | registers::CONFIG_FIFO_MODE_STOP)?;

        if kind != InvensenseType::Mpu6000 {
            let accel_dlpf = if fast {
                registers::ICM_ACC_FCHOICE_B
            } else {
                registers::ICM_ACC_DLPF_CFG_218HZ
            };
            self.bus
                .write_register(registers::ICM_ACCEL_CONFIG2, accel_dlpf)?;
        }
        Ok(())
    }

    /// Scale a raw sample, still in board axes but before rotation.
    pub fn decode(&self, raw: &RawSample) -> RawSensorData {
        RawSensorData {
            accel: remap(raw, 0) * self.sensor.accel_scale,
            gyro: remap(raw, 4) * self.sensor.gyro_scale,
            temperature: int16(raw, 3) as f32 * self.sensor.temp_sensitivity
                + self.sensor.temp_zero,
        }
    }

    fn clipped(&self, accel_raw: &Vector3<f32>) -> bool {
        let limit = self.config.clip_limit / self.sensor.accel_scale;
        accel_raw.iter().any(|v| v.abs() > limit)
    }

    /// Drain the ring. Called from the task whenever the interrupt half
    /// signalled, and periodically so a stalled sensor gets restarted.
    pub fn poll_data<F: InertialFrontend>(&mut self, frontend: &mut F) {
        if !self.started {
            return;
        }
        let start = self.clock.micros();

        if self.shared.is_empty() {
            if elapsed(start, self.last_sample_us) > self.config.stall_timeout_us {
                warn!("invensense: no data, restarting");
                self.stats.restarts += 1;
                if let Err(e) = self.configure() {
                    error!("invensense: restart failed {}", e);
                }
                self.last_sample_us = start;
            }
            return;
        }

        let mut count = 0u16;
        while let Some(raw) = self.shared.pop() {
            let accepted = if self.sensor.fast_sampling {
                self.accumulate_fast(frontend, &raw)
            } else {
                self.accumulate(frontend, &raw)
            };
            // rejected samples do not count against the budget
            if !accepted {
                continue;
            }
            count += 1;
            if count >= self.config.drain_budget as u16 {
                self.shared.request_drain();
                break;
            }
        }

        let now = self.clock.micros();
        self.last_sample_us = now;
        self.stats.last_drain = count;
        self.stats.last_drain_us = elapsed(now, start);
    }

    fn accumulate<F: InertialFrontend>(&mut self, frontend: &mut F, raw: &RawSample) -> bool {
        let data = self.decode(raw);
        if self.clipped(&remap(raw, 0)) {
            self.stats.clipped += 1;
            frontend.increment_clip_count(self.accel_instance);
        }

        let accel = frontend.rotate_and_correct_accel(self.accel_instance, data.accel);
        let gyro = frontend.rotate_and_correct_gyro(self.gyro_instance, data.gyro);

        if !self.accel_check.filter(accel.norm()) {
            self.stats.accel_rejects += 1;
            return false;
        }

        frontend.publish_accel(self.accel_instance, accel);
        frontend.publish_gyro(self.gyro_instance, gyro);
        self.temp_filtered = self.temp_filter.apply(data.temperature);
        true
    }

    /// Every second accel sample is a duplicate at 8 kHz: filter everything,
    /// sum accel at 4 kHz and gyro at 8 kHz, publish once per decimation.
    fn accumulate_fast<F: InertialFrontend>(&mut self, frontend: &mut F, raw: &RawSample) -> bool {
        let decimation = self.config.decimation.max(2);
        let mut clipped = false;

        let accel = remap(raw, 0);
        let filtered = self.fast.accel_filter.apply(accel);
        if self.fast.count & 1 == 0 {
            clipped = self.clipped(&accel);
            self.fast.accel += filtered;
            self.fast.accel_count += 1;
        }
        self.fast.gyro += self.fast.gyro_filter.apply(remap(raw, 4));
        self.fast.count += 1;

        if self.fast.count >= decimation {
            // an odd decimation sums one accel sample more than half
            let accel = self.fast.accel * (self.sensor.accel_scale / self.fast.accel_count as f32);
            let gyro = self.fast.gyro * (self.sensor.gyro_scale / decimation as f32);
            self.fast.accel = Vector3::zeros();
            self.fast.gyro = Vector3::zeros();
            self.fast.count = 0;
            self.fast.accel_count = 0;

            let accel = frontend.rotate_and_correct_accel(self.accel_instance, accel);
            let gyro = frontend.rotate_and_correct_gyro(self.gyro_instance, gyro);
            frontend.publish_accel(self.accel_instance, accel);
            frontend.publish_gyro(self.gyro_instance, gyro);
        }

        if clipped {
            self.stats.clipped += 1;
            frontend.increment_clip_count(self.accel_instance);
        }

        let temperature =
            int16(raw, 3) as f32 * self.sensor.temp_sensitivity + self.sensor.temp_zero;
        self.temp_filtered = self.temp_filter.apply(temperature);
        true
    }

    /// Publish everything that is not pushed per sample.
    pub fn update<F: InertialFrontend>(&mut self, frontend: &mut F) {
        if self.started {
            frontend.publish_temperature(self.accel_instance, self.temp_filtered);
        }
    }

    pub fn kind(&self) -> Option<InvensenseType> {
        self.kind
    }

    pub fn sensor_config(&self) -> &SensorConfig {
        &self.sensor
    }

    pub fn fast_sampling(&self) -> bool {
        self.sensor.fast_sampling
    }

    pub fn accel_instance(&self) -> u8 {
        self.accel_instance
    }

    pub fn gyro_instance(&self) -> u8 {
        self.gyro_instance
    }

    /// Filtered die temperature in °C
    pub fn temperature(&self) -> f32 {
        self.temp_filtered
    }

    pub fn stats(&self) -> ImuStats {
        ImuStats {
            overflows: self.shared.overflows(),
            retried_transfers: self.shared.retries(),
            ..self.stats
        }
    }

    pub fn release(self) -> (B, C, D) {
        (self.bus, self.clock, self.delay)
    }
}
