//! Honeywell HMC5843 / HMC5883L / HMC5983 in single-shot mode.
//!
//! A 75 Hz timer starts a block read of the output registers. The completion
//! interrupt queues the sample and immediately triggers the next conversion,
//! so a conversion is always running while the previous result is processed.
//! The task half drains the queue into the shared accumulator and publishes
//! the average on `read()`.

use super::{COMPASS_QUEUE_LEN, CompassShared, MagSample};
use crate::error::{SensorError, SensorResult};
use aeroboard_core::config::CompassConfig;
use aeroboard_hal::rotation::Rotation;
use aeroboard_hal::semaphore::Semaphore;
use aeroboard_hal::sensor::CompassFrontend;
use aeroboard_hal::{BlockReadBus, BusError, RegisterBus};
use core::sync::atomic::Ordering;
use embedded_hal::delay::DelayNs;
#[allow(unused_imports)]
use micromath::F32Ext;
use nalgebra::Vector3;

#[allow(dead_code)]
mod registers {
    pub const CONFIG_A: u8 = 0x00;
    pub const SAMPLE_AVERAGING_1: u8 = 0x00;
    pub const SAMPLE_AVERAGING_8: u8 = 0x03 << 5;
    pub const TEMP_ENABLE: u8 = 0x80;
    pub const OSR_15HZ: u8 = 0x04 << 2;
    pub const OSR_75HZ: u8 = 0x06 << 2;
    pub const OPMODE_POSITIVE_BIAS: u8 = 0x01;

    pub const CONFIG_B: u8 = 0x01;
    pub const HMC5883L_GAIN_1_30_GA: u8 = 0x01 << 5;
    pub const HMC5883L_GAIN_2_50_GA: u8 = 0x03 << 5;
    pub const HMC5843_GAIN_1_50_GA: u8 = 0x02 << 5;

    pub const MODE: u8 = 0x02;
    pub const MODE_SINGLE: u8 = 0x01;

    pub const DATA_OUTPUT_X_MSB: u8 = 0x03;
    pub const STATUS: u8 = 0x09;
    pub const ID_A: u8 = 0x0A;
}

pub const SAMPLE_REG: u8 = registers::DATA_OUTPUT_X_MSB;
/// Three big endian words
pub const SAMPLE_LEN: usize = 6;
/// Timer period of the sampling interrupt, 75 Hz
pub const SAMPLE_PERIOD_US: u32 = 13_333;

const ID: [u8; 3] = *b"H43";
/// Written to every axis on ADC overflow
const OVERFLOW: i16 = -4096;
const DEVTYPE_HMC5883: u8 = 0x07;
const INIT_RETRIES: u8 = 10;
const RUN_RETRIES: u8 = 3;
/// mGauss per LSB at 1.3 Ga
const GAIN_SCALE: f32 = (1.0 / 1090.0) * 1000.0;

/// Self test field under positive bias at 2.5 Ga, in LSB
const EXPECTED_BIAS: [f32; 3] = [1.16 * 600.0, 1.08 * 600.0, 1.16 * 600.0];
const CALIBRATION_SKIP: u8 = 2;
const CALIBRATION_GOOD: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HmcType {
    Hmc5843,
    Hmc5883L,
    Hmc5983,
}

impl HmcType {
    /// Identify the part by what CONFIG_A keeps of a write with averaging and
    /// temperature compensation enabled.
    pub fn from_config_a(readback: u8) -> Option<Self> {
        use registers::*;
        let requested = TEMP_ENABLE | OSR_75HZ | SAMPLE_AVERAGING_8;
        match readback {
            r if r == requested => Some(HmcType::Hmc5983),
            r if r == OSR_75HZ | SAMPLE_AVERAGING_8 => Some(HmcType::Hmc5883L),
            r if r == TEMP_ENABLE | OSR_75HZ || r == OSR_75HZ => Some(HmcType::Hmc5843),
            _ => None,
        }
    }

    fn gain(self) -> u8 {
        match self {
            HmcType::Hmc5843 => registers::HMC5843_GAIN_1_50_GA,
            _ => registers::HMC5883L_GAIN_1_30_GA,
        }
    }

    /// Sensor axes of a sample in register order, before the pitch-180 mount.
    /// Everything after the 5843 outputs X, Z, Y.
    fn axes(self, words: &MagSample) -> [i16; 3] {
        match self {
            HmcType::Hmc5843 => *words,
            _ => [words[0], words[2], words[1]],
        }
    }
}

fn words(raw: &[u8; SAMPLE_LEN]) -> MagSample {
    [
        i16::from_be_bytes([raw[0], raw[1]]),
        i16::from_be_bytes([raw[2], raw[3]]),
        i16::from_be_bytes([raw[4], raw[5]]),
    ]
}

/// Sensor mounted pitched by 180°
fn mount(axes: [i16; 3]) -> Vector3<f32> {
    Vector3::new(-(axes[0] as f32), axes[1] as f32, -(axes[2] as f32))
}

/// Interrupt half of an HMC58x3.
pub struct HmcIsr<'a, B, S, const N: usize = COMPASS_QUEUE_LEN> {
    bus: B,
    shared: &'a CompassShared<S, N>,
}

impl<'a, B, S, const N: usize> HmcIsr<'a, B, S, N>
where
    B: RegisterBus + BlockReadBus,
    S: Semaphore,
{
    pub fn new(bus: B, shared: &'a CompassShared<S, N>) -> Self {
        Self { bus, shared }
    }

    /// Sampling timer. A transfer still in progress means its completion was
    /// lost: the conversion is triggered again and the next tick reads.
    pub fn on_timer(&mut self) -> Result<(), BusError> {
        if self.shared.in_progress.swap(true, Ordering::AcqRel) {
            self.shared.retries.fetch_add(1, Ordering::Relaxed);
            let result = self.trigger();
            self.shared.in_progress.store(false, Ordering::Release);
            return result;
        }
        let started = self.bus.start_block_read(SAMPLE_REG, SAMPLE_LEN);
        if started.is_err() {
            self.shared.in_progress.store(false, Ordering::Release);
        }
        started
    }

    /// Transfer-complete interrupt. Starts the next conversion before the
    /// sample is queued; overflowed samples are dropped.
    pub fn on_transfer_complete(&mut self, raw: &[u8; SAMPLE_LEN]) -> Result<(), BusError> {
        let sample = words(raw);
        let result = self.trigger();

        if sample.contains(&OVERFLOW) {
            trace!("hmc5843: overflow");
        } else {
            self.shared.queue.push(sample);
            self.shared.pending.signal();
        }
        self.shared.in_progress.store(false, Ordering::Release);
        result
    }

    fn trigger(&mut self) -> Result<(), BusError> {
        self.bus.write_register(registers::MODE, registers::MODE_SINGLE)
    }

    pub fn release(self) -> B {
        self.bus
    }
}

/// Task half of an HMC58x3.
pub struct Hmc5843<'a, S, const N: usize = COMPASS_QUEUE_LEN> {
    shared: &'a CompassShared<S, N>,
    config: CompassConfig,
    bus_id: u32,
    kind: Option<HmcType>,
    scaling: Vector3<f32>,
    instance: u8,
}

impl<'a, S: Semaphore, const N: usize> Hmc5843<'a, S, N> {
    pub fn new(shared: &'a CompassShared<S, N>, config: CompassConfig, bus_id: u32) -> Self {
        Self {
            shared,
            config,
            bus_id,
            kind: None,
            scaling: Vector3::repeat(1.0),
            instance: 0,
        }
    }

    /// Identify, calibrate and configure the part, then register it with the
    /// frontend. The sampling timer may be started once this returns.
    pub fn init<B, D, F>(&mut self, bus: &mut B, delay: &mut D, frontend: &mut F) -> SensorResult<HmcType>
    where
        B: RegisterBus,
        D: DelayNs,
        F: CompassFrontend,
    {
        bus.set_retries(INIT_RETRIES);
        let result = self.bring_up(bus, delay);
        bus.set_retries(RUN_RETRIES);
        let kind = result?;

        let dev_id = ((DEVTYPE_HMC5883 as u32) << 16) | (self.bus_id & 0xFFFF);
        self.instance = frontend.register_compass(dev_id);
        self.kind = Some(kind);
        info!("hmc5843: {} on bus {=u32:#x}", kind, self.bus_id);
        Ok(kind)
    }

    fn bring_up<B: RegisterBus, D: DelayNs>(&mut self, bus: &mut B, delay: &mut D) -> SensorResult<HmcType> {
        let mut id = [0u8; 3];
        bus.read_registers(registers::ID_A, &mut id)?;
        if id != ID {
            error!("hmc5843: bad id {}", id);
            return Err(SensorError::WhoAmI(id[0]));
        }

        let kind = detect(bus, delay)?;
        self.scaling = self.calibrate(bus, delay, kind)?;
        setup_sampling(bus, kind)?;
        Ok(kind)
    }

    /// Positive bias self test. Returns the per-axis scaling.
    fn calibrate<B: RegisterBus, D: DelayNs>(
        &mut self,
        bus: &mut B,
        delay: &mut D,
        kind: HmcType,
    ) -> SensorResult<Vector3<f32>> {
        use registers::*;
        let base_config = OSR_15HZ;
        let mut attempts = 0u8;
        let mut good = 0u8;
        let mut samples = 0u8;
        let mut sum = Vector3::<f32>::zeros();

        while attempts < self.config.calibration_attempts && good < CALIBRATION_GOOD {
            attempts += 1;
            if bus.write_register(CONFIG_A, base_config | OPMODE_POSITIVE_BIAS).is_err() {
                continue;
            }
            delay.delay_ms(50);
            if bus.write_register(CONFIG_B, HMC5883L_GAIN_2_50_GA).is_err()
                || bus.write_register(MODE, MODE_SINGLE).is_err()
            {
                continue;
            }
            delay.delay_ms(50);

            let Some(field) = read_sample(bus, kind) else {
                continue;
            };
            samples += 1;
            // the first conversions after switching to bias mode are off
            if attempts <= CALIBRATION_SKIP {
                continue;
            }

            let cal = Vector3::new(
                (EXPECTED_BIAS[0] / field.x).abs(),
                (EXPECTED_BIAS[1] / field.y).abs(),
                (EXPECTED_BIAS[2] / field.z).abs(),
            );
            if cal.iter().all(|c| *c > 0.7 && *c < 1.35) {
                good += 1;
                sum += cal;
            }
        }

        bus.write_register(CONFIG_A, base_config)?;

        if good >= CALIBRATION_GOOD {
            let scaling = sum / good as f32;
            info!("hmc5843: scaling {} {} {}", scaling.x, scaling.y, scaling.z);
            Ok(scaling)
        } else if samples > CALIBRATION_GOOD {
            warn!("hmc5843: calibration failed, unity scaling");
            Ok(Vector3::repeat(1.0))
        } else {
            error!("hmc5843: no samples during calibration");
            Err(SensorError::Calibration)
        }
    }

    /// Move queued samples into the accumulator.
    pub fn read_fifo<F: CompassFrontend>(&mut self, frontend: &mut F) -> usize {
        let Some(kind) = self.kind else {
            return 0;
        };
        let mut count = 0;
        while let Some(sample) = self.shared.queue.pop() {
            let mut field = mount(kind.axes(&sample)) * GAIN_SCALE;
            if self.config.external {
                field = Rotation::Yaw90.apply(field);
            }
            let field = frontend.rotate_field(self.instance, field);
            frontend.publish_raw_field(self.instance, field);
            let field = frontend.correct_field(self.instance, field);
            self.shared.field.add(field);
            count += 1;
        }
        count
    }

    /// Publish the average since the last read. Skipped while the
    /// accumulator is busy or empty.
    pub fn read<F: CompassFrontend>(&mut self, frontend: &mut F) {
        if self.kind.is_none() {
            return;
        }
        if let Some(field) = self.shared.field.take_average() {
            frontend.publish_filtered_field(self.instance, field.component_mul(&self.scaling));
        }
    }

    pub fn kind(&self) -> Option<HmcType> {
        self.kind
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    pub fn scaling(&self) -> Vector3<f32> {
        self.scaling
    }
}

/// Request averaging and temperature compensation and see what sticks.
fn detect<B: RegisterBus, D: DelayNs>(bus: &mut B, delay: &mut D) -> SensorResult<HmcType> {
    use registers::*;
    bus.write_register(CONFIG_A, TEMP_ENABLE | OSR_75HZ | SAMPLE_AVERAGING_8)?;
    delay.delay_us(2);
    let readback = bus.read_register(CONFIG_A)?;
    HmcType::from_config_a(readback).ok_or_else(|| {
        error!("hmc5843: unknown type, CONFIG_A {=u8:#x}", readback);
        SensorError::WhoAmI(readback)
    })
}

fn setup_sampling<B: RegisterBus>(bus: &mut B, kind: HmcType) -> SensorResult<()> {
    use registers::*;
    bus.write_register(CONFIG_A, TEMP_ENABLE | OSR_75HZ | SAMPLE_AVERAGING_1)?;
    bus.write_register(CONFIG_B, kind.gain())?;
    bus.write_register(MODE, MODE_SINGLE)?;
    Ok(())
}

/// Blocking read used during calibration, field in LSB after mounting
fn read_sample<B: RegisterBus>(bus: &mut B, kind: HmcType) -> Option<Vector3<f32>> {
    let mut raw = [0u8; SAMPLE_LEN];
    bus.read_registers(SAMPLE_REG, &mut raw).ok()?;
    let sample = words(&raw);
    if sample.contains(&OVERFLOW) {
        return None;
    }
    Some(mount(kind.axes(&sample)))
}
