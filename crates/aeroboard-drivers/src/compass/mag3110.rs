//! NXP MAG3110, polled at 75 Hz. The part runs free at 80 Hz and the status
//! register tells whether a new conversion is waiting.

use super::FieldAccumulator;
use crate::error::{SensorError, SensorResult};
use aeroboard_core::config::CompassConfig;
use aeroboard_core::{OutlierFilter, Periodic};
use aeroboard_hal::semaphore::Semaphore;
use aeroboard_hal::sensor::CompassFrontend;
use aeroboard_hal::{BusSpeed, RegisterBus};
use embedded_hal::delay::DelayNs;
use nalgebra::Vector3;

mod registers {
    pub const STATUS: u8 = 0x00;
    pub const STATUS_DATA_READY: u8 = 1 << 3;
    pub const OUT_X_MSB: u8 = 0x01;
    pub const WHO_AM_I: u8 = 0x07;
    pub const CTRL_REG1: u8 = 0x10;
    /// Active, 80 Hz with oversampling 1
    pub const CTRL_REG1_ACTIVE_80HZ: u8 = 0x01;
    pub const CTRL_REG2: u8 = 0x11;
    /// Automatic magnetic reset, raw output
    pub const CTRL_REG2_AUTO_MRST_RAW: u8 = 0xA0;
}

const WHOAMI: u8 = 0xC4;
const DEVTYPE_MAG3110: u8 = 0x0E;
const INIT_RETRIES: u8 = 5;
const RUN_RETRIES: u8 = 3;
const SAMPLE_RATE_HZ: u32 = 75;
/// ±10000 LSB full scale of 1 T
const MAG_SCALE: f32 = 1.0 / 10000.0;

pub struct Mag3110<B, S> {
    bus: B,
    config: CompassConfig,
    bus_id: u32,
    field: FieldAccumulator<S>,
    length_check: OutlierFilter,
    timer: Periodic,
    instance: u8,
    initialised: bool,
}

impl<B: RegisterBus, S: Semaphore> Mag3110<B, S> {
    /// `config` is usually [`CompassConfig::mag3110`]
    pub fn new(bus: B, sem: S, config: CompassConfig, bus_id: u32) -> Self {
        Self {
            bus,
            bus_id,
            field: FieldAccumulator::new(config.accumulate_ceiling, sem),
            length_check: OutlierFilter::new(config.length_check),
            timer: Periodic::from_hz(SAMPLE_RATE_HZ),
            instance: 0,
            initialised: false,
            config,
        }
    }

    pub fn init<D: DelayNs, F: CompassFrontend>(&mut self, delay: &mut D, frontend: &mut F) -> SensorResult<()> {
        self.bus.set_speed(BusSpeed::Low);
        self.bus.set_retries(INIT_RETRIES);
        let result = self.hardware_init(delay);
        self.bus.set_speed(BusSpeed::High);
        result?;
        self.bus.set_retries(RUN_RETRIES);

        let dev_id = ((DEVTYPE_MAG3110 as u32) << 16) | (self.bus_id & 0xFFFF);
        self.instance = frontend.register_compass(dev_id);
        self.initialised = true;
        info!("mag3110: found on bus {=u32:#x}", self.bus_id);
        Ok(())
    }

    fn hardware_init<D: DelayNs>(&mut self, delay: &mut D) -> SensorResult<()> {
        let id = self.bus.read_register(registers::WHO_AM_I)?;
        if id != WHOAMI {
            return Err(SensorError::WhoAmI(id));
        }
        self.bus
            .write_register(registers::CTRL_REG1, registers::CTRL_REG1_ACTIVE_80HZ)?;
        delay.delay_ms(20);
        self.bus
            .write_register(registers::CTRL_REG2, registers::CTRL_REG2_AUTO_MRST_RAW)?;
        Ok(())
    }

    /// Sample when the 75 Hz period elapsed
    pub fn poll<F: CompassFrontend>(&mut self, now_us: u32, frontend: &mut F) -> bool {
        self.timer.poll(now_us) && self.update(frontend)
    }

    /// Read one conversion, check its length and accumulate it. True when a
    /// sample was accumulated.
    pub fn update<F: CompassFrontend>(&mut self, frontend: &mut F) -> bool {
        if !self.initialised {
            return false;
        }
        let raw = match self.read_sample() {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                error!("mag3110: read failed {}", e);
                return false;
            }
        };

        let field = raw * MAG_SCALE;
        if !self.length_check.filter(field.norm()) {
            return false;
        }

        let field = frontend.rotate_field(self.instance, field);
        frontend.publish_raw_field(self.instance, field);
        let field = frontend.correct_field(self.instance, field);
        self.field.add(field)
    }

    fn read_sample(&mut self) -> SensorResult<Option<Vector3<f32>>> {
        let status = self.bus.read_register(registers::STATUS)?;
        if status & registers::STATUS_DATA_READY == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; 6];
        self.bus.read_registers(registers::OUT_X_MSB, &mut buf)?;
        let axis = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]) as f32;
        Ok(Some(Vector3::new(axis(0), axis(2), axis(4))))
    }

    /// Publish the average since the last read
    pub fn read<F: CompassFrontend>(&mut self, frontend: &mut F) {
        if !self.initialised {
            return;
        }
        if let Some(field) = self.field.take_average() {
            frontend.publish_filtered_field(self.instance, field);
        }
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    /// Samples rejected by the length check
    pub fn length_errors(&self) -> u32 {
        self.length_check.error_count()
    }

    pub fn config(&self) -> &CompassConfig {
        &self.config
    }

    pub fn release(self) -> B {
        self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeroboard_hal::AtomicSemaphore;
    use aeroboard_hal::mock::{MockBus, MockDelay, RecordingFrontend};

    fn started(bus: MockBus) -> Mag3110<MockBus, AtomicSemaphore> {
        let mut mag = Mag3110::new(bus, AtomicSemaphore::new(), CompassConfig::mag3110(), 0x0E01);
        mag.init(&mut MockDelay::new(), &mut RecordingFrontend::new()).unwrap();
        mag
    }

    #[test]
    fn test_wrong_whoami_is_rejected() {
        let mut bus = MockBus::new();
        bus.set_register(registers::WHO_AM_I, 0x11);
        let mut mag = Mag3110::new(bus, AtomicSemaphore::new(), CompassConfig::mag3110(), 0);
        let result = mag.init(&mut MockDelay::new(), &mut RecordingFrontend::new());
        assert_eq!(result, Err(SensorError::WhoAmI(0x11)));
        let bus = mag.release();
        assert_eq!(bus.speed(), Some(BusSpeed::High));
        assert_eq!(bus.retries(), INIT_RETRIES);
    }

    #[test]
    fn test_no_data_ready_reads_nothing() {
        let mut bus = MockBus::new();
        bus.set_register(registers::WHO_AM_I, WHOAMI);
        let mut mag = started(bus);
        let mut frontend = RecordingFrontend::new();
        assert!(!mag.update(&mut frontend));
        assert!(frontend.raw_field.is_empty());
    }

    #[test]
    fn test_sample_is_scaled_to_tesla_fraction() {
        let mut bus = MockBus::new();
        bus.set_register(registers::WHO_AM_I, WHOAMI);
        bus.set_register(registers::STATUS, registers::STATUS_DATA_READY);
        bus.set_block(registers::OUT_X_MSB, &[0x03, 0xE8, 0xFC, 0x18, 0x00, 0x00]);
        let mut mag = started(bus);
        let mut frontend = RecordingFrontend::new();

        assert!(mag.update(&mut frontend));
        mag.read(&mut frontend);
        let (_, field) = frontend.field[0];
        assert!((field - Vector3::new(0.1, -0.1, 0.0)).norm() < 1e-6);
    }
}
