//! Host-side doubles for the board traits.
use crate::bus::{BlockReadBus, BusError, BusSpeed, RegisterBus};
use crate::clock::Clock;
use crate::rotation::Rotation;
use crate::sensor::{CompassFrontend, InertialFrontend};
use core::cell::Cell;
use embedded_hal::delay::DelayNs;
use nalgebra::Vector3;
use std::collections::VecDeque;
use std::vec::Vec;

/// Register file with scripted reads and failure injection.
///
/// Block reads auto-increment through the register file. A write changes the
/// register unless it is pinned, which lets tests model read-back mismatches.
pub struct MockBus {
    registers: [u8; 256],
    pinned: [bool; 256],
    queued: VecDeque<(u8, Vec<u8>)>,
    writes: Vec<(u8, u8)>,
    started: Vec<(u8, usize)>,
    fail_reads: u32,
    fail_writes: u32,
    read_count: u32,
    retries: u8,
    speed: Option<BusSpeed>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            registers: [0; 256],
            pinned: [false; 256],
            queued: VecDeque::new(),
            writes: Vec::new(),
            started: Vec::new(),
            fail_reads: 0,
            fail_writes: 0,
            read_count: 0,
            retries: 0,
            speed: None,
        }
    }

    pub fn set_register(&mut self, reg: u8, value: u8) {
        self.registers[reg as usize] = value;
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.registers[reg as usize]
    }

    /// Keep `value` in `reg` regardless of writes
    pub fn pin_register(&mut self, reg: u8, value: u8) {
        self.registers[reg as usize] = value;
        self.pinned[reg as usize] = true;
    }

    pub fn set_block(&mut self, reg: u8, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.registers[(reg as usize + i) & 0xFF] = *b;
        }
    }

    /// The next read starting at `reg` returns `bytes` instead of the register file
    pub fn queue_read(&mut self, reg: u8, bytes: &[u8]) {
        self.queued.push_back((reg, bytes.to_vec()));
    }

    pub fn fail_next_reads(&mut self, count: u32) {
        self.fail_reads = count;
    }

    pub fn fail_next_writes(&mut self, count: u32) {
        self.fail_writes = count;
    }

    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }

    pub fn writes_to(&self, reg: u8) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Read attempts, failed ones included
    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    /// Block reads started through [`BlockReadBus`]
    pub fn started(&self) -> &[(u8, usize)] {
        &self.started
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn speed(&self) -> Option<BusSpeed> {
        self.speed
    }
}

impl RegisterBus for MockBus {
    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.read_count += 1;
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(BusError::Transfer);
        }
        if let Some(pos) = self.queued.iter().position(|(r, _)| *r == reg) {
            if let Some((_, bytes)) = self.queued.remove(pos) {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                return Ok(());
            }
        }
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.registers[(reg as usize + i) & 0xFF];
        }
        Ok(())
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(BusError::Nack);
        }
        self.writes.push((reg, value));
        if !self.pinned[reg as usize] {
            self.registers[reg as usize] = value;
        }
        Ok(())
    }

    fn set_retries(&mut self, retries: u8) {
        self.retries = retries;
    }

    fn set_speed(&mut self, speed: BusSpeed) {
        self.speed = Some(speed);
    }
}

/// A failed read also fails the next start.
impl BlockReadBus for MockBus {
    fn start_block_read(&mut self, reg: u8, len: usize) -> Result<(), BusError> {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(BusError::Timeout);
        }
        self.started.push((reg, len));
        Ok(())
    }
}

/// Records started block reads. Completion is delivered by the test.
#[derive(Default)]
pub struct MockDmaBus {
    started: Vec<(u8, usize)>,
    fail: u32,
}

impl MockDmaBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> &[(u8, usize)] {
        &self.started
    }

    pub fn fail_next_starts(&mut self, count: u32) {
        self.fail = count;
    }
}

impl BlockReadBus for MockDmaBus {
    fn start_block_read(&mut self, reg: u8, len: usize) -> Result<(), BusError> {
        if self.fail > 0 {
            self.fail -= 1;
            return Err(BusError::Timeout);
        }
        self.started.push((reg, len));
        Ok(())
    }
}

/// Manually advanced clock. Shared by reference between drivers under test.
#[derive(Default)]
pub struct MockClock {
    now_us: Cell<u64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_us(now_us: u64) -> Self {
        Self {
            now_us: Cell::new(now_us),
        }
    }

    pub fn set_us(&self, now_us: u64) {
        self.now_us.set(now_us);
    }

    pub fn advance_us(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}

impl Clock for MockClock {
    fn millis(&self) -> u32 {
        (self.now_us.get() / 1000) as u32
    }

    fn micros(&self) -> u32 {
        self.now_us.get() as u32
    }
}

/// Delay that only accumulates the requested time
#[derive(Default)]
pub struct MockDelay {
    total_ns: u64,
}

impl MockDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// Frontend that stores everything it is given.
#[derive(Default)]
pub struct RecordingFrontend {
    pub rotation: Rotation,
    pub field_offset: Vector3<f32>,
    pub accel_instances: u8,
    pub gyro_instances: u8,
    pub compass_instances: u8,
    pub accel: Vec<(u8, Vector3<f32>)>,
    pub gyro: Vec<(u8, Vector3<f32>)>,
    pub temperature: Vec<(u8, f32)>,
    pub clips: Vec<u8>,
    pub raw_field: Vec<(u8, Vector3<f32>)>,
    pub field: Vec<(u8, Vector3<f32>)>,
}

impl RecordingFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clip_count(&self, instance: u8) -> usize {
        self.clips.iter().filter(|i| **i == instance).count()
    }
}

impl InertialFrontend for RecordingFrontend {
    fn register_accel(&mut self, _rate_hz: u16, _dev_id: u32) -> u8 {
        self.accel_instances += 1;
        self.accel_instances - 1
    }

    fn register_gyro(&mut self, _rate_hz: u16, _dev_id: u32) -> u8 {
        self.gyro_instances += 1;
        self.gyro_instances - 1
    }

    fn rotate_and_correct_accel(&mut self, _instance: u8, accel: Vector3<f32>) -> Vector3<f32> {
        self.rotation.apply(accel)
    }

    fn rotate_and_correct_gyro(&mut self, _instance: u8, gyro: Vector3<f32>) -> Vector3<f32> {
        self.rotation.apply(gyro)
    }

    fn publish_accel(&mut self, instance: u8, accel: Vector3<f32>) {
        self.accel.push((instance, accel));
    }

    fn publish_gyro(&mut self, instance: u8, gyro: Vector3<f32>) {
        self.gyro.push((instance, gyro));
    }

    fn publish_temperature(&mut self, instance: u8, temperature: f32) {
        self.temperature.push((instance, temperature));
    }

    fn increment_clip_count(&mut self, instance: u8) {
        self.clips.push(instance);
    }
}

impl CompassFrontend for RecordingFrontend {
    fn register_compass(&mut self, _dev_id: u32) -> u8 {
        self.compass_instances += 1;
        self.compass_instances - 1
    }

    fn rotate_field(&mut self, _instance: u8, field: Vector3<f32>) -> Vector3<f32> {
        self.rotation.apply(field)
    }

    fn publish_raw_field(&mut self, instance: u8, field: Vector3<f32>) {
        self.raw_field.push((instance, field));
    }

    fn correct_field(&mut self, _instance: u8, field: Vector3<f32>) -> Vector3<f32> {
        field - self.field_offset
    }

    fn publish_filtered_field(&mut self, instance: u8, field: Vector3<f32>) {
        self.field.push((instance, field));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_read_auto_increments() {
        let mut bus = MockBus::new();
        bus.set_block(0x3B, &[1, 2, 3]);
        let mut buf = [0u8; 3];
        bus.read_registers(0x3B, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_queued_read_takes_precedence_once() {
        let mut bus = MockBus::new();
        bus.set_register(0x10, 7);
        bus.queue_read(0x10, &[9]);
        assert_eq!(bus.read_register(0x10), Ok(9));
        assert_eq!(bus.read_register(0x10), Ok(7));
    }

    #[test]
    fn test_pinned_register_ignores_writes() {
        let mut bus = MockBus::new();
        bus.pin_register(0x00, 0x10);
        bus.write_register(0x00, 0x70).unwrap();
        assert_eq!(bus.register(0x00), 0x10);
        assert_eq!(bus.writes_to(0x00), [0x70]);
    }

    #[test]
    fn test_clock_wraps_like_hardware() {
        let clock = MockClock::at_us(u32::MAX as u64);
        clock.advance_us(2);
        assert_eq!(clock.micros(), 1);
    }
}
