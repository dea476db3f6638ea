//! RC receiver input from a single pulse-capture channel.
//!
//! The capture interrupt pushes every edge into a [`PulseCapture`]; the task
//! side drains it through [`RcInput::parse_pulses`], which speculatively runs
//! the PPM, DSM / SUMD and SBUS decoders until one of them locks the channel.

pub mod dsm;
pub mod ppm;
pub mod sbus;
mod serial;
pub mod sumd;

use crate::ring::{OverflowPolicy, SampleRing};
use crate::scheduler::Deferred;
use dsm::DsmReceiver;
use ppm::{PpmDecoder, PpmEvent};
use sbus::{SbusFrame, SbusReceiver};
use serde::{Deserialize, Serialize};

pub const MAX_CHANNELS: usize = 18;
pub const MIN_CHANNELS: u8 = 5;

/// Protocols tried on a falling edge, in configured order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Ppm,
    /// DSM satellite, SUMD is recognised from the same byte stream
    Dsm,
    /// SBUS on a non-inverted line
    Sbus,
}

/// Latched once a decoder passes its integrity check. Never unlatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolLock {
    #[default]
    Undetermined,
    Ppm,
    Dsm,
    Sumd,
    Sbus,
    SbusNonInverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RcConfig {
    pub priority: [Protocol; 3],
    pub min_channels: u8,
}

impl Default for RcConfig {
    fn default() -> Self {
        Self {
            priority: [Protocol::Ppm, Protocol::Dsm, Protocol::Sbus],
            min_channels: MIN_CHANNELS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Rising,
    Falling,
}

/// One captured edge. `ticks` is the duration of the level the edge ended,
/// counted by a 2 MHz capture timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pulse {
    pub ticks: u16,
    pub edge: Edge,
}

impl Pulse {
    pub const fn new(ticks: u16, edge: Edge) -> Self {
        Self { ticks, edge }
    }

    fn width_us(&self) -> u16 {
        self.ticks >> 1
    }
}

/// Interrupt side of an RC input: the edge ring and the parse request.
pub struct PulseCapture<const N: usize> {
    pulses: SampleRing<Pulse, N>,
    pending: Deferred,
}

impl<const N: usize> Default for PulseCapture<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PulseCapture<N> {
    pub const fn new() -> Self {
        Self {
            pulses: SampleRing::new(OverflowPolicy::DropNewest),
            pending: Deferred::new(),
        }
    }

    /// Capture interrupt. Returns false when the ring was full.
    pub fn push(&self, pulse: Pulse) -> bool {
        let stored = self.pulses.push(pulse);
        self.pending.signal();
        stored
    }

    /// True when pulses arrived since the last call
    pub fn take_pending(&self) -> bool {
        self.pending.take()
    }

    pub async fn wait(&self) {
        self.pending.wait().await
    }

    pub fn overflows(&self) -> u32 {
        self.pulses.overflows()
    }
}

/// Task side of an RC input.
pub struct RcInput {
    config: RcConfig,
    lock: ProtocolLock,
    last_pulse: Pulse,
    ppm: PpmDecoder,
    dsm: DsmReceiver,
    sbus: SbusReceiver,
    sbus_non_inverted: SbusReceiver,
    values: [u16; MAX_CHANNELS],
    num_channels: u8,
    last_signal_ms: u32,
    last_change_ms: u32,
    failsafe: bool,
    now_ms: u32,
}

impl RcInput {
    pub fn new(config: RcConfig) -> Self {
        Self {
            config,
            lock: ProtocolLock::Undetermined,
            last_pulse: Pulse::new(0, Edge::Rising),
            ppm: PpmDecoder::new(config.min_channels),
            dsm: DsmReceiver::new(),
            sbus: SbusReceiver::new(),
            sbus_non_inverted: SbusReceiver::new(),
            values: [0; MAX_CHANNELS],
            num_channels: 0,
            last_signal_ms: 0,
            last_change_ms: 0,
            failsafe: false,
            now_ms: 0,
        }
    }

    /// Drain every captured edge through the decoders.
    pub fn parse_pulses<const N: usize>(&mut self, capture: &PulseCapture<N>, now_ms: u32) {
        self.now_ms = now_ms;
        while let Some(pulse) = capture.pulses.pop() {
            self.process_pulse(pulse);
        }
    }

    /// Feed one edge. The previous edge supplies the other half of the pair.
    pub fn process_pulse(&mut self, pulse: Pulse) {
        let prev = self.last_pulse;
        self.last_pulse = pulse;
        let (prev_us, cur_us) = (prev.width_us(), pulse.width_us());

        match pulse.edge {
            // a low run followed by a high run just ended
            Edge::Falling => {
                if self.lock != ProtocolLock::Sbus {
                    self.falling_edge(prev, pulse, prev_us, cur_us);
                }
            }
            // inverted line: the high run is logical low
            Edge::Rising => {
                if self.allows(ProtocolLock::Sbus) {
                    if let Some(frame) = self.sbus.feed_pair(prev_us, cur_us) {
                        self.on_sbus(frame, ProtocolLock::Sbus);
                    }
                }
            }
        }
    }

    fn falling_edge(&mut self, prev: Pulse, pulse: Pulse, prev_us: u16, cur_us: u16) {
        let period_us = ((prev.ticks as u32 + pulse.ticks as u32) >> 1).min(u16::MAX as u32) as u16;
        let mut claimed = false;

        for protocol in self.config.priority {
            match protocol {
                Protocol::Ppm => {
                    if self.allows(ProtocolLock::Ppm) {
                        claimed = self.on_ppm(period_us);
                    }
                }
                Protocol::Dsm => {
                    let dsm = self.allows(ProtocolLock::Dsm);
                    let sumd = self.allows(ProtocolLock::Sumd);
                    if !claimed && (dsm || sumd) {
                        let frames = self.dsm.feed_pair(prev_us, cur_us, dsm, sumd);
                        if let Some(frame) = frames.sumd {
                            self.on_sumd(frame);
                        }
                        if let Some(frame) = frames.dsm {
                            self.on_dsm(frame);
                        }
                    }
                }
                // runs regardless of what PPM made of the pulse
                Protocol::Sbus => {
                    if self.allows(ProtocolLock::SbusNonInverted) {
                        if let Some(frame) = self.sbus_non_inverted.feed_pair(prev_us, cur_us) {
                            self.on_sbus(frame, ProtocolLock::SbusNonInverted);
                        }
                    }
                }
            }
        }
    }

    fn allows(&self, protocol: ProtocolLock) -> bool {
        self.lock == ProtocolLock::Undetermined || self.lock == protocol
    }

    fn latch(&mut self, protocol: ProtocolLock) {
        if self.lock == ProtocolLock::Undetermined {
            info!("rc input locked to {}", protocol);
            self.lock = protocol;
        }
    }

    /// True when PPM claimed the pulse
    fn on_ppm(&mut self, period_us: u16) -> bool {
        match self.ppm.process(period_us) {
            PpmEvent::Sync(Some(_)) => {
                self.latch(ProtocolLock::Ppm);
                let ppm = self.ppm;
                self.store(ppm.frame(), false);
                self.last_signal_ms = self.now_ms;
                true
            }
            PpmEvent::Sync(None) | PpmEvent::Invalid => false,
            PpmEvent::Channel { .. } | PpmEvent::Overflow => true,
        }
    }

    fn on_dsm(&mut self, frame: dsm::DsmFrame) {
        if frame.count < self.config.min_channels {
            return;
        }
        self.latch(ProtocolLock::Dsm);
        self.store(&frame.values[..frame.count as usize], true);
        self.failsafe = false;
        self.last_signal_ms = self.now_ms;
    }

    fn on_sumd(&mut self, frame: sumd::SumdFrame) {
        if frame.count as usize > MAX_CHANNELS {
            return;
        }
        self.latch(ProtocolLock::Sumd);
        self.store(frame.channels(), true);
        self.failsafe = frame.failsafe;
        if !frame.failsafe {
            self.last_signal_ms = self.now_ms;
        }
    }

    fn on_sbus(&mut self, frame: SbusFrame, lock: ProtocolLock) {
        if (sbus::NUM_CHANNELS as u8) < self.config.min_channels {
            return;
        }
        self.latch(lock);
        self.store(&frame.channels, false);
        self.failsafe = frame.failsafe;
        if !frame.failsafe {
            self.last_signal_ms = self.now_ms;
        }
    }

    /// Frames may carry a subset of channels; zero marks a channel not sent
    fn store(&mut self, values: &[u16], skip_zero: bool) {
        for (i, v) in values.iter().enumerate().take(MAX_CHANNELS) {
            if skip_zero && *v == 0 {
                continue;
            }
            self.set_channel(i, *v);
        }
        self.num_channels = values.len().min(MAX_CHANNELS) as u8;
    }

    fn set_channel(&mut self, index: usize, value: u16) {
        if self.values[index] != value {
            self.last_change_ms = self.now_ms;
        }
        self.values[index] = value;
    }

    pub fn lock(&self) -> ProtocolLock {
        self.lock
    }

    pub fn num_channels(&self) -> u8 {
        self.num_channels
    }

    /// Channel value in µs
    pub fn channel(&self, index: usize) -> Option<u16> {
        (index < self.num_channels as usize).then(|| self.values[index])
    }

    pub fn channels(&self) -> &[u16] {
        &self.values[..self.num_channels as usize]
    }

    /// Last time a frame or PPM pulse was received
    pub fn last_signal_ms(&self) -> u32 {
        self.last_signal_ms
    }

    /// Last time any channel value changed
    pub fn last_change_ms(&self) -> u32 {
        self.last_change_ms
    }

    pub fn failsafe(&self) -> bool {
        self.failsafe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    const TICKS_PER_US: u32 = 2;

    /// Edges of a line described by (wire level, µs) runs
    fn edges(runs: &[(bool, u32)]) -> Vec<Pulse> {
        runs.iter()
            .map(|(level, us)| {
                let edge = if *level { Edge::Falling } else { Edge::Rising };
                Pulse::new((us * TICKS_PER_US) as u16, edge)
            })
            .collect()
    }

    fn ppm_runs(frames: &[&[u32]]) -> Vec<(bool, u32)> {
        let mut runs = Vec::new();
        for channels in frames {
            // sync gap first
            runs.push((false, 300));
            runs.push((true, 4700));
            for ch in channels.iter() {
                runs.push((false, 300));
                runs.push((true, ch - 300));
            }
        }
        runs.push((false, 300));
        runs.push((true, 4700));
        runs
    }

    fn sbus_runs(channels: &[u16; 16], inverted: bool) -> Vec<(bool, u32)> {
        let frame = sbus::encode_frame(channels, 0);
        let mut logical = Vec::new();
        serial::push_run(&mut logical, true, 300);
        sbus::frame_runs(&frame, &mut logical);
        sbus::frame_runs(&frame, &mut logical);
        // one more edge to close the trailing gap
        logical.push((false, 1));
        logical
            .into_iter()
            .map(|(level, bits)| (level != inverted, bits as u32 * 10))
            .collect()
    }

    fn feed(rc: &mut RcInput, runs: &[(bool, u32)], now_ms: u32) {
        let capture: PulseCapture<2048> = PulseCapture::new();
        for p in edges(runs) {
            assert!(capture.push(p));
        }
        assert!(capture.take_pending());
        rc.parse_pulses(&capture, now_ms);
    }

    #[test]
    fn test_ppm_frame_locks_and_reports_channels() {
        let mut rc = RcInput::new(RcConfig::default());
        let frame: &[u32] = &[1100, 1200, 1300, 1400, 1500, 1600];
        feed(&mut rc, &ppm_runs(&[frame]), 100);
        assert_eq!(rc.lock(), ProtocolLock::Ppm);
        assert_eq!(rc.num_channels(), 6);
        assert_eq!(rc.channels(), [1100, 1200, 1300, 1400, 1500, 1600]);
        assert_eq!(rc.last_signal_ms(), 100);
        assert_eq!(rc.last_change_ms(), 100);
    }

    #[test]
    fn test_ppm_short_frame_does_not_lock() {
        let mut rc = RcInput::new(RcConfig::default());
        let frame: &[u32] = &[1100, 1200, 1300];
        feed(&mut rc, &ppm_runs(&[frame]), 100);
        assert_eq!(rc.lock(), ProtocolLock::Undetermined);
        assert_eq!(rc.num_channels(), 0);
        assert_eq!(rc.last_signal_ms(), 0);
        assert_eq!(rc.last_change_ms(), 0);
    }

    #[test]
    fn test_complete_sync_is_claimed_by_ppm() {
        let mut rc = RcInput::new(RcConfig::default());
        // no frame before the first sync: left for the other decoders
        assert!(!rc.on_ppm(6000));
        for v in [1100, 1200, 1300, 1400, 1500] {
            assert!(rc.on_ppm(v));
        }
        assert!(rc.on_ppm(6000));
        assert!(!rc.on_ppm(6000));
        assert!(!rc.on_ppm(300));
    }

    #[test]
    fn test_short_frame_after_lock_keeps_last_good_frame() {
        let mut rc = RcInput::new(RcConfig::default());
        let good: &[u32] = &[1100, 1200, 1300, 1400, 1500];
        feed(&mut rc, &ppm_runs(&[good]), 100);
        let short: &[u32] = &[1900, 1900];
        feed(&mut rc, &ppm_runs(&[short]), 200);
        assert_eq!(rc.channels(), [1100, 1200, 1300, 1400, 1500]);
        assert_eq!(rc.last_signal_ms(), 100);
        assert_eq!(rc.last_change_ms(), 100);
    }

    #[test]
    fn test_repeated_frame_updates_signal_but_not_change() {
        let mut rc = RcInput::new(RcConfig::default());
        let frame: &[u32] = &[1100, 1200, 1300, 1400, 1500];
        feed(&mut rc, &ppm_runs(&[frame]), 100);
        feed(&mut rc, &ppm_runs(&[frame]), 200);
        assert_eq!(rc.last_signal_ms(), 200);
        assert_eq!(rc.last_change_ms(), 100);
    }

    #[test]
    fn test_inverted_sbus_locks() {
        let mut rc = RcInput::new(RcConfig::default());
        let mut channels = [1000u16; 16];
        channels[3] = 1800;
        feed(&mut rc, &sbus_runs(&channels, true), 50);
        assert_eq!(rc.lock(), ProtocolLock::Sbus);
        assert_eq!(rc.num_channels(), 18);
        assert_eq!(rc.channel(0), Some(1500));
        assert_eq!(rc.channel(3), Some(2000));
        assert!(!rc.failsafe());
    }

    #[test]
    fn test_non_inverted_sbus_locks() {
        let mut rc = RcInput::new(RcConfig::default());
        feed(&mut rc, &sbus_runs(&[1000; 16], false), 50);
        assert_eq!(rc.lock(), ProtocolLock::SbusNonInverted);
        assert_eq!(rc.channel(15), Some(1500));
    }

    #[test]
    fn test_sbus_lock_ignores_later_ppm() {
        let mut rc = RcInput::new(RcConfig::default());
        feed(&mut rc, &sbus_runs(&[1000; 16], true), 50);
        assert_eq!(rc.lock(), ProtocolLock::Sbus);
        let before: Vec<u16> = rc.channels().to_vec();

        let frame: &[u32] = &[1100, 1200, 1300, 1400, 1500, 1600];
        feed(&mut rc, &ppm_runs(&[frame, frame]), 500);
        assert_eq!(rc.lock(), ProtocolLock::Sbus);
        assert_eq!(rc.channels(), before.as_slice());
        assert_eq!(rc.last_signal_ms(), 50);
    }

    #[test]
    fn test_ppm_lock_ignores_later_sbus() {
        let mut rc = RcInput::new(RcConfig::default());
        let frame: &[u32] = &[1100, 1200, 1300, 1400, 1500];
        feed(&mut rc, &ppm_runs(&[frame]), 10);
        feed(&mut rc, &sbus_runs(&[1800; 16], true), 20);
        assert_eq!(rc.lock(), ProtocolLock::Ppm);
        assert_eq!(rc.channels(), [1100, 1200, 1300, 1400, 1500]);
    }

    fn serial_runs(bytes: &[u8]) -> Vec<(bool, u32)> {
        let mut logical = Vec::new();
        serial::push_run(&mut logical, true, 400);
        dsm::stream_runs(bytes, &mut logical);
        logical.push((false, 1));
        logical
            .into_iter()
            .map(|(level, bits)| (level, dsm::width_us(bits) as u32))
            .collect()
    }

    #[test]
    fn test_dsm_frame_locks() {
        let mut rc = RcInput::new(RcConfig::default());
        let words = [(0, 1024), (1, 1364), (2, 684), (3, 1024), (4, 1024), (5, 1024)];
        let frame = dsm::encode_frame(0xA2, &words);
        feed(&mut rc, &serial_runs(&frame), 70);
        assert_eq!(rc.lock(), ProtocolLock::Dsm);
        assert_eq!(rc.num_channels(), 6);
        assert_eq!(rc.channels(), [1500, 1700, 1300, 1500, 1500, 1500]);
    }

    #[test]
    fn test_sumd_frame_locks() {
        let mut rc = RcInput::new(RcConfig::default());
        let values = [1500, 1510, 1520, 1530, 1540, 1550, 1560, 1570];
        let bytes = sumd::encode_frame(&values, false);
        feed(&mut rc, &serial_runs(&bytes), 90);
        assert_eq!(rc.lock(), ProtocolLock::Sumd);
        assert_eq!(rc.channels(), values);
        assert_eq!(rc.last_signal_ms(), 90);
    }

    #[test]
    fn test_reordered_priority_still_detects_ppm() {
        let config = RcConfig {
            priority: [Protocol::Dsm, Protocol::Sbus, Protocol::Ppm],
            ..RcConfig::default()
        };
        let mut rc = RcInput::new(config);
        let frame: &[u32] = &[1100, 1200, 1300, 1400, 1500];
        feed(&mut rc, &ppm_runs(&[frame]), 10);
        assert_eq!(rc.lock(), ProtocolLock::Ppm);
    }
}
