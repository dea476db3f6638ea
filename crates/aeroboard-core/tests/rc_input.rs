use aeroboard_core::rc::{Edge, ProtocolLock, Pulse, PulseCapture, RcConfig, RcInput};
use embassy_futures::block_on;

const PULSE_LOW_US: u16 = 300;

/// Capture a PPM-sum line: every period starts with a fixed low pulse and
/// the high run makes up the rest.
fn ppm_period<const N: usize>(capture: &PulseCapture<N>, period_us: u16) {
    capture.push(Pulse::new(PULSE_LOW_US * 2, Edge::Rising));
    capture.push(Pulse::new((period_us - PULSE_LOW_US) * 2, Edge::Falling));
}

fn ppm_frame<const N: usize>(capture: &PulseCapture<N>, channels: &[u16]) {
    for c in channels {
        ppm_period(capture, *c);
    }
    ppm_period(capture, 6000);
}

const STICKS: [u16; 8] = [1100, 1200, 1300, 1400, 1500, 1600, 1700, 1800];

#[test]
fn test_ppm_stream_locks_and_decodes() {
    let capture: PulseCapture<256> = PulseCapture::new();
    let mut rc = RcInput::new(RcConfig::default());

    ppm_period(&capture, 6000);
    ppm_frame(&capture, &STICKS);
    assert!(capture.take_pending());
    rc.parse_pulses(&capture, 100);

    assert_eq!(rc.lock(), ProtocolLock::Ppm);
    assert_eq!(rc.num_channels(), 8);
    assert_eq!(rc.channels(), &STICKS);
    assert_eq!(rc.channel(8), None);
    assert_eq!(rc.last_signal_ms(), 100);
    assert_eq!(rc.last_change_ms(), 100);
    assert!(!rc.failsafe());

    // same sticks again: received but not changed
    ppm_frame(&capture, &STICKS);
    rc.parse_pulses(&capture, 120);
    assert_eq!(rc.last_signal_ms(), 120);
    assert_eq!(rc.last_change_ms(), 100);

    let mut moved = STICKS;
    moved[2] = 1900;
    ppm_frame(&capture, &moved);
    rc.parse_pulses(&capture, 140);
    assert_eq!(rc.channel(2), Some(1900));
    assert_eq!(rc.last_change_ms(), 140);
}

#[test]
fn test_short_ppm_frames_never_lock() {
    let capture: PulseCapture<64> = PulseCapture::new();
    let mut rc = RcInput::new(RcConfig::default());

    ppm_period(&capture, 6000);
    ppm_frame(&capture, &STICKS[..3]);
    ppm_frame(&capture, &STICKS[..3]);
    rc.parse_pulses(&capture, 100);

    assert_eq!(rc.lock(), ProtocolLock::Undetermined);
    assert!(rc.channels().is_empty());
    // a short burst is not a live receiver
    assert_eq!(rc.last_signal_ms(), 0);
    assert_eq!(rc.last_change_ms(), 0);
}

#[test]
fn test_short_burst_after_lock_is_ignored() {
    let capture: PulseCapture<128> = PulseCapture::new();
    let mut rc = RcInput::new(RcConfig::default());

    ppm_period(&capture, 6000);
    ppm_frame(&capture, &STICKS);
    rc.parse_pulses(&capture, 100);

    ppm_frame(&capture, &[1900, 1900, 1900]);
    rc.parse_pulses(&capture, 500);

    assert_eq!(rc.lock(), ProtocolLock::Ppm);
    assert_eq!(rc.channels(), &STICKS);
    assert_eq!(rc.last_signal_ms(), 100);
    assert_eq!(rc.last_change_ms(), 100);
}

#[test]
fn test_min_channels_is_configurable() {
    let capture: PulseCapture<64> = PulseCapture::new();
    let mut rc = RcInput::new(RcConfig {
        min_channels: 3,
        ..RcConfig::default()
    });

    ppm_period(&capture, 6000);
    ppm_frame(&capture, &STICKS[..3]);
    rc.parse_pulses(&capture, 100);

    assert_eq!(rc.lock(), ProtocolLock::Ppm);
    assert_eq!(rc.channels(), &STICKS[..3]);
}

#[test]
fn test_full_capture_keeps_unread_edges() {
    let capture: PulseCapture<4> = PulseCapture::new();
    for _ in 0..4 {
        assert!(capture.push(Pulse::new(600, Edge::Rising)));
    }
    assert!(!capture.push(Pulse::new(600, Edge::Falling)));
    assert_eq!(capture.overflows(), 1);
}

#[test]
fn test_parse_task_wakes_on_capture() {
    let capture: PulseCapture<8> = PulseCapture::new();
    capture.push(Pulse::new(600, Edge::Rising));
    block_on(capture.wait());
    assert!(!capture.take_pending());
}
