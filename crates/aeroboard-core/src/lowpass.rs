use core::f32::consts::{FRAC_1_SQRT_2, PI};
use micromath::F32Ext;
use nalgebra::Vector3;

/// First order smoothing with a fixed gain, used for slow signals such as die
/// temperature.
#[derive(Debug, Clone, Copy)]
pub struct LowPassFilter {
    alpha: f32,
    output: f32,
    initialized: bool,
}

impl LowPassFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            output: 0.0,
            initialized: false,
        }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        if !self.initialized {
            self.output = input;
            self.initialized = true;
        } else {
            self.output += self.alpha * (input - self.output);
        }
        self.output
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

/// Two-pole Butterworth low-pass over three axes (direct form II transposed).
///
/// A cutoff of zero disables filtering.
#[derive(Debug, Clone, Copy)]
pub struct LowPassFilter2p {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: Vector3<f32>,
    z2: Vector3<f32>,
    enabled: bool,
    initialized: bool,
}

impl LowPassFilter2p {
    pub fn new(sample_hz: f32, cutoff_hz: f32) -> Self {
        let mut filter = Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: Vector3::zeros(),
            z2: Vector3::zeros(),
            enabled: false,
            initialized: false,
        };
        filter.set_cutoff(sample_hz, cutoff_hz);
        filter
    }

    pub fn set_cutoff(&mut self, sample_hz: f32, cutoff_hz: f32) {
        self.enabled = cutoff_hz > 0.0 && sample_hz > 2.0 * cutoff_hz;
        self.initialized = false;
        if !self.enabled {
            return;
        }

        let omega = 2.0 * PI * cutoff_hz / sample_hz;
        let sn = omega.sin();
        let cs = omega.cos();
        let alpha = sn / (2.0 * FRAC_1_SQRT_2);

        let a0 = 1.0 + alpha;
        self.b0 = (1.0 - cs) / 2.0 / a0;
        self.b1 = (1.0 - cs) / a0;
        self.b2 = self.b0;
        self.a1 = -2.0 * cs / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    pub fn apply(&mut self, input: Vector3<f32>) -> Vector3<f32> {
        if !self.enabled {
            return input;
        }
        if !self.initialized {
            // steady state for a constant input
            self.z1 = input * (1.0 - self.b0);
            self.z2 = input * (self.b2 - self.a2);
            self.initialized = true;
        }

        let output = input * self.b0 + self.z1;
        self.z1 = input * self.b1 - output * self.a1 + self.z2;
        self.z2 = input * self.b2 - output * self.a2;
        output
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}
