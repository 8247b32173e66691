//! Small DSP collaborators for the demodulator: a biquad bandpass and the
//! envelope post-processing applied to each filter channel.

use std::f32::consts::PI;

/// Second-order IIR bandpass centered on a carrier. Coefficients follow the
/// standard biquad design with Q derived from the channel's half-bandwidth.
pub struct BandpassFilter {
    b0: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BandpassFilter {
    pub fn new(center_hz: f32, half_bandwidth_hz: f32, sample_rate: u32) -> Self {
        let q = center_hz / (2.0 * half_bandwidth_hz.max(f32::EPSILON));
        let w0 = 2.0 * PI * center_hz / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: alpha / a0,
            b2: -alpha / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let output =
            self.b0 * input + self.b2 * self.x2 - self.a1 * self.y1 - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Run `signal` through a fresh bandpass around `center_hz`
pub fn bandpass(
    signal: &[f32],
    center_hz: f32,
    half_bandwidth_hz: f32,
    sample_rate: u32,
) -> Vec<f32> {
    let mut filter = BandpassFilter::new(center_hz, half_bandwidth_hz, sample_rate);
    signal.iter().map(|&x| filter.process(x)).collect()
}

/// Envelope of a filtered channel: absolute value, clipped to `ceiling`,
/// with everything below `floor` saturating to zero.
pub fn envelope(signal: &[f32], ceiling: f32, floor: f32) -> Vec<f32> {
    signal
        .iter()
        .map(|&x| (x.abs().min(ceiling) - floor).max(0.0))
        .collect()
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    (sum / values.len() as f64) as f32
}

pub fn stddev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = mean(values) as f64;
    let variance: f64 = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt() as f32
}
