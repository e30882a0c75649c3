//! Per-voice effects: destructive pre-filters (bit crush, sample-rate
//! reduction) and coloring post-filters (waveshaper, tremolo, phaser).

use std::f32::consts::{PI, TAU};

/// Bit-depth reduction: quantize to `2^bits` levels.
#[derive(Debug, Clone)]
pub struct BitCrush {
    levels: f32,
}

impl BitCrush {
    pub fn new(bits: f64) -> Self {
        let bits = bits.clamp(1.0, 16.0) as f32;
        Self {
            levels: 2f32.powf(bits),
        }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32]) {
        for sample in buf.iter_mut() {
            *sample = (*sample * self.levels).round() / self.levels;
        }
    }
}

/// Sample-rate reduction: hold each value for `factor` samples.
#[derive(Debug, Clone)]
pub struct Coarse {
    factor: f32,
    phase: f32,
    held: f32,
}

impl Coarse {
    pub fn new(factor: f64) -> Self {
        Self {
            factor: factor.max(1.0) as f32,
            phase: 0.0,
            held: 0.0,
        }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32]) {
        for sample in buf.iter_mut() {
            if self.phase <= 0.0 {
                self.held = *sample;
                self.phase += self.factor;
            }
            self.phase -= 1.0;
            *sample = self.held;
        }
    }
}

/// Tanh waveshaper; `shape` in `0..1` maps to drive `1..~20`.
#[derive(Debug, Clone)]
pub struct Waveshaper {
    drive: f32,
    norm: f32,
}

impl Waveshaper {
    pub fn new(shape: f64) -> Self {
        let shape = shape.clamp(0.0, 0.99) as f32;
        let drive = 1.0 + shape * 19.0;
        Self {
            drive,
            norm: 1.0 / drive.tanh(),
        }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32]) {
        for sample in buf.iter_mut() {
            *sample = (*sample * self.drive).tanh() * self.norm;
        }
    }
}

/// Amplitude LFO. Depth 1 dips all the way to silence at the trough.
#[derive(Debug, Clone)]
pub struct Tremolo {
    rate_hz: f32,
    depth: f32,
    phase: f32,
}

impl Tremolo {
    pub fn new(rate_hz: f64, depth: f64) -> Self {
        Self {
            rate_hz: rate_hz.max(0.0) as f32,
            depth: depth.clamp(0.0, 1.0) as f32,
            phase: 0.0,
        }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32], sample_rate: f32) {
        let inc = self.rate_hz / sample_rate;
        for sample in buf.iter_mut() {
            let lfo = ((self.phase * TAU).sin() + 1.0) * 0.5;
            *sample *= 1.0 - self.depth * (1.0 - lfo);
            self.phase = (self.phase + inc).fract();
        }
    }
}

/// Downward compressor with a one-pole envelope follower. `ratio` of 1 is
/// transparent; higher ratios squash everything above the threshold.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: f32,
    ratio: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new(ratio: f64) -> Self {
        Self {
            threshold: 0.3,
            ratio: ratio.max(1.0) as f32,
            envelope: 0.0,
        }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32], sample_rate: f32) {
        // ~5 ms attack, ~80 ms release
        let attack = (-1.0 / (0.005 * sample_rate)).exp();
        let release = (-1.0 / (0.08 * sample_rate)).exp();
        for sample in buf.iter_mut() {
            let level = sample.abs();
            let coeff = if level > self.envelope { attack } else { release };
            self.envelope = level + coeff * (self.envelope - level);
            if self.envelope > self.threshold {
                let over = self.envelope - self.threshold;
                let target = self.threshold + over / self.ratio;
                *sample *= target / self.envelope.max(1e-9);
            }
        }
    }
}

/// One first-order all-pass stage.
#[derive(Debug, Clone, Copy, Default)]
struct AllPassStage {
    x1: f32,
    y1: f32,
}

impl AllPassStage {
    #[inline]
    fn run(&mut self, x: f32, coeff: f32) -> f32 {
        let y = -coeff * x + self.x1 + coeff * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

/// Classic phaser: cascaded all-pass stages with an LFO sweeping the notch
/// frequencies, mixed half-and-half with the dry signal.
#[derive(Debug, Clone)]
pub struct Phaser {
    rate_hz: f32,
    depth: f32,
    stages: [AllPassStage; 4],
    phase: f32,
    feedback: f32,
    last_out: f32,
}

impl Phaser {
    pub fn new(rate_hz: f64, depth: f64) -> Self {
        Self {
            rate_hz: rate_hz.max(0.01) as f32,
            depth: depth.clamp(0.0, 1.0) as f32,
            stages: [AllPassStage::default(); 4],
            phase: 0.0,
            feedback: 0.25,
            last_out: 0.0,
        }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32], sample_rate: f32) {
        let inc = self.rate_hz / sample_rate;
        for sample in buf.iter_mut() {
            let lfo = ((self.phase * TAU).sin() + 1.0) * 0.5;
            // Sweep the all-pass center between ~200 Hz and ~2 kHz
            let sweep_hz = 200.0 + self.depth * lfo * 1800.0;
            let coeff = {
                let tan = (PI * sweep_hz / sample_rate).tan();
                (1.0 - tan) / (1.0 + tan)
            };
            let mut wet = *sample + self.last_out * self.feedback;
            for stage in self.stages.iter_mut() {
                wet = stage.run(wet, coeff);
            }
            self.last_out = if wet.is_finite() { wet } else { 0.0 };
            *sample = (*sample + self.last_out) * 0.5;
            self.phase = (self.phase + inc).fract();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitcrush_quantizes() {
        let mut crush = BitCrush::new(2.0);
        let mut buf = vec![0.3, -0.6, 0.9];
        crush.process_buffer(&mut buf);
        // 2 bits -> 4 levels of 0.25
        for v in &buf {
            assert!((v * 4.0).fract().abs() < 1e-6, "{} not on a 2-bit grid", v);
        }
    }

    #[test]
    fn test_coarse_holds_values() {
        let mut coarse = Coarse::new(4.0);
        let mut buf: Vec<f32> = (0..8).map(|i| i as f32).collect();
        coarse.process_buffer(&mut buf);
        assert_eq!(buf, vec![0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_waveshaper_is_bounded_and_monotone() {
        let mut shaper = Waveshaper::new(0.8);
        let mut buf = vec![-2.0, -0.5, 0.0, 0.5, 2.0];
        shaper.process_buffer(&mut buf);
        assert!(buf.iter().all(|v| v.abs() <= 1.01));
        assert!(buf.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(buf[2], 0.0);
    }

    #[test]
    fn test_tremolo_modulates_amplitude() {
        let mut trem = Tremolo::new(10.0, 1.0);
        let mut buf = vec![1.0f32; 4410];
        trem.process_buffer(&mut buf, 44100.0);
        let max = buf.iter().cloned().fold(0.0f32, f32::max);
        let min = buf.iter().cloned().fold(1.0f32, f32::min);
        assert!(max > 0.9);
        assert!(min < 0.1, "full-depth tremolo should reach silence");
    }

    #[test]
    fn test_compressor_squashes_loud_signals() {
        let mut comp = Compressor::new(8.0);
        let mut loud = vec![0.9f32; 8192];
        comp.process_buffer(&mut loud, 44100.0);
        // After the attack settles, the level sits near threshold
        let settled = loud[4096..].iter().cloned().fold(0.0f32, f32::max);
        assert!(settled < 0.5, "0.9 input should squash, got {}", settled);

        let mut comp = Compressor::new(8.0);
        let mut quiet = vec![0.1f32; 1024];
        comp.process_buffer(&mut quiet, 44100.0);
        assert!(
            quiet.iter().all(|v| (*v - 0.1).abs() < 1e-4),
            "below-threshold audio passes untouched"
        );
    }

    #[test]
    fn test_phaser_stays_finite() {
        let mut phaser = Phaser::new(0.5, 1.0);
        let mut buf: Vec<f32> = (0..4096)
            .map(|i| (i as f32 * 440.0 * TAU / 44100.0).sin())
            .collect();
        phaser.process_buffer(&mut buf, 44100.0);
        assert!(buf.iter().all(|v| v.is_finite()));
        assert!(buf.iter().any(|v| v.abs() > 0.01));
    }
}
