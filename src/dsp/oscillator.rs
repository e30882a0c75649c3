//! Waveform generators for the oscillator voice path.
//!
//! Every generator follows the same contract: `process` writes `len`
//! samples into `buf[offset..]`, advancing an externally-owned phase by
//! `phase_inc` per sample (scaled by the optional per-sample pitch
//! modulation buffer) and returning the updated phase. Phase lives in
//! `[0, 1)`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

/// Basic waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wave {
    Sine,
    Saw,
    Triangle,
    Square,
}

impl Wave {
    /// Parse a sound name into a waveform; the voice factory routes these
    /// names to the oscillator path instead of the sample registry.
    pub fn from_name(name: &str) -> Option<Wave> {
        match name {
            "sine" | "sin" => Some(Wave::Sine),
            "saw" | "sawtooth" => Some(Wave::Saw),
            "tri" | "triangle" => Some(Wave::Triangle),
            "square" | "pulse" => Some(Wave::Square),
            _ => None,
        }
    }

    #[inline]
    fn sample(&self, phase: f32) -> f32 {
        match self {
            Wave::Sine => (phase * TAU).sin(),
            Wave::Saw => 2.0 * phase - 1.0,
            Wave::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    3.0 - 4.0 * phase
                }
            }
            Wave::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// The voice's signal source on the oscillator path.
#[derive(Debug, Clone)]
pub enum Oscillator {
    /// A single waveform generator.
    Single { wave: Wave },
    /// A bank of detuned saws. Detune skews each copy's phase increment;
    /// spread scales how far the outer copies drift.
    Supersaw {
        detune_ratios: Vec<f32>,
        phases: Vec<f32>,
        norm: f32,
    },
    /// Flat-spectrum noise.
    White { rng: StdRng },
    /// 1/f noise via the Voss-McCartney row trick.
    Pink {
        rng: StdRng,
        rows: [f32; 7],
        counter: u32,
    },
    /// Brownian noise: leaky-integrated white.
    Brown { rng: StdRng, last: f32 },
}

impl Oscillator {
    pub fn single(wave: Wave) -> Self {
        Oscillator::Single { wave }
    }

    /// Build a supersaw bank; `voices` copies detuned up to
    /// `±detune × spread × 10%`.
    pub fn supersaw(voices: usize, detune: f32, spread: f32, seed: u64) -> Self {
        let voices = voices.max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let detune_ratios = (0..voices)
            .map(|i| {
                let offset = if voices == 1 {
                    0.0
                } else {
                    (i as f32 / (voices - 1) as f32) * 2.0 - 1.0
                };
                1.0 + offset * detune * spread * 0.1
            })
            .collect();
        let phases = (0..voices).map(|_| rng.gen::<f32>()).collect();
        Oscillator::Supersaw {
            detune_ratios,
            phases,
            norm: 1.0 / (voices as f32).sqrt(),
        }
    }

    pub fn noise(name: &str, seed: u64) -> Option<Self> {
        match name {
            "white" | "noise" => Some(Oscillator::White {
                rng: StdRng::seed_from_u64(seed),
            }),
            "pink" => Some(Oscillator::Pink {
                rng: StdRng::seed_from_u64(seed),
                rows: [0.0; 7],
                counter: 0,
            }),
            "brown" => Some(Oscillator::Brown {
                rng: StdRng::seed_from_u64(seed),
                last: 0.0,
            }),
            _ => None,
        }
    }

    /// Write `len` samples into `buf[offset..offset + len]`. The phase
    /// advances by `phase_inc` per sample, scaled per-sample by `pitch_mod`
    /// when present. Returns the new phase.
    pub fn process(
        &mut self,
        buf: &mut [f32],
        offset: usize,
        len: usize,
        phase: f32,
        phase_inc: f32,
        pitch_mod: Option<&[f32]>,
    ) -> f32 {
        let out = &mut buf[offset..offset + len];
        let mut phase = phase;
        match self {
            Oscillator::Single { wave } => {
                for (i, sample) in out.iter_mut().enumerate() {
                    *sample = wave.sample(phase);
                    let inc = match pitch_mod {
                        Some(m) => phase_inc * m[i],
                        None => phase_inc,
                    };
                    phase = (phase + inc).fract();
                }
                phase
            }
            Oscillator::Supersaw {
                detune_ratios,
                phases,
                norm,
            } => {
                for (i, sample) in out.iter_mut().enumerate() {
                    let inc = match pitch_mod {
                        Some(m) => phase_inc * m[i],
                        None => phase_inc,
                    };
                    let mut acc = 0.0;
                    for (ratio, p) in detune_ratios.iter().zip(phases.iter_mut()) {
                        acc += 2.0 * *p - 1.0;
                        *p = (*p + inc * ratio).fract();
                    }
                    *sample = acc * *norm;
                    phase = (phase + inc).fract();
                }
                phase
            }
            Oscillator::White { rng } => {
                for sample in out.iter_mut() {
                    *sample = rng.gen::<f32>() * 2.0 - 1.0;
                }
                phase
            }
            Oscillator::Pink { rng, rows, counter } => {
                for sample in out.iter_mut() {
                    *counter = counter.wrapping_add(1);
                    // Update the row whose bit flipped
                    let row = counter.trailing_zeros() as usize;
                    if row < rows.len() {
                        rows[row] = rng.gen::<f32>() * 2.0 - 1.0;
                    }
                    let sum: f32 = rows.iter().sum();
                    *sample = sum / rows.len() as f32;
                }
                phase
            }
            Oscillator::Brown { rng, last } => {
                for sample in out.iter_mut() {
                    let white = rng.gen::<f32>() * 2.0 - 1.0;
                    *last = (*last + white * 0.02).clamp(-1.0, 1.0);
                    *sample = *last * 3.0;
                }
                phase
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_phase_advances() {
        let mut osc = Oscillator::single(Wave::Sine);
        let mut buf = vec![0.0f32; 64];
        let phase = osc.process(&mut buf, 0, 64, 0.0, 0.25, None);
        // 64 samples at inc 0.25 lands back on a cycle boundary
        assert!(phase.abs() < 1e-5);
        assert!(buf[0].abs() < 1e-6, "sine starts at zero");
        assert!((buf[1] - 1.0).abs() < 1e-6, "quarter cycle hits peak");
    }

    #[test]
    fn test_square_alternates() {
        let mut osc = Oscillator::single(Wave::Square);
        let mut buf = vec![0.0f32; 4];
        osc.process(&mut buf, 0, 4, 0.0, 0.25, None);
        assert_eq!(buf, vec![1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_pitch_mod_scales_increment() {
        let mut osc = Oscillator::single(Wave::Saw);
        let mut buf = vec![0.0f32; 8];
        let mods = vec![2.0f32; 8];
        let phase = osc.process(&mut buf, 0, 8, 0.0, 0.05, Some(&mods));
        assert!((phase - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_offset_writes_only_tail() {
        let mut osc = Oscillator::single(Wave::Square);
        let mut buf = vec![7.0f32; 8];
        osc.process(&mut buf, 4, 4, 0.0, 0.25, None);
        assert_eq!(&buf[..4], &[7.0; 4]);
        assert_eq!(&buf[4..], &[1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_noise_is_seeded() {
        let mut a = Oscillator::noise("white", 42).unwrap();
        let mut b = Oscillator::noise("white", 42).unwrap();
        let mut buf_a = vec![0.0f32; 16];
        let mut buf_b = vec![0.0f32; 16];
        a.process(&mut buf_a, 0, 16, 0.0, 0.0, None);
        b.process(&mut buf_b, 0, 16, 0.0, 0.0, None);
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_supersaw_stays_bounded() {
        let mut osc = Oscillator::supersaw(7, 0.5, 1.0, 1);
        let mut buf = vec![0.0f32; 256];
        osc.process(&mut buf, 0, 256, 0.0, 0.01, None);
        assert!(buf.iter().all(|s| s.abs() <= 7.0f32.sqrt() + 1e-3));
        assert!(buf.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn test_wave_names() {
        assert_eq!(Wave::from_name("saw"), Some(Wave::Saw));
        assert_eq!(Wave::from_name("bd"), None);
    }
}
