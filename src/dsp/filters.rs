//! The per-voice filter chain: biquad LPF/HPF/BPF/Notch plus the formant
//! bank for vowel filtering.
//!
//! Coefficients are only recomputed when the target cutoff actually moves
//! (control-rate modulation lands once per block), and every parameter is
//! clamped before it reaches the coefficient math so a wild pattern value
//! cannot produce NaNs or a division by zero.

use crate::control::{FilterDef, FilterKind};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

/// Smallest cutoff movement (Hz) that triggers a coefficient recompute.
const CUTOFF_EPSILON: f32 = 0.1;

fn clamp_cutoff(cutoff: f32, sample_rate: f32) -> f32 {
    cutoff.clamp(10.0, sample_rate * 0.45)
}

fn coefficients(
    kind: FilterKind,
    cutoff: f32,
    q: f32,
    sample_rate: f32,
) -> Coefficients<f32> {
    let kind = match kind {
        FilterKind::LowPass => Type::LowPass,
        FilterKind::HighPass => Type::HighPass,
        FilterKind::BandPass => Type::BandPass,
        FilterKind::Notch => Type::Notch,
    };
    let cutoff = clamp_cutoff(cutoff, sample_rate);
    let q = q.clamp(0.05, 30.0);
    // With clamped inputs the parameter check cannot fail; fall back to a
    // transparent coefficient set if it somehow does
    Coefficients::<f32>::from_params(kind, sample_rate.hz(), cutoff.hz(), q).unwrap_or(
        Coefficients {
            a1: 0.0,
            a2: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
        },
    )
}

/// One biquad in the voice chain, with optional control-rate cutoff
/// modulation from the voice envelope.
pub struct VoiceFilter {
    kind: FilterKind,
    base_cutoff: f32,
    q: f32,
    env_depth: f32,
    current_cutoff: f32,
    filter: DirectForm2Transposed<f32>,
    sample_rate: f32,
}

impl VoiceFilter {
    pub fn from_def(def: &FilterDef, sample_rate: f32) -> Self {
        let cutoff = clamp_cutoff(def.cutoff_hz as f32, sample_rate);
        let q = def.q as f32;
        let coeffs = coefficients(def.kind, cutoff, q, sample_rate);
        Self {
            kind: def.kind,
            base_cutoff: cutoff,
            q,
            env_depth: def.env_depth as f32,
            current_cutoff: cutoff,
            filter: DirectForm2Transposed::<f32>::new(coeffs),
            sample_rate,
        }
    }

    pub fn has_modulation(&self) -> bool {
        self.env_depth != 0.0
    }

    /// Control-rate modulation: retune the cutoff to
    /// `base × (1 + depth · env)`, recomputing coefficients only when it
    /// moved.
    pub fn modulate(&mut self, env_level: f32) {
        if self.env_depth == 0.0 {
            return;
        }
        let target = clamp_cutoff(
            self.base_cutoff * (1.0 + self.env_depth * env_level),
            self.sample_rate,
        );
        if (target - self.current_cutoff).abs() > CUTOFF_EPSILON {
            self.current_cutoff = target;
            self.filter.update_coefficients(coefficients(
                self.kind,
                target,
                self.q,
                self.sample_rate,
            ));
        }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32]) {
        for sample in buf.iter_mut() {
            let y = self.filter.run(*sample);
            // Denormal/NaN guard: a sick filter state must not poison the mix
            *sample = if y.is_finite() { y } else { 0.0 };
        }
    }
}

/// Formant frequencies for five vowels (Hz): `[F1, F2, F3]`. Averaged male
/// speaker formants from the acoustic phonetics literature.
const FORMANT_FREQS: [[f32; 3]; 5] = [
    [730.0, 1090.0, 2440.0], // a
    [270.0, 2290.0, 3010.0], // e
    [390.0, 1990.0, 2550.0], // i
    [570.0, 840.0, 2410.0],  // o
    [440.0, 1020.0, 2240.0], // u
];

/// Formant bandwidths (Hz); wider for F1, narrower up top.
const FORMANT_BANDWIDTHS: [f32; 3] = [90.0, 110.0, 170.0];

/// Three parallel bandpass filters tuned to a vowel.
pub struct FormantFilter {
    bands: [DirectForm2Transposed<f32>; 3],
}

impl FormantFilter {
    /// Build a bank for a vowel name (`a`, `e`, `i`, `o`, `u`). Unknown
    /// names get `a`.
    pub fn for_vowel(vowel: &str, sample_rate: f32) -> Self {
        let idx = match vowel.chars().next() {
            Some('e') => 1,
            Some('i') => 2,
            Some('o') => 3,
            Some('u') => 4,
            _ => 0,
        };
        let freqs = FORMANT_FREQS[idx];
        let bands = std::array::from_fn(|band| {
            let f0 = clamp_cutoff(freqs[band], sample_rate);
            let q = (f0 / FORMANT_BANDWIDTHS[band]).clamp(0.05, 30.0);
            let coeffs = Coefficients::<f32>::from_params(
                Type::BandPass,
                sample_rate.hz(),
                f0.hz(),
                q,
            )
            .unwrap_or(Coefficients {
                a1: 0.0,
                a2: 0.0,
                b0: 1.0,
                b1: 0.0,
                b2: 0.0,
            });
            DirectForm2Transposed::<f32>::new(coeffs)
        });
        Self { bands }
    }

    pub fn process_buffer(&mut self, buf: &mut [f32]) {
        for sample in buf.iter_mut() {
            let x = *sample;
            let mut acc = 0.0;
            for band in self.bands.iter_mut() {
                acc += band.run(x);
            }
            // The parallel bands roughly triple the energy at the formants
            let y = acc * 0.6;
            *sample = if y.is_finite() { y } else { 0.0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn def(kind: FilterKind, cutoff: f64) -> FilterDef {
        FilterDef::new(kind, cutoff)
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|x| x * x).sum::<f32>() / buf.len() as f32).sqrt()
    }

    fn tone(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * freq * std::f32::consts::TAU / SR).sin())
            .collect()
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let mut f = VoiceFilter::from_def(&def(FilterKind::LowPass, 500.0), SR);
        let mut high = tone(8000.0, 4096);
        f.process_buffer(&mut high);
        assert!(rms(&high[2048..]) < 0.05, "8 kHz through a 500 Hz LPF");

        let mut f = VoiceFilter::from_def(&def(FilterKind::LowPass, 500.0), SR);
        let mut low = tone(100.0, 4096);
        f.process_buffer(&mut low);
        assert!(rms(&low[2048..]) > 0.5, "100 Hz passes a 500 Hz LPF");
    }

    #[test]
    fn test_highpass_attenuates_lows() {
        let mut f = VoiceFilter::from_def(&def(FilterKind::HighPass, 2000.0), SR);
        let mut low = tone(100.0, 4096);
        f.process_buffer(&mut low);
        assert!(rms(&low[2048..]) < 0.05);
    }

    #[test]
    fn test_extreme_parameters_stay_finite() {
        // Hostile cutoff/q values must clamp, not explode
        let mut d = def(FilterKind::LowPass, 10_000_000.0);
        d.q = 0.0;
        let mut f = VoiceFilter::from_def(&d, SR);
        let mut buf = tone(440.0, 512);
        f.process_buffer(&mut buf);
        assert!(buf.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_modulation_moves_cutoff() {
        let mut d = def(FilterKind::LowPass, 400.0);
        d.env_depth = 4.0;
        let mut f = VoiceFilter::from_def(&d, SR);
        assert!(f.has_modulation());
        // Envelope fully open: cutoff should rise to base * 5
        f.modulate(1.0);
        let mut probe = tone(1500.0, 4096);
        f.process_buffer(&mut probe);
        assert!(
            rms(&probe[2048..]) > 0.3,
            "1.5 kHz passes once modulation lifts the cutoff to 2 kHz"
        );
    }

    #[test]
    fn test_formant_bank_is_stable() {
        let mut f = FormantFilter::for_vowel("a", SR);
        let mut buf = tone(110.0, 2048);
        f.process_buffer(&mut buf);
        assert!(buf.iter().all(|x| x.is_finite()));
    }
}
