//! Feedback-delay-network reverb for the orbit reverb bus.
//!
//! Eight parallel delay lines with coprime lengths, mixed each sample
//! through a Householder reflection (`H = I − (2/N)·1·1ᵀ`, computable in
//! O(N) as `x_i − (2/N)·Σx`) and damped by per-line one-pole lowpasses.
//! Room size maps to the feedback decay, damping to the lowpass amount.
//! The two channels run separate networks with offset line lengths so the
//! tail stays decorrelated.

/// Coprime delay lengths at 44.1 kHz; scaled for other rates.
const LINE_SAMPLES_44K: [usize; 8] = [1087, 1283, 1511, 1777, 1987, 2243, 2503, 2719];

/// Per-channel offset keeps left and right tails from correlating.
const RIGHT_OFFSET: usize = 23;

struct FdnChannel {
    lines: Vec<Vec<f32>>,
    write: Vec<usize>,
    lowpass: Vec<f32>,
}

impl FdnChannel {
    fn new(sample_rate: f32, offset: usize) -> Self {
        let scale = sample_rate / 44100.0;
        let lines: Vec<Vec<f32>> = LINE_SAMPLES_44K
            .iter()
            .map(|&len| vec![0.0; ((len + offset) as f32 * scale).max(8.0) as usize])
            .collect();
        let n = lines.len();
        Self {
            lines,
            write: vec![0; n],
            lowpass: vec![0.0; n],
        }
    }

    #[inline]
    fn process(&mut self, input: f32, decay: f32, damping: f32) -> f32 {
        let n = self.lines.len();
        let mut taps = [0.0f32; 8];
        for (i, line) in self.lines.iter().enumerate() {
            taps[i] = line[self.write[i]];
        }
        let sum: f32 = taps.iter().sum();
        let householder = 2.0 / n as f32;
        let mut out = 0.0;
        for i in 0..n {
            let mixed = taps[i] - householder * sum;
            // One-pole damping absorbs highs faster than lows
            self.lowpass[i] = mixed * (1.0 - damping) + self.lowpass[i] * damping;
            let mut next = self.lowpass[i] * decay;
            if i == 0 {
                next += input;
            }
            if !next.is_finite() {
                next = 0.0;
            }
            let w = self.write[i];
            self.lines[i][w] = next;
            self.write[i] = (w + 1) % self.lines[i].len();
            out += taps[i];
        }
        out * 0.25
    }

    fn is_audible(&self) -> bool {
        self.lines.iter().any(|l| l.iter().any(|s| s.abs() > 1e-6))
    }
}

/// Stereo FDN reverb.
pub struct StereoReverb {
    left: FdnChannel,
    right: FdnChannel,
    decay: f32,
    damping: f32,
}

impl StereoReverb {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            left: FdnChannel::new(sample_rate, 0),
            right: FdnChannel::new(sample_rate, RIGHT_OFFSET),
            decay: 0.85,
            damping: 0.3,
        }
    }

    /// `room_size` in `0..1` stretches the tail (decay 0.7 … 0.995);
    /// `damping` in `0..1` darkens it.
    pub fn set_params(&mut self, room_size: f32, damping: f32) {
        self.decay = 0.7 + room_size.clamp(0.0, 1.0) * 0.295;
        self.damping = damping.clamp(0.0, 0.95);
    }

    /// Consume the send buffers and add the reverberated signal to the mix.
    pub fn process_block(
        &mut self,
        send_l: &[f32],
        send_r: &[f32],
        mix_l: &mut [f32],
        mix_r: &mut [f32],
    ) {
        for i in 0..send_l.len() {
            mix_l[i] += self.left.process(send_l[i], self.decay, self.damping);
            mix_r[i] += self.right.process(send_r[i], self.decay, self.damping);
        }
    }

    pub fn is_audible(&self) -> bool {
        self.left.is_audible() || self.right.is_audible()
    }
}
