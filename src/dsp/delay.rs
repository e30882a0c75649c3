//! Stereo feedback delay line for the orbit delay bus.

/// Circular-buffer delay with feedback, one line per channel.
pub struct StereoDelay {
    buffers: [Vec<f32>; 2],
    write: usize,
    delay_samples: usize,
    feedback: f32,
    sample_rate: f32,
}

impl StereoDelay {
    /// `max_seconds` bounds the line length; the active time can be retuned
    /// per block without reallocating.
    pub fn new(sample_rate: f32, max_seconds: f32) -> Self {
        let capacity = ((sample_rate * max_seconds) as usize).max(1);
        Self {
            buffers: [vec![0.0; capacity], vec![0.0; capacity]],
            write: 0,
            delay_samples: (sample_rate * 0.25) as usize,
            feedback: 0.4,
            sample_rate,
        }
    }

    /// Retune the delay time and feedback (latched from the most recent
    /// voice on the orbit).
    pub fn set_params(&mut self, time_seconds: f32, feedback: f32) {
        let capacity = self.buffers[0].len();
        self.delay_samples = ((self.sample_rate * time_seconds.max(0.001)) as usize)
            .clamp(1, capacity - 1);
        self.feedback = feedback.clamp(0.0, 0.98);
    }

    /// Consume the send buffers and add the delayed signal into the mix.
    pub fn process_block(
        &mut self,
        send_l: &[f32],
        send_r: &[f32],
        mix_l: &mut [f32],
        mix_r: &mut [f32],
    ) {
        let capacity = self.buffers[0].len();
        for i in 0..send_l.len() {
            let read = (self.write + capacity - self.delay_samples) % capacity;
            let tap_l = self.buffers[0][read];
            let tap_r = self.buffers[1][read];
            mix_l[i] += tap_l;
            mix_r[i] += tap_r;
            let fb_l = send_l[i] + tap_l * self.feedback;
            let fb_r = send_r[i] + tap_r * self.feedback;
            self.buffers[0][self.write] = if fb_l.is_finite() { fb_l } else { 0.0 };
            self.buffers[1][self.write] = if fb_r.is_finite() { fb_r } else { 0.0 };
            self.write = (self.write + 1) % capacity;
        }
    }

    /// True while the tail still carries audible energy.
    pub fn is_audible(&self) -> bool {
        self.buffers
            .iter()
            .any(|b| b.iter().any(|s| s.abs() > 1e-6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_returns_after_delay_time() {
        let sr = 1000.0;
        let mut delay = StereoDelay::new(sr, 1.0);
        delay.set_params(0.1, 0.5); // 100 samples
        let mut send_l = vec![0.0f32; 256];
        let mut send_r = vec![0.0f32; 256];
        send_l[0] = 1.0;
        send_r[0] = 1.0;
        let mut mix_l = vec![0.0f32; 256];
        let mut mix_r = vec![0.0f32; 256];
        delay.process_block(&send_l, &send_r, &mut mix_l, &mut mix_r);
        assert_eq!(mix_l[0], 0.0, "no dry signal through the delay bus");
        assert!((mix_l[100] - 1.0).abs() < 1e-6, "first tap after 100 samples");
        assert!((mix_l[200] - 0.5).abs() < 1e-6, "second tap fed back at 0.5");
        assert_eq!(mix_l, mix_r);
    }

    #[test]
    fn test_tail_decays() {
        let sr = 1000.0;
        let mut delay = StereoDelay::new(sr, 1.0);
        delay.set_params(0.01, 0.5);
        let mut send = vec![0.0f32; 64];
        send[0] = 1.0;
        let zeros = vec![0.0f32; 64];
        let mut mix_l = vec![0.0f32; 64];
        let mut mix_r = vec![0.0f32; 64];
        delay.process_block(&send, &send, &mut mix_l, &mut mix_r);
        assert!(delay.is_audible());
        for _ in 0..100 {
            let mut l = vec![0.0f32; 64];
            let mut r = vec![0.0f32; 64];
            delay.process_block(&zeros, &zeros, &mut l, &mut r);
        }
        assert!(!delay.is_audible(), "feedback < 1 must decay to silence");
    }
}
