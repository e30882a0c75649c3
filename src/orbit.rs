//! Orbits: per-group mix buses with shared delay and reverb sends.
//!
//! Voices on the same orbit write into its mix buffer and, scaled by their
//! send amounts, into its delay and reverb send buffers. After all voices
//! have rendered a block, the orbit runs its effect tails over the send
//! buffers and sums everything into the master bus. Orbits are allocated
//! lazily: the first voice on orbit N creates it, later voices reuse it.

use crate::dsp::delay::StereoDelay;
use crate::dsp::reverb::StereoReverb;

/// Longest delay time an orbit's line can be retuned to.
const MAX_DELAY_SECONDS: f32 = 2.0;

pub struct Orbit {
    pub mix_l: Vec<f32>,
    pub mix_r: Vec<f32>,
    pub delay_send_l: Vec<f32>,
    pub delay_send_r: Vec<f32>,
    pub reverb_send_l: Vec<f32>,
    pub reverb_send_r: Vec<f32>,
    delay: StereoDelay,
    reverb: StereoReverb,
}

impl Orbit {
    pub fn new(sample_rate: f32, block_frames: usize) -> Self {
        Self {
            mix_l: vec![0.0; block_frames],
            mix_r: vec![0.0; block_frames],
            delay_send_l: vec![0.0; block_frames],
            delay_send_r: vec![0.0; block_frames],
            reverb_send_l: vec![0.0; block_frames],
            reverb_send_r: vec![0.0; block_frames],
            delay: StereoDelay::new(sample_rate, MAX_DELAY_SECONDS),
            reverb: StereoReverb::new(sample_rate),
        }
    }

    /// Latch effect parameters carried by a voice landing on this orbit.
    pub fn configure(
        &mut self,
        delay_time: Option<f64>,
        delay_feedback: Option<f64>,
        room_size: Option<f64>,
        damping: Option<f64>,
    ) {
        if delay_time.is_some() || delay_feedback.is_some() {
            self.delay.set_params(
                delay_time.unwrap_or(0.25) as f32,
                delay_feedback.unwrap_or(0.4) as f32,
            );
        }
        if room_size.is_some() || damping.is_some() {
            self.reverb.set_params(
                room_size.unwrap_or(0.5) as f32,
                damping.unwrap_or(0.3) as f32,
            );
        }
    }

    /// Clear the per-block buffers before voices render.
    pub fn begin_block(&mut self) {
        for buf in [
            &mut self.mix_l,
            &mut self.mix_r,
            &mut self.delay_send_l,
            &mut self.delay_send_r,
            &mut self.reverb_send_l,
            &mut self.reverb_send_r,
        ] {
            buf.fill(0.0);
        }
    }

    /// Run the bus effects and add this orbit into the master bus.
    pub fn finish_block(&mut self, master_l: &mut [f32], master_r: &mut [f32]) {
        self.delay.process_block(
            &self.delay_send_l,
            &self.delay_send_r,
            &mut self.mix_l,
            &mut self.mix_r,
        );
        self.reverb.process_block(
            &self.reverb_send_l,
            &self.reverb_send_r,
            &mut self.mix_l,
            &mut self.mix_r,
        );
        for i in 0..master_l.len() {
            master_l[i] += self.mix_l[i];
            master_r[i] += self.mix_r[i];
        }
    }

    /// True while effect tails are still sounding; keeps the orbit ticking
    /// after its voices finish.
    pub fn has_tail(&self) -> bool {
        self.delay.is_audible() || self.reverb.is_audible()
    }
}

/// The lazily-populated orbit table.
#[derive(Default)]
pub struct OrbitBank {
    orbits: Vec<Option<Orbit>>,
    sample_rate: f32,
    block_frames: usize,
}

impl OrbitBank {
    pub fn new(sample_rate: f32, block_frames: usize) -> Self {
        Self {
            orbits: Vec::new(),
            sample_rate,
            block_frames,
        }
    }

    /// The orbit at `index`, created on first use.
    pub fn get_or_create(&mut self, index: usize) -> &mut Orbit {
        if index >= self.orbits.len() {
            self.orbits.resize_with(index + 1, || None);
        }
        let (sample_rate, block_frames) = (self.sample_rate, self.block_frames);
        self.orbits[index].get_or_insert_with(|| Orbit::new(sample_rate, block_frames))
    }

    pub fn begin_block(&mut self) {
        for orbit in self.orbits.iter_mut().flatten() {
            orbit.begin_block();
        }
    }

    pub fn finish_block(&mut self, master_l: &mut [f32], master_r: &mut [f32]) {
        for orbit in self.orbits.iter_mut().flatten() {
            orbit.finish_block(master_l, master_r);
        }
    }

    pub fn allocated(&self) -> usize {
        self.orbits.iter().filter(|o| o.is_some()).count()
    }
}
