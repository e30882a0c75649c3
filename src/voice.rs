//! Voice construction and the per-voice render pipeline.
//!
//! The factory turns a [`ScheduledVoice`] into a concrete [`ActiveVoice`]:
//! oscillator or sample source, resolved frequency, ADSR, filter chain and
//! effects. Rendering then runs the voice pipeline per block: pitch
//! modulation, raw signal, destructive pre-filters, the filter chain, the
//! VCA envelope, coloring post-filters, and equal-power panning into the
//! orbit buffers.

use crate::control::VoiceData;
use crate::dsp::effects::{BitCrush, Coarse, Compressor, Phaser, Tremolo, Waveshaper};
use crate::dsp::envelope::{AdsrEnvelope, AdsrParams};
use crate::dsp::filters::{FormantFilter, VoiceFilter};
use crate::dsp::oscillator::{Oscillator, Wave};
use crate::orbit::Orbit;
use crate::sample_registry::{CompleteSample, SampleRegistry};
use crate::link::SampleRequest;
use crate::tonal::{degree_to_semitones, midi_to_hz, scale_intervals};
use std::f32::consts::FRAC_PI_2;
use std::f64::consts::TAU;
use std::sync::Arc;
use tracing::debug;

/// Playback-rate clamp: five octaves either way.
const MAX_RATE: f64 = 32.0;

/// Default bank used when an event does not name one.
pub const DEFAULT_BANK: &str = "default";

/// A voice the scheduler holds until its absolute start frame comes up.
#[derive(Debug, Clone)]
pub struct ScheduledVoice {
    pub playback_id: u64,
    pub start_frame: f64,
    pub gate_end_frame: f64,
    pub data: VoiceData,
}

impl ScheduledVoice {
    /// The sample this voice will need, when it plays a sample sound.
    pub fn sample_request(&self) -> Option<SampleRequest> {
        let sound = self.data.sound.as_deref()?;
        if Wave::from_name(sound).is_some()
            || sound == "supersaw"
            || Oscillator::noise(sound, 0).is_some()
        {
            return None;
        }
        Some(SampleRequest {
            bank: self
                .data
                .bank
                .clone()
                .unwrap_or_else(|| DEFAULT_BANK.to_string()),
            sound: sound.to_string(),
            index: self.data.index.unwrap_or(0),
            note: None,
        })
    }
}

/// Scratch buffers shared by all voices for one block. Allocated once;
/// voices borrow them for the duration of a render call.
pub struct RenderContext {
    pub sample_rate: f32,
    pub block_start: u64,
    pub frames: usize,
    pub scratch: Vec<f32>,
    pub pitch_scratch: Vec<f32>,
}

impl RenderContext {
    pub fn new(sample_rate: f32, block_frames: usize) -> Self {
        Self {
            sample_rate,
            block_start: 0,
            frames: block_frames,
            scratch: vec![0.0; block_frames],
            pitch_scratch: vec![1.0; block_frames],
        }
    }
}

/// Sample playhead with linear interpolation and optional loop wrap.
struct SamplePlayback {
    pcm: Arc<Vec<f32>>,
    pos: f64,
    rate: f64,
    region_end: f64,
    loop_points: Option<(f64, f64)>,
}

impl SamplePlayback {
    /// Render `out.len()` samples; returns false once the playhead ran off
    /// the region (only possible when not looping).
    fn render(&mut self, out: &mut [f32], pitch_mod: Option<&[f32]>) -> bool {
        let len = self.pcm.len();
        if len == 0 {
            out.fill(0.0);
            return false;
        }
        let mut alive = true;
        for (i, sample) in out.iter_mut().enumerate() {
            if let Some((loop_start, loop_end)) = self.loop_points {
                if self.pos >= loop_end && loop_end > loop_start {
                    self.pos = loop_start + (self.pos - loop_end) % (loop_end - loop_start);
                }
                if self.pos < loop_start && self.rate < 0.0 {
                    self.pos = loop_end - (loop_start - self.pos) % (loop_end - loop_start);
                }
            }
            if self.pos < 0.0 || self.pos >= self.region_end || self.pos >= len as f64 {
                *sample = 0.0;
                alive = self.loop_points.is_some();
                continue;
            }
            let idx = self.pos as usize;
            let frac = (self.pos - idx as f64) as f32;
            let a = self.pcm[idx];
            let b = if idx + 1 < len { self.pcm[idx + 1] } else { 0.0 };
            *sample = a + (b - a) * frac;
            let step = match pitch_mod {
                Some(m) => self.rate * m[i] as f64,
                None => self.rate,
            };
            self.pos += step;
        }
        alive
    }
}

enum VoiceSource {
    Osc(Oscillator),
    Sample(SamplePlayback),
}

struct PitchEnv {
    amount_semitones: f64,
    attack_sec: f64,
    decay_sec: f64,
}

struct FmOperator {
    ratio: f64,
    depth: f64,
    phase: f64,
}

/// A live, stateful audio producer for one event.
pub struct ActiveVoice {
    pub playback_id: u64,
    pub cut: Option<i32>,
    pub orbit: usize,
    start_frame: u64,
    gate_end_frame: u64,
    end_frame: u64,
    source: VoiceSource,
    phase: f32,
    phase_inc: f32,
    freq_hz: f64,
    envelope: AdsrEnvelope,
    filters: Vec<VoiceFilter>,
    formant: Option<FormantFilter>,
    crush: Option<BitCrush>,
    coarse: Option<Coarse>,
    shaper: Option<Waveshaper>,
    compressor: Option<Compressor>,
    tremolo: Option<Tremolo>,
    phaser: Option<Phaser>,
    vibrato: Option<(f64, f64)>,
    accelerate: f64,
    pitch_env: Option<PitchEnv>,
    fm: Option<FmOperator>,
    gain: f32,
    pan: f32,
    delay_send: f32,
    reverb_send: f32,
    orbit_delay_time: Option<f64>,
    orbit_delay_feedback: Option<f64>,
    orbit_room_size: Option<f64>,
    orbit_damping: Option<f64>,
}

/// Build a concrete voice from scheduled data. `None` means the voice
/// cannot materialize (sample missing); the scheduler drops it silently.
pub fn build_voice(
    sv: &ScheduledVoice,
    registry: &SampleRegistry,
    sample_rate: f32,
) -> Option<ActiveVoice> {
    let data = &sv.data;
    let sr = sample_rate as f64;

    // Frequency from explicit Hz, else from (note, scale)
    let midi = match (data.note, data.scale.as_deref()) {
        (Some(degree), Some(scale_name)) => match scale_intervals(scale_name) {
            Ok(scale) => 60.0 + degree_to_semitones(scale, degree as i32) as f64,
            Err(_) => 60.0 + degree,
        },
        (Some(note), None) => note,
        (None, _) => 60.0,
    };
    let freq_hz = data.freq_hz.unwrap_or_else(|| midi_to_hz(midi));

    let sound = data.sound.as_deref().unwrap_or("sine");
    let seed = (sv.start_frame.to_bits()).wrapping_mul(0x9e37_79b9);

    // Oscillator vs sample path
    let (source, sample_defaults, sample_end_frame) = if let Some(wave) = Wave::from_name(sound) {
        (VoiceSource::Osc(Oscillator::single(wave)), None, None)
    } else if sound == "supersaw" {
        (
            VoiceSource::Osc(Oscillator::supersaw(7, 0.5, 1.0, seed)),
            None,
            None,
        )
    } else if let Some(noise) = Oscillator::noise(sound, seed) {
        (VoiceSource::Osc(noise), None, None)
    } else {
        let req = sv.sample_request()?;
        let sample = registry.lookup_complete(&req)?;
        let playback = build_sample_playback(&sample, data, freq_hz, sr)?;
        let frames_left = if playback.loop_points.is_some() {
            None
        } else {
            let span = (playback.region_end - playback.pos).max(0.0);
            Some(sv.start_frame + span / playback.rate.abs().max(1e-9))
        };
        // Samples default to playing their natural body: instant attack,
        // full sustain, short tail
        (
            VoiceSource::Sample(playback),
            Some(AdsrParams::new(0.0005, 0.001, 1.0, 0.01)),
            frames_left,
        )
    };

    // ADSR: pattern-specified ⊕ sample-default ⊕ synth-default
    let synth_default = AdsrParams::new(0.002, 0.01, 0.9, 0.05);
    let base = sample_defaults.unwrap_or(synth_default);
    let adsr = AdsrParams::new(
        data.attack.unwrap_or(base.attack),
        data.decay.unwrap_or(base.decay),
        data.sustain.unwrap_or(base.sustain),
        data.release.unwrap_or(base.release),
    );

    // Legato scales the gate duration
    let legato = data.legato.unwrap_or(1.0);
    let gate_len = (sv.gate_end_frame - sv.start_frame).max(0.0) * legato;
    let gate_end_frame = sv.start_frame + gate_len;
    let mut end_frame = gate_end_frame + adsr.release * sr;
    if let Some(stop) = sample_end_frame {
        end_frame = end_frame.min(stop.max(sv.start_frame + 1.0));
    }

    let filters = data
        .filters
        .iter()
        .map(|def| VoiceFilter::from_def(def, sample_rate))
        .collect();

    debug!(
        sound,
        freq_hz,
        start = sv.start_frame,
        end = end_frame,
        "voice materialized"
    );

    Some(ActiveVoice {
        playback_id: sv.playback_id,
        cut: data.cut,
        orbit: data.orbit.unwrap_or(0),
        start_frame: sv.start_frame.max(0.0) as u64,
        gate_end_frame: gate_end_frame.max(0.0) as u64,
        end_frame: end_frame.max(0.0) as u64,
        source,
        phase: 0.0,
        phase_inc: (freq_hz / sr) as f32,
        freq_hz,
        envelope: AdsrEnvelope::new(adsr, sr),
        filters,
        formant: data
            .vowel
            .as_deref()
            .map(|v| FormantFilter::for_vowel(v, sample_rate)),
        crush: data.crush.map(BitCrush::new),
        coarse: data.coarse.map(Coarse::new),
        shaper: data.shape.map(Waveshaper::new),
        compressor: data.comp_ratio.map(Compressor::new),
        tremolo: data
            .tremolo_rate
            .map(|rate| Tremolo::new(rate, data.tremolo_depth.unwrap_or(0.5))),
        phaser: data
            .phaser_rate
            .map(|rate| Phaser::new(rate, data.phaser_depth.unwrap_or(0.5))),
        vibrato: data
            .vibrato_rate
            .map(|rate| (rate, data.vibrato_depth.unwrap_or(0.5))),
        accelerate: data.accelerate.unwrap_or(0.0),
        pitch_env: data.pitch_env_amount.map(|amount| PitchEnv {
            amount_semitones: amount,
            attack_sec: data.pitch_env_attack.unwrap_or(0.0),
            decay_sec: data.pitch_env_decay.unwrap_or(0.1),
        }),
        fm: data.fm_ratio.map(|ratio| FmOperator {
            ratio,
            depth: data.fm_depth.unwrap_or(1.0),
            phase: 0.0,
        }),
        gain: data.gain.unwrap_or(1.0) as f32,
        pan: data.pan.unwrap_or(0.5).clamp(0.0, 1.0) as f32,
        delay_send: data.delay_send.unwrap_or(0.0) as f32,
        reverb_send: data.reverb_send.unwrap_or(0.0) as f32,
        orbit_delay_time: data.delay_time,
        orbit_delay_feedback: data.delay_feedback,
        orbit_room_size: data.room_size,
        orbit_damping: data.reverb_damp,
    })
}

fn build_sample_playback(
    sample: &CompleteSample,
    data: &VoiceData,
    target_hz: f64,
    sr: f64,
) -> Option<SamplePlayback> {
    let len = sample.pcm.len();
    if len == 0 {
        return None;
    }
    // Rate: resample ratio × pitch ratio × user speed, clamped ±5 octaves
    let resample = sample.pcm_sample_rate as f64 / sr;
    let pitch_ratio = match (sample.pitch_hz, data.note.or(data.freq_hz)) {
        (Some(anchor_hz), Some(_)) if anchor_hz > 0.0 => target_hz / anchor_hz,
        _ => 1.0,
    };
    let speed = data.speed.unwrap_or(1.0);
    let rate = (resample * pitch_ratio * speed).clamp(-MAX_RATE, MAX_RATE);
    if rate == 0.0 {
        return None;
    }

    let begin_pos = data.begin.unwrap_or(0.0).clamp(0.0, 1.0) * len as f64;
    let end_pos = data.end.unwrap_or(1.0).clamp(0.0, 1.0) * len as f64;
    let (begin_pos, end_pos) = if begin_pos <= end_pos {
        (begin_pos, end_pos)
    } else {
        (end_pos, begin_pos)
    };
    let pos = if rate < 0.0 {
        (end_pos - 1.0).max(0.0)
    } else {
        begin_pos
    };
    let loop_points = if data.loop_sample.unwrap_or(false) {
        Some((begin_pos, end_pos))
    } else {
        None
    };
    Some(SamplePlayback {
        pcm: sample.pcm.clone(),
        pos,
        rate,
        region_end: end_pos,
        loop_points,
    })
}

impl ActiveVoice {
    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    /// Render one block into the orbit's buffers. Returns `true` when the
    /// voice is finished and can be discarded.
    pub fn render(&mut self, ctx: &mut RenderContext, orbit: &mut Orbit) -> bool {
        if ctx.block_start >= self.end_frame {
            return true;
        }
        let block_end = ctx.block_start + ctx.frames as u64;
        if self.start_frame >= block_end {
            return false;
        }
        let offset = self.start_frame.saturating_sub(ctx.block_start) as usize;
        let len = ctx.frames - offset;

        orbit.configure(
            self.orbit_delay_time,
            self.orbit_delay_feedback,
            self.orbit_room_size,
            self.orbit_damping,
        );

        // 1. Pitch-modulation buffer (None when nothing modulates pitch)
        let sr = ctx.sample_rate as f64;
        let has_pitch_mod = self.vibrato.is_some()
            || self.accelerate != 0.0
            || self.pitch_env.is_some()
            || self.fm.is_some();
        if has_pitch_mod {
            let first = ctx.block_start + offset as u64;
            let gate_len =
                (self.gate_end_frame.saturating_sub(self.start_frame)).max(1) as f64;
            for i in 0..len {
                let frame = first + i as u64;
                let elapsed = frame.saturating_sub(self.start_frame) as f64;
                let t = elapsed / sr;
                let mut semitones = 0.0;
                if let Some((rate, depth)) = self.vibrato {
                    semitones += depth * (TAU * rate * t).sin();
                }
                if let Some(env) = &self.pitch_env {
                    semitones += env.amount_semitones * pitch_env_value(t, env);
                }
                let mut mult = 2f64.powf(semitones / 12.0);
                if self.accelerate != 0.0 {
                    let progress = elapsed / gate_len;
                    mult *= 2f64.powf(self.accelerate * progress);
                }
                // 2. FM operator: modulator at base × ratio scales the
                // pitch multiplier
                if let Some(fm) = &mut self.fm {
                    mult *= (1.0 + fm.depth * (fm.phase * TAU).sin()).max(0.01);
                    fm.phase = (fm.phase + self.freq_hz * fm.ratio / sr).fract();
                }
                ctx.pitch_scratch[i] = mult as f32;
            }
        }
        let pitch_mod = if has_pitch_mod {
            Some(&ctx.pitch_scratch[..len])
        } else {
            None
        };

        // 3. Raw signal
        let buf = &mut ctx.scratch[..len];
        let mut source_alive = true;
        match &mut self.source {
            VoiceSource::Osc(osc) => {
                self.phase = osc.process(buf, 0, len, self.phase, self.phase_inc, pitch_mod);
            }
            VoiceSource::Sample(playback) => {
                source_alive = playback.render(buf, pitch_mod);
            }
        }

        // 4. Destructive pre-filters
        if let Some(crush) = &mut self.crush {
            crush.process_buffer(buf);
        }
        if let Some(coarse) = &mut self.coarse {
            coarse.process_buffer(buf);
        }

        // 5. Main filter chain; cutoff modulation runs at control rate
        let env_level = self.envelope.level() as f32;
        for filter in self.filters.iter_mut() {
            filter.modulate(env_level);
            filter.process_buffer(buf);
        }
        if let Some(formant) = &mut self.formant {
            formant.process_buffer(buf);
        }

        // 6. VCA envelope (gate closes mid-block when the event ends)
        let first = ctx.block_start + offset as u64;
        for (i, sample) in buf.iter_mut().enumerate() {
            if first + i as u64 >= self.gate_end_frame {
                self.envelope.release();
            }
            *sample *= self.envelope.process() as f32;
        }
        if !source_alive {
            self.envelope.release();
        }

        // 7. Coloring post-filters
        if let Some(compressor) = &mut self.compressor {
            compressor.process_buffer(buf, ctx.sample_rate);
        }
        if let Some(shaper) = &mut self.shaper {
            shaper.process_buffer(buf);
        }
        if let Some(tremolo) = &mut self.tremolo {
            tremolo.process_buffer(buf, ctx.sample_rate);
        }
        if let Some(phaser) = &mut self.phaser {
            phaser.process_buffer(buf, ctx.sample_rate);
        }

        // 8. Equal-power pan into the orbit mix, sends scaled alongside
        let theta = self.pan * FRAC_PI_2;
        let left_gain = theta.cos() * self.gain;
        let right_gain = theta.sin() * self.gain;
        for (i, &sample) in buf.iter().enumerate() {
            let l = sample * left_gain;
            let r = sample * right_gain;
            let slot = offset + i;
            orbit.mix_l[slot] += l;
            orbit.mix_r[slot] += r;
            if self.delay_send > 0.0 {
                orbit.delay_send_l[slot] += l * self.delay_send;
                orbit.delay_send_r[slot] += r * self.delay_send;
            }
            if self.reverb_send > 0.0 {
                orbit.reverb_send_l[slot] += l * self.reverb_send;
                orbit.reverb_send_r[slot] += r * self.reverb_send;
            }
        }

        self.envelope.is_finished() || block_end >= self.end_frame
    }
}

/// Pitch-envelope curve: attack ramps anchor → peak, decay falls back to
/// the anchor, then holds there.
fn pitch_env_value(t: f64, env: &PitchEnv) -> f64 {
    if env.attack_sec > 0.0 && t < env.attack_sec {
        t / env.attack_sec
    } else {
        let after = t - env.attack_sec;
        if env.decay_sec > 0.0 && after < env.decay_sec {
            1.0 - after / env.decay_sec
        } else {
            0.0
        }
    }
}
