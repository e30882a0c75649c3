//! Voice data and the user-facing control surface.
//!
//! `VoiceData` is the open record every pattern event carries into the
//! scheduler: pitch, sound selection, mix parameters, envelope and filter
//! definitions, effect sends. Every control constructor here accepts a
//! mini-notation string, so any argument can itself be a pattern — the
//! inner join wires the argument pattern onto the carrier events.

use crate::error::{BuildError, ParseError};
use crate::fraction::Fraction;
use crate::mini_notation::{ast_to_pattern, parse_ast, parse_mini_notation, Ast};
use crate::pattern::{Hap, Pattern, SourcePos};
use crate::tonal::note_to_midi;
use serde::{Deserialize, Serialize};

/// The computed value union a pattern event may carry. When it carries a
/// pattern, the payload participates in pattern-of-patterns flattening.
#[derive(Debug, Clone)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    /// A word atom from the mini-notation, with optional sample index and
    /// per-event gain (`bd:2:0.8`).
    Name {
        name: String,
        index: Option<u32>,
        gain: Option<f64>,
    },
    Pattern(Pattern<Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.parse().ok(),
            Value::Name { name, .. } => name.parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Pattern(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Name { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Biquad filter family for the per-voice filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

/// One filter in the voice's chain, with optional envelope modulation of
/// the cutoff (evaluated at control rate, once per block).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterDef {
    pub kind: FilterKind,
    pub cutoff_hz: f64,
    pub q: f64,
    /// Depth of cutoff modulation by the voice envelope; 0 disables it.
    pub env_depth: f64,
}

impl FilterDef {
    pub fn new(kind: FilterKind, cutoff_hz: f64) -> Self {
        Self {
            kind,
            cutoff_hz,
            q: std::f64::consts::FRAC_1_SQRT_2,
            env_depth: 0.0,
        }
    }
}

/// The open record of musical and DSP attributes carried by every event.
/// Everything is optional; the voice factory resolves defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceData {
    // Pitch
    pub note: Option<f64>,
    pub freq_hz: Option<f64>,
    pub scale: Option<String>,

    // Sound selection
    pub sound: Option<String>,
    pub bank: Option<String>,
    pub index: Option<u32>,

    // Mix
    pub gain: Option<f64>,
    pub pan: Option<f64>,
    pub orbit: Option<usize>,

    // Envelope
    pub attack: Option<f64>,
    pub decay: Option<f64>,
    pub sustain: Option<f64>,
    pub release: Option<f64>,
    pub legato: Option<f64>,

    // Filters
    pub filters: Vec<FilterDef>,
    pub vowel: Option<String>,

    // Effect sends (per-orbit delay and reverb buses)
    pub delay_send: Option<f64>,
    pub delay_time: Option<f64>,
    pub delay_feedback: Option<f64>,
    pub reverb_send: Option<f64>,
    pub room_size: Option<f64>,
    pub reverb_damp: Option<f64>,

    // Destructive / coloring effects
    pub shape: Option<f64>,
    pub crush: Option<f64>,
    pub coarse: Option<f64>,
    pub tremolo_rate: Option<f64>,
    pub tremolo_depth: Option<f64>,
    pub phaser_rate: Option<f64>,
    pub phaser_depth: Option<f64>,

    // Pitch modulation
    pub vibrato_rate: Option<f64>,
    pub vibrato_depth: Option<f64>,
    pub accelerate: Option<f64>,
    pub pitch_env_amount: Option<f64>,
    pub pitch_env_attack: Option<f64>,
    pub pitch_env_decay: Option<f64>,
    pub fm_ratio: Option<f64>,
    pub fm_depth: Option<f64>,

    // Dynamics
    pub comp_ratio: Option<f64>,

    // Sample playback
    pub speed: Option<f64>,
    pub begin: Option<f64>,
    pub end: Option<f64>,
    pub loop_sample: Option<bool>,
    pub cut: Option<i32>,

    /// Computed value; may carry a nested pattern (pattern-of-patterns).
    #[serde(skip)]
    pub value: Option<Value>,

    /// Breadcrumb back to the mini-notation source, for editor highlighting.
    #[serde(skip)]
    pub source: Option<SourcePos>,
}

impl VoiceData {
    /// Field-wise merge: fields set on `other` win.
    pub fn merged_with(&self, other: &VoiceData) -> VoiceData {
        let mut out = self.clone();
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    out.$field = other.$field.clone();
                })*
            };
        }
        take!(
            note, freq_hz, scale, sound, bank, index, gain, pan, orbit, attack, decay,
            sustain, release, legato, vowel, delay_send, delay_time, delay_feedback,
            reverb_send, room_size, reverb_damp, shape, crush, coarse, tremolo_rate,
            tremolo_depth, phaser_rate, phaser_depth, vibrato_rate, vibrato_depth,
            accelerate, pitch_env_amount, pitch_env_attack, pitch_env_decay, fm_ratio,
            fm_depth, comp_ratio, speed, begin, end, loop_sample, cut, value, source
        );
        if !other.filters.is_empty() {
            out.filters = other.filters.clone();
        }
        out
    }
}

// ============= Carrier constructors =============

/// `sound("bd sn:2")`: a pattern of sounds. Atom names select a sample
/// folder or a synth waveform; `:idx` picks the sample, `:idx:gain` also
/// scales the event gain.
pub fn sound(input: &str) -> Result<Pattern<VoiceData>, ParseError> {
    let values = parse_mini_notation(input)?;
    Ok(values.fmap(|v| {
        let mut data = VoiceData::default();
        match v {
            Value::Name { name, index, gain } => {
                data.sound = Some(name.clone());
                data.index = *index;
                data.gain = *gain;
            }
            Value::Num(n) => {
                data.index = Some(*n as u32);
            }
            other => {
                data.value = Some(other.clone());
            }
        }
        data
    }))
}

/// Tidal-style shorthand for [`sound`].
pub fn s(input: &str) -> Result<Pattern<VoiceData>, ParseError> {
    sound(input)
}

/// `note("c e g")`: a pattern of pitches, as note names or numbers. Note
/// names are validated while the pattern is built, so a typo surfaces
/// immediately rather than as silence at play time.
pub fn note(input: &str) -> Result<Pattern<VoiceData>, BuildError> {
    let ast = parse_ast(input)?;
    validate_notes(&ast)?;
    let values = ast_to_pattern(&ast);
    Ok(values.fmap(|v| {
        let mut data = VoiceData::default();
        data.note = match v {
            Value::Num(n) => Some(*n),
            Value::Name { name, .. } => note_to_midi(name).ok(),
            _ => None,
        };
        data
    }))
}

/// `n("0 2 4")`: numeric note degrees (or sample indices for sample
/// sounds). With a `scale` control in effect the numbers walk the scale.
pub fn n(input: &str) -> Result<Pattern<VoiceData>, ParseError> {
    let values = parse_mini_notation(input)?;
    Ok(values.fmap(|v| {
        let mut data = VoiceData::default();
        data.note = v.as_f64();
        data
    }))
}

/// `freq("220 330")`: explicit oscillator frequency in Hz.
pub fn freq(input: &str) -> Result<Pattern<VoiceData>, ParseError> {
    let values = parse_mini_notation(input)?;
    Ok(values.fmap(|v| {
        let mut data = VoiceData::default();
        data.freq_hz = v.as_f64();
        data
    }))
}

/// The silent pattern.
pub fn silence() -> Pattern<VoiceData> {
    Pattern::silence()
}

fn validate_notes(ast: &Ast) -> Result<(), BuildError> {
    match ast {
        Ast::Name { name, .. } => {
            note_to_midi(name)?;
            Ok(())
        }
        Ast::Number(_) | Ast::Rest => Ok(()),
        Ast::Seq(children) => children.iter().try_for_each(|(_, c)| validate_notes(c)),
        Ast::Stack(layers) => layers.iter().try_for_each(validate_notes),
        Ast::Alt(options) => options.iter().try_for_each(validate_notes),
        Ast::Fast(subject, _) | Ast::Slow(subject, _) | Ast::Degrade(subject, _) => {
            validate_notes(subject)
        }
        Ast::Euclid { subject, .. } => validate_notes(subject),
    }
}

// ============= Patternified controls =============

impl Pattern<VoiceData> {
    /// Apply a control argument pattern with the inner join: the carrier
    /// keeps its structure; each event samples the argument over its own
    /// part and merges the result into its data.
    fn ctrl(
        &self,
        arg: Pattern<Value>,
        apply: impl Fn(&mut VoiceData, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.inner_join_with(arg, move |data, value| {
            let mut out = data.clone();
            apply(&mut out, value);
            out
        })
    }

    fn num_ctrl(
        &self,
        input: &str,
        apply: impl Fn(&mut VoiceData, f64) + Send + Sync + 'static,
    ) -> Result<Self, ParseError> {
        let arg = parse_mini_notation(input)?;
        Ok(self.ctrl(arg, move |data, value| {
            if let Some(x) = value.as_f64() {
                apply(data, x);
            }
        }))
    }
}

macro_rules! numeric_controls {
    ($(#[doc = $doc:expr] $name:ident => $field:ident : $ty:ty = $conv:expr;)*) => {
        impl Pattern<VoiceData> {
            $(
                #[doc = $doc]
                pub fn $name(&self, input: &str) -> Result<Self, ParseError> {
                    self.num_ctrl(input, |data, x| {
                        let conv: fn(f64) -> $ty = $conv;
                        data.$field = Some(conv(x));
                    })
                }
            )*
        }
    };
}

numeric_controls! {
    #[doc = "Event gain (amplitude multiplier)."]
    gain => gain: f64 = |x| x;
    #[doc = "Stereo position in `0..1` (0 left, 1 right)."]
    pan => pan: f64 = |x| x;
    #[doc = "Orbit (effect bus) index."]
    orbit => orbit: usize = |x| x.max(0.0) as usize;
    #[doc = "Envelope attack in seconds."]
    attack => attack: f64 = |x| x.max(0.0);
    #[doc = "Envelope decay in seconds."]
    decay => decay: f64 = |x| x.max(0.0);
    #[doc = "Envelope sustain level `0..1`."]
    sustain => sustain: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Envelope release in seconds."]
    release => release: f64 = |x| x.max(0.0);
    #[doc = "Gate-length ratio; 1 is the full event span."]
    legato => legato: f64 = |x| x.max(0.0);
    #[doc = "Delay send amount."]
    delay => delay_send: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Delay line time in seconds."]
    delaytime => delay_time: f64 = |x| x.max(0.0);
    #[doc = "Delay feedback `0..1`."]
    delayfeedback => delay_feedback: f64 = |x| x.clamp(0.0, 0.99);
    #[doc = "Reverb send amount."]
    room => reverb_send: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Reverb room size (decay)."]
    size => room_size: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Reverb high-frequency damping."]
    dim => reverb_damp: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Waveshaper drive `0..1`."]
    shape => shape: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Bit-crush to this many effective bits."]
    crush => crush: f64 = |x| x.max(1.0);
    #[doc = "Sample-rate reduction factor (hold every n samples)."]
    coarse => coarse: f64 = |x| x.max(1.0);
    #[doc = "Tremolo LFO rate in Hz."]
    tremolorate => tremolo_rate: f64 = |x| x.max(0.0);
    #[doc = "Tremolo depth `0..1`."]
    tremolodepth => tremolo_depth: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Phaser LFO rate in Hz."]
    phaserrate => phaser_rate: f64 = |x| x.max(0.0);
    #[doc = "Phaser depth `0..1`."]
    phaserdepth => phaser_depth: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Vibrato LFO rate in Hz."]
    vibrato => vibrato_rate: f64 = |x| x.max(0.0);
    #[doc = "Vibrato depth in fractions of a semitone."]
    vibdepth => vibrato_depth: f64 = |x| x.max(0.0);
    #[doc = "Exponential pitch glide in octaves over the event."]
    accelerate => accelerate: f64 = |x| x;
    #[doc = "Pitch envelope amount in semitones."]
    penv => pitch_env_amount: f64 = |x| x;
    #[doc = "Pitch envelope attack in seconds."]
    pattack => pitch_env_attack: f64 = |x| x.max(0.0);
    #[doc = "Pitch envelope decay in seconds."]
    pdecay => pitch_env_decay: f64 = |x| x.max(0.0);
    #[doc = "FM modulator ratio relative to the carrier."]
    fmh => fm_ratio: f64 = |x| x.max(0.0);
    #[doc = "FM modulation index."]
    fmi => fm_depth: f64 = |x| x.max(0.0);
    #[doc = "Compressor ratio; 1 is transparent."]
    comp => comp_ratio: f64 = |x| x.max(1.0);
    #[doc = "Sample playback speed multiplier."]
    speed => speed: f64 = |x| x;
    #[doc = "Sample start position `0..1`."]
    begin => begin: f64 = |x| x.clamp(0.0, 1.0);
    #[doc = "Sample end position `0..1`."]
    end => end: f64 = |x| x.clamp(0.0, 1.0);
}

impl Pattern<VoiceData> {
    /// `cut("1")`: hard-stop any playing voice in the same cut group when
    /// this event starts.
    pub fn cut(&self, input: &str) -> Result<Self, ParseError> {
        self.num_ctrl(input, |data, x| data.cut = Some(x as i32))
    }

    /// `loop_sample("1")`: wrap sample playback at the loop points.
    pub fn loop_sample(&self, input: &str) -> Result<Self, ParseError> {
        self.num_ctrl(input, |data, x| data.loop_sample = Some(x != 0.0))
    }

    /// `bank("RolandTR808")`: sample bank prefix.
    pub fn bank(&self, input: &str) -> Result<Self, ParseError> {
        let arg = parse_mini_notation(input)?;
        Ok(self.ctrl(arg, |data, value| {
            if let Some(name) = value.as_name() {
                data.bank = Some(name.to_string());
            }
        }))
    }

    /// `scale("minor")`: treat numeric notes as scale degrees.
    pub fn scale(&self, input: &str) -> Result<Self, BuildError> {
        let ast = parse_ast(input)?;
        validate_scales(&ast)?;
        let arg = ast_to_pattern(&ast);
        Ok(self.ctrl(arg, |data, value| {
            if let Some(name) = value.as_name() {
                data.scale = Some(name.to_string());
            }
        }))
    }

    /// `note_with("c e")`: pitch as a control on an existing carrier.
    pub fn note(&self, input: &str) -> Result<Self, BuildError> {
        let ast = parse_ast(input)?;
        validate_notes(&ast)?;
        let arg = ast_to_pattern(&ast);
        Ok(self.ctrl(arg, |data, value| {
            data.note = match value {
                Value::Num(x) => Some(*x),
                Value::Name { name, .. } => note_to_midi(name).ok(),
                _ => data.note,
            };
        }))
    }

    /// `n("0 3")`: numeric degree / sample index control.
    pub fn n(&self, input: &str) -> Result<Self, ParseError> {
        self.num_ctrl(input, |data, x| data.note = Some(x))
    }

    /// `freq("110 220")`: explicit frequency control.
    pub fn freq(&self, input: &str) -> Result<Self, ParseError> {
        self.num_ctrl(input, |data, x| data.freq_hz = Some(x))
    }

    /// Append a low-pass filter to the chain.
    pub fn lpf(&self, input: &str) -> Result<Self, ParseError> {
        self.filter_ctrl(input, FilterKind::LowPass)
    }

    /// Append a high-pass filter to the chain.
    pub fn hpf(&self, input: &str) -> Result<Self, ParseError> {
        self.filter_ctrl(input, FilterKind::HighPass)
    }

    /// Append a band-pass filter to the chain.
    pub fn bpf(&self, input: &str) -> Result<Self, ParseError> {
        self.filter_ctrl(input, FilterKind::BandPass)
    }

    /// Append a notch filter to the chain.
    pub fn notch(&self, input: &str) -> Result<Self, ParseError> {
        self.filter_ctrl(input, FilterKind::Notch)
    }

    fn filter_ctrl(&self, input: &str, kind: FilterKind) -> Result<Self, ParseError> {
        self.num_ctrl(input, move |data, cutoff| {
            data.filters.push(FilterDef::new(kind, cutoff.max(1.0)));
        })
    }

    /// Resonance (Q) of the most recently added filter.
    pub fn resonance(&self, input: &str) -> Result<Self, ParseError> {
        self.num_ctrl(input, |data, q| {
            if let Some(f) = data.filters.last_mut() {
                f.q = q.max(0.05);
            }
        })
    }

    /// Envelope depth on the most recently added filter's cutoff.
    pub fn lpenv(&self, input: &str) -> Result<Self, ParseError> {
        self.num_ctrl(input, |data, depth| {
            if let Some(f) = data.filters.last_mut() {
                f.env_depth = depth;
            }
        })
    }

    /// `vowel("a e")`: formant filter vowel.
    pub fn vowel(&self, input: &str) -> Result<Self, ParseError> {
        let arg = parse_mini_notation(input)?;
        Ok(self.ctrl(arg, |data, value| {
            if let Some(name) = value.as_name() {
                data.vowel = Some(name.to_string());
            }
        }))
    }

    /// `struct_("x ~ x x")`: take rhythmic structure from a boolean
    /// pattern; the carrier supplies values under each active span.
    pub fn struct_(&self, input: &str) -> Result<Self, ParseError> {
        let mask = parse_mini_notation(input)?.fmap(value_truth);
        Ok(self.struct_with(mask))
    }

    /// `mask_with("1 0 1 1")`: silence the carrier outside the active
    /// spans, keeping its own structure.
    pub fn mask_with(&self, input: &str) -> Result<Self, ParseError> {
        let gate = parse_mini_notation(input)?.fmap(value_truth);
        Ok(self.mask(gate))
    }

    /// Generic computed value; `Value::Pattern` payloads flatten via
    /// [`Pattern::flatten_values`].
    pub fn value_from(&self, value: Value) -> Self {
        let arg = Pattern::pure(value);
        self.ctrl(arg, |data, v| data.value = Some(v.clone()))
    }

    /// Flatten pattern-valued payloads: each event whose `value` carries a
    /// pattern is replaced by that pattern's events squeezed into the
    /// event's whole, keeping the outer envelope but the inner value.
    pub fn flatten_values(&self) -> Self {
        self.squeeze_join_with(
            |data| match &data.value {
                Some(Value::Pattern(p)) => p.clone(),
                other => Pattern::pure(match other {
                    Some(v) => v.clone(),
                    None => Value::Bool(true),
                }),
            },
            |data, inner| {
                let mut out = data.clone();
                if matches!(data.value, Some(Value::Pattern(_))) {
                    out.value = Some(inner.clone());
                }
                out
            },
        )
    }
}

/// Truthiness of a mini-notation value for struct/mask patterns: `f`,
/// `false` and `0` are false, anything else present is true.
fn value_truth(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Num(n) => *n != 0.0,
        Value::Name { name, .. } => !matches!(name.as_str(), "f" | "false"),
        Value::Str(s) => !matches!(s.as_str(), "f" | "false"),
        Value::Pattern(_) => true,
    }
}

fn validate_scales(ast: &Ast) -> Result<(), BuildError> {
    match ast {
        Ast::Name { name, .. } => {
            crate::tonal::scale_intervals(name)?;
            Ok(())
        }
        Ast::Number(_) | Ast::Rest => Ok(()),
        Ast::Seq(children) => children.iter().try_for_each(|(_, c)| validate_scales(c)),
        Ast::Stack(layers) => layers.iter().try_for_each(validate_scales),
        Ast::Alt(options) => options.iter().try_for_each(validate_scales),
        Ast::Fast(subject, _) | Ast::Slow(subject, _) | Ast::Degrade(subject, _) => {
            validate_scales(subject)
        }
        Ast::Euclid { subject, .. } => validate_scales(subject),
    }
}

// ============= Checked tempo combinators =============

/// Speed a pattern up; `factor` must be positive and finite.
pub fn fast(pat: &Pattern<VoiceData>, factor: f64) -> Result<Pattern<VoiceData>, BuildError> {
    if factor <= 0.0 || !factor.is_finite() {
        return Err(BuildError::BadTimeFactor(factor));
    }
    Ok(pat.fast(Fraction::from_float(factor)))
}

/// Slow a pattern down; `factor` must be positive and finite.
pub fn slow(pat: &Pattern<VoiceData>, factor: f64) -> Result<Pattern<VoiceData>, BuildError> {
    if factor <= 0.0 || !factor.is_finite() {
        return Err(BuildError::BadTimeFactor(factor));
    }
    Ok(pat.slow(Fraction::from_float(factor)))
}

/// `hurry`: speed the pattern up and pitch sample playback up by the same
/// factor.
pub fn hurry(pat: &Pattern<VoiceData>, factor: f64) -> Result<Pattern<VoiceData>, BuildError> {
    let sped = fast(pat, factor)?;
    Ok(sped.fmap(move |data| {
        let mut out = data.clone();
        out.speed = Some(out.speed.unwrap_or(1.0) * factor);
        out
    }))
}

/// Layer several voice patterns.
pub fn stack(patterns: Vec<Pattern<VoiceData>>) -> Pattern<VoiceData> {
    Pattern::stack(patterns)
}

/// Sequence several voice patterns into one cycle.
pub fn cat(patterns: Vec<Pattern<VoiceData>>) -> Pattern<VoiceData> {
    Pattern::fastcat(patterns)
}

/// Onset filter used by the scheduler: discrete events only trigger at
/// their onset; continuous events never trigger.
pub fn onsets(haps: Vec<Hap<VoiceData>>) -> Vec<Hap<VoiceData>> {
    haps.into_iter().filter(Hap::has_onset).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d)
    }

    fn sorted(mut haps: Vec<Hap<VoiceData>>) -> Vec<Hap<VoiceData>> {
        haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        haps
    }

    #[test]
    fn test_note_scenario_four_quarters() {
        let p = note("c d e f").unwrap();
        let haps = sorted(p.query_arc(frac(0, 1), frac(1, 1)));
        assert_eq!(haps.len(), 4);
        let expected_notes = [60.0, 62.0, 64.0, 65.0];
        for (i, h) in haps.iter().enumerate() {
            assert_eq!(h.part.begin, frac(i as i64, 4));
            assert_eq!(h.part.duration(), frac(1, 4));
            assert!(h.has_onset());
            assert_eq!(h.value.note, Some(expected_notes[i]));
        }
    }

    #[test]
    fn test_note_typo_is_build_error() {
        assert!(matches!(note("c x e"), Err(BuildError::UnknownNote(_))));
    }

    #[test]
    fn test_sound_with_index_and_gain() {
        let p = sound("bd:2:0.8 sn").unwrap();
        let haps = sorted(p.query_arc(frac(0, 1), frac(1, 1)));
        assert_eq!(haps[0].value.sound.as_deref(), Some("bd"));
        assert_eq!(haps[0].value.index, Some(2));
        assert_eq!(haps[0].value.gain, Some(0.8));
        assert_eq!(haps[1].value.sound.as_deref(), Some("sn"));
        assert_eq!(haps[1].value.index, None);
    }

    #[test]
    fn test_control_argument_is_a_pattern() {
        // Two notes, two gains: each note samples the gain under its span
        let p = note("c e").unwrap().gain("0.25 1").unwrap();
        let haps = sorted(p.query_arc(frac(0, 1), frac(1, 1)));
        assert_eq!(haps[0].value.gain, Some(0.25));
        assert_eq!(haps[1].value.gain, Some(1.0));
    }

    #[test]
    fn test_control_alternation_across_cycles() {
        let p = sound("bd").unwrap().speed("<1 2>").unwrap();
        let a = p.query_arc(frac(0, 1), frac(1, 1));
        let b = p.query_arc(frac(1, 1), frac(2, 1));
        assert_eq!(a[0].value.speed, Some(1.0));
        assert_eq!(b[0].value.speed, Some(2.0));
    }

    #[test]
    fn test_data_transform_is_idempotent() {
        let once = note("c").unwrap().gain("0.7").unwrap();
        let twice = once.gain("0.7").unwrap();
        let a = once.query_arc(frac(0, 1), frac(1, 1));
        let b = twice.query_arc(frac(0, 1), frac(1, 1));
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].value.gain, b[0].value.gain);
        assert_eq!(a[0].part, b[0].part);
        assert_eq!(a[0].whole, b[0].whole);
    }

    #[test]
    fn test_data_transform_preserves_time() {
        let base = note("c e").unwrap();
        let shaped = base.shape("0.5").unwrap();
        let a = sorted(base.query_arc(frac(0, 1), frac(1, 1)));
        let b = sorted(shaped.query_arc(frac(0, 1), frac(1, 1)));
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.part, y.part);
            assert_eq!(x.whole, y.whole);
        }
    }

    #[test]
    fn test_filter_chain_builds_in_order() {
        let p = note("c")
            .unwrap()
            .lpf("2000")
            .unwrap()
            .resonance("4")
            .unwrap()
            .hpf("100")
            .unwrap();
        let haps = p.query_arc(frac(0, 1), frac(1, 1));
        let filters = &haps[0].value.filters;
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].kind, FilterKind::LowPass);
        assert_eq!(filters[0].q, 4.0);
        assert_eq!(filters[1].kind, FilterKind::HighPass);
    }

    #[test]
    fn test_fast_zero_errors() {
        let p = note("c").unwrap();
        assert!(matches!(fast(&p, 0.0), Err(BuildError::BadTimeFactor(_))));
        assert!(matches!(slow(&p, -1.0), Err(BuildError::BadTimeFactor(_))));
    }

    #[test]
    fn test_hurry_scales_time_and_speed() {
        let p = hurry(&sound("bd").unwrap(), 2.0).unwrap();
        let haps = p.query_arc(frac(0, 1), frac(1, 1));
        assert_eq!(haps.len(), 2);
        assert_eq!(haps[0].value.speed, Some(2.0));
    }

    #[test]
    fn test_flatten_values_squeezes_inner_pattern() {
        let inner = Pattern::fastcat(vec![
            Pattern::pure(Value::Num(1.0)),
            Pattern::pure(Value::Num(2.0)),
        ]);
        let p = note("c").unwrap().value_from(Value::Pattern(inner));
        let flat = p.flatten_values();
        let haps = sorted(flat.query_arc(frac(0, 1), frac(1, 1)));
        assert_eq!(haps.len(), 2);
        match (&haps[0].value.value, &haps[1].value.value) {
            (Some(Value::Num(a)), Some(Value::Num(b))) => {
                assert_eq!(*a, 1.0);
                assert_eq!(*b, 2.0);
            }
            other => panic!("expected flattened numbers, got {:?}", other),
        }
        // Outer data survives the flattening
        assert_eq!(haps[0].value.note, Some(60.0));
    }

    #[test]
    fn test_merged_with_prefers_other() {
        let mut a = VoiceData::default();
        a.gain = Some(0.5);
        a.note = Some(60.0);
        let mut b = VoiceData::default();
        b.gain = Some(0.9);
        let merged = a.merged_with(&b);
        assert_eq!(merged.gain, Some(0.9));
        assert_eq!(merged.note, Some(60.0));
    }

    #[test]
    fn test_scale_unknown_is_build_error() {
        let p = n("0 2 4").unwrap();
        assert!(p.scale("nosuchscale").is_err());
        assert!(p.scale("minor").is_ok());
    }
}
