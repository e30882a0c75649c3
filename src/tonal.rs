//! Musical note names, scales and frequency resolution.

use crate::error::BuildError;
use lazy_static::lazy_static;
use std::collections::HashMap;

/// Concert pitch reference: A4 = 440 Hz at MIDI 69.
pub const A4_HZ: f64 = 440.0;
pub const A4_MIDI: f64 = 69.0;

lazy_static! {
    static ref SCALES: HashMap<&'static str, Vec<i32>> = {
        let mut m = HashMap::new();
        m.insert("major", vec![0, 2, 4, 5, 7, 9, 11]);
        m.insert("minor", vec![0, 2, 3, 5, 7, 8, 10]);
        m.insert("harmonic", vec![0, 2, 3, 5, 7, 8, 11]);
        m.insert("melodic", vec![0, 2, 3, 5, 7, 9, 11]);
        m.insert("dorian", vec![0, 2, 3, 5, 7, 9, 10]);
        m.insert("phrygian", vec![0, 1, 3, 5, 7, 8, 10]);
        m.insert("lydian", vec![0, 2, 4, 6, 7, 9, 11]);
        m.insert("mixolydian", vec![0, 2, 4, 5, 7, 9, 10]);
        m.insert("locrian", vec![0, 1, 3, 5, 6, 8, 10]);
        m.insert("pentatonic", vec![0, 2, 4, 7, 9]);
        m.insert("minpent", vec![0, 3, 5, 7, 10]);
        m.insert("blues", vec![0, 3, 5, 6, 7, 10]);
        m.insert("chromatic", vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        m.insert("whole", vec![0, 2, 4, 6, 8, 10]);
        m.insert("hirajoshi", vec![0, 2, 3, 7, 8]);
        m.insert("egyptian", vec![0, 2, 5, 7, 10]);
        m
    };
}

/// Parse a note name such as `c`, `cs4`, `ef3`, `a#2`, `bb-1` into a MIDI
/// number. The default octave is 5, matching the convention where a bare
/// `c` lands at MIDI 60.
pub fn note_to_midi(name: &str) -> Result<f64, BuildError> {
    let lower = name.to_lowercase();
    let mut chars = lower.chars().peekable();
    let letter = chars
        .next()
        .ok_or_else(|| BuildError::UnknownNote(name.to_string()))?;
    let base = match letter {
        'c' => 0,
        'd' => 2,
        'e' => 4,
        'f' => 5,
        'g' => 7,
        'a' => 9,
        'b' => 11,
        _ => return Err(BuildError::UnknownNote(name.to_string())),
    };
    // Any 's'/'#' after the letter sharpens, any 'f'/'b' flattens; the note
    // letter itself was consumed above, so there is no ambiguity
    let mut accidental = 0i32;
    while let Some(&c) = chars.peek() {
        match c {
            's' | '#' => {
                accidental += 1;
                chars.next();
            }
            'f' | 'b' => {
                accidental -= 1;
                chars.next();
            }
            _ => break,
        }
    }
    let rest: String = chars.collect();
    let octave: i32 = if rest.is_empty() {
        5
    } else {
        rest.parse()
            .map_err(|_| BuildError::UnknownNote(name.to_string()))?
    };
    Ok((octave * 12 + base + accidental) as f64)
}

/// Convert a MIDI note number (fractional allowed) to Hz.
pub fn midi_to_hz(midi: f64) -> f64 {
    A4_HZ * 2.0f64.powf((midi - A4_MIDI) / 12.0)
}

/// Look up a scale's interval table.
pub fn scale_intervals(name: &str) -> Result<&'static [i32], BuildError> {
    SCALES
        .get(name.to_lowercase().as_str())
        .map(|v| v.as_slice())
        .ok_or_else(|| BuildError::UnknownScale(name.to_string()))
}

/// Map a scale degree to a chromatic offset: degree `n` walks `n` steps up
/// the scale, wrapping into higher octaves. Negative degrees walk down.
pub fn degree_to_semitones(scale: &[i32], degree: i32) -> i32 {
    let len = scale.len() as i32;
    if len == 0 {
        return degree;
    }
    let octave = degree.div_euclid(len);
    let idx = degree.rem_euclid(len) as usize;
    octave * 12 + scale[idx]
}
