//! Continuous control signals.
//!
//! Signals are patterns without onsets: every query returns a single event
//! whose `part` is the query arc and whose `whole` is absent. A discrete
//! consumer samples a signal at the midpoint of the consuming event's part
//! (so the value heard is the one from the middle of the note, not its
//! edge). Signals only make sound indirectly, as control values; the
//! scheduler never triggers them.

use crate::fraction::Fraction;
use crate::pattern::{Hap, Pattern};
use crate::pattern_ops::event_rng;
use rand::Rng;
use std::f64::consts::TAU;

/// Build a signal from a function of cycle time.
pub fn signal(f: impl Fn(Fraction) -> f64 + Send + Sync + 'static) -> Pattern<f64> {
    Pattern::new(move |state| {
        let t = state.span.midpoint();
        vec![Hap::new(None, state.span, f(t))]
    })
}

/// Unipolar sine, one period per cycle, range `[0, 1]`.
pub fn sine() -> Pattern<f64> {
    signal(|t| ((t.to_float() * TAU).sin() + 1.0) / 2.0)
}

/// Rising sawtooth, `0 → 1` over each cycle.
pub fn saw() -> Pattern<f64> {
    signal(|t| t.fract().to_float())
}

/// Falling sawtooth, `1 → 0` over each cycle.
pub fn isaw() -> Pattern<f64> {
    signal(|t| 1.0 - t.fract().to_float())
}

/// Triangle, `0 → 1 → 0` over each cycle.
pub fn tri() -> Pattern<f64> {
    signal(|t| {
        let x = t.fract().to_float();
        if x < 0.5 {
            x * 2.0
        } else {
            2.0 - x * 2.0
        }
    })
}

/// Square, `0` for the first half of each cycle, `1` for the second.
pub fn square() -> Pattern<f64> {
    signal(|t| if t.fract().to_float() < 0.5 { 0.0 } else { 1.0 })
}

/// Seeded white noise in `[0, 1)`; a new value for every distinct sample
/// position, stable across repeated queries.
pub fn rand() -> Pattern<f64> {
    Pattern::new(|state| {
        let t = state.span.midpoint();
        let mut rng = event_rng(state.ctx.seed(), t.floor(), t);
        vec![Hap::new(None, state.span, rng.gen::<f64>())]
    })
}

/// Smooth value noise: random lattice values at integer cycles,
/// smoothstep-interpolated between them. Range `[0, 1)`.
pub fn perlin() -> Pattern<f64> {
    Pattern::new(|state| {
        let t = state.span.midpoint();
        let seed = state.ctx.seed();
        let cycle = t.floor();
        let a = lattice(seed, cycle);
        let b = lattice(seed, cycle + 1);
        let x = t.fract().to_float();
        let s = x * x * (3.0 - 2.0 * x);
        vec![Hap::new(None, state.span, a + (b - a) * s)]
    })
}

fn lattice(seed: u64, cycle: i64) -> f64 {
    let mut rng = event_rng(seed, cycle, Fraction::from_int(cycle));
    rng.gen::<f64>()
}

impl Pattern<f64> {
    /// Rescale a unipolar signal into `[min, max]`.
    pub fn range(&self, min: f64, max: f64) -> Pattern<f64> {
        self.fmap(move |v| min + v * (max - min))
    }
}
