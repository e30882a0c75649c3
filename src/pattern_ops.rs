//! The pattern transformation library: structural clipping, euclidean
//! rhythms, pattern-of-patterns joins, conditional and random operators.
//!
//! Clipping operators never enlarge an event's `part` and never touch its
//! `whole`; scaling and shifting move both together. Randomness is derived
//! from the query-context seed so every query is reproducible.

use crate::bjorklund::bjorklund;
use crate::fraction::Fraction;
use crate::pattern::{Hap, Pattern, TimeSpan};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Deterministic per-event dice: mixes the context seed with the cycle and
/// the exact event position so each event rolls independently.
pub(crate) fn event_rng(seed: u64, cycle: i64, position: Fraction) -> StdRng {
    let mixed = seed
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(cycle as u64)
        .wrapping_mul(0x2545_f491_4f6c_dd1d)
        .wrapping_add(position.numerator() as u64)
        .wrapping_mul(0x6c62_272e_07bb_0142)
        .wrapping_add(position.denominator() as u64);
    StdRng::seed_from_u64(mixed)
}

impl<T: Clone + Send + Sync + 'static> Pattern<T> {
    // ============= Structural clipping =============

    /// Take structure from a boolean mask: for each active mask span, emit
    /// the source events inside it, clipped to the mask part, all sharing
    /// the mask's whole. Only the event starting at the whole's begin is an
    /// onset.
    pub fn struct_with(&self, mask: Pattern<bool>) -> Self {
        let source = self.clone();
        Pattern::new(move |state| {
            mask.query(state)
                .into_iter()
                .filter(|m| m.value)
                .flat_map(|m| {
                    source
                        .query(&state.with_span(m.part))
                        .into_iter()
                        .filter_map(|h| {
                            h.part
                                .clip_to(&m.part)
                                .map(|part| Hap::new(m.whole, part, h.value.clone()))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// Keep this pattern's structure but silence everything outside the
    /// mask's active spans. `whole` is preserved verbatim; only `part`
    /// shrinks.
    pub fn mask(&self, mask: Pattern<bool>) -> Self {
        let source = self.clone();
        Pattern::new(move |state| {
            let mask_parts: Vec<TimeSpan> = mask
                .query(state)
                .into_iter()
                .filter(|m| m.value)
                .map(|m| m.part)
                .collect();
            source
                .query(state)
                .into_iter()
                .flat_map(|h| {
                    mask_parts
                        .iter()
                        .filter_map(|mp| {
                            h.part
                                .clip_to(mp)
                                .map(|part| Hap::new(h.whole, part, h.value.clone()))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// Euclidean rhythm: distribute the pattern over `pulses` of `steps`
    /// slots (Bjorklund), with optional rotation. The bit list is computed
    /// once and shared across queries.
    pub fn euclid(&self, pulses: usize, steps: usize, rotation: i64) -> Self {
        let bits = Arc::new(bjorklund(pulses, steps, rotation));
        if bits.iter().all(|b| !b) {
            return Pattern::silence();
        }
        let slots = bits
            .iter()
            .map(|&active| {
                if active {
                    self.clone()
                } else {
                    Pattern::silence()
                }
            })
            .collect();
        Pattern::fastcat(slots)
    }

    // ============= Pattern-of-patterns joins =============

    /// Inner join: keep this pattern's structure; for each event, sample the
    /// control pattern over the event's part and combine the two values.
    /// Events with no overlapping control value are dropped. This is the
    /// mechanism that lets every DSL argument itself be a pattern.
    pub fn inner_join_with<U, V>(
        &self,
        control: Pattern<U>,
        combine: impl Fn(&T, &U) -> V + Send + Sync + 'static,
    ) -> Pattern<V>
    where
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let outer = self.clone();
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .filter_map(|o| {
                    let inner = control.query(&state.with_span(o.part));
                    // The value in effect at the event's start wins
                    inner
                        .into_iter()
                        .find(|i| {
                            i.part.begin <= o.part.begin && o.part.begin < i.part.end
                                || i.part.begin == o.part.begin
                        })
                        .map(|i| Hap::new(o.whole, o.part, combine(&o.value, &i.value)))
                })
                .collect()
        })
    }

    /// Squeeze join: for each outer event, focus the inner pattern onto the
    /// outer whole, collect its events clipped to the outer part, and merge
    /// values (outer envelope, inner value).
    pub fn squeeze_join_with<U, V>(
        &self,
        inner_of: impl Fn(&T) -> Pattern<U> + Send + Sync + 'static,
        combine: impl Fn(&T, &U) -> V + Send + Sync + 'static,
    ) -> Pattern<V>
    where
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let outer = self.clone();
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .flat_map(|o| {
                    let span = o.whole_or_part();
                    let focused = inner_of(&o.value).focus_span(span);
                    focused
                        .query(&state.with_span(o.part))
                        .into_iter()
                        .filter_map(|i| {
                            i.part.clip_to(&o.part).map(|part| {
                                Hap::new(i.whole, part, combine(&o.value, &i.value))
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// Map each of this pattern's cycles onto the given span (repeating
    /// every `span.duration()`).
    pub fn focus_span(&self, span: TimeSpan) -> Self {
        let dur = span.duration();
        if dur <= Fraction::ZERO {
            return Pattern::silence();
        }
        self.slow(dur).late(span.begin)
    }

    // ============= Replication & conditionals =============

    /// `a!k`: k time-compressed copies inside one cycle.
    pub fn replicate(&self, count: usize) -> Self {
        if count == 0 {
            return Pattern::silence();
        }
        Pattern::fastcat(vec![self.clone(); count])
    }

    /// Repeat each cycle of the pattern `n` times before advancing.
    pub fn repeat_cycles(&self, n: i64) -> Self {
        if n <= 1 {
            return self.clone();
        }
        let pat = self.clone();
        Pattern::new(move |state| {
            let cycle = state.span.begin.floor();
            let inner_cycle = cycle.div_euclid(n);
            let shift = Fraction::from_int(cycle - inner_cycle);
            pat.query(&state.with_span(state.span.with_time(|t| t - shift)))
                .into_iter()
                .map(|h| h.with_span(|s| s.with_time(|t| t + shift)))
                .collect()
        })
        .split_queries()
    }

    /// Apply `f` on every `n`th cycle (cycle numbers divisible by `n`).
    pub fn every(&self, n: i64, f: impl Fn(Pattern<T>) -> Pattern<T> + Send + Sync + 'static) -> Self {
        if n <= 0 {
            return self.clone();
        }
        let pat = self.clone();
        let transformed = f(self.clone());
        Pattern::new(move |state| {
            let cycle = state.span.begin.floor();
            if cycle.rem_euclid(n) == 0 {
                transformed.query(state)
            } else {
                pat.query(state)
            }
        })
        .split_queries()
    }

    /// Shift each successive cycle by `1/n`, coming back around after `n`.
    pub fn iter(&self, n: i64) -> Self {
        if n <= 1 {
            return self.clone();
        }
        let pat = self.clone();
        Pattern::new(move |state| {
            let cycle = state.span.begin.floor();
            let shift = Fraction::new(cycle.rem_euclid(n), n);
            pat.early(shift).query(state)
        })
        .split_queries()
    }

    /// Reverse each cycle in place.
    pub fn rev(&self) -> Self {
        let pat = self.clone();
        Pattern::new(move |state| {
            let span = state.span;
            let cycle = span.begin.sam();
            let next = span.begin.next_sam();
            // Reflect the query arc inside the cycle, then reflect results back
            let reflect = move |t: Fraction| cycle + next - t;
            let reflected = TimeSpan::new(reflect(span.end), reflect(span.begin));
            pat.query(&state.with_span(reflected))
                .into_iter()
                .map(|h| {
                    h.with_span(|s| TimeSpan::new(reflect(s.end), reflect(s.begin)))
                })
                .collect()
        })
        .split_queries()
    }

    /// Forward one cycle, backward the next.
    pub fn palindrome(&self) -> Self {
        Pattern::slowcat(vec![self.clone(), self.rev()])
    }

    /// Layer a shifted, transformed copy over the original.
    pub fn off(
        &self,
        delta: Fraction,
        f: impl Fn(Pattern<T>) -> Pattern<T> + Send + Sync + 'static,
    ) -> Self {
        Pattern::stack(vec![self.clone(), f(self.late(delta))])
    }

    // ============= Randomness =============

    /// Randomly drop events with the given probability. Deterministic for a
    /// given context seed; each event rolls its own dice.
    pub fn degrade_by(&self, probability: f64) -> Self {
        let pat = self.clone();
        Pattern::new(move |state| {
            let seed = state.ctx.seed();
            pat.query(state)
                .into_iter()
                .filter(|h| {
                    let anchor = h.whole_or_part().begin;
                    let mut rng = event_rng(seed, anchor.floor(), anchor);
                    rng.gen::<f64>() >= probability
                })
                .collect()
        })
    }

    /// Drop half the events.
    pub fn degrade(&self) -> Self {
        self.degrade_by(0.5)
    }

    /// Apply `f` with the given probability, decided once per cycle.
    pub fn sometimes_by(
        &self,
        probability: f64,
        f: impl Fn(Pattern<T>) -> Pattern<T> + Send + Sync + 'static,
    ) -> Self {
        let pat = self.clone();
        let transformed = f(self.clone());
        Pattern::new(move |state| {
            let cycle = state.span.begin.floor();
            let mut rng = event_rng(state.ctx.seed(), cycle, Fraction::from_int(cycle));
            if rng.gen::<f64>() < probability {
                transformed.query(state)
            } else {
                pat.query(state)
            }
        })
        .split_queries()
    }

    /// Apply `f` half the time.
    pub fn sometimes(&self, f: impl Fn(Pattern<T>) -> Pattern<T> + Send + Sync + 'static) -> Self {
        self.sometimes_by(0.5, f)
    }

    /// Pick one child per cycle at random (seeded).
    pub fn rand_cat(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        if patterns.is_empty() {
            return Pattern::silence();
        }
        Pattern::new(move |state| {
            let cycle = state.span.begin.floor();
            let mut rng = event_rng(state.ctx.seed(), cycle, Fraction::from_int(cycle));
            let idx = rng.gen_range(0..patterns.len());
            patterns[idx].query(state)
        })
        .split_queries()
    }
}
