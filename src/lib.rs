//! # Undertow — live coding music environment
//!
//! Undertow couples a TidalCycles-family temporal pattern engine with a
//! real-time polyphonic synthesis backend.
//!
//! ## The two engines
//!
//! - **Patterns** are pure functions of time: querying an arc of cycle
//!   time yields timed events carrying [`control::VoiceData`]. The algebra
//!   (sequence, stack, alternation, euclidean rhythms, time scaling and
//!   shifting, structural joins) lives in [`pattern`], [`pattern_ops`] and
//!   [`signal`]; the textual surface in [`mini_notation`]; the
//!   user-callable control constructors in [`control`].
//! - **The audio backend** ([`engine`]) consumes schedule commands over a
//!   lock-free [`link`], resolves events into voices ([`voice`]) through a
//!   min-heap [`scheduler`], renders each voice's DSP chain ([`dsp`]) and
//!   mixes through per-orbit delay/reverb buses ([`orbit`]).
//!
//! ## Quick start
//!
//! ```
//! use undertow::control::sound;
//! use undertow::render::{render_pattern, RenderConfig};
//!
//! // Four detuned saw stabs per cycle, low-passed, one in four accented
//! let pattern = sound("supersaw*4")
//!     .unwrap()
//!     .note("c3 e3 g3 c4")
//!     .unwrap()
//!     .gain("1 0.6 0.6 0.8")
//!     .unwrap()
//!     .lpf("1200")
//!     .unwrap();
//!
//! let pcm = render_pattern(&pattern, &RenderConfig::default()).unwrap();
//! assert!(pcm.iter().any(|s| s.abs() > 0.001));
//! ```
//!
//! ## Determinism
//!
//! Given the same pattern, samples, command ordering, sample rate, block
//! size and seeds, rendered output is bit-identical across runs. All cycle
//! arithmetic runs on exact rationals ([`fraction::Fraction`]); randomness
//! is derived from the per-query seed, never from a global generator.

pub mod bjorklund;
pub mod control;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod fraction;
pub mod link;
pub mod mini_notation;
pub mod orbit;
pub mod pattern;
pub mod pattern_ops;
pub mod player;
pub mod render;
pub mod sample_registry;
pub mod scheduler;
pub mod signal;
pub mod tonal;
pub mod voice;

pub use control::{note, silence, sound, VoiceData};
pub use error::{BuildError, ParseError};
pub use fraction::Fraction;
pub use mini_notation::parse_mini_notation;
pub use pattern::{Hap, Pattern, QueryContext, SourcePos, State, TimeSpan};
