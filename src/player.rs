//! The playback driver's producer half: queries a pattern over a rolling
//! look-ahead window and feeds `Schedule` commands into the link.
//!
//! Runs off the audio thread. Each `tick` advances the query frontier to
//! the requested horizon, converts cycle time to seconds through the
//! cycles-per-second tempo, filters for onsets (continuous events never
//! trigger) and ships one command per voice. Query state is carried in a
//! seeded context so repeated runs are reproducible.

use crate::control::VoiceData;
use crate::error::BuildError;
use crate::fraction::Fraction;
use crate::link::{Command, LinkSender};
use crate::pattern::{Pattern, QueryContext, State, TimeSpan};
use tracing::{debug, trace};

pub struct Player {
    pattern: Pattern<VoiceData>,
    cps: f64,
    playback_id: u64,
    frontier: Fraction,
    ctx: QueryContext,
}

impl Player {
    /// `cps` is the tempo in cycles per second and must be positive.
    pub fn new(
        pattern: Pattern<VoiceData>,
        cps: f64,
        playback_id: u64,
    ) -> Result<Self, BuildError> {
        if cps <= 0.0 || !cps.is_finite() {
            return Err(BuildError::BadTimeFactor(cps));
        }
        Ok(Self {
            // Pattern-valued payloads flatten once, up front
            pattern: pattern.flatten_values(),
            cps,
            playback_id,
            frontier: Fraction::ZERO,
            ctx: QueryContext::default(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ctx = QueryContext::with_seed(seed);
        self
    }

    pub fn playback_id(&self) -> u64 {
        self.playback_id
    }

    /// Query up to `until_sec` (wall seconds since playback start) and emit
    /// schedule commands for every onset found. Returns how many voices
    /// were scheduled.
    pub fn tick(&mut self, until_sec: f64, tx: &mut LinkSender<Command>) -> usize {
        let until = Fraction::from_float(until_sec * self.cps);
        if until <= self.frontier {
            return 0;
        }
        let span = TimeSpan::new(self.frontier, until);
        let haps = self
            .pattern
            .query(&State::new(span, self.ctx.clone()));
        self.frontier = until;

        let mut scheduled = 0;
        for hap in haps {
            if !hap.has_onset() {
                continue;
            }
            let whole = hap.whole_or_part();
            let start_time_sec = whole.begin.to_float() / self.cps;
            let gate_end_time_sec = whole.end.to_float() / self.cps;
            trace!(start_time_sec, gate_end_time_sec, "scheduling voice");
            if tx
                .send(Command::Schedule {
                    playback_id: self.playback_id,
                    start_time_sec,
                    gate_end_time_sec,
                    data: hap.value,
                })
                .is_err()
            {
                debug!("command ring full, voice dropped");
                break;
            }
            scheduled += 1;
        }
        scheduled
    }

    /// Emit the cleanup command for this playback.
    pub fn stop(&self, tx: &mut LinkSender<Command>) {
        let _ = tx.send(Command::Cleanup {
            playback_id: self.playback_id,
        });
    }
}
