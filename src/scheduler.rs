//! The voice scheduler: absolute-time ordering, playback epochs, cut
//! groups and the active-voice render loop.
//!
//! Scheduled voices wait in a min-heap keyed by absolute start frame. Each
//! block the scheduler promotes every voice due inside the block into the
//! active list (building it through the voice factory) and drops anything
//! that lagged more than one block behind the cursor. A playback's first
//! appearance records its epoch at the current cursor, so a freshly
//! started playback begins now instead of in the past.

use crate::link::Feedback;
use crate::control::VoiceData;
use crate::orbit::OrbitBank;
use crate::sample_registry::SampleRegistry;
use crate::voice::{build_voice, ActiveVoice, RenderContext, ScheduledVoice};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, warn};

struct HeapEntry(ScheduledVoice);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.start_frame == other.0.start_frame
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.start_frame.total_cmp(&other.0.start_frame)
    }
}

pub struct Scheduler {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    /// Per-playback epoch offsets, in frames.
    epochs: HashMap<u64, f64>,
    active: Vec<ActiveVoice>,
    sample_rate: f64,
}

impl Scheduler {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            heap: BinaryHeap::new(),
            epochs: HashMap::new(),
            active: Vec::new(),
            sample_rate,
        }
    }

    /// Insert a voice. Times are seconds relative to the playback's epoch;
    /// a new `playback_id` records its epoch at the current cursor. Lazily
    /// emits one `RequestSample` per new sample identity.
    pub fn schedule(
        &mut self,
        playback_id: u64,
        start_time_sec: f64,
        gate_end_time_sec: f64,
        data: VoiceData,
        cursor_frame: u64,
        registry: &mut SampleRegistry,
        feedback: &mut dyn FnMut(Feedback),
    ) {
        let nominal_start = start_time_sec * self.sample_rate;
        // First sight of a playback: shift it so its first event lands at
        // the cursor instead of in the past. Future-dated events keep their
        // nominal position.
        let offset = *self.epochs.entry(playback_id).or_insert_with(|| {
            let offset = (cursor_frame as f64 - nominal_start).max(0.0);
            debug!(playback_id, cursor_frame, offset, "new playback epoch");
            offset
        });
        let sv = ScheduledVoice {
            playback_id,
            start_frame: nominal_start + offset,
            gate_end_frame: gate_end_time_sec * self.sample_rate + offset,
            data,
        };
        if let Some(req) = sv.sample_request() {
            if registry.request(&req) {
                feedback(Feedback::RequestSample { playback_id, req });
            }
        }
        self.heap.push(Reverse(HeapEntry(sv)));
    }

    /// Forget a playback: its epoch goes away and unplayed heap entries
    /// are skipped when they surface. Already-active voices self-terminate.
    pub fn cleanup(&mut self, playback_id: u64) {
        self.epochs.remove(&playback_id);
        debug!(playback_id, "playback cleaned up");
    }

    /// Promote every voice due inside the block starting at `cursor_frame`.
    pub fn process(
        &mut self,
        cursor_frame: u64,
        block_frames: usize,
        registry: &SampleRegistry,
    ) {
        let block_end = (cursor_frame + block_frames as u64) as f64;
        let lag_floor = cursor_frame as f64 - block_frames as f64;
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.0.start_frame >= block_end {
                break;
            }
            let Some(Reverse(HeapEntry(sv))) = self.heap.pop() else {
                break;
            };
            if !self.epochs.contains_key(&sv.playback_id) {
                continue; // playback was cleaned up
            }
            if sv.start_frame < lag_floor {
                warn!(
                    start = sv.start_frame,
                    cursor = cursor_frame,
                    "dropping lagged voice"
                );
                continue;
            }
            match build_voice(&sv, registry, self.sample_rate as f32) {
                Some(voice) => {
                    // Cut group: a hard stop, not a fade. Voices with the
                    // same id are removed before the new voice joins
                    if let Some(cut_id) = voice.cut {
                        self.active.retain(|other| other.cut != Some(cut_id));
                    }
                    self.active.push(voice);
                }
                None => {
                    // Sample missing or unplayable: degrade to silence for
                    // this voice, never interrupt the others
                    debug!(sound = ?sv.data.sound, "voice could not materialize");
                }
            }
        }
    }

    /// Render all active voices into their orbits; finished voices are
    /// swap-removed for amortized O(1) cleanup.
    pub fn render_active(&mut self, ctx: &mut RenderContext, orbits: &mut OrbitBank) {
        let mut i = 0;
        while i < self.active.len() {
            let orbit = orbits.get_or_create(self.active[i].orbit);
            if self.active[i].render(ctx, orbit) {
                self.active.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.heap.len()
    }

    /// Active voices matching a cut id (test hook for cut-group scope).
    pub fn active_in_cut_group(&self, cut_id: i32) -> usize {
        self.active
            .iter()
            .filter(|v| v.cut == Some(cut_id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;
    const BLOCK: usize = 512;

    fn osc_data(sound: &str) -> VoiceData {
        let mut data = VoiceData::default();
        data.sound = Some(sound.to_string());
        data
    }

    fn schedule_at(
        sched: &mut Scheduler,
        registry: &mut SampleRegistry,
        playback: u64,
        at_sec: f64,
        data: VoiceData,
        cursor: u64,
    ) -> Vec<Feedback> {
        let mut out = Vec::new();
        sched.schedule(
            playback,
            at_sec,
            at_sec + 0.1,
            data,
            cursor,
            registry,
            &mut |f| out.push(f),
        );
        out
    }

    #[test]
    fn test_due_voices_promote_in_block() {
        let mut sched = Scheduler::new(SR);
        let mut registry = SampleRegistry::new();
        schedule_at(&mut sched, &mut registry, 1, 0.0, osc_data("sine"), 0);
        schedule_at(&mut sched, &mut registry, 1, 10.0, osc_data("sine"), 0);
        sched.process(0, BLOCK, &registry);
        assert_eq!(sched.active_count(), 1, "only the due voice starts");
        assert_eq!(sched.pending_count(), 1);
    }

    #[test]
    fn test_epoch_offsets_new_playback_to_now() {
        let mut sched = Scheduler::new(SR);
        let mut registry = SampleRegistry::new();
        // Playback first seen when the cursor is already at one second:
        // its time zero maps to the current cursor, not to the past
        let cursor = SR as u64;
        schedule_at(&mut sched, &mut registry, 7, 0.0, osc_data("sine"), cursor);
        sched.process(0, BLOCK, &registry);
        assert_eq!(sched.active_count(), 0, "not due at cursor 0");
        sched.process(cursor, BLOCK, &registry);
        assert_eq!(sched.active_count(), 1, "due exactly at its epoch");
    }

    #[test]
    fn test_lagged_voices_drop() {
        let mut sched = Scheduler::new(SR);
        let mut registry = SampleRegistry::new();
        schedule_at(&mut sched, &mut registry, 1, 0.0, osc_data("sine"), 0);
        // The cursor has moved far past the voice's start
        sched.process(10 * BLOCK as u64, BLOCK, &registry);
        assert_eq!(sched.active_count(), 0);
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn test_cleanup_skips_pending_entries() {
        let mut sched = Scheduler::new(SR);
        let mut registry = SampleRegistry::new();
        schedule_at(&mut sched, &mut registry, 1, 0.0, osc_data("sine"), 0);
        schedule_at(&mut sched, &mut registry, 2, 0.0, osc_data("sine"), 0);
        sched.cleanup(1);
        sched.process(0, BLOCK, &registry);
        assert_eq!(sched.active_count(), 1, "only playback 2 survives");
    }

    #[test]
    fn test_sample_request_emitted_once() {
        let mut sched = Scheduler::new(SR);
        let mut registry = SampleRegistry::new();
        let fb1 = schedule_at(&mut sched, &mut registry, 1, 0.0, {
            let mut d = osc_data("bd");
            d.index = Some(2);
            d
        }, 0);
        assert_eq!(fb1.len(), 1, "first reference requests the sample");
        let fb2 = schedule_at(&mut sched, &mut registry, 1, 0.5, {
            let mut d = osc_data("bd");
            d.index = Some(2);
            d
        }, 0);
        assert!(fb2.is_empty(), "duplicate request suppressed");
    }

    #[test]
    fn test_cut_group_terminates_exact_matches_only() {
        let mut sched = Scheduler::new(SR);
        let mut registry = SampleRegistry::new();
        let mut in_group = osc_data("sine");
        in_group.cut = Some(1);
        let mut other_group = osc_data("sine");
        other_group.cut = Some(2);
        schedule_at(&mut sched, &mut registry, 1, 0.0, in_group.clone(), 0);
        schedule_at(&mut sched, &mut registry, 1, 0.0, other_group, 0);
        sched.process(0, BLOCK, &registry);
        assert_eq!(sched.active_count(), 2);

        // A later voice in cut group 1 removes the first on the spot and
        // leaves group 2 alone
        schedule_at(&mut sched, &mut registry, 1, 0.02, in_group, 0);
        sched.process((0.02 * SR) as u64 / BLOCK as u64 * BLOCK as u64, BLOCK, &registry);
        assert_eq!(sched.active_count(), 2, "cut voice is gone immediately");
        assert_eq!(sched.active_in_cut_group(1), 1);
        assert_eq!(sched.active_in_cut_group(2), 1);
    }

    #[test]
    fn test_missing_sample_degrades_silently() {
        let mut sched = Scheduler::new(SR);
        let mut registry = SampleRegistry::new();
        schedule_at(&mut sched, &mut registry, 1, 0.0, osc_data("nosuchsample"), 0);
        schedule_at(&mut sched, &mut registry, 1, 0.0, osc_data("sine"), 0);
        sched.process(0, BLOCK, &registry);
        assert_eq!(sched.active_count(), 1, "the other voice still plays");
    }
}
