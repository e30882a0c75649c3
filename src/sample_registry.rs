//! The sample registry: request/chunked-delivery lifecycle for sample PCM.
//!
//! Keyed by [`SampleRequest`] identity, each entry walks monotonically
//! toward `Complete` or `NotFound`:
//!
//! ```text
//! Requested ──chunk──▶ Partial ──is_last──▶ Complete
//!     │                                        ▲
//!     ├──────────── complete message ──────────┘
//!     └──────────── not-found message ──▶ NotFound
//! ```
//!
//! The registry is written only by the command-ingest path on the audio
//! thread and read on the hot path; a completed sample hands out its PCM as
//! a cheap `Arc` clone. Duplicate requests are suppressed so the feedback
//! channel carries at most one `RequestSample` per identity.

use crate::link::SampleRequest;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle state of one sample identity.
#[derive(Debug, Clone)]
pub enum SampleState {
    /// A request has been issued; no data yet.
    Requested,
    /// The provider reported the sample missing.
    NotFound,
    /// Chunks are arriving; `received` tracks how much of `total` is in.
    Partial {
        pcm: Vec<f32>,
        received: usize,
        total: usize,
        pcm_sample_rate: u32,
        pitch_hz: Option<f64>,
        note: Option<i32>,
    },
    /// All PCM present and playable.
    Complete {
        pcm: Arc<Vec<f32>>,
        pcm_sample_rate: u32,
        pitch_hz: Option<f64>,
        note: Option<i32>,
    },
}

/// A playable sample handed to the voice factory.
#[derive(Debug, Clone)]
pub struct CompleteSample {
    pub pcm: Arc<Vec<f32>>,
    pub pcm_sample_rate: u32,
    pub pitch_hz: Option<f64>,
    pub note: Option<i32>,
}

#[derive(Debug, Default)]
pub struct SampleRegistry {
    entries: HashMap<SampleRequest, SampleState>,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a request is being issued. Returns `true` only the first
    /// time an identity is seen; callers emit feedback exactly then.
    pub fn request(&mut self, req: &SampleRequest) -> bool {
        if self.entries.contains_key(req) {
            return false;
        }
        debug!(sound = %req.sound, index = req.index, "requesting sample");
        self.entries.insert(req.clone(), SampleState::Requested);
        true
    }

    pub fn state(&self, req: &SampleRequest) -> Option<&SampleState> {
        self.entries.get(req)
    }

    /// The complete PCM for an identity, if it has arrived.
    pub fn lookup_complete(&self, req: &SampleRequest) -> Option<CompleteSample> {
        match self.entries.get(req) {
            Some(SampleState::Complete {
                pcm,
                pcm_sample_rate,
                pitch_hz,
                note,
            }) => Some(CompleteSample {
                pcm: pcm.clone(),
                pcm_sample_rate: *pcm_sample_rate,
                pitch_hz: *pitch_hz,
                note: *note,
            }),
            _ => None,
        }
    }

    /// Install a fully-delivered sample. Ignored if the entry already
    /// reached a terminal state (transitions are monotone).
    pub fn insert_complete(
        &mut self,
        req: SampleRequest,
        pcm: Vec<f32>,
        pcm_sample_rate: u32,
        pitch_hz: Option<f64>,
        note: Option<i32>,
    ) {
        if matches!(
            self.entries.get(&req),
            Some(SampleState::Complete { .. }) | Some(SampleState::NotFound)
        ) {
            return;
        }
        debug!(sound = %req.sound, index = req.index, frames = pcm.len(), "sample complete");
        self.entries.insert(
            req,
            SampleState::Complete {
                pcm: Arc::new(pcm),
                pcm_sample_rate,
                pitch_hz,
                note,
            },
        );
    }

    /// Append one chunk at the given offset; the last chunk promotes the
    /// entry to complete. Out-of-range chunks are dropped with a warning.
    #[allow(clippy::too_many_arguments)]
    pub fn add_chunk(
        &mut self,
        req: SampleRequest,
        offset: usize,
        total: usize,
        pcm_sample_rate: u32,
        pitch_hz: Option<f64>,
        note: Option<i32>,
        bytes: &[f32],
        is_last: bool,
    ) {
        let entry = self
            .entries
            .entry(req.clone())
            .or_insert(SampleState::Requested);
        match entry {
            SampleState::Complete { .. } | SampleState::NotFound => return,
            SampleState::Requested => {
                *entry = SampleState::Partial {
                    pcm: vec![0.0; total],
                    received: 0,
                    total,
                    pcm_sample_rate,
                    pitch_hz,
                    note,
                };
            }
            SampleState::Partial { .. } => {}
        }
        let mut promoted = None;
        if let SampleState::Partial {
            pcm,
            received,
            total,
            pcm_sample_rate,
            pitch_hz,
            note,
        } = entry
        {
            if offset + bytes.len() > *total {
                warn!(
                    sound = %req.sound,
                    offset,
                    len = bytes.len(),
                    total = *total,
                    "sample chunk out of range, dropping"
                );
                return;
            }
            pcm[offset..offset + bytes.len()].copy_from_slice(bytes);
            *received += bytes.len();
            if is_last {
                promoted = Some((std::mem::take(pcm), *pcm_sample_rate, *pitch_hz, *note));
            }
        }
        if let Some((done, rate, hz, nt)) = promoted {
            debug!(sound = %req.sound, index = req.index, frames = done.len(), "sample assembled");
            self.entries.insert(
                req,
                SampleState::Complete {
                    pcm: Arc::new(done),
                    pcm_sample_rate: rate,
                    pitch_hz: hz,
                    note: nt,
                },
            );
        }
    }

    /// Record a terminal not-found. A completed sample stays complete.
    pub fn mark_not_found(&mut self, req: SampleRequest) {
        match self.entries.get(&req) {
            Some(SampleState::Complete { .. }) => {}
            _ => {
                debug!(sound = %req.sound, index = req.index, "sample not found");
                self.entries.insert(req, SampleState::NotFound);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> SampleRequest {
        SampleRequest::new("default", "bd", 0)
    }

    #[test]
    fn test_duplicate_requests_are_suppressed() {
        let mut reg = SampleRegistry::new();
        assert!(reg.request(&req()));
        assert!(!reg.request(&req()));
        assert!(matches!(reg.state(&req()), Some(SampleState::Requested)));
    }

    #[test]
    fn test_complete_delivery() {
        let mut reg = SampleRegistry::new();
        reg.request(&req());
        reg.insert_complete(req(), vec![0.1, 0.2, 0.3], 44100, Some(440.0), None);
        let sample = reg.lookup_complete(&req()).expect("should be complete");
        assert_eq!(sample.pcm.len(), 3);
        assert_eq!(sample.pcm_sample_rate, 44100);
        assert_eq!(sample.pitch_hz, Some(440.0));
    }

    #[test]
    fn test_chunked_delivery_assembles_in_order() {
        let mut reg = SampleRegistry::new();
        reg.request(&req());
        reg.add_chunk(req(), 0, 4, 48000, None, None, &[1.0, 2.0], false);
        assert!(matches!(
            reg.state(&req()),
            Some(SampleState::Partial { received: 2, .. })
        ));
        assert!(reg.lookup_complete(&req()).is_none());
        reg.add_chunk(req(), 2, 4, 48000, None, None, &[3.0, 4.0], true);
        let sample = reg.lookup_complete(&req()).expect("assembled");
        assert_eq!(sample.pcm.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_chunks_after_complete_are_ignored() {
        let mut reg = SampleRegistry::new();
        reg.insert_complete(req(), vec![9.0], 44100, None, None);
        reg.add_chunk(req(), 0, 2, 44100, None, None, &[0.0, 0.0], true);
        let sample = reg.lookup_complete(&req()).unwrap();
        assert_eq!(sample.pcm.as_slice(), &[9.0]);
    }

    #[test]
    fn test_not_found_is_terminal_but_complete_wins() {
        let mut reg = SampleRegistry::new();
        reg.request(&req());
        reg.mark_not_found(req());
        assert!(matches!(reg.state(&req()), Some(SampleState::NotFound)));
        // NotFound blocks later data
        reg.insert_complete(req(), vec![1.0], 44100, None, None);
        assert!(reg.lookup_complete(&req()).is_none());

        // But an already-complete sample is not demoted
        let other = SampleRequest::new("default", "sn", 0);
        let mut reg = SampleRegistry::new();
        reg.insert_complete(other.clone(), vec![1.0], 44100, None, None);
        reg.mark_not_found(other.clone());
        assert!(reg.lookup_complete(&other).is_some());
    }

    #[test]
    fn test_out_of_range_chunk_dropped() {
        let mut reg = SampleRegistry::new();
        reg.add_chunk(req(), 3, 4, 44100, None, None, &[1.0, 2.0], false);
        assert!(matches!(
            reg.state(&req()),
            Some(SampleState::Partial { received: 0, .. })
        ));
    }
}
