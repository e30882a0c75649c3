//! The command/feedback link between the pattern side and the audio
//! backend.
//!
//! Both directions are lock-free single-producer single-consumer rings: the
//! audio thread pops inbound commands at the start of each block and pushes
//! sample requests outbound without ever taking a lock. Messages are plain
//! data (serde-derived) so a transport layer can also move them between
//! processes.
//!
//! PCM arrives pre-decoded. Large samples are chunked so a stuttering
//! transport never holds a block hostage: each chunk copy is O(chunk) and
//! the final chunk promotes the sample to complete.

use crate::control::VoiceData;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};

/// Identity of one sample: bank + sound + index, optionally pitched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleRequest {
    pub bank: String,
    pub sound: String,
    pub index: u32,
    pub note: Option<i32>,
}

impl SampleRequest {
    pub fn new(bank: impl Into<String>, sound: impl Into<String>, index: u32) -> Self {
        Self {
            bank: bank.into(),
            sound: sound.into(),
            index,
            note: None,
        }
    }
}

/// Inbound commands, pattern side → audio backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Whole sample delivered in one message.
    SampleComplete {
        req: SampleRequest,
        pitch_hz: Option<f64>,
        note: Option<i32>,
        pcm_sample_rate: u32,
        pcm: Vec<f32>,
    },
    /// One chunk of a sample; `is_last` promotes the entry to complete.
    SampleChunk {
        req: SampleRequest,
        offset: usize,
        total: usize,
        pcm_sample_rate: u32,
        pitch_hz: Option<f64>,
        note: Option<i32>,
        bytes: Vec<f32>,
        is_last: bool,
    },
    /// The sample does not exist; affected voices drop silently.
    SampleNotFound { req: SampleRequest },
    /// Schedule one voice, times in seconds relative to the playback epoch.
    Schedule {
        playback_id: u64,
        start_time_sec: f64,
        gate_end_time_sec: f64,
        data: VoiceData,
    },
    /// Forget a playback: its epoch and any unplayed heap entries.
    Cleanup { playback_id: u64 },
    /// Anchor the audio clock; set once before the first block.
    SetBackendStart { start_time_sec: f64 },
}

/// Outbound feedback, audio backend → pattern side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Feedback {
    /// The scheduler saw a sample sound it does not have PCM for.
    RequestSample { playback_id: u64, req: SampleRequest },
}

/// Producer half of a link.
pub struct LinkSender<T> {
    tx: HeapProd<T>,
}

/// Consumer half of a link.
pub struct LinkReceiver<T> {
    rx: HeapCons<T>,
}

impl<T> LinkSender<T> {
    /// Push a message; hands it back when the ring is full.
    pub fn send(&mut self, msg: T) -> Result<(), T> {
        self.tx.try_push(msg)
    }
}

impl<T> LinkReceiver<T> {
    /// Pop the next message, if any. Never blocks.
    pub fn recv(&mut self) -> Option<T> {
        self.rx.try_pop()
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.rx.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build a lock-free SPSC link with the given capacity.
pub fn link<T>(capacity: usize) -> (LinkSender<T>, LinkReceiver<T>) {
    let (tx, rx) = HeapRb::<T>::new(capacity).split();
    (LinkSender { tx }, LinkReceiver { rx })
}
