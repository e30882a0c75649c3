//! The audio backend: drains the command link, schedules voices, renders
//! orbits, and fills the host's stereo block.
//!
//! Everything here runs on the audio thread. The inbound queue is drained
//! a bounded number of commands per block so a burst cannot blow the
//! render deadline, and nothing on the render path allocates: scratch
//! buffers live in the [`RenderContext`] and are reused block after block.

use crate::link::{link, Command, Feedback, LinkReceiver, LinkSender};
use crate::orbit::OrbitBank;
use crate::sample_registry::SampleRegistry;
use crate::scheduler::Scheduler;
use crate::voice::RenderContext;
use tracing::debug;

/// Commands handled per block; the rest wait for the next block.
const MAX_COMMANDS_PER_BLOCK: usize = 128;

/// Capacity of the inbound command ring.
const COMMAND_CAPACITY: usize = 4096;

/// Capacity of the outbound feedback ring.
const FEEDBACK_CAPACITY: usize = 1024;

pub struct AudioBackend {
    sample_rate: u32,
    block_frames: usize,
    cursor: u64,
    backend_start_sec: f64,
    registry: SampleRegistry,
    scheduler: Scheduler,
    orbits: OrbitBank,
    ctx: RenderContext,
    commands: LinkReceiver<Command>,
    feedback: LinkSender<Feedback>,
    fb_scratch: Vec<Feedback>,
    master_l: Vec<f32>,
    master_r: Vec<f32>,
}

impl AudioBackend {
    /// Build a backend plus the far ends of its links. Block sizes must be
    /// a power of two; the sample rate is fixed for the backend's life.
    pub fn new(
        sample_rate: u32,
        block_frames: usize,
    ) -> (Self, LinkSender<Command>, LinkReceiver<Feedback>) {
        assert!(
            block_frames.is_power_of_two(),
            "block size must be a power of two, got {}",
            block_frames
        );
        let (cmd_tx, cmd_rx) = link(COMMAND_CAPACITY);
        let (fb_tx, fb_rx) = link(FEEDBACK_CAPACITY);
        let backend = Self {
            sample_rate,
            block_frames,
            cursor: 0,
            backend_start_sec: 0.0,
            registry: SampleRegistry::new(),
            scheduler: Scheduler::new(sample_rate as f64),
            orbits: OrbitBank::new(sample_rate as f32, block_frames),
            ctx: RenderContext::new(sample_rate as f32, block_frames),
            commands: cmd_rx,
            feedback: fb_tx,
            fb_scratch: Vec::with_capacity(64),
            master_l: vec![0.0; block_frames],
            master_r: vec![0.0; block_frames],
        };
        (backend, cmd_tx, fb_rx)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn cursor_frames(&self) -> u64 {
        self.cursor
    }

    pub fn cursor_seconds(&self) -> f64 {
        self.cursor as f64 / self.sample_rate as f64
    }

    pub fn active_voices(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Render one block of interleaved stereo. `out.len()` must be twice
    /// the configured block size.
    pub fn process_block(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        debug_assert_eq!(frames, self.block_frames, "host block size changed");

        self.drain_commands();

        self.ctx.block_start = self.cursor;
        self.ctx.frames = frames;
        self.orbits.begin_block();
        self.scheduler.process(self.cursor, frames, &self.registry);
        self.scheduler.render_active(&mut self.ctx, &mut self.orbits);

        self.master_l.fill(0.0);
        self.master_r.fill(0.0);
        self.orbits
            .finish_block(&mut self.master_l, &mut self.master_r);

        for i in 0..frames {
            out[2 * i] = sanitize(self.master_l[i]);
            out[2 * i + 1] = sanitize(self.master_r[i]);
        }
        self.cursor += frames as u64;
    }

    fn drain_commands(&mut self) {
        for _ in 0..MAX_COMMANDS_PER_BLOCK {
            let Some(cmd) = self.commands.recv() else {
                break;
            };
            self.handle(cmd);
        }
        // Forward sample requests gathered while scheduling
        for fb in self.fb_scratch.drain(..) {
            // A full feedback ring only delays the request; the identity
            // stays marked requested and the voice drops meanwhile
            let _ = self.feedback.send(fb);
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::SampleComplete {
                req,
                pitch_hz,
                note,
                pcm_sample_rate,
                pcm,
            } => {
                self.registry
                    .insert_complete(req, pcm, pcm_sample_rate, pitch_hz, note);
            }
            Command::SampleChunk {
                req,
                offset,
                total,
                pcm_sample_rate,
                pitch_hz,
                note,
                bytes,
                is_last,
            } => {
                self.registry.add_chunk(
                    req,
                    offset,
                    total,
                    pcm_sample_rate,
                    pitch_hz,
                    note,
                    &bytes,
                    is_last,
                );
            }
            Command::SampleNotFound { req } => {
                self.registry.mark_not_found(req);
            }
            Command::Schedule {
                playback_id,
                start_time_sec,
                gate_end_time_sec,
                data,
            } => {
                let base = self.backend_start_sec;
                let cursor = self.cursor;
                let scheduler = &mut self.scheduler;
                let registry = &mut self.registry;
                let fb = &mut self.fb_scratch;
                scheduler.schedule(
                    playback_id,
                    start_time_sec - base,
                    gate_end_time_sec - base,
                    data,
                    cursor,
                    registry,
                    &mut |f| fb.push(f),
                );
            }
            Command::Cleanup { playback_id } => {
                self.scheduler.cleanup(playback_id);
            }
            Command::SetBackendStart { start_time_sec } => {
                debug!(start_time_sec, "backend start anchored");
                self.backend_start_sec = start_time_sec;
            }
        }
    }
}

#[inline]
fn sanitize(x: f32) -> f32 {
    if x.is_finite() {
        x.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
