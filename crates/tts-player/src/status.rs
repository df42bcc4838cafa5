//! Shared session counters and point-in-time snapshots.
//!
//! Both pipeline threads and the caller-facing controller update and read
//! these fields concurrently, so everything is atomics plus one small mutex
//! for the terminal reason.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use tts_stream_types::{PlaybackEndReason, PlaybackInfo};

use crate::queue::ChunkQueue;

/// Lifecycle phase of a playback session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Transport opened, no bytes received yet.
    Connecting = 0,
    /// Bytes arriving, buffered duration below the pre-buffer threshold.
    Buffering = 1,
    /// The scheduler is actively playing a chunk.
    Playing = 2,
    /// Stream ended but queued chunks are still playing out.
    Draining = 3,
    /// Terminal: all resources released.
    Stopped = 4,
    /// A fatal failure occurred; transitions to `Stopped` after cleanup.
    Errored = 5,
}

impl SessionPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionPhase::Connecting,
            1 => SessionPhase::Buffering,
            2 => SessionPhase::Playing,
            3 => SessionPhase::Draining,
            5 => SessionPhase::Errored,
            _ => SessionPhase::Stopped,
        }
    }
}

/// Counters and flags shared across one session's threads.
#[derive(Debug)]
pub struct SessionStats {
    bytes_received: AtomicU64,
    chunk_counter: AtomicU64,
    phase: AtomicU8,
    active: AtomicBool,
    playing: AtomicBool,
    end_reason: Mutex<Option<PlaybackEndReason>>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            bytes_received: AtomicU64::new(0),
            chunk_counter: AtomicU64::new(0),
            phase: AtomicU8::new(SessionPhase::Connecting as u8),
            active: AtomicBool::new(true),
            playing: AtomicBool::new(false),
            end_reason: Mutex::new(None),
        }
    }

    /// Count transport bytes, header bytes included.
    pub fn add_bytes(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn count_chunk(&self) {
        self.chunk_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunks_decoded(&self) -> u64 {
        self.chunk_counter.load(Ordering::Relaxed)
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    /// Move Connecting to Buffering once the first bytes arrive; later
    /// phases are left untouched.
    pub fn mark_receiving(&self) {
        let _ = self.phase.compare_exchange(
            SessionPhase::Connecting as u8,
            SessionPhase::Buffering as u8,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn active_flag(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Record the terminal reason; the first writer wins.
    pub fn set_end_reason(&self, reason: PlaybackEndReason) {
        let mut g = self.end_reason.lock().unwrap();
        if g.is_none() {
            *g = Some(reason);
        }
    }

    pub fn end_reason(&self) -> Option<PlaybackEndReason> {
        *self.end_reason.lock().unwrap()
    }

    /// Snapshot for `playback_info()`, safe concurrently with the decode loop.
    pub fn playback_info(&self, queue: &ChunkQueue) -> PlaybackInfo {
        let (buffered_duration, queue_length) = queue.snapshot();
        PlaybackInfo {
            buffered_duration,
            queue_length: queue_length as u32,
            bytes_received: self.bytes_received(),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
