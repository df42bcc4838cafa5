//! FIFO of decoded chunks shared between the decode loop and the scheduler.
//!
//! Single producer (the session loop) appends at the tail, single consumer
//! (the scheduler) pops at the head; cumulative buffered duration is tracked
//! under the same lock so snapshots stay coherent. Wakeups travel over the
//! scheduler's event channel, so no pop ever blocks here.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::decode::DecodedChunk;

/// Thread-safe FIFO of decoded chunks with duration accounting.
///
/// Invariant: outside an in-flight push/pop, `buffered_secs` equals the sum
/// of the durations of all queued chunks.
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    chunks: VecDeque<DecodedChunk>,
    buffered_secs: f64,
    closed: bool,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::new(),
                buffered_secs: 0.0,
                closed: false,
            }),
        }
    }

    /// Append a chunk at the tail and grow the buffered-duration total.
    pub fn push(&self, chunk: DecodedChunk) {
        let mut g = self.inner.lock().unwrap();
        g.buffered_secs += chunk.duration;
        g.chunks.push_back(chunk);
    }

    /// Pop the head chunk, shrinking the buffered-duration total.
    pub fn pop(&self) -> Option<DecodedChunk> {
        let mut g = self.inner.lock().unwrap();
        let chunk = g.chunks.pop_front()?;
        g.buffered_secs = (g.buffered_secs - chunk.duration).max(0.0);
        if g.chunks.is_empty() {
            // Re-zero so float error never accumulates across a session.
            g.buffered_secs = 0.0;
        }
        Some(chunk)
    }

    /// Seconds of decoded audio currently queued.
    pub fn buffered_secs(&self) -> f64 {
        self.inner.lock().unwrap().buffered_secs
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coherent `(buffered_secs, len)` pair for status snapshots.
    pub fn snapshot(&self) -> (f64, usize) {
        let g = self.inner.lock().unwrap();
        (g.buffered_secs, g.chunks.len())
    }

    /// Mark the producer side as finished. Idempotent; queued chunks remain
    /// poppable until drained.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: f32, duration: f64) -> DecodedChunk {
        DecodedChunk {
            samples: vec![tag],
            channels: 1,
            sample_rate: 24_000,
            duration,
        }
    }

    #[test]
    fn pops_in_insertion_order() {
        let q = ChunkQueue::new();
        q.push(chunk(1.0, 0.2));
        q.push(chunk(2.0, 0.2));
        q.push(chunk(3.0, 0.2));

        assert_eq!(q.pop().unwrap().samples[0], 1.0);
        assert_eq!(q.pop().unwrap().samples[0], 2.0);
        assert_eq!(q.pop().unwrap().samples[0], 3.0);
        assert!(q.pop().is_none());
    }

    #[test]
    fn buffered_secs_tracks_queued_durations() {
        let q = ChunkQueue::new();
        assert_eq!(q.buffered_secs(), 0.0);

        q.push(chunk(1.0, 0.75));
        q.push(chunk(2.0, 0.75));
        assert!((q.buffered_secs() - 1.5).abs() < 1e-12);

        q.pop();
        assert!((q.buffered_secs() - 0.75).abs() < 1e-12);

        q.pop();
        assert_eq!(q.buffered_secs(), 0.0);
    }

    #[test]
    fn snapshot_is_coherent() {
        let q = ChunkQueue::new();
        q.push(chunk(1.0, 0.2));
        q.push(chunk(2.0, 0.3));

        let (secs, len) = q.snapshot();
        assert!((secs - 0.5).abs() < 1e-12);
        assert_eq!(len, 2);
    }

    #[test]
    fn close_is_idempotent_and_preserves_chunks() {
        let q = ChunkQueue::new();
        q.push(chunk(1.0, 0.2));
        q.close();
        q.close();
        assert!(q.is_closed());
        assert!(q.pop().is_some());
    }

    #[test]
    fn buffered_secs_never_goes_negative() {
        let q = ChunkQueue::new();
        q.push(chunk(1.0, 0.1));
        q.push(chunk(2.0, 0.1));
        // Pop everything; float error must not leave a negative residue.
        q.pop();
        q.pop();
        assert!(q.buffered_secs() >= 0.0);
        assert_eq!(q.buffered_secs(), 0.0);
    }
}
