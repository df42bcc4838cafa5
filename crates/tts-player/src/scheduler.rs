//! Playback scheduler: pre-buffer gating, chunk chaining, gain ramps.
//!
//! One dedicated loop consumes explicit events (chunks queued by the decode
//! loop, completion signals from the sink, stream end, stop) so control
//! flow stays flat and testable instead of nesting completion callbacks.
//! The queue's single consumer lives here; chunks therefore play in strict
//! FIFO arrival order under any timing of completions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, select};
use tts_stream_types::PlaybackEndReason;

use crate::config::PlayerConfig;
use crate::decode::DecodedChunk;
use crate::queue::ChunkQueue;
use crate::sink::{OutputSink, SinkEvent};
use crate::status::{SessionPhase, SessionStats};

/// Control events consumed by the scheduler loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// The decode loop appended a chunk to the queue.
    ChunkQueued,
    /// The producer reached end-of-stream; drain whatever is queued.
    StreamEnded,
    /// The producer hit a fatal error; clean up and stop.
    Aborted,
    /// The caller requested stop.
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
}

pub(crate) struct Scheduler {
    queue: Arc<ChunkQueue>,
    stats: Arc<SessionStats>,
    config: PlayerConfig,
    sink: Box<dyn OutputSink>,
    cancel: Arc<AtomicBool>,
    playing: bool,
    begun: bool,
    faded_in: bool,
    stream_ended: bool,
}

/// Thread body for the consumer side of a session.
pub(crate) fn run_scheduler(
    queue: Arc<ChunkQueue>,
    stats: Arc<SessionStats>,
    config: PlayerConfig,
    sink: Box<dyn OutputSink>,
    cancel: Arc<AtomicBool>,
    ctrl_rx: Receiver<SchedulerEvent>,
    sink_rx: Receiver<SinkEvent>,
) {
    let mut scheduler = Scheduler::new(queue, stats, config, sink, cancel);
    loop {
        let step = select! {
            recv(ctrl_rx) -> msg => match msg {
                Ok(ev) => scheduler.on_ctrl(ev),
                // All senders gone without a terminal event: treat as stop.
                Err(_) => scheduler.on_ctrl(SchedulerEvent::Stop),
            },
            recv(sink_rx) -> msg => match msg {
                Ok(SinkEvent::ChunkFinished) => scheduler.on_chunk_finished(),
                Err(_) => Step::Continue,
            },
        };
        if step == Step::Done {
            break;
        }
    }
}

impl Scheduler {
    pub(crate) fn new(
        queue: Arc<ChunkQueue>,
        stats: Arc<SessionStats>,
        config: PlayerConfig,
        sink: Box<dyn OutputSink>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            stats,
            config,
            sink,
            cancel,
            playing: false,
            begun: false,
            faded_in: false,
            stream_ended: false,
        }
    }

    fn on_ctrl(&mut self, event: SchedulerEvent) -> Step {
        match event {
            SchedulerEvent::ChunkQueued => {
                if !self.playing {
                    return self.try_start();
                }
                Step::Continue
            }
            SchedulerEvent::StreamEnded => {
                self.stream_ended = true;
                if self.playing {
                    self.stats.set_phase(SessionPhase::Draining);
                    Step::Continue
                } else if !self.queue.is_empty() {
                    // Short utterance that never hit the pre-buffer
                    // threshold: flush what we have.
                    self.start_next()
                } else {
                    self.finish(PlaybackEndReason::Eof)
                }
            }
            SchedulerEvent::Aborted => self.shutdown(PlaybackEndReason::Error),
            SchedulerEvent::Stop => self.shutdown(PlaybackEndReason::Stopped),
        }
    }

    fn on_chunk_finished(&mut self) -> Step {
        if !self.playing {
            return Step::Continue;
        }
        if self.queue.is_empty() {
            self.playing = false;
            self.stats.set_playing(false);
            if self.stream_ended {
                return self.finish(PlaybackEndReason::Eof);
            }
            // Underrun: back to buffering until the threshold is met again.
            self.stats.set_phase(SessionPhase::Buffering);
            return Step::Continue;
        }
        self.start_next()
    }

    /// Start playback only once the pre-buffer threshold is met. The sole
    /// trigger for starting or resuming mid-stream.
    fn try_start(&mut self) -> Step {
        if self.queue.buffered_secs() >= self.config.pre_buffer_seconds {
            return self.start_next();
        }
        Step::Continue
    }

    /// Dequeue the head chunk and hand it to the sink.
    fn start_next(&mut self) -> Step {
        let Some(chunk) = self.queue.pop() else {
            return Step::Continue;
        };
        match self.submit(chunk) {
            Ok(()) => Step::Continue,
            Err(e) => {
                tracing::error!("output sink failed: {e:#}");
                self.fail(e)
            }
        }
    }

    fn submit(&mut self, mut chunk: DecodedChunk) -> anyhow::Result<()> {
        if !self.begun {
            self.sink.begin(chunk.sample_rate, chunk.channels)?;
            self.begun = true;
        }
        if !self.faded_in {
            apply_fade_in(
                &mut chunk.samples,
                chunk.channels,
                chunk.sample_rate,
                Duration::from_millis(self.config.fade_in_ms),
            );
            self.faded_in = true;
        }
        self.sink.submit(chunk)?;
        self.playing = true;
        self.stats.set_playing(true);
        self.stats.set_phase(if self.stream_ended {
            SessionPhase::Draining
        } else {
            SessionPhase::Playing
        });
        Ok(())
    }

    /// Natural completion: everything queued has played out.
    fn finish(&mut self, reason: PlaybackEndReason) -> Step {
        self.playing = false;
        self.stats.set_playing(false);
        self.sink.finish(Duration::ZERO);
        self.stats.set_end_reason(reason);
        self.stats.set_active(false);
        self.stats.set_phase(SessionPhase::Stopped);
        Step::Done
    }

    /// Caller stop or producer abort: ramp down, then release everything.
    fn shutdown(&mut self, reason: PlaybackEndReason) -> Step {
        if reason == PlaybackEndReason::Error {
            self.stats.set_phase(SessionPhase::Errored);
        }
        self.cancel.store(true, Ordering::Relaxed);
        self.playing = false;
        self.stats.set_playing(false);
        self.sink
            .finish(Duration::from_millis(self.config.fade_out_ms));
        self.stats.set_end_reason(reason);
        self.stats.set_active(false);
        self.stats.set_phase(SessionPhase::Stopped);
        Step::Done
    }

    /// Fatal sink error: cancel the producer and tear down without a ramp.
    fn fail(&mut self, _error: anyhow::Error) -> Step {
        self.stats.set_phase(SessionPhase::Errored);
        self.cancel.store(true, Ordering::Relaxed);
        self.playing = false;
        self.stats.set_playing(false);
        self.sink.finish(Duration::ZERO);
        self.stats.set_end_reason(PlaybackEndReason::Error);
        self.stats.set_active(false);
        self.stats.set_phase(SessionPhase::Stopped);
        Step::Done
    }
}

/// Linear 0→1 gain ramp over `fade` applied in place to the chunk start.
fn apply_fade_in(samples: &mut [f32], channels: u16, sample_rate: u32, fade: Duration) {
    let fade_frames = (sample_rate as f64 * fade.as_secs_f64()) as usize;
    if fade_frames == 0 {
        return;
    }
    let ch = channels.max(1) as usize;
    let total_frames = samples.len() / ch;
    for frame in 0..fade_frames.min(total_frames) {
        let gain = frame as f32 / fade_frames as f32;
        for c in 0..ch {
            samples[frame * ch + c] *= gain;
        }
    }
}
