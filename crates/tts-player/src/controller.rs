//! Playback controller facade and session startup.
//!
//! `start_stream` opens the transport, fails fast on a bad response (no
//! controller, no partial audio), then spawns the producer and scheduler
//! threads. The returned [`PlaybackController`] is the only handle a caller
//! needs: stop, liveness, counters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Sender, bounded, unbounded};
use tts_stream_types::{PlaybackEndReason, PlaybackInfo, SynthesisRequest};

use crate::config::PlayerConfig;
use crate::decode::{ChunkDecoder, WavChunkDecoder};
use crate::error::PlayerError;
use crate::queue::ChunkQueue;
use crate::scheduler::{self, SchedulerEvent};
use crate::session;
use crate::sink::{CpalSink, OutputSink, SinkFactory};
use crate::status::{SessionPhase, SessionStats};
use crate::transport::{self, TransportStream};

/// Transport constructor run on the producer thread; receives the session
/// cancel flag so reads can observe it.
pub type TransportConnect =
    Box<dyn FnOnce(Arc<AtomicBool>) -> Result<TransportStream, PlayerError> + Send>;

/// Handle to one playback session.
///
/// Sessions are never reused; a new request gets a new controller.
pub struct PlaybackController {
    cancel: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
    queue: Arc<ChunkQueue>,
    ctrl_tx: Sender<SchedulerEvent>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PlaybackController {
    /// Stop playback: cancel the transport, ramp gain down, release the
    /// sink. Idempotent and safe from any state, including after the
    /// session already ended.
    pub fn stop(&self) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            self.stats.set_active(false);
            let _ = self.ctrl_tx.send(SchedulerEvent::Stop);
        }
    }

    /// Whether audible work remains: the session is live and a chunk is
    /// playing or queued.
    pub fn is_active(&self) -> bool {
        self.stats.active_flag() && (self.stats.is_playing() || !self.queue.is_empty())
    }

    /// Point-in-time counters; safe concurrently with the decode loop.
    pub fn playback_info(&self) -> PlaybackInfo {
        self.stats.playback_info(&self.queue)
    }

    pub fn phase(&self) -> SessionPhase {
        self.stats.phase()
    }

    /// Terminal reason once the session has ended.
    pub fn end_reason(&self) -> Option<PlaybackEndReason> {
        self.stats.end_reason()
    }

    /// Block until both session threads have exited, or `timeout` elapses.
    /// Returns `true` when the session is fully torn down.
    pub fn wait_until_done(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let all_finished = {
                let handles = self.handles.lock().unwrap();
                handles.iter().all(|h| h.is_finished())
            };
            if all_finished {
                let mut handles = self.handles.lock().unwrap();
                for handle in handles.drain(..) {
                    let _ = handle.join();
                }
                return true;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Start a streaming session against a synthesis endpoint, playing through
/// the default (or substring-matched) CPAL output device.
///
/// A non-success response yields `Err` and no controller; nothing was
/// played and nothing keeps running.
pub fn start_stream(
    endpoint: &str,
    request: &SynthesisRequest,
    config: PlayerConfig,
    device: Option<String>,
) -> Result<PlaybackController> {
    let endpoint = endpoint.to_string();
    let request = request.clone();
    let connect: TransportConnect =
        Box::new(move |cancel| transport::open_stream(&endpoint, &request, cancel));

    let sink_factory: SinkFactory =
        Box::new(move |events| Ok(Box::new(CpalSink::new(device, events)) as Box<dyn OutputSink>));

    start_session(connect, Box::new(WavChunkDecoder), sink_factory, config)
}

/// Start a session from explicit parts: a transport constructor, a chunk
/// decoder, and an output sink factory. This is the seam integration tests
/// and embedders use to swap transports or sinks.
pub fn start_session(
    connect: TransportConnect,
    decoder: Box<dyn ChunkDecoder>,
    sink_factory: SinkFactory,
    config: PlayerConfig,
) -> Result<PlaybackController> {
    let cancel = Arc::new(AtomicBool::new(false));
    let queue = Arc::new(ChunkQueue::new());
    let stats = Arc::new(SessionStats::new());
    let (ctrl_tx, ctrl_rx) = unbounded();
    let (sink_tx, sink_rx) = unbounded();
    let (ready_tx, ready_rx) = bounded(1);

    let producer = {
        let queue = queue.clone();
        let stats = stats.clone();
        let cancel = cancel.clone();
        let events = ctrl_tx.clone();
        let config = config.clone();
        thread::Builder::new()
            .name("tts-producer".to_string())
            .spawn(move || {
                // Open the transport here so the connection never crosses
                // threads; the caller learns the outcome before it gets a
                // controller.
                let stream = match connect(cancel.clone()) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                session::run_producer(stream, decoder, queue, stats, events, cancel, config);
            })?
    };

    match ready_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = producer.join();
            return Err(e.into());
        }
        Err(_) => {
            let _ = producer.join();
            return Err(anyhow::anyhow!("transport thread terminated during connect"));
        }
    }

    let scheduler = {
        let queue = queue.clone();
        let stats = stats.clone();
        let cancel = cancel.clone();
        let config = config.clone();
        let cancel_closure = cancel.clone();
        let spawned = thread::Builder::new()
            .name("tts-scheduler".to_string())
            .spawn(move || {
                let cancel = cancel_closure;
                let sink = match sink_factory(sink_tx) {
                    Ok(sink) => sink,
                    Err(e) => {
                        tracing::error!("output sink init failed: {e:#}");
                        stats.set_phase(SessionPhase::Errored);
                        cancel.store(true, Ordering::Relaxed);
                        queue.close();
                        stats.set_end_reason(PlaybackEndReason::Error);
                        stats.set_active(false);
                        stats.set_phase(SessionPhase::Stopped);
                        return;
                    }
                };
                scheduler::run_scheduler(queue, stats, config, sink, cancel, ctrl_rx, sink_rx);
            });
        match spawned {
            Ok(handle) => handle,
            Err(e) => {
                cancel.store(true, Ordering::Relaxed);
                let _ = producer.join();
                return Err(e.into());
            }
        }
    };

    Ok(PlaybackController {
        cancel,
        stats,
        queue,
        ctrl_tx,
        handles: Mutex::new(vec![producer, scheduler]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedChunk;
    use crate::header::AudioFormat;
    use crate::sink::SinkEvent;
    use std::io::{self, Read};
    use std::sync::atomic::AtomicUsize;

    /// Sink that completes every chunk as soon as it is submitted.
    struct InstantSink {
        events: crossbeam_channel::Sender<SinkEvent>,
        finished: Arc<AtomicBool>,
    }

    impl OutputSink for InstantSink {
        fn begin(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
            Ok(())
        }

        fn submit(&mut self, _chunk: DecodedChunk) -> Result<()> {
            let _ = self.events.send(SinkEvent::ChunkFinished);
            Ok(())
        }

        fn finish(&mut self, _fade_out: Duration) {
            self.finished.store(true, Ordering::Relaxed);
        }
    }

    fn instant_sink_factory(finished: Arc<AtomicBool>) -> SinkFactory {
        Box::new(move |events| {
            Ok(Box::new(InstantSink { events, finished }) as Box<dyn OutputSink>)
        })
    }

    /// Transport that trickles zero-PCM forever until cancelled.
    struct EndlessReader;

    impl Read for EndlessReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(5));
            let n = buf.len().min(960);
            buf[..n].fill(0);
            Ok(n)
        }
    }

    fn endless_connect() -> TransportConnect {
        Box::new(|cancel| {
            Ok(TransportStream::from_reader(
                Box::new(EndlessReader),
                cancel,
            ))
        })
    }

    fn header_only_connect() -> TransportConnect {
        Box::new(|cancel| {
            let header =
                crate::header::synthesize_header(&AudioFormat::default(), 0).to_vec();
            Ok(TransportStream::from_reader(
                Box::new(io::Cursor::new(header)),
                cancel,
            ))
        })
    }

    #[test]
    fn empty_stream_finishes_with_eof() {
        let finished = Arc::new(AtomicBool::new(false));
        let controller = start_session(
            header_only_connect(),
            Box::new(WavChunkDecoder),
            instant_sink_factory(finished.clone()),
            PlayerConfig::default(),
        )
        .unwrap();

        assert!(controller.wait_until_done(Some(Duration::from_secs(5))));
        assert_eq!(controller.end_reason(), Some(PlaybackEndReason::Eof));
        assert_eq!(controller.phase(), SessionPhase::Stopped);
        assert!(!controller.is_active());
        assert!(finished.load(Ordering::Relaxed));
        assert_eq!(controller.playback_info().bytes_received, 44);
    }

    #[test]
    fn stop_twice_is_identical_to_stopping_once() {
        let finished = Arc::new(AtomicBool::new(false));
        let controller = start_session(
            endless_connect(),
            Box::new(WavChunkDecoder),
            instant_sink_factory(finished),
            PlayerConfig::default(),
        )
        .unwrap();

        controller.stop();
        controller.stop();

        assert!(controller.wait_until_done(Some(Duration::from_secs(5))));
        assert_eq!(controller.end_reason(), Some(PlaybackEndReason::Stopped));
        assert!(!controller.is_active());

        // Still safe after the session is fully torn down.
        controller.stop();
        assert_eq!(controller.end_reason(), Some(PlaybackEndReason::Stopped));
    }

    #[test]
    fn failed_connect_yields_no_controller_and_no_sink() {
        let sink_built = Arc::new(AtomicUsize::new(0));
        let sink_built_probe = sink_built.clone();
        let factory: SinkFactory = Box::new(move |events| {
            sink_built_probe.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(InstantSink {
                events,
                finished: Arc::new(AtomicBool::new(false)),
            }) as Box<dyn OutputSink>)
        });

        let connect: TransportConnect = Box::new(|_cancel| {
            Err(PlayerError::Transport(
                "synthesis endpoint returned status 500".to_string(),
            ))
        });

        let result = start_session(
            connect,
            Box::new(WavChunkDecoder),
            factory,
            PlayerConfig::default(),
        );

        assert!(result.is_err());
        assert_eq!(sink_built.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sink_init_failure_stops_the_session_with_error() {
        let factory: SinkFactory =
            Box::new(|_events| Err(anyhow::anyhow!("no output device")));

        let controller = start_session(
            header_only_connect(),
            Box::new(WavChunkDecoder),
            factory,
            PlayerConfig::default(),
        )
        .unwrap();

        assert!(controller.wait_until_done(Some(Duration::from_secs(5))));
        assert_eq!(controller.end_reason(), Some(PlaybackEndReason::Error));
        assert_eq!(controller.phase(), SessionPhase::Stopped);
        assert!(!controller.is_active());
    }
}
