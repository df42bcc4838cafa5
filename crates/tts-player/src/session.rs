//! Streaming session producer: read → reassemble → decode → enqueue.
//!
//! One sequential loop per session. The first non-empty chunk is probed for
//! the container format and has the header bytes sliced off; every later
//! chunk is forwarded to the decoder as-is. Transport failures are fatal;
//! decode failures feed the bounded recovery policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;
use tts_stream_types::PlaybackEndReason;

use crate::config::PlayerConfig;
use crate::decode::ChunkDecoder;
use crate::error::PlayerError;
use crate::header::{self, AudioFormat};
use crate::queue::ChunkQueue;
use crate::recovery::{ErrorRecovery, RecoveryAction};
use crate::scheduler::SchedulerEvent;
use crate::status::SessionStats;
use crate::transport::TransportStream;

/// Thread body for the producer side of a session.
///
/// Returns after end-of-stream, cancellation, or a fatal error; the queue
/// is always closed on the way out.
pub(crate) fn run_producer(
    mut stream: TransportStream,
    mut decoder: Box<dyn ChunkDecoder>,
    queue: Arc<ChunkQueue>,
    stats: Arc<SessionStats>,
    events: Sender<SchedulerEvent>,
    cancel: Arc<AtomicBool>,
    config: PlayerConfig,
) {
    let mut recovery = ErrorRecovery::new(
        config.max_consecutive_errors,
        Duration::from_millis(config.retry_delay_ms),
    );
    let mut format: Option<AudioFormat> = None;
    let mut buf = vec![0u8; config.read_buffer_bytes.max(1)];

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let n = match stream.read_chunk(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::error!("transport failed mid-stream: {e}");
                abort(&stats, &queue, &events);
                return;
            }
        };

        stats.add_bytes(n as u64);
        stats.mark_receiving();
        let chunk = &buf[..n];

        // The header probe runs once, against the first non-empty chunk.
        let (fmt, payload) = match format {
            Some(f) => (f, chunk),
            None => {
                let probe = header::probe_format(chunk);
                let f = probe.format();
                if probe.is_fallback() {
                    tracing::warn!(
                        bytes = n,
                        "format sub-chunk not found in first chunk; using fallback format"
                    );
                } else {
                    tracing::debug!(
                        rate_hz = f.sample_rate,
                        channels = f.channels,
                        bytes_per_sample = f.bytes_per_sample,
                        "stream format parsed"
                    );
                }
                format = Some(f);
                (f, &chunk[header::HEADER_LEN.min(n)..])
            }
        };

        if payload.is_empty() {
            recovery.on_success();
            continue;
        }

        match decoder.decode(&fmt, payload) {
            Ok(decoded) => {
                recovery.on_success();
                stats.count_chunk();
                queue.push(decoded);
                let _ = events.send(SchedulerEvent::ChunkQueued);
            }
            Err(e) => {
                tracing::warn!(consecutive = recovery.consecutive() + 1, "chunk dropped: {e}");
                match recovery.on_failure() {
                    RecoveryAction::Retry { delay } => std::thread::sleep(delay),
                    RecoveryAction::Abort => {
                        let err = PlayerError::Stream {
                            failures: recovery.consecutive(),
                        };
                        tracing::error!("{err}");
                        abort(&stats, &queue, &events);
                        return;
                    }
                }
            }
        }
    }

    queue.close();
    if !cancel.load(Ordering::Relaxed) {
        tracing::debug!(
            bytes = stats.bytes_received(),
            chunks = stats.chunks_decoded(),
            "stream ended"
        );
        let _ = events.send(SchedulerEvent::StreamEnded);
    }
}

fn abort(stats: &SessionStats, queue: &ChunkQueue, events: &Sender<SchedulerEvent>) {
    stats.set_end_reason(PlaybackEndReason::Error);
    queue.close();
    let _ = events.send(SchedulerEvent::Aborted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedChunk, WavChunkDecoder};
    use crate::header::synthesize_header;
    use crossbeam_channel::unbounded;
    use std::collections::VecDeque;
    use std::io::{self, Read};

    /// Reader that yields one scripted item per read call.
    struct ScriptedReader {
        script: VecDeque<ScriptItem>,
    }

    enum ScriptItem {
        Data(Vec<u8>),
        Error,
    }

    impl ScriptedReader {
        fn new(items: Vec<ScriptItem>) -> Self {
            Self {
                script: items.into(),
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                None => Ok(0),
                Some(ScriptItem::Data(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(ScriptItem::Error) => {
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
                }
            }
        }
    }

    /// Decoder whose per-chunk failures follow a script.
    struct FlakyDecoder {
        failures: VecDeque<bool>,
    }

    impl ChunkDecoder for FlakyDecoder {
        fn decode(
            &mut self,
            format: &AudioFormat,
            payload: &[u8],
        ) -> Result<DecodedChunk, PlayerError> {
            if self.failures.pop_front().unwrap_or(false) {
                return Err(PlayerError::Decode("injected".to_string()));
            }
            Ok(DecodedChunk {
                samples: vec![0.0; payload.len() / 2],
                channels: format.channels,
                sample_rate: format.sample_rate,
                duration: format.duration_of(payload.len()),
            })
        }
    }

    struct Harness {
        queue: Arc<ChunkQueue>,
        stats: Arc<SessionStats>,
        events: Vec<SchedulerEvent>,
    }

    fn run(data: Vec<ScriptItem>, decoder: Box<dyn ChunkDecoder>) -> Harness {
        let queue = Arc::new(ChunkQueue::new());
        let stats = Arc::new(SessionStats::new());
        let (tx, rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let config = PlayerConfig {
            retry_delay_ms: 1,
            // Large enough that every scripted read arrives whole.
            read_buffer_bytes: 32 * 1024,
            ..PlayerConfig::default()
        };

        let stream = TransportStream::from_reader(
            Box::new(ScriptedReader::new(data)),
            cancel.clone(),
        );
        run_producer(
            stream,
            decoder,
            queue.clone(),
            stats.clone(),
            tx,
            cancel,
            config,
        );

        Harness {
            queue,
            stats,
            events: rx.try_iter().collect(),
        }
    }

    fn wav_header(format: &AudioFormat) -> Vec<u8> {
        synthesize_header(format, 0).to_vec()
    }

    #[test]
    fn header_plus_chunks_decode_in_order() {
        let format = AudioFormat::default();
        let h = run(
            vec![
                ScriptItem::Data(wav_header(&format)),
                ScriptItem::Data(vec![0u8; 9600]),
                ScriptItem::Data(vec![0u8; 9600]),
            ],
            Box::new(WavChunkDecoder),
        );

        assert_eq!(h.stats.bytes_received(), 44 + 2 * 9600);
        assert_eq!(h.stats.chunks_decoded(), 2);
        assert_eq!(h.queue.len(), 2);
        assert!(h.queue.is_closed());
        assert_eq!(
            h.events,
            vec![
                SchedulerEvent::ChunkQueued,
                SchedulerEvent::ChunkQueued,
                SchedulerEvent::StreamEnded,
            ]
        );
    }

    #[test]
    fn first_read_with_payload_attached_strips_only_the_header() {
        let format = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            bytes_per_sample: 2,
        };
        let mut first = synthesize_header(&format, 19_200).to_vec();
        first.extend_from_slice(&vec![0u8; 19_200]);

        let h = run(vec![ScriptItem::Data(first)], Box::new(WavChunkDecoder));

        assert_eq!(h.stats.bytes_received(), 44 + 19_200);
        assert_eq!(h.queue.len(), 1);
        let chunk = h.queue.pop().unwrap();
        assert_eq!(chunk.sample_rate, 48_000);
        assert_eq!(chunk.channels, 2);
        // 19200 bytes / (2 ch * 2 B) = 4800 frames = 0.1 s at 48 kHz.
        assert!((chunk.duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn split_header_falls_back_deterministically() {
        let format = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            bytes_per_sample: 2,
        };
        let header = synthesize_header(&format, 9600);

        let h = run(
            vec![
                ScriptItem::Data(header[..20].to_vec()),
                ScriptItem::Data(header[20..].to_vec()),
                ScriptItem::Data(vec![0u8; 9600]),
            ],
            Box::new(WavChunkDecoder),
        );

        // The 20-byte probe cannot see the fmt body, so the session runs
        // with the fallback format; the header tail is decoded as PCM, a
        // known consequence of the no-reassembly simplification.
        assert_eq!(h.stats.bytes_received(), 44 + 9600);
        let first = h.queue.pop().unwrap();
        assert_eq!(first.sample_rate, 24_000);
        assert_eq!(first.channels, 1);
    }

    #[test]
    fn first_chunk_shorter_than_header_is_consumed_entirely() {
        let format = AudioFormat::default();
        let header = wav_header(&format);

        let h = run(
            vec![
                ScriptItem::Data(header[..20].to_vec()),
                ScriptItem::Data(vec![0u8; 4800]),
            ],
            Box::new(WavChunkDecoder),
        );

        // Only the 4800-byte read produced audio.
        assert_eq!(h.stats.chunks_decoded(), 1);
        let chunk = h.queue.pop().unwrap();
        assert!((chunk.duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn mid_stream_transport_error_aborts_immediately() {
        let format = AudioFormat::default();
        let h = run(
            vec![
                ScriptItem::Data(wav_header(&format)),
                ScriptItem::Data(vec![0u8; 9600]),
                ScriptItem::Error,
            ],
            Box::new(WavChunkDecoder),
        );

        assert_eq!(h.events.last(), Some(&SchedulerEvent::Aborted));
        assert_eq!(h.stats.end_reason(), Some(PlaybackEndReason::Error));
        assert!(h.queue.is_closed());
    }

    #[test]
    fn interleaved_failures_do_not_abort() {
        let format = AudioFormat::default();
        let mut items = vec![ScriptItem::Data(wav_header(&format))];
        for _ in 0..5 {
            items.push(ScriptItem::Data(vec![0u8; 9600]));
        }

        // fail, fail, success, fail, fail: stays below the threshold.
        let decoder = FlakyDecoder {
            failures: [true, true, false, true, true].into(),
        };
        let h = run(items, Box::new(decoder));

        assert_eq!(h.events.last(), Some(&SchedulerEvent::StreamEnded));
        assert_eq!(h.stats.end_reason(), None);
        assert_eq!(h.stats.chunks_decoded(), 1);
    }

    #[test]
    fn three_consecutive_failures_abort_the_session() {
        let format = AudioFormat::default();
        let mut items = vec![ScriptItem::Data(wav_header(&format))];
        for _ in 0..4 {
            items.push(ScriptItem::Data(vec![0u8; 9600]));
        }

        let decoder = FlakyDecoder {
            failures: [true, true, true, false].into(),
        };
        let h = run(items, Box::new(decoder));

        assert_eq!(h.events.last(), Some(&SchedulerEvent::Aborted));
        assert_eq!(h.stats.end_reason(), Some(PlaybackEndReason::Error));
        // The fourth chunk was never read past.
        assert_eq!(h.stats.chunks_decoded(), 0);
    }

    #[test]
    fn cancelled_session_closes_quietly() {
        let format = AudioFormat::default();
        let queue = Arc::new(ChunkQueue::new());
        let stats = Arc::new(SessionStats::new());
        let (tx, rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(true));

        let stream = TransportStream::from_reader(
            Box::new(ScriptedReader::new(vec![ScriptItem::Data(wav_header(
                &format,
            ))])),
            cancel.clone(),
        );
        run_producer(
            stream,
            Box::new(WavChunkDecoder),
            queue.clone(),
            stats,
            tx,
            cancel,
            PlayerConfig::default(),
        );

        assert!(queue.is_closed());
        assert!(rx.try_iter().next().is_none());
    }
}
