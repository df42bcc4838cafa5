//! HTTP transport for the streaming synthesis endpoint.
//!
//! One POST per session; the response body is one logical WAV file read in
//! arbitrarily-sized chunks. A non-success status is fatal before any audio
//! is produced. Cancellation is a shared flag checked on every read, so a
//! stopped session stops pulling bytes and drops the connection promptly.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tts_stream_types::SynthesisRequest;

use crate::error::PlayerError;

/// Byte stream for one playback session.
///
/// Wraps the response body reader together with the session cancel flag;
/// once cancelled, reads report end-of-stream and the connection is released
/// when the stream drops.
pub struct TransportStream {
    reader: Box<dyn Read>,
    cancel: Arc<AtomicBool>,
}

impl TransportStream {
    /// Wrap an arbitrary byte source. Used by tests and custom transports.
    pub fn from_reader(reader: Box<dyn Read>, cancel: Arc<AtomicBool>) -> Self {
        Self { reader, cancel }
    }

    /// Read the next chunk of the stream into `buf`.
    ///
    /// Returns `Ok(0)` on end-of-stream or after cancellation; any transport
    /// failure mid-stream surfaces as the error.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.load(Ordering::Relaxed) {
            return Ok(0);
        }
        self.reader.read(buf)
    }
}

/// Open the synthesis stream, failing fast on any non-success status.
pub fn open_stream(
    endpoint: &str,
    request: &SynthesisRequest,
    cancel: Arc<AtomicBool>,
) -> Result<TransportStream, PlayerError> {
    tracing::debug!(endpoint = %endpoint, chunk_size = ?request.chunk_size, "opening synthesis stream");

    let response = ureq::post(endpoint).send_json(request).map_err(|e| match e {
        ureq::Error::StatusCode(code) => {
            PlayerError::Transport(format!("synthesis endpoint returned status {code}"))
        }
        other => PlayerError::Transport(format!("request failed: {other}")),
    })?;
    if !response.status().is_success() {
        return Err(PlayerError::Transport(format!(
            "synthesis endpoint returned status {}",
            response.status()
        )));
    }

    let (_, body) = response.into_parts();
    Ok(TransportStream {
        reader: Box::new(body.into_reader()),
        cancel,
    })
}

/// Caller-owned spacing between synthesis requests.
///
/// External rate limiting is the caller's concern; this carries the
/// last-request timestamp explicitly instead of hiding it in global state.
#[derive(Debug, Default)]
pub struct RequestPacer {
    last_request: Option<Instant>,
}

impl RequestPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep out whatever remains of `min_gap` since the previous request,
    /// then stamp the current time.
    pub fn pace(&mut self, min_gap: Duration) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < min_gap {
                std::thread::sleep(min_gap - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }

    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }
}
