//! Session error taxonomy.
//!
//! Transport failures are always fatal; decode failures are recoverable and
//! feed the consecutive-error counter in [`crate::recovery`]. A header-probe
//! miss is deliberately *not* an error; see [`crate::header::FormatProbe`].

use thiserror::Error;

/// Errors surfaced by a streaming playback session.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Request failed, the endpoint returned a non-success status, or the
    /// connection dropped mid-stream. Always fatal, never retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single chunk failed to decode. Recoverable: the chunk is dropped
    /// and the failure counts toward the consecutive-error threshold.
    #[error("chunk decode error: {0}")]
    Decode(String),

    /// Too many consecutive chunk failures; the session is aborted.
    #[error("stream aborted after {failures} consecutive chunk failures")]
    Stream { failures: u32 },
}
