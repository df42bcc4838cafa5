use serde::{Deserialize, Serialize};

/// Requested synthesis chunk granularity.
///
/// Forwarded verbatim to the synthesis endpoint; the engine itself makes no
/// assumption about the byte size each value maps to on the server.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSize {
    Small,
    #[default]
    Medium,
    Large,
}

/// Request body for the streaming synthesis endpoint.
///
/// The response is one logical linear-PCM container file delivered across
/// physical reads of arbitrary size.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisRequest {
    /// Pre-normalized text to synthesize.
    pub text: String,
    /// Server-side chunking hint.
    #[serde(rename = "chunkSize")]
    pub chunk_size: ChunkSize,
}

/// Reason why a playback session reached its terminal state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of the stream with all buffered audio played out.
    Eof,
    /// Transport, decode, or output error terminated the session.
    Error,
    /// Playback was explicitly stopped by the caller.
    Stopped,
}

/// Point-in-time playback counters for an active session.
///
/// Safe to sample concurrently with the decode loop; values describe one
/// coherent instant but may be stale by the time the caller inspects them.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackInfo {
    /// Decoded audio queued but not yet scheduled, in seconds.
    pub buffered_duration: f64,
    /// Number of decoded chunks currently queued.
    pub queue_length: u32,
    /// Total bytes received from the transport, container header included.
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_request_uses_wire_field_names() {
        let req = SynthesisRequest {
            text: "hello".to_string(),
            chunk_size: ChunkSize::Medium,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"text":"hello","chunkSize":"medium"}"#);
    }

    #[test]
    fn chunk_size_round_trips_all_variants() {
        for (variant, wire) in [
            (ChunkSize::Small, "\"small\""),
            (ChunkSize::Medium, "\"medium\""),
            (ChunkSize::Large, "\"large\""),
        ] {
            assert_eq!(serde_json::to_string(&variant).unwrap(), wire);
            let back: ChunkSize = serde_json::from_str(wire).unwrap();
            assert_eq!(back, variant);
        }
    }

    #[test]
    fn end_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PlaybackEndReason::Stopped).unwrap(),
            "\"stopped\""
        );
    }
}
