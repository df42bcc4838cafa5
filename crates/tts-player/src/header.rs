//! Container header probing and synthesis.
//!
//! The synthesis endpoint delivers one logical WAV file split across network
//! reads of arbitrary size, so the leading bytes of the stream must be probed
//! for the `fmt ` sub-chunk once, and every raw PCM chunk after that is
//! re-wrapped in a minimal header before decoding (see [`crate::decode`]).

/// Canonical length of the container header preceding the PCM payload.
pub const HEADER_LEN: usize = 44;

/// First sub-chunk offset: past the `RIFF` marker, file size, and `WAVE` tag.
const SUBCHUNK_START: usize = 12;

/// Byte length of the PCM `fmt ` sub-chunk body.
const FMT_BODY_LEN: usize = 16;

/// Sample format of the incoming PCM stream.
///
/// Determined exactly once per session, from the header probe or the
/// fallback; immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl Default for AudioFormat {
    /// Fallback used when the format sub-chunk cannot be located: the
    /// synthesis service's documented output format.
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            bytes_per_sample: 2,
        }
    }
}

impl AudioFormat {
    /// PCM bytes consumed per second of audio.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.bytes_per_sample as u32
    }

    /// Playback duration in seconds of a raw payload of `len` bytes.
    pub fn duration_of(&self, len: usize) -> f64 {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0.0;
        }
        len as f64 / rate as f64
    }
}

/// Outcome of probing the stream's leading bytes for a format sub-chunk.
///
/// A miss is a soft failure, not an error: the session proceeds with the
/// fallback format and the caller logs a warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatProbe {
    /// The `fmt ` sub-chunk was found and parsed.
    Parsed(AudioFormat),
    /// No usable `fmt ` sub-chunk in the provided bytes; carries the default.
    Fallback(AudioFormat),
}

impl FormatProbe {
    /// The format the session should use, parsed or fallback.
    pub fn format(&self) -> AudioFormat {
        match self {
            FormatProbe::Parsed(f) | FormatProbe::Fallback(f) => *f,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, FormatProbe::Fallback(_))
    }
}

/// Probe the first bytes of the stream for the `fmt ` sub-chunk.
///
/// Scans sub-chunks sequentially from offset 12 (past the outer container
/// markers). Runs once per session, on the first non-empty chunk; a
/// truncated first chunk yields a deterministic fallback rather than an
/// error.
pub fn probe_format(bytes: &[u8]) -> FormatProbe {
    let mut offset = SUBCHUNK_START;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;

        if id == b"fmt " {
            let body = offset + 8;
            if body + FMT_BODY_LEN > bytes.len() {
                break;
            }
            let channels = u16::from_le_bytes([bytes[body + 2], bytes[body + 3]]);
            let sample_rate = u32::from_le_bytes([
                bytes[body + 4],
                bytes[body + 5],
                bytes[body + 6],
                bytes[body + 7],
            ]);
            let bits_per_sample = u16::from_le_bytes([bytes[body + 14], bytes[body + 15]]);

            if channels == 0 || sample_rate == 0 || bits_per_sample < 8 {
                break;
            }
            return FormatProbe::Parsed(AudioFormat {
                sample_rate,
                channels,
                bytes_per_sample: bits_per_sample / 8,
            });
        }

        offset += 8 + size;
    }

    FormatProbe::Fallback(AudioFormat::default())
}

/// Synthesize a minimal valid WAV header for a raw PCM payload.
///
/// RIFF size is `36 + payload_len`, the format sub-chunk is populated from
/// `format`, and the data sub-chunk size equals the payload length.
pub fn synthesize_header(format: &AudioFormat, payload_len: usize) -> [u8; HEADER_LEN] {
    let bits_per_sample = format.bytes_per_sample * 8;
    let block_align = format.channels * format.bytes_per_sample;
    let byte_rate = format.bytes_per_second();

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + payload_len as u32).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&(FMT_BODY_LEN as u32).to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&(payload_len as u32).to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_parses_canonical_header() {
        let format = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            bytes_per_sample: 2,
        };
        let header = synthesize_header(&format, 9600);

        let probe = probe_format(&header);
        assert!(!probe.is_fallback());
        assert_eq!(probe.format(), format);
    }

    #[test]
    fn probe_falls_back_on_truncated_header() {
        let format = AudioFormat::default();
        let header = synthesize_header(&format, 9600);

        // A 20-byte first read cuts the fmt body short.
        let probe = probe_format(&header[..20]);
        assert!(probe.is_fallback());
        assert_eq!(probe.format(), AudioFormat::default());
    }

    #[test]
    fn probe_falls_back_on_empty_and_tiny_input() {
        assert!(probe_format(&[]).is_fallback());
        assert!(probe_format(b"RIFF").is_fallback());
    }

    #[test]
    fn probe_skips_leading_foreign_subchunks() {
        let format = AudioFormat {
            sample_rate: 22_050,
            channels: 1,
            bytes_per_sample: 2,
        };
        let canonical = synthesize_header(&format, 0);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&canonical[..12]);
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(b"info");
        bytes.extend_from_slice(&canonical[12..]);

        let probe = probe_format(&bytes);
        assert_eq!(probe.format(), format);
    }

    #[test]
    fn probe_rejects_degenerate_fmt_values() {
        let mut header = synthesize_header(&AudioFormat::default(), 0);
        header[24..28].copy_from_slice(&0u32.to_le_bytes()); // zero sample rate
        assert!(probe_format(&header).is_fallback());
    }

    #[test]
    fn synthesized_header_sizes_follow_payload() {
        let header = synthesize_header(&AudioFormat::default(), 9600);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 9636);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 9600);
    }

    #[test]
    fn duration_accounts_for_format_geometry() {
        let format = AudioFormat::default();
        // 24 kHz mono s16 => 48000 bytes/s.
        assert_eq!(format.bytes_per_second(), 48_000);
        assert!((format.duration_of(9600) - 0.2).abs() < 1e-12);
        assert_eq!(format.duration_of(0), 0.0);
    }
}
