//! Chunk decode stage.
//!
//! Wraps each forwarded raw-PCM byte range in a synthesized WAV header and
//! runs it through Symphonia, producing a self-contained buffer of
//! interleaved `f32` samples. Each chunk decodes independently; a failure
//! drops that chunk only and is reported to the recovery controller.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::PlayerError;
use crate::header::{self, AudioFormat};

/// One decoded chunk, ready for the playback queue.
///
/// Produced by a [`ChunkDecoder`], consumed exactly once by the scheduler.
#[derive(Clone, Debug)]
pub struct DecodedChunk {
    /// Interleaved `f32` samples.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Playback duration in seconds.
    pub duration: f64,
}

impl DecodedChunk {
    /// Number of sample frames in this chunk.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Decode seam between the session loop and the platform decoder.
///
/// The production implementation is [`WavChunkDecoder`]; tests substitute
/// failure-injecting decoders to exercise the recovery path.
pub trait ChunkDecoder: Send {
    fn decode(&mut self, format: &AudioFormat, payload: &[u8]) -> Result<DecodedChunk, PlayerError>;
}

/// Symphonia-backed decoder for header-wrapped PCM chunks.
#[derive(Debug, Default)]
pub struct WavChunkDecoder;

impl ChunkDecoder for WavChunkDecoder {
    fn decode(&mut self, format: &AudioFormat, payload: &[u8]) -> Result<DecodedChunk, PlayerError> {
        decode_wav_chunk(format, payload)
    }
}

/// In-memory byte buffer exposed to Symphonia as a seekable source.
struct MemorySource {
    cursor: Cursor<Vec<u8>>,
}

impl Read for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemorySource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl MediaSource for MemorySource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.cursor.get_ref().len() as u64)
    }
}

/// Decode one raw PCM chunk by prepending a synthesized header.
///
/// The header advertises exactly `payload.len()` bytes of data, so the
/// probe sees a complete, self-consistent WAV file.
pub fn decode_wav_chunk(
    format: &AudioFormat,
    payload: &[u8],
) -> Result<DecodedChunk, PlayerError> {
    if format.channels == 0 || format.sample_rate == 0 || format.bytes_per_sample == 0 {
        return Err(PlayerError::Decode("degenerate stream format".to_string()));
    }

    let header = header::synthesize_header(format, payload.len());
    let mut wrapped = Vec::with_capacity(header.len() + payload.len());
    wrapped.extend_from_slice(&header);
    wrapped.extend_from_slice(payload);

    let source = MemorySource {
        cursor: Cursor::new(wrapped),
    };
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("wav");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlayerError::Decode(format!("probe failed: {e}")))?;

    let mut reader = probed.format;
    let track = reader
        .default_track()
        .ok_or_else(|| PlayerError::Decode("no default audio track".to_string()))?;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| PlayerError::Decode(format!("decoder init failed: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| PlayerError::Decode(format!("packet decode failed: {e}")))?;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let frames = samples.len() / format.channels as usize;
    let duration = frames as f64 / format.sample_rate as f64;

    Ok(DecodedChunk {
        samples,
        channels: format.channels,
        sample_rate: format.sample_rate,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16-bit little-endian payload from sample values.
    fn pcm_s16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_mono_s16_chunk() {
        let format = AudioFormat::default();
        let payload = pcm_s16(&[0, 16_384, -16_384, 32_767]);

        let chunk = decode_wav_chunk(&format, &payload).unwrap();
        assert_eq!(chunk.frames(), 4);
        assert_eq!(chunk.channels, 1);
        assert_eq!(chunk.sample_rate, 24_000);
        assert!((chunk.duration - 4.0 / 24_000.0).abs() < 1e-12);

        assert!(chunk.samples[0].abs() < 1e-6);
        assert!((chunk.samples[1] - 0.5).abs() < 1e-3);
        assert!((chunk.samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn decodes_stereo_chunk_duration() {
        let format = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            bytes_per_sample: 2,
        };
        // 4800 frames of silence, 0.1 s at 48 kHz.
        let payload = vec![0u8; 4800 * 2 * 2];

        let chunk = decode_wav_chunk(&format, &payload).unwrap();
        assert_eq!(chunk.frames(), 4800);
        assert!((chunk.duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn degenerate_format_is_a_decode_error() {
        let format = AudioFormat {
            sample_rate: 24_000,
            channels: 1,
            bytes_per_sample: 0,
        };
        assert!(decode_wav_chunk(&format, &[0u8; 64]).is_err());
    }

    #[test]
    fn nine_kilobyte_chunk_is_a_fifth_of_a_second() {
        let format = AudioFormat::default();
        let chunk = decode_wav_chunk(&format, &vec![0u8; 9600]).unwrap();
        assert!((chunk.duration - 0.2).abs() < 1e-9);
    }
}
