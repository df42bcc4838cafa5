//! Device-rate conversion for decoded speech chunks.
//!
//! Speech streams commonly arrive at 24 kHz while output devices negotiate
//! 44.1/48 kHz, so the sink runs each submitted chunk through a streaming
//! Rubato sinc resampler. Input is carried across calls in full processing
//! blocks to preserve filter continuity; the remainder is flushed once at
//! end of session.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Frames fed to the resampler per processing block.
const BLOCK_FRAMES: usize = 1024;

/// Streaming interleaved `f32` resampler with block carry.
pub(crate) struct ChunkResampler {
    inner: Box<dyn Resampler<f32>>,
    channels: usize,
    /// Input samples waiting for a full processing block.
    pending: Vec<f32>,
    out_buf: Vec<f32>,
}

impl ChunkResampler {
    pub(crate) fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Result<Self> {
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let f_ratio = dst_rate as f64 / src_rate as f64;
        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            BLOCK_FRAMES,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init failed: {e}"))?;

        let out_capacity = ((BLOCK_FRAMES as f64 * f_ratio).ceil() as usize + 32) * channels * 2;
        Ok(Self {
            inner: Box::new(inner),
            channels,
            pending: Vec::new(),
            out_buf: vec![0.0; out_capacity],
        })
    }

    /// Resample as much of `input` as fills whole blocks; the tail is kept
    /// for the next call.
    pub(crate) fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);

        let block_samples = BLOCK_FRAMES * self.channels;
        let mut produced = Vec::new();
        let mut consumed = 0;

        while self.pending.len() - consumed >= block_samples {
            let block = &self.pending[consumed..consumed + block_samples];
            let out = run_block(
                self.inner.as_mut(),
                block,
                BLOCK_FRAMES,
                self.channels,
                &mut self.out_buf,
                None,
            )?;
            produced.extend_from_slice(out);
            consumed += block_samples;
        }

        self.pending.drain(..consumed);
        Ok(produced)
    }

    /// Push the carried remainder through as a final partial block.
    pub(crate) fn flush(&mut self) -> Result<Vec<f32>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames == 0 {
            self.pending.clear();
            return Ok(Vec::new());
        }

        let tail: Vec<f32> = self.pending.drain(..).collect();
        let out = run_block(
            self.inner.as_mut(),
            &tail,
            tail_frames,
            self.channels,
            &mut self.out_buf,
            Some(tail_frames),
        )?;
        Ok(out.to_vec())
    }
}

/// Run one block through the resampler, returning the produced samples.
fn run_block<'a>(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    in_frames: usize,
    channels: usize,
    out_buf: &'a mut Vec<f32>,
    partial_len: Option<usize>,
) -> Result<&'a [f32]> {
    let input_adapter = InterleavedSlice::new(input, channels, in_frames)
        .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;

    let out_capacity_frames = out_buf.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(out_buf, channels, out_capacity_frames)
        .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };

    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| anyhow!("resampler process error: {e}"))?;

    Ok(&out_buf[..nbr_out * channels])
}
