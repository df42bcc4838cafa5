//! Output sink abstraction and its CPAL implementation.
//!
//! The scheduler owns a sink, submits decoded chunks to it, and receives an
//! explicit [`SinkEvent::ChunkFinished`] once a chunk has been consumed by
//! the output callback. [`CpalSink`] feeds a non-blocking sample FIFO
//! drained by the device callback, resampling to the negotiated device rate
//! when needed, and runs the stop fade-out inside the callback itself so the
//! ramp applies to whatever is currently audible.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::decode::DecodedChunk;
use crate::device;
use crate::resample::ChunkResampler;

/// Completion signals emitted by a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    /// The earliest still-pending submitted chunk has fully played.
    ChunkFinished,
}

/// Playback output seam consumed by the scheduler.
///
/// Implementations are created on the scheduler thread via a
/// [`SinkFactory`], so they do not need to be `Send` (CPAL streams are not).
pub trait OutputSink {
    /// Open the output for a stream with the given spec. Called once,
    /// before the first submit.
    fn begin(&mut self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Queue one decoded chunk for playback. A `ChunkFinished` event is
    /// emitted when it has been consumed.
    fn submit(&mut self, chunk: DecodedChunk) -> Result<()>;

    /// Ramp gain to zero over `fade_out` (zero means drain briefly instead)
    /// and release the output resources. Idempotent.
    fn finish(&mut self, fade_out: Duration);
}

/// Constructor invoked on the scheduler thread to build the session's sink.
pub type SinkFactory = Box<dyn FnOnce(Sender<SinkEvent>) -> Result<Box<dyn OutputSink>> + Send>;

/// State shared between the sink handle and the device callback.
struct SinkShared {
    fifo: Mutex<FifoInner>,
    /// Fade-out length in device frames; zero means no fade in progress.
    fade_len: AtomicU64,
    fade_pos: AtomicU64,
    /// Set once a fade has fully run out; the callback then emits silence
    /// without consuming the FIFO.
    silenced: AtomicBool,
}

struct FifoInner {
    /// Interleaved samples at the device rate, still in source channel layout.
    samples: VecDeque<f32>,
    /// Remaining sample counts of submitted chunks, oldest first.
    boundaries: VecDeque<u64>,
    src_channels: usize,
}

impl SinkShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fifo: Mutex::new(FifoInner {
                samples: VecDeque::new(),
                boundaries: VecDeque::new(),
                src_channels: 1,
            }),
            fade_len: AtomicU64::new(0),
            fade_pos: AtomicU64::new(0),
            silenced: AtomicBool::new(false),
        })
    }
}

/// CPAL-backed output sink.
pub struct CpalSink {
    events: Sender<SinkEvent>,
    device_needle: Option<String>,
    shared: Arc<SinkShared>,
    stream: Option<cpal::Stream>,
    resampler: Option<ChunkResampler>,
    out_rate: u32,
}

impl CpalSink {
    pub fn new(device_needle: Option<String>, events: Sender<SinkEvent>) -> Self {
        Self {
            events,
            device_needle,
            shared: SinkShared::new(),
            stream: None,
            resampler: None,
            out_rate: 0,
        }
    }

    fn push_samples(&self, samples: &[f32], with_boundary: bool) {
        let mut g = self.shared.fifo.lock().unwrap();
        g.samples.extend(samples.iter().copied());
        if with_boundary {
            g.boundaries.push_back(samples.len() as u64);
        }
    }
}

impl OutputSink for CpalSink {
    fn begin(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        let host = cpal::default_host();
        let dev = device::pick_device(&host, self.device_needle.as_deref())?;
        let supported = device::pick_output_config(&dev, sample_rate)?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        if let Some(buf) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = buf;
        }
        self.out_rate = stream_config.sample_rate;

        {
            let mut g = self.shared.fifo.lock().unwrap();
            g.src_channels = channels.max(1) as usize;
        }

        if self.out_rate != sample_rate {
            self.resampler = Some(ChunkResampler::new(
                sample_rate,
                self.out_rate,
                channels.max(1) as usize,
            )?);
            tracing::info!(
                from_hz = sample_rate,
                to_hz = self.out_rate,
                "resampling speech stream to device rate"
            );
        }

        let stream = build_output_stream(
            &dev,
            &stream_config,
            supported.sample_format(),
            &self.shared,
            self.events.clone(),
        )?;
        stream.play()?;
        self.stream = Some(stream);

        tracing::info!(
            device = %dev.description()?,
            rate_hz = self.out_rate,
            channels = channels,
            "output sink started"
        );
        Ok(())
    }

    fn submit(&mut self, chunk: DecodedChunk) -> Result<()> {
        let samples = match &mut self.resampler {
            Some(rs) => rs.process(&chunk.samples)?,
            None => chunk.samples,
        };

        if samples.is_empty() {
            // The resampler carried the whole chunk; nothing audible is
            // attributable to it yet, so complete it right away.
            let _ = self.events.send(SinkEvent::ChunkFinished);
            return Ok(());
        }

        self.push_samples(&samples, true);
        Ok(())
    }

    fn finish(&mut self, fade_out: Duration) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        if let Some(rs) = &mut self.resampler {
            if let Ok(tail) = rs.flush() {
                if !tail.is_empty() {
                    self.push_samples(&tail, false);
                }
            }
        }

        if fade_out.is_zero() {
            // Natural end: give the device time to drain what it buffered.
            std::thread::sleep(Duration::from_millis(300));
        } else {
            let frames = (self.out_rate as u64).saturating_mul(fade_out.as_millis() as u64) / 1000;
            self.shared.fade_pos.store(0, Ordering::Relaxed);
            self.shared.fade_len.store(frames.max(1), Ordering::Relaxed);
            std::thread::sleep(fade_out + Duration::from_millis(50));
        }

        drop(stream);
        let mut g = self.shared.fifo.lock().unwrap();
        g.samples.clear();
        g.boundaries.clear();
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: &Arc<SinkShared>,
    events: Sender<SinkEvent>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared, events),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared, events),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared, events),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared, events),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<SinkShared>,
    events: Sender<SinkEvent>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let shared_cb = shared.clone();
    let err_fn = |err| tracing::warn!("output stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            fill_output(&shared_cb, &events, data, channels_out);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Device callback body: pop source frames, map channels, apply the fade
/// gain, and emit completion events at chunk boundaries.
///
/// Never blocks beyond the FIFO mutex; underruns are filled with silence.
fn fill_output<T>(
    shared: &SinkShared,
    events: &Sender<SinkEvent>,
    data: &mut [T],
    channels_out: usize,
) where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let silence = T::from_sample::<f32>(0.0);
    if shared.silenced.load(Ordering::Relaxed) {
        data.fill(silence);
        return;
    }

    let mut g = shared.fifo.lock().unwrap();
    let src_channels = g.src_channels.max(1);
    let frames = data.len() / channels_out;

    for frame in 0..frames {
        let Some(gain) = next_gain(shared) else {
            shared.silenced.store(true, Ordering::Relaxed);
            for value in data[frame * channels_out..].iter_mut() {
                *value = silence;
            }
            return;
        };

        if g.samples.len() < src_channels {
            for ch in 0..channels_out {
                data[frame * channels_out + ch] = silence;
            }
            continue;
        }

        // Pop one source frame and fold it down to at most two lanes.
        let mut first = 0.0f32;
        let mut second = 0.0f32;
        let mut sum = 0.0f32;
        for ch in 0..src_channels {
            let s = g.samples.pop_front().unwrap_or(0.0);
            if ch == 0 {
                first = s;
            }
            if ch == 1 {
                second = s;
            }
            sum += s;
        }

        for ch in 0..channels_out {
            let value = map_sample(src_channels, channels_out, ch, first, second, sum) * gain;
            data[frame * channels_out + ch] = T::from_sample::<f32>(value);
        }

        if let Some(remaining) = g.boundaries.front_mut() {
            *remaining = remaining.saturating_sub(src_channels as u64);
            if *remaining == 0 {
                g.boundaries.pop_front();
                let _ = events.send(SinkEvent::ChunkFinished);
            }
        }
    }
}

/// Current gain step of the fade-out ramp; `None` once fully faded.
fn next_gain(shared: &SinkShared) -> Option<f32> {
    let len = shared.fade_len.load(Ordering::Relaxed);
    if len == 0 {
        return Some(1.0);
    }
    let pos = shared.fade_pos.fetch_add(1, Ordering::Relaxed);
    if pos >= len {
        None
    } else {
        Some(1.0 - pos as f32 / len as f32)
    }
}

/// Channel mapping: mono fans out, stereo averages down to mono, anything
/// wider folds to its average.
fn map_sample(
    src_channels: usize,
    dst_channels: usize,
    dst_ch: usize,
    first: f32,
    second: f32,
    sum: f32,
) -> f32 {
    match (src_channels, dst_channels) {
        (1, _) => first,
        (2, 1) => 0.5 * (first + second),
        (2, _) => {
            if dst_ch == 0 {
                first
            } else {
                second
            }
        }
        (n, _) => sum / n as f32,
    }
}
