//! Output device discovery and selection.
//!
//! Thin CPAL wrappers: list devices for the CLI, pick one by substring, and
//! negotiate an output config close to the speech stream's sample rate.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle`
/// (case-insensitive), or the host default when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let needle = needle.map(str::trim).filter(|n| !n.is_empty());

    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    let wanted = needle.to_lowercase();
    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|desc| desc.name().to_lowercase().contains(&wanted))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose an output config for a speech stream at `source_rate`.
///
/// Preference order: a range containing the source rate exactly, then the
/// lowest supported rate above it, then the highest rate below it. Ties
/// break toward friendlier sample formats (f32, then i16).
pub fn pick_output_config(
    device: &cpal::Device,
    source_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(u64, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), source_rate);
        let score = config_score(rate, source_rate, format_rank(range.sample_format()));
        let cfg = range.with_sample_rate(rate);
        if best.as_ref().map(|(s, _)| score < *s).unwrap_or(true) {
            best = Some((score, cfg));
        }
    }

    Ok(best.unwrap().1)
}

/// Prefer a large fixed callback buffer to resist underruns; `None` keeps
/// the device default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let frames = (*max).min(MAX_FRAMES).max(*min);
            Some(cpal::BufferSize::Fixed(frames))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout (CLI `--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

/// List devices on the default host without the caller touching CPAL.
pub fn list_output_devices() -> Result<()> {
    list_devices(&cpal::default_host())
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max)
}

/// Lower is better: exact rate match first, then nearest rate above the
/// source, then nearest below; sample format rank breaks ties.
fn config_score(rate: u32, source_rate: u32, format_rank: u64) -> u64 {
    let rate_score = if rate == source_rate {
        0
    } else if rate > source_rate {
        1_000 + (rate - source_rate) as u64
    } else {
        1_000_000_000 + (source_rate - rate) as u64
    };
    rate_score * 10 + format_rank
}

fn format_rank(format: cpal::SampleFormat) -> u64 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 9,
    }
}
