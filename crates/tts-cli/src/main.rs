//! `tts-cli` — speak a line of text through a streaming synthesis endpoint.
//!
//! Opens one streaming session against the endpoint, plays it on the
//! selected output device, and stops cleanly on Ctrl-C.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use tts_player::config::PlayerConfig;
use tts_player::transport::RequestPacer;
use tts_stream_types::{ChunkSize, SynthesisRequest};

#[derive(Parser, Debug)]
#[command(name = "tts-cli", version)]
struct Args {
    /// Streaming synthesis endpoint, e.g. http://localhost:8700/synthesize/stream
    #[arg(long)]
    endpoint: String,

    /// Text to speak; reads stdin when omitted
    text: Option<String>,

    /// Server-side chunking hint
    #[arg(long, value_enum, default_value_t = ChunkSizeArg::Medium)]
    chunk_size: ChunkSizeArg,

    /// Use a specific output device by substring match
    #[arg(long)]
    device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Buffered audio required before playback starts (seconds)
    #[arg(long, default_value_t = 1.5)]
    pre_buffer_seconds: f64,

    /// Minimum spacing between synthesis requests (ms)
    #[arg(long, default_value_t = 0)]
    min_request_gap_ms: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ChunkSizeArg {
    Small,
    Medium,
    Large,
}

impl From<ChunkSizeArg> for ChunkSize {
    fn from(value: ChunkSizeArg) -> Self {
        match value {
            ChunkSizeArg::Small => ChunkSize::Small,
            ChunkSizeArg::Medium => ChunkSize::Medium,
            ChunkSizeArg::Large => ChunkSize::Large,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.list_devices {
        return tts_player::device::list_output_devices();
    }

    let text = match &args.text {
        Some(text) => text.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read text from stdin")?;
            buf
        }
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        anyhow::bail!("nothing to speak: empty text");
    }

    let request = SynthesisRequest {
        text,
        chunk_size: args.chunk_size.into(),
    };
    let config = PlayerConfig {
        pre_buffer_seconds: args.pre_buffer_seconds,
        ..PlayerConfig::default()
    };

    // Request spacing stays caller-owned; one CLI run is one request, so
    // the pacer only matters when min_request_gap_ms is set by a wrapper.
    let mut pacer = RequestPacer::new();
    pacer.pace(Duration::from_millis(args.min_request_gap_ms));

    let controller = Arc::new(
        tts_player::start_stream(&args.endpoint, &request, config, args.device.clone())
            .context("start streaming session")?,
    );

    let controller_for_signal = controller.clone();
    let _ = ctrlc::set_handler(move || {
        tracing::info!("interrupt received; stopping playback");
        controller_for_signal.stop();
    });

    controller.wait_until_done(None);

    let info = controller.playback_info();
    tracing::info!(
        bytes = info.bytes_received,
        end_reason = ?controller.end_reason(),
        "playback finished"
    );
    Ok(())
}
