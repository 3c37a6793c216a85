//! Command-line host for the ingest output.
//!
//! Reads an H.264 Annex B elementary stream, paces it into the output at a
//! fixed frame rate together with a silent audio track, and reports the
//! session counters when the stream ends. Packets go to the in-process
//! loopback ingest, optionally throttled to exercise the drop policy.

mod feed;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamout_encoder::{parse_avc_packet, EncodedPacket, StaticHeader};
use streamout_engine::create_output;
use streamout_ipc::{event_channel, OutputConfig, OutputEvent, StopReason};
use streamout_transport::{LoopbackConfig, LoopbackConnector};

use feed::{AnnexBFeed, AUDIO_FRAME_USEC, SILENT_OPUS_FRAME};

#[derive(Parser, Debug)]
#[command(name = "streamout", version, about)]
struct Cli {
    /// H.264 Annex B elementary stream to send.
    input: PathBuf,

    /// Output configuration (JSON). Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ingest hostname.
    #[arg(long)]
    host: Option<String>,

    /// Stream key.
    #[arg(long)]
    stream_key: Option<String>,

    /// Frame rate of the input stream.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Cap the loopback ingest at this bandwidth.
    #[arg(long)]
    max_kbps: Option<u32>,

    /// Override the drop threshold.
    #[arg(long)]
    drop_threshold_ms: Option<u64>,

    /// How long past the last frame a timed stop keeps draining.
    #[arg(long, default_value_t = 500)]
    drain_ms: u64,

    /// Do not interleave the silent audio track.
    #[arg(long)]
    no_audio: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "streamout=info,streamout_engine=info,streamout_transport=info,streamout::ingest=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<OutputConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            OutputConfig::from_json(&json)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => OutputConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.ingest_host = host.clone();
    }
    if let Some(key) = &cli.stream_key {
        config.stream_key = key.clone();
    }
    if let Some(threshold) = cli.drop_threshold_ms {
        config.drop_threshold_ms = threshold;
    }
    if config.ingest_host.trim().is_empty() {
        config.ingest_host = "127.0.0.1".to_string();
    }

    config.validate()?;
    Ok(config)
}

/// Wait for the first event that `done` accepts.
fn wait_for_event(
    events: &Receiver<OutputEvent>,
    timeout: Duration,
    done: impl Fn(&OutputEvent) -> bool,
) -> Option<OutputEvent> {
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) if done(&event) => return Some(event),
            Ok(event) => debug!(?event, "Output event"),
            Err(_) => break,
        }
    }
    None
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    if cli.fps == 0 {
        bail!("--fps must be at least 1");
    }

    let config = load_config(&cli)?;
    let max_shutdown = Duration::from_secs(config.max_shutdown_time_secs);

    let stream = std::fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let feed = AnnexBFeed::parse(&stream)?;
    info!(
        access_units = feed.access_units.len(),
        fps = cli.fps,
        "Loaded elementary stream"
    );

    let connector = Arc::new(LoopbackConnector::new(LoopbackConfig {
        max_kbps: cli.max_kbps,
        ..Default::default()
    }));
    let (event_tx, events) = event_channel();
    let output = create_output(
        config,
        connector,
        Arc::new(StaticHeader::new(feed.header.clone())),
        event_tx,
    );

    output.start()?;
    match wait_for_event(&events, Duration::from_secs(10), |e| {
        matches!(e, OutputEvent::BeginCapture | OutputEvent::Stopped(_))
    }) {
        Some(OutputEvent::BeginCapture) => info!("Streaming"),
        Some(OutputEvent::Stopped(reason)) => bail!("{}", reason.message()),
        _ => bail!("timed out waiting for the ingest connection"),
    }

    let frame_usec = 1_000_000 / i64::from(cli.fps);
    let started = Instant::now();
    let clock_usec = || started.elapsed().as_micros() as i64;
    let mut audio_dts = 0;
    let mut stopped: Option<StopReason> = None;

    for (index, access_unit) in feed.access_units.iter().enumerate() {
        let dts = index as i64 * frame_usec;

        match parse_avc_packet(access_unit, dts, dts) {
            Ok(packet) => {
                output.submit_packet(packet.with_system_dts(clock_usec()));
            }
            Err(e) => warn!(error = %e, index, "Skipping access unit"),
        }

        while !cli.no_audio && audio_dts <= dts {
            let packet = EncodedPacket::audio(&SILENT_OPUS_FRAME[..], audio_dts)
                .with_system_dts(clock_usec());
            output.submit_packet(packet);
            audio_dts += AUDIO_FRAME_USEC;
        }

        if let Some(reason) = events.try_iter().find_map(|e| e.stop_reason().cloned()) {
            stopped = Some(reason);
            break;
        }

        let next_frame = Duration::from_micros(((index as i64 + 1) * frame_usec) as u64);
        if let Some(wait) = next_frame.checked_sub(started.elapsed()) {
            thread::sleep(wait);
        }
    }

    let reason = match stopped {
        Some(reason) => reason,
        None => {
            let deadline = clock_usec() + (cli.drain_ms as i64) * 1000;
            output.stop(deadline);
            wait_for_event(&events, max_shutdown + Duration::from_secs(5), |e| {
                e.stop_reason().is_some()
            })
            .and_then(|e| e.stop_reason().cloned())
            .context("output did not stop")?
        }
    };

    let stats = output.stats();
    println!("stop reason:    {}", reason.message());
    println!("bytes sent:     {}", stats.bytes_sent);
    println!("frames sent:    {}", stats.frames_sent);
    println!("frames dropped: {}", stats.dropped_frames);
    if let Some(peak) = output.peak_kbps() {
        println!("peak kbps:      {}", peak);
    }

    Ok(())
}
