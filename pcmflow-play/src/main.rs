//! pcmflow-play - command-line PCM player
//!
//! Plays one file on one device: reads the stream header, negotiates the
//! device to the stream's format, then feeds it period by period until the
//! file ends or Ctrl-C asks playback to stop.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pcmflow_common::human_time::format_human_time;
use pcmflow_common::TransferMode;
use pcmflow_play::config::{ConfigOverrides, Settings};
use pcmflow_play::engine::{LogProgress, NoProgress, ProgressSink, TransferOutcome, TransferSummary};
use pcmflow_play::{device, PlayRequest, PlaybackFlags, Session};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for pcmflow-play
#[derive(Parser, Debug)]
#[command(name = "pcmflow-play")]
#[command(about = "Play a WAV or compressed audio file on a PCM output device")]
#[command(version)]
struct Args {
    /// Audio file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Playback device name ("default", a device name, or "null")
    #[arg(short = 'D', long, env = "PCMFLOW_DEVICE")]
    device: Option<String>,

    /// Verbose output (debug logging and build information)
    #[arg(short, long)]
    verbose: bool,

    /// Fail instead of letting the device resample
    #[arg(short, long)]
    noresample: bool,

    /// Write frames directly into the device buffer
    #[arg(short, long)]
    mmap: bool,

    /// Configuration file (default: <config_dir>/pcmflow/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log the playback position once per second
    #[arg(long)]
    progress: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            device: self.device.clone(),
            transfer: self.mmap.then_some(TransferMode::Direct),
            allow_resample: self.noresample.then_some(false),
            log_level: self.verbose.then(|| "debug".to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("pcmflow-play: {:#}", e);
            let code = e
                .downcast_ref::<pcmflow_play::Error>()
                .map(|err| err.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = Settings::resolve(args.config.as_deref(), &args.overrides())
        .context("Failed to resolve configuration")?;

    // Initialize tracing
    let default_filter = format!(
        "pcmflow_play={level},pcmflow_common={level}",
        level = settings.log_level
    );
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.verbose {
        println!(
            "pcmflow-play {} (git {}, built {}, {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH"),
            env!("BUILD_TIMESTAMP"),
            env!("BUILD_PROFILE")
        );
    }

    if args.list_devices {
        for name in device::list_devices() {
            println!("{}", name);
        }
        return Ok(());
    }

    let Some(path) = args.file else {
        return Err(pcmflow_play::Error::Configuration("no input file given".to_string()).into());
    };

    let flags = Arc::new(PlaybackFlags::new());
    let session_flags = Arc::clone(&flags);
    let show_progress = args.progress;

    // The device handle is created and used on the blocking thread only
    let mut task =
        tokio::task::spawn_blocking(move || play_file(&path, &settings, &session_flags, show_progress));

    let joined = tokio::select! {
        joined = &mut task => joined,
        Ok(()) = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping playback");
            flags.request_stop();
            task.await
        }
    };
    let summary = joined.context("Playback thread panicked")??;
    print_summary(&summary);
    Ok(())
}

/// Open, report and play one file. Runs on a blocking thread.
fn play_file(
    path: &Path,
    settings: &Settings,
    flags: &PlaybackFlags,
    show_progress: bool,
) -> pcmflow_play::Result<TransferSummary> {
    let request = PlayRequest::from_settings(path, settings);
    let session = Session::open(&request)?;
    print_session(path, &session);

    let mut sink: Box<dyn ProgressSink> = if show_progress {
        Box::new(LogProgress::new(Duration::from_secs(1)))
    } else {
        Box::new(NoProgress)
    };
    session.run(flags, sink.as_mut())
}

fn print_session(path: &Path, session: &Session) {
    let source = session.source();
    let format = source.format();
    let config = session.config();

    println!("File:       {}", path.display());
    println!("Source:     {}", source.describe());
    println!("Rate:       {} Hz", format.sample_rate);
    println!("Channels:   {}", format.channels);
    println!("Container:  {}", format.sample_format);
    match source.total_frames() {
        Some(frames) => {
            let secs = format.frames_to_secs(frames);
            println!("Duration:   {} ({} frames)", format_human_time(secs, secs), frames);
        }
        None => println!("Duration:   unknown"),
    }
    println!("Device:     {}", session.device_name());
    println!("Transfer:   {}", config.transfer);
    println!(
        "Buffer:     {} frames, period {} frames ({} periods)",
        config.buffer_frames,
        config.period_frames,
        config.periods()
    );
    if config.resample_allowed {
        println!("Resampling: allowed");
    }
}

fn print_summary(summary: &TransferSummary) {
    match summary.outcome {
        TransferOutcome::Completed => println!("Played {} frames", summary.frames_transferred),
        TransferOutcome::Cancelled => println!("Stopped after {} frames", summary.frames_transferred),
    }
    if summary.recoveries > 0 || summary.frames_lost > 0 {
        println!(
            "Recovered {} device faults, {} frames lost",
            summary.recoveries, summary.frames_lost
        );
    }
}
