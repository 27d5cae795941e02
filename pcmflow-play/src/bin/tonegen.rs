//! pcmflow-tonegen - decaying test tone generator
//!
//! Writes `tone2_<bits>_<rate>.wav`: 5 seconds of a stereo 1 kHz tone
//! falling from 0 dB to -80 dB.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pcmflow_play::tone::ToneSpec;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Wav,
}

/// Command-line arguments for pcmflow-tonegen
#[derive(Parser, Debug)]
#[command(name = "pcmflow-tonegen")]
#[command(about = "Generate a decaying 1 kHz test tone")]
#[command(version)]
struct Args {
    /// Output file format
    #[arg(short, long, value_enum, default_value = "wav")]
    format: OutputFormat,

    /// Sample rate in Hz
    #[arg(short, long, default_value = "44100", value_parser = clap::value_parser!(u32).range(44100..=192000))]
    rate: u32,

    /// Bits per sample
    #[arg(short, long, default_value = "16", value_parser = ["16", "24", "32"])]
    bits: String,

    /// Directory to write the tone into
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcmflow_play=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let bits: u16 = args.bits.parse().context("Invalid bit depth")?;

    let spec = ToneSpec::new(args.rate, bits)?;
    let path = match args.format {
        OutputFormat::Wav => spec.write_wav(&args.output_dir),
    }
    .with_context(|| format!("Failed to write tone into {}", args.output_dir.display()))?;

    println!("Wrote {} frames to {}", spec.frames(), path.display());
    Ok(())
}
