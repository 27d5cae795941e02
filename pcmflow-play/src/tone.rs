//! Test tone generation
//!
//! Writes a stereo pure tone whose amplitude decays exponentially from full
//! scale (0 dB) to -80 dB over its length. Playing one back exercises the
//! whole dynamic range of a device at the chosen depth and rate.

use crate::error::{Error, Result};
use hound::{WavSpec, WavWriter};
use std::f64::consts::PI;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Sample rates the generator accepts
pub const TONE_RATES: RangeInclusive<u32> = 44100..=192000;

/// Bit depths the generator accepts
pub const TONE_BITS: [u16; 3] = [16, 24, 32];

/// Final amplitude relative to full scale (-80 dB)
const END_AMPLITUDE: f64 = 1.0e-4;

/// Parameters of a decaying test tone
#[derive(Debug, Clone, PartialEq)]
pub struct ToneSpec {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub frequency: f64,
    pub duration: Duration,
    pub channels: u16,
}

impl Default for ToneSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bits_per_sample: 16,
            frequency: 1000.0,
            duration: Duration::from_secs(5),
            channels: 2,
        }
    }
}

impl ToneSpec {
    pub fn new(sample_rate: u32, bits_per_sample: u16) -> Result<Self> {
        let spec = Self {
            sample_rate,
            bits_per_sample,
            ..Self::default()
        };
        spec.validate()?;
        Ok(spec)
    }

    /// # Errors
    /// `Configuration` for a rate outside 44100..=192000 Hz or a depth other
    /// than 16, 24 or 32 bits.
    pub fn validate(&self) -> Result<()> {
        if !TONE_RATES.contains(&self.sample_rate) {
            return Err(Error::Configuration(format!(
                "tone rate must be {}..={} Hz (got {})",
                TONE_RATES.start(),
                TONE_RATES.end(),
                self.sample_rate
            )));
        }
        if !TONE_BITS.contains(&self.bits_per_sample) {
            return Err(Error::Configuration(format!(
                "tone depth must be 16, 24 or 32 bits (got {})",
                self.bits_per_sample
            )));
        }
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        (self.duration.as_secs_f64() * self.sample_rate as f64) as u64
    }

    /// `tone2_<bits>_<rate>.wav`
    pub fn file_name(&self) -> String {
        format!("tone2_{}_{}.wav", self.bits_per_sample, self.sample_rate)
    }

    /// Sample values (right-justified to the tone's depth), one per frame.
    pub fn samples(&self) -> impl Iterator<Item = i32> {
        let frames = self.frames();
        let step = 2.0 * PI * self.frequency / self.sample_rate as f64;
        let decay = if frames == 0 {
            1.0
        } else {
            END_AMPLITUDE.powf(1.0 / frames as f64)
        };
        let shift = 32 - self.bits_per_sample as u32;

        (0..frames).map(move |n| {
            let amplitude = decay.powf(n as f64);
            let value = amplitude * (step * n as f64).sin();
            ((value * i32::MAX as f64) as i32) >> shift
        })
    }

    /// Write the tone into `dir`.
    ///
    /// # Returns
    /// Path of the written file
    ///
    /// # Errors
    /// - `Configuration`: invalid rate or depth
    /// - `Io`: the file cannot be created or written
    pub fn write_wav(&self, dir: &Path) -> Result<PathBuf> {
        self.validate()?;
        let path = dir.join(self.file_name());
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = WavWriter::create(&path, spec).map_err(wav_error)?;
        for sample in self.samples() {
            for _ in 0..self.channels {
                writer.write_sample(sample).map_err(wav_error)?;
            }
        }
        writer.finalize().map_err(wav_error)?;

        info!("Wrote {} frames to {}", self.frames(), path.display());
        Ok(path)
    }
}

fn wav_error(err: hound::Error) -> Error {
    match err {
        hound::Error::IoError(e) => Error::Io(e),
        other => Error::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}
