//! PCM stream format description
//!
//! A [`StreamFormat`] is fixed before a playback device is opened and never
//! changes for the lifetime of a stream. Frame size is derived from it, so
//! every buffer in the pipeline agrees on how many bytes one frame occupies.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample container format (signed, little-endian, interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 16-bit signed little-endian
    S16Le,
    /// 24-bit signed little-endian packed in 3 bytes
    S24Le3,
    /// 32-bit signed little-endian
    S32Le,
}

impl SampleFormat {
    /// Every container the engine can move
    pub const ALL: [SampleFormat; 3] = [SampleFormat::S16Le, SampleFormat::S24Le3, SampleFormat::S32Le];

    /// Select the container for a bit depth.
    ///
    /// Only 16, 24 and 32 bits per sample are supported.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(SampleFormat::S16Le),
            24 => Some(SampleFormat::S24Le3),
            32 => Some(SampleFormat::S32Le),
            _ => None,
        }
    }

    /// Bits per sample in this container
    pub fn bits(self) -> u16 {
        match self {
            SampleFormat::S16Le => 16,
            SampleFormat::S24Le3 => 24,
            SampleFormat::S32Le => 32,
        }
    }

    /// Bytes per sample in this container
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Read one sample and return it left-justified in an `i32`.
    ///
    /// `bytes` must hold at least [`SampleFormat::bytes`] bytes.
    pub fn read_sample(self, bytes: &[u8]) -> i32 {
        match self {
            SampleFormat::S16Le => (i16::from_le_bytes([bytes[0], bytes[1]]) as i32) << 16,
            SampleFormat::S24Le3 => {
                ((bytes[0] as i32) << 8) | ((bytes[1] as i32) << 16) | ((bytes[2] as i8 as i32) << 24)
            }
            SampleFormat::S32Le => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Write a left-justified `i32` sample into this container.
    ///
    /// Low-order bits that do not fit the container are truncated.
    pub fn write_sample(self, value: i32, out: &mut [u8]) {
        match self {
            SampleFormat::S16Le => out[..2].copy_from_slice(&((value >> 16) as i16).to_le_bytes()),
            SampleFormat::S24Le3 => {
                let le = value.to_le_bytes();
                out[..3].copy_from_slice(&le[1..4]);
            }
            SampleFormat::S32Le => out[..4].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::S16Le => write!(f, "S16_LE"),
            SampleFormat::S24Le3 => write!(f, "S24_3LE"),
            SampleFormat::S32Le => write!(f, "S32_LE"),
        }
    }
}

/// Sample layout in a transfer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccessMode {
    /// Frames of N channels, one sample per channel, back to back
    #[default]
    Interleaved,
}

/// How frames are handed to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Zero-copy: the source fills a window of device-owned memory
    Direct,
    /// Copy-based: a caller buffer is written to the device
    #[default]
    ReadWrite,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Direct => write!(f, "mmap_direct"),
            TransferMode::ReadWrite => write!(f, "write"),
        }
    }
}

/// Format of one PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Frames per second (Hz)
    pub sample_rate: u32,
    /// Samples per frame
    pub channels: u16,
    /// Sample container
    pub sample_format: SampleFormat,
    /// Buffer layout
    pub access: AccessMode,
}

impl StreamFormat {
    /// Build a validated interleaved stream format.
    ///
    /// # Errors
    /// - `sample_rate` is zero
    /// - `channels` is zero
    /// - `bits_per_sample` is not one of 16, 24, 32
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidInput("sample rate must be non-zero".to_string()));
        }
        if channels == 0 {
            return Err(Error::InvalidInput("channel count must be at least 1".to_string()));
        }
        let sample_format = SampleFormat::from_bits(bits_per_sample).ok_or_else(|| {
            Error::InvalidInput(format!(
                "unsupported bits per sample: {} (expected 16, 24 or 32)",
                bits_per_sample
            ))
        })?;

        Ok(Self {
            sample_rate,
            channels,
            sample_format,
            access: AccessMode::Interleaved,
        })
    }

    /// Bits per sample
    pub fn bits_per_sample(&self) -> u16 {
        self.sample_format.bits()
    }

    /// Bytes per frame: `channels * bits_per_sample / 8`
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_format.bytes()
    }

    /// Playback duration of `frames` frames in seconds
    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}",
            self.sample_rate, self.channels, self.sample_format
        )
    }
}
