//! Error types for pcmflow-play
//!
//! Defines the player error taxonomy using thiserror. Each class maps to a
//! distinct process exit code so scripts can tell failures apart.

use crate::device::DeviceError;
use crate::engine::negotiator::NegotiationStep;
use thiserror::Error;

/// Main error type for pcmflow-play
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid command-line arguments or configuration values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Source file could not be opened or its stream info read
    #[error("Cannot open source {path}: {reason}")]
    SourceOpen { path: String, reason: String },

    /// Container header describes something other than linear PCM
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    /// Source failed while producing frames (decode error, truncated stream)
    #[error("Source error: {0}")]
    Source(String),

    /// Device cannot satisfy the requested stream format
    #[error("Negotiation failed at {step}: {reason}")]
    Negotiation { step: NegotiationStep, reason: String },

    /// Playback device could not be opened
    #[error("Cannot open device: {0}")]
    DeviceOpen(String),

    /// Unrecoverable device fault (recovery exhausted or hard error)
    #[error("Device fault: {0}")]
    Device(#[from] DeviceError),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this error class
    ///
    /// | class | code |
    /// |---|---|
    /// | configuration | 2 |
    /// | source open / header | 3 |
    /// | negotiation | 4 |
    /// | device open | 5 |
    /// | transfer (source or device fault) | 6 |
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_) => 2,
            Error::SourceOpen { .. } | Error::FormatMismatch(_) => 3,
            Error::Negotiation { .. } => 4,
            Error::DeviceOpen(_) => 5,
            Error::Source(_) | Error::Device(_) | Error::Io(_) => 6,
        }
    }
}

impl From<pcmflow_common::Error> for Error {
    fn from(err: pcmflow_common::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Convenience Result type using pcmflow-play Error
pub type Result<T> = std::result::Result<T, Error>;
