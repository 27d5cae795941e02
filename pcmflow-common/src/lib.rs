//! # pcmflow Common Library
//!
//! Shared code for the pcmflow crates including:
//! - Stream format description (sample container, channel count, rate)
//! - Configuration file loading
//! - Human-readable time formatting
//! - Common error type

pub mod config;
pub mod error;
pub mod format;
pub mod human_time;

pub use error::{Error, Result};
pub use format::{AccessMode, SampleFormat, StreamFormat, TransferMode};
