//! # pcmflow Player Library (pcmflow-play)
//!
//! Real-time PCM playback: sources produce interleaved frames, the
//! negotiator fits a device to the source's format, and the transfer engine
//! keeps the device buffer fed period by period, recovering from underruns
//! and suspends along the way.
//!
//! **Architecture:** one session per thread; WAV read raw, everything else
//! decoded with symphonia; output through cpal or a simulated device.

pub mod config;
pub mod control;
pub mod device;
pub mod engine;
pub mod error;
pub mod player;
pub mod source;
pub mod tone;

pub use control::{PlaybackController, PlaybackFlags};
pub use error::{Error, Result};
pub use player::{PlayRequest, Session};
