//! Playback progress reporting
//!
//! The transfer engine reports once per period. Position is derived from
//! frames handed to the device, not from what the device has audibly played.

use crate::engine::transfer::SessionState;
use pcmflow_common::human_time::format_position;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Snapshot of a session's position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Progress {
    pub frames_transferred: u64,
    /// `None` for streams of unknown length
    pub frames_total: Option<u64>,
    pub sample_rate: u32,
}

impl Progress {
    /// Position in seconds
    pub fn elapsed_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames_transferred as f64 / self.sample_rate as f64
    }

    /// Stream length in seconds, when known
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.frames_total, self.sample_rate) {
            (Some(total), rate) if rate > 0 => Some(total as f64 / rate as f64),
            _ => None,
        }
    }

    /// Fraction complete in `0.0..=1.0`, when the length is known
    pub fn fraction(&self) -> Option<f64> {
        match self.frames_total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.frames_transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_position(self.elapsed_secs(), self.duration_secs()))?;
        if let Some(fraction) = self.fraction() {
            write!(f, " ({:.0}%)", fraction * 100.0)?;
        }
        Ok(())
    }
}

/// Receives session updates from the transfer engine
pub trait ProgressSink {
    /// Called after every period handed to the device
    fn on_period(&mut self, progress: &Progress);

    /// Called on every session state transition
    fn on_state(&mut self, _state: SessionState) {}
}

/// Discards all updates
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_period(&mut self, _progress: &Progress) {}
}

/// Logs position at a fixed playback-time interval
#[derive(Debug)]
pub struct LogProgress {
    interval: Duration,
    next_report_secs: f64,
}

impl LogProgress {
    pub fn new(interval: Duration) -> Self {
        Self { interval, next_report_secs: 0.0 }
    }
}

impl ProgressSink for LogProgress {
    fn on_period(&mut self, progress: &Progress) {
        let elapsed = progress.elapsed_secs();
        if elapsed >= self.next_report_secs {
            info!("Position {}", progress);
            self.next_report_secs = elapsed + self.interval.as_secs_f64();
        }
    }
}

/// Publishes the latest position on a watch channel (GUI position indicator)
#[derive(Debug, Clone)]
pub struct WatchProgress {
    sender: Arc<watch::Sender<Progress>>,
}

impl WatchProgress {
    pub fn new(sender: Arc<watch::Sender<Progress>>) -> Self {
        Self { sender }
    }
}

impl ProgressSink for WatchProgress {
    fn on_period(&mut self, progress: &Progress) {
        self.sender.send_replace(*progress);
    }
}
