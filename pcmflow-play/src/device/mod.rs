//! Playback device boundary
//!
//! A [`PcmDevice`] models a PCM playback device with the lifecycle
//! `Open → Setup → Prepared → Running`, plus the fault states `Xrun`
//! (buffer underrun) and `Suspended`. The negotiator narrows the device's
//! [`HwCapabilities`] down to one configuration and commits it with
//! [`PcmDevice::apply_hw_params`]; the transfer engine then moves frames
//! either by copy ([`PcmDevice::write_interleaved`]) or through a zero-copy
//! window ([`PcmDevice::mmap_begin`] / [`PcmDevice::mmap_region`] /
//! [`PcmDevice::mmap_commit`]).
//!
//! Backends:
//! - [`output::CpalDevice`]: real output hardware via cpal
//! - [`simulated::SimulatedDevice`]: in-memory device with fault injection
//!   (device name `null`)

pub mod output;
pub mod simulated;

use crate::error::{Error, Result};
use pcmflow_common::{SampleFormat, StreamFormat, TransferMode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use self::output::CpalDevice;
pub use self::simulated::{FaultPlan, SimulatedDevice, SimulatedProbe};

/// Device name selecting the simulated (silent) backend
pub const NULL_DEVICE_NAME: &str = "null";

/// Device-reported fault
///
/// `Underrun` is the condition a C PCM API reports as a negative
/// available-frames count.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Output buffer ran dry while running
    #[error("buffer underrun")]
    Underrun,

    /// Device suspended (e.g. power management)
    #[error("device suspended")]
    Suspended,

    /// Operation cannot complete yet, retry later
    #[error("resource temporarily unavailable")]
    Again,

    /// Operation not valid in the current device state
    #[error("invalid device state: {0}")]
    BadState(String),

    /// Parameter outside what the device accepts
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

/// PCM device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Opened, no hardware parameters yet
    Open,
    /// Hardware parameters set, not prepared (after drop/drain)
    Setup,
    /// Ready to start
    Prepared,
    /// Consuming frames
    Running,
    /// Stopped by an underrun, needs prepare
    Xrun,
    /// Suspended, needs resume or prepare
    Suspended,
    /// Playing out remaining frames before stopping
    Draining,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Open => "open",
            DeviceState::Setup => "setup",
            DeviceState::Prepared => "prepared",
            DeviceState::Running => "running",
            DeviceState::Xrun => "xrun",
            DeviceState::Suspended => "suspended",
            DeviceState::Draining => "draining",
        };
        write!(f, "{}", name)
    }
}

/// Inclusive sample rate range; a discrete rate has `min == max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRange {
    pub min: u32,
    pub max: u32,
}

impl RateRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min: min.min(max), max: min.max(max) }
    }

    pub fn discrete(rate: u32) -> Self {
        Self { min: rate, max: rate }
    }

    pub fn contains(&self, rate: u32) -> bool {
        rate >= self.min && rate <= self.max
    }
}

/// Everything a device can do, before any narrowing
#[derive(Debug, Clone, PartialEq)]
pub struct HwCapabilities {
    pub transfer_modes: Vec<TransferMode>,
    pub sample_formats: Vec<SampleFormat>,
    /// Channel counts the device opens with, ascending
    pub channels: Vec<u16>,
    pub rates: Vec<RateRange>,
    /// Device can convert any requested rate to its native one
    pub can_resample: bool,
    pub max_buffer_time: Duration,
}

impl HwCapabilities {
    pub fn supports_channels(&self, channels: u16) -> bool {
        self.channels.contains(&channels)
    }

    /// Nearest supported rate to `requested`, or `None` when no rate is supported.
    ///
    /// Ties resolve to the lower rate.
    pub fn nearest_rate(&self, requested: u32) -> Option<u32> {
        self.rates
            .iter()
            .map(|range| requested.clamp(range.min, range.max))
            .min_by_key(|&candidate| (candidate.abs_diff(requested), candidate))
    }
}

/// Hardware configuration to commit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HwParams {
    pub format: StreamFormat,
    pub transfer: TransferMode,
    /// Device-side resampling enabled
    pub resample: bool,
    pub buffer_time: Duration,
    pub period_time: Duration,
}

/// Buffer geometry the device actually chose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwSizes {
    pub buffer_frames: usize,
    pub period_frames: usize,
}

/// Software thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwParams {
    /// Queued frames at which a prepared device starts by itself
    pub start_threshold: usize,
    /// Free frames at which the device reports readiness
    pub avail_min: usize,
}

/// Token for one zero-copy window of device memory.
///
/// Obtained from [`PcmDevice::mmap_begin`] and consumed by
/// [`PcmDevice::mmap_commit`]. The memory itself is only reachable through
/// [`PcmDevice::mmap_region`], whose borrow ends before `mmap_commit` can be
/// called, so the window cannot be retained past its commit.
#[must_use = "a window must be committed, even with zero frames"]
#[derive(Debug, PartialEq, Eq)]
pub struct MmapArea {
    offset: usize,
    frames: usize,
    frame_bytes: usize,
}

impl MmapArea {
    pub(crate) fn new(offset: usize, frames: usize, frame_bytes: usize) -> Self {
        Self { offset, frames, frame_bytes }
    }

    /// Offset of the window in the device buffer (frames)
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Granted window size (frames)
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Granted window size (bytes)
    pub fn len_bytes(&self) -> usize {
        self.frames * self.frame_bytes
    }
}

/// PCM playback device
///
/// Frame counts are in frames of the committed [`StreamFormat`]; byte
/// buffers hold interleaved samples in that format's container.
pub trait PcmDevice {
    /// Device name as opened
    fn name(&self) -> &str;

    /// Full configuration space of the device
    fn capabilities(&self) -> std::result::Result<HwCapabilities, DeviceError>;

    /// Commit hardware parameters; the device becomes `Prepared`.
    fn apply_hw_params(&mut self, params: &HwParams) -> std::result::Result<HwSizes, DeviceError>;

    /// Commit software thresholds.
    fn apply_sw_params(&mut self, params: &SwParams) -> std::result::Result<(), DeviceError>;

    /// Current state
    fn state(&self) -> DeviceState;

    /// Frames that can be queued without blocking.
    ///
    /// `Err(Underrun)` / `Err(Suspended)` report a fault needing recovery.
    fn avail(&mut self) -> std::result::Result<usize, DeviceError>;

    /// Explicitly start a prepared device.
    fn start(&mut self) -> std::result::Result<(), DeviceError>;

    /// Block until at least `avail_min` frames are free.
    ///
    /// `None` waits indefinitely. Returns `Ok(false)` on timeout or when the
    /// device is not running (nothing would free space).
    fn wait(&mut self, timeout: Option<Duration>) -> std::result::Result<bool, DeviceError>;

    /// Copy-based transfer of whole frames from `data`.
    ///
    /// Returns the number of frames queued, which may be fewer than offered.
    fn write_interleaved(&mut self, data: &[u8]) -> std::result::Result<usize, DeviceError>;

    /// Acquire a directly addressed window of at most `frames` frames.
    fn mmap_begin(&mut self, frames: usize) -> std::result::Result<MmapArea, DeviceError>;

    /// Device memory behind `area`
    fn mmap_region(&mut self, area: &MmapArea) -> &mut [u8];

    /// Commit the first `frames` frames of `area`, returning frames queued.
    fn mmap_commit(&mut self, area: MmapArea, frames: usize) -> std::result::Result<usize, DeviceError>;

    /// Discard queued frames and return to `Prepared`.
    fn prepare(&mut self) -> std::result::Result<(), DeviceError>;

    /// Resume a suspended device; `Err(Again)` while it is not ready yet.
    fn resume(&mut self) -> std::result::Result<(), DeviceError>;

    /// Play out queued frames, then stop (`Setup`).
    fn drain(&mut self) -> std::result::Result<(), DeviceError>;

    /// Stop immediately, discarding queued frames (`Setup`).
    fn drop_pending(&mut self) -> std::result::Result<(), DeviceError>;
}

/// Open a playback device by name.
///
/// `"null"` selects the simulated device paced in real time; any other
/// name (including `"default"`) is looked up through cpal.
pub fn open(name: &str) -> Result<Box<dyn PcmDevice>> {
    debug!("Opening playback device '{}'", name);
    if name == NULL_DEVICE_NAME {
        return Ok(Box::new(SimulatedDevice::realtime(NULL_DEVICE_NAME)));
    }
    let device = CpalDevice::open(name).map_err(|e| Error::DeviceOpen(format!("{}: {}", name, e)))?;
    Ok(Box::new(device))
}

/// List available output device names.
///
/// The `null` device is always last; a host that cannot enumerate its
/// devices contributes nothing.
pub fn list_devices() -> Vec<String> {
    let mut names = CpalDevice::list_devices().unwrap_or_else(|e| {
        warn!("Cannot enumerate output devices: {}", e);
        Vec::new()
    });
    names.push(NULL_DEVICE_NAME.to_string());
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with_rates(rates: Vec<RateRange>) -> HwCapabilities {
        HwCapabilities {
            transfer_modes: vec![TransferMode::ReadWrite],
            sample_formats: vec![SampleFormat::S16Le],
            channels: vec![1, 2],
            rates,
            can_resample: false,
            max_buffer_time: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_nearest_rate_inside_range() {
        let caps = caps_with_rates(vec![RateRange::new(8000, 96000)]);
        assert_eq!(caps.nearest_rate(44100), Some(44100));
    }

    #[test]
    fn test_nearest_rate_discrete() {
        let caps = caps_with_rates(vec![RateRange::discrete(48000), RateRange::discrete(96000)]);
        assert_eq!(caps.nearest_rate(44100), Some(48000));
        assert_eq!(caps.nearest_rate(88200), Some(96000));
    }

    #[test]
    fn test_nearest_rate_tie_prefers_lower() {
        let caps = caps_with_rates(vec![RateRange::discrete(40000), RateRange::discrete(50000)]);
        assert_eq!(caps.nearest_rate(45000), Some(40000));
    }

    #[test]
    fn test_nearest_rate_without_rates() {
        let caps = caps_with_rates(Vec::new());
        assert_eq!(caps.nearest_rate(44100), None);
    }

    #[test]
    fn test_null_device_is_listed_last() {
        let names = list_devices();
        assert_eq!(names.last().map(String::as_str), Some(NULL_DEVICE_NAME));
        assert_eq!(names.iter().filter(|n| *n == NULL_DEVICE_NAME).count(), 1);
    }

    #[test]
    fn test_mmap_area_sizes() {
        let area = MmapArea::new(16, 32, 4);
        assert_eq!(area.offset(), 16);
        assert_eq!(area.frames(), 32);
        assert_eq!(area.len_bytes(), 128);
    }
}
