//! Device parameter negotiation
//!
//! Narrows a device's configuration space to exactly one configuration for
//! a stream, in a fixed order: transfer method, sample format, channels,
//! rate, buffer time, period time, hardware commit, software thresholds.
//! The first step the device cannot satisfy ends negotiation; the error
//! names that step.
//!
//! Buffer time is the lesser of the device maximum and 500 ms, and the
//! period is a quarter of it, so playback latency stays bounded while the
//! device still has four periods of slack.

use crate::device::{HwParams, PcmDevice, SwParams};
use crate::error::{Error, Result};
use pcmflow_common::config::{PlayerConfig, MAX_BUFFER_MS_CEILING};
use pcmflow_common::{StreamFormat, TransferMode};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Ceiling on the device buffer duration
pub const MAX_BUFFER_TIME: Duration = Duration::from_millis(MAX_BUFFER_MS_CEILING as u64);

/// Periods per device buffer
pub const PERIODS_PER_BUFFER: u32 = 4;

/// Negotiation step, reported when the device rejects it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    Capabilities,
    Access,
    SampleFormat,
    Channels,
    Rate,
    BufferTime,
    PeriodTime,
    HwCommit,
    SwParams,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStep::Capabilities => "capability query",
            NegotiationStep::Access => "access type",
            NegotiationStep::SampleFormat => "sample format",
            NegotiationStep::Channels => "channel count",
            NegotiationStep::Rate => "sample rate",
            NegotiationStep::BufferTime => "buffer time",
            NegotiationStep::PeriodTime => "period time",
            NegotiationStep::HwCommit => "hardware parameter commit",
            NegotiationStep::SwParams => "software parameters",
        };
        write!(f, "{}", name)
    }
}

/// Caller preferences that shape negotiation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiationHints {
    pub transfer: TransferMode,
    /// Accept device-side resampling when the exact rate is unavailable
    pub allow_resample: bool,
    /// Buffer duration ceiling (further capped at [`MAX_BUFFER_TIME`])
    pub max_buffer: Duration,
}

impl Default for NegotiationHints {
    fn default() -> Self {
        Self {
            transfer: TransferMode::default(),
            allow_resample: true,
            max_buffer: MAX_BUFFER_TIME,
        }
    }
}

impl From<&PlayerConfig> for NegotiationHints {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            transfer: config.transfer,
            allow_resample: config.allow_resample,
            max_buffer: Duration::from_millis(config.max_buffer_ms as u64),
        }
    }
}

/// Configuration the device accepted
///
/// `buffer_frames` is always a whole multiple of `period_frames`, and the
/// start threshold equals that whole-period buffer size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    pub format: StreamFormat,
    pub transfer: TransferMode,
    pub buffer_frames: usize,
    pub period_frames: usize,
    pub resample_allowed: bool,
    pub start_threshold: usize,
    pub avail_min: usize,
    pub buffer_time: Duration,
    pub period_time: Duration,
}

impl DeviceConfig {
    pub fn periods(&self) -> usize {
        self.buffer_frames / self.period_frames
    }

    pub fn period_bytes(&self) -> usize {
        self.period_frames * self.format.frame_bytes()
    }

    /// Playback time of `frames` at the negotiated rate
    pub fn frames_to_duration(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.format.sample_rate as f64)
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {} transfer, buffer {} frames ({} ms), period {} frames ({} ms){}",
            self.format,
            self.transfer,
            self.buffer_frames,
            self.frames_to_duration(self.buffer_frames).as_millis(),
            self.period_frames,
            self.frames_to_duration(self.period_frames).as_millis(),
            if self.resample_allowed { ", resampling allowed" } else { "" }
        )
    }
}

fn fail(step: NegotiationStep, reason: impl Into<String>) -> Error {
    Error::Negotiation { step, reason: reason.into() }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

/// Negotiate and commit device parameters for `requested`.
///
/// # Arguments
/// * `device` - Opened device (state `Open` or `Setup`)
/// * `requested` - Source stream format
/// * `hints` - Transfer method, resampling policy, buffer ceiling
///
/// # Returns
/// The committed configuration; the device is left `Prepared`.
///
/// # Errors
/// [`Error::Negotiation`] naming the first step the device rejected.
pub fn negotiate(
    device: &mut dyn PcmDevice,
    requested: &StreamFormat,
    hints: &NegotiationHints,
) -> Result<DeviceConfig> {
    let caps = device
        .capabilities()
        .map_err(|e| fail(NegotiationStep::Capabilities, e.to_string()))?;

    if !caps.transfer_modes.contains(&hints.transfer) {
        return Err(fail(
            NegotiationStep::Access,
            format!(
                "transfer method {} not available (device offers: {})",
                hints.transfer,
                join(&caps.transfer_modes)
            ),
        ));
    }

    if !caps.sample_formats.contains(&requested.sample_format) {
        return Err(fail(
            NegotiationStep::SampleFormat,
            format!(
                "{} not available (supported formats: {})",
                requested.sample_format,
                join(&caps.sample_formats)
            ),
        ));
    }

    if !caps.supports_channels(requested.channels) {
        return Err(fail(
            NegotiationStep::Channels,
            format!(
                "{} channels not available (device supports {})",
                requested.channels,
                join(&caps.channels)
            ),
        ));
    }

    let resample = hints.allow_resample && caps.can_resample;
    if !resample {
        let nearest = caps
            .nearest_rate(requested.sample_rate)
            .ok_or_else(|| fail(NegotiationStep::Rate, "device reports no sample rates"))?;
        if nearest != requested.sample_rate {
            return Err(fail(
                NegotiationStep::Rate,
                format!(
                    "rate mismatch (requested {} Hz, nearest available {} Hz)",
                    requested.sample_rate, nearest
                ),
            ));
        }
    }

    let buffer_time = caps.max_buffer_time.min(hints.max_buffer).min(MAX_BUFFER_TIME);
    if buffer_time.is_zero() {
        return Err(fail(NegotiationStep::BufferTime, "device allows no buffer time"));
    }
    let period_time = buffer_time / PERIODS_PER_BUFFER;
    if period_time.is_zero() {
        return Err(fail(NegotiationStep::PeriodTime, "period time rounds to zero"));
    }
    debug!("Requesting buffer {:?}, period {:?}", buffer_time, period_time);

    let sizes = device
        .apply_hw_params(&HwParams {
            format: *requested,
            transfer: hints.transfer,
            resample,
            buffer_time,
            period_time,
        })
        .map_err(|e| fail(NegotiationStep::HwCommit, e.to_string()))?;

    if sizes.period_frames == 0 {
        return Err(fail(NegotiationStep::HwCommit, "device chose a zero-frame period"));
    }
    if sizes.period_frames > sizes.buffer_frames {
        return Err(fail(
            NegotiationStep::HwCommit,
            format!(
                "period of {} frames exceeds buffer of {} frames",
                sizes.period_frames, sizes.buffer_frames
            ),
        ));
    }

    let buffer_frames = (sizes.buffer_frames / sizes.period_frames) * sizes.period_frames;
    if buffer_frames != sizes.buffer_frames {
        debug!(
            "Trimming buffer from {} to {} frames (whole periods)",
            sizes.buffer_frames, buffer_frames
        );
    }

    let sw = SwParams {
        start_threshold: buffer_frames,
        avail_min: sizes.period_frames,
    };
    device
        .apply_sw_params(&sw)
        .map_err(|e| fail(NegotiationStep::SwParams, e.to_string()))?;

    let config = DeviceConfig {
        format: *requested,
        transfer: hints.transfer,
        buffer_frames,
        period_frames: sizes.period_frames,
        resample_allowed: resample,
        start_threshold: sw.start_threshold,
        avail_min: sw.avail_min,
        buffer_time,
        period_time,
    };
    info!("Negotiated {} on '{}'", config, device.name());
    Ok(config)
}
