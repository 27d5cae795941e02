//! Playback session assembly
//!
//! A [`Session`] is one source, one device handle and the configuration the
//! device accepted for that source. Opening is ordered: the source header is
//! read first so format problems surface before any device is touched, then
//! the device is opened and negotiated against the source's format.

use crate::config::Settings;
use crate::control::PlaybackFlags;
use crate::device::{self, PcmDevice};
use crate::engine::{
    negotiate, DeviceConfig, NegotiationHints, ProgressSink, RecoveryPolicy, TransferEngine, TransferSummary,
};
use crate::error::Result;
use crate::source::{open_source, FrameSource};
use std::path::PathBuf;
use tracing::info;

/// Everything needed to start one session
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub path: PathBuf,
    pub device: String,
    pub hints: NegotiationHints,
    pub recovery: RecoveryPolicy,
}

impl PlayRequest {
    /// Request for `path` on the default device with default hints
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            device: "default".to_string(),
            hints: NegotiationHints::default(),
            recovery: RecoveryPolicy::default(),
        }
    }

    /// Request for `path` using resolved settings
    pub fn from_settings(path: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            path: path.into(),
            device: settings.device.clone(),
            hints: settings.hints,
            recovery: settings.recovery.clone(),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }
}

/// An opened source bound to a negotiated device
pub struct Session {
    source: Box<dyn FrameSource>,
    device: Box<dyn PcmDevice>,
    config: DeviceConfig,
    recovery: RecoveryPolicy,
}

impl Session {
    /// Open the source, then the device, then negotiate.
    ///
    /// # Errors
    /// - `SourceOpen` / `FormatMismatch`: the file cannot be played
    /// - `DeviceOpen`: the named device does not exist or cannot be opened
    /// - `Negotiation`: the device cannot take the source's format
    pub fn open(request: &PlayRequest) -> Result<Self> {
        let source = open_source(&request.path)?;
        let device = device::open(&request.device)?;
        Self::with_device(source, device, &request.hints, request.recovery.clone())
    }

    /// Bind an already opened source and device.
    ///
    /// # Errors
    /// `Negotiation` when the device cannot take the source's format.
    pub fn with_device(
        source: Box<dyn FrameSource>,
        mut device: Box<dyn PcmDevice>,
        hints: &NegotiationHints,
        recovery: RecoveryPolicy,
    ) -> Result<Self> {
        let config = negotiate(device.as_mut(), &source.format(), hints)?;
        info!("Device {} configured: {}", device.name(), config);
        Ok(Self {
            source,
            device,
            config,
            recovery,
        })
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Play to completion or cancellation. The device is released on return.
    pub fn run(mut self, flags: &PlaybackFlags, sink: &mut dyn ProgressSink) -> Result<TransferSummary> {
        let mut engine = TransferEngine::new(self.device.as_mut(), self.config, self.recovery.clone());
        engine.run(self.source.as_mut(), flags, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HwCapabilities, RateRange, SimulatedDevice};
    use crate::engine::{NegotiationStep, NoProgress, TransferOutcome};
    use crate::error::Error;
    use crate::source::WavSource;
    use std::io::Cursor;

    fn wav_bytes(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let block_align = channels as usize * 2;
        let data_len = frames * block_align;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&(block_align as u16).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(data_len as u32).to_le_bytes());
        bytes.extend((0..data_len).map(|i| (i % 251) as u8));
        bytes
    }

    fn source(rate: u32, frames: usize) -> Box<dyn FrameSource> {
        Box::new(WavSource::from_reader(Cursor::new(wav_bytes(rate, 2, frames))).unwrap())
    }

    #[test]
    fn test_request_from_settings() {
        let settings = Settings::default();
        let request = PlayRequest::from_settings("a.wav", &settings);
        assert_eq!(request.device, "default");
        assert_eq!(request.path, PathBuf::from("a.wav"));
        assert_eq!(request.hints, settings.hints);
    }

    #[test]
    fn test_session_plays_whole_source() {
        let device = SimulatedDevice::new("sim", SimulatedDevice::default_capabilities());
        let probe = device.probe();
        let session = Session::with_device(
            source(8000, 1000),
            Box::new(device),
            &NegotiationHints::default(),
            RecoveryPolicy::default(),
        )
        .unwrap();
        assert_eq!(session.device_name(), "sim");

        let summary = session.run(&PlaybackFlags::default(), &mut NoProgress).unwrap();
        assert_eq!(summary.outcome, TransferOutcome::Completed);
        assert_eq!(summary.frames_transferred, 1000);
        assert_eq!(probe.captured().len(), 1000 * 4);
    }

    #[test]
    fn test_rate_mismatch_fails_before_transfer() {
        let caps = HwCapabilities {
            rates: vec![RateRange::discrete(48000)],
            can_resample: false,
            ..SimulatedDevice::default_capabilities()
        };
        let device = SimulatedDevice::new("sim", caps);
        let result = Session::with_device(
            source(44100, 100),
            Box::new(device),
            &NegotiationHints::default(),
            RecoveryPolicy::default(),
        );
        assert!(matches!(
            result,
            Err(Error::Negotiation { step: NegotiationStep::Rate, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_source_open() {
        let request = PlayRequest::new("/nonexistent/a.wav").with_device("null");
        assert!(matches!(Session::open(&request), Err(Error::SourceOpen { .. })));
    }
}
