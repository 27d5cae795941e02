//! Test helper modules for pcmflow-play integration tests
//!
//! - WAV fixtures written with hound into temporary directories
//! - Hand-built RIFF images for headers hound will not produce
//! - Simulated devices and recording progress sinks

#![allow(dead_code)]

use hound::{WavSpec, WavWriter};
use pcmflow_play::device::{HwCapabilities, RateRange, SimulatedDevice};
use pcmflow_play::engine::{NegotiationHints, Progress, ProgressSink, RecoveryPolicy, SessionState};
use pcmflow_common::TransferMode;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sample value of `frame` on `channel` in every generated fixture
pub fn ramp_sample(frame: usize, channel: u16) -> i16 {
    ((frame as i32 * 7 + channel as i32 * 1000) % 30000) as i16
}

/// Write a 16-bit ramp fixture and return its path.
pub fn write_ramp_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, frames: usize) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for frame in 0..frames {
        for channel in 0..channels {
            writer.write_sample(ramp_sample(frame, channel)).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

/// Interleaved little-endian bytes of the ramp fixture's data chunk
pub fn ramp_bytes(channels: u16, frames: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|frame| (0..channels).map(move |channel| ramp_sample(frame, channel)))
        .flat_map(|sample| sample.to_le_bytes())
        .collect()
}

/// WAVE_FORMAT_EXTENSIBLE file whose sub-format is IEEE float
pub fn extensible_float_wav(dir: &Path) -> PathBuf {
    let channels: u16 = 2;
    let rate: u32 = 48000;
    let block_align: u16 = 8;
    let data = vec![0u8; block_align as usize * 16];

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&((4 + 8 + 40 + 8 + data.len()) as u32).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&0xFFFEu16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&rate.to_le_bytes());
    bytes.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&32u16.to_le_bytes());
    bytes.extend_from_slice(&22u16.to_le_bytes());
    bytes.extend_from_slice(&32u16.to_le_bytes());
    bytes.extend_from_slice(&3u32.to_le_bytes());
    // KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
    bytes.extend_from_slice(&3u16.to_le_bytes());
    bytes.extend_from_slice(&[
        0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
    ]);
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&data);

    let path = dir.join("float_extensible.wav");
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Simulated device on the virtual clock with every capability
pub fn sim_device() -> SimulatedDevice {
    SimulatedDevice::new("sim", SimulatedDevice::default_capabilities())
}

/// Simulated device that only runs at `rate` and cannot resample
pub fn fixed_rate_device(rate: u32) -> SimulatedDevice {
    let caps = HwCapabilities {
        rates: vec![RateRange::discrete(rate)],
        can_resample: false,
        ..SimulatedDevice::default_capabilities()
    };
    SimulatedDevice::new("fixed", caps)
}

/// Small buffers so short fixtures span many periods
pub fn hints(transfer: TransferMode) -> NegotiationHints {
    NegotiationHints {
        transfer,
        allow_resample: true,
        max_buffer: Duration::from_millis(100),
    }
}

/// Recovery that never sleeps long
pub fn quick_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        max_retries: 3,
        suspend_poll: Duration::from_millis(1),
        suspend_max_polls: 5,
    }
}

/// Progress sink keeping every update
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub periods: Vec<Progress>,
    pub states: Vec<SessionState>,
}

impl ProgressSink for RecordingSink {
    fn on_period(&mut self, progress: &Progress) {
        self.periods.push(*progress);
    }

    fn on_state(&mut self, state: SessionState) {
        self.states.push(state);
    }
}
