//! Device negotiation integration tests

mod helpers;

use helpers::*;
use pcmflow_common::{SampleFormat, StreamFormat, TransferMode};
use pcmflow_play::device::{HwCapabilities, PcmDevice, SimulatedDevice};
use pcmflow_play::engine::{negotiate, NegotiationHints, NegotiationStep};
use pcmflow_play::Error;
use std::time::Duration;

#[test]
fn test_buffer_is_whole_number_of_periods() {
    let format = StreamFormat::new(44100, 2, 16).unwrap();
    for slack in [0, 1, 37, 440] {
        let mut device = sim_device().with_buffer_slack(slack);
        let config = negotiate(&mut device, &format, &hints(TransferMode::ReadWrite)).unwrap();
        assert!(config.period_frames > 0);
        assert_eq!(config.buffer_frames % config.period_frames, 0, "slack {}", slack);
        assert_eq!(config.start_threshold, config.buffer_frames);
        assert_eq!(config.avail_min, config.period_frames);
    }
}

#[test]
fn test_buffer_respects_ceiling() {
    let format = StreamFormat::new(48000, 2, 32).unwrap();
    let mut device = sim_device();
    let hints = NegotiationHints {
        max_buffer: Duration::from_millis(40),
        ..NegotiationHints::default()
    };
    let config = negotiate(&mut device, &format, &hints).unwrap();
    assert!(config.buffer_time <= Duration::from_millis(40));
    assert_eq!(config.buffer_frames, 1920);
}

#[test]
fn test_rate_mismatch_without_resampling_fails_at_rate_step() {
    let format = StreamFormat::new(44100, 2, 16).unwrap();
    let mut device = fixed_rate_device(48000);
    let result = negotiate(&mut device, &format, &NegotiationHints::default());
    match result {
        Err(Error::Negotiation { step, reason }) => {
            assert_eq!(step, NegotiationStep::Rate);
            assert!(reason.contains("44100") && reason.contains("48000"), "{}", reason);
        }
        other => panic!("expected rate failure, got {:?}", other.map(|c| c.buffer_frames)),
    }
}

#[test]
fn test_resampling_device_accepts_any_rate() {
    let format = StreamFormat::new(44100, 2, 16).unwrap();
    let mut device = sim_device();
    let config = negotiate(&mut device, &format, &NegotiationHints::default()).unwrap();
    assert!(config.resample_allowed);
    assert_eq!(config.format.sample_rate, 44100);
}

#[test]
fn test_unsupported_container_lists_supported_formats() {
    let caps = HwCapabilities {
        sample_formats: vec![SampleFormat::S16Le, SampleFormat::S32Le],
        ..SimulatedDevice::default_capabilities()
    };
    let mut device = SimulatedDevice::new("sim", caps);
    let format = StreamFormat::new(48000, 2, 24).unwrap();
    match negotiate(&mut device, &format, &NegotiationHints::default()) {
        Err(Error::Negotiation { step, reason }) => {
            assert_eq!(step, NegotiationStep::SampleFormat);
            assert!(reason.contains("S16_LE") && reason.contains("S32_LE"), "{}", reason);
        }
        other => panic!("expected format failure, got {:?}", other.map(|c| c.buffer_frames)),
    }
}

#[test]
fn test_direct_transfer_requires_device_support() {
    let caps = HwCapabilities {
        transfer_modes: vec![TransferMode::ReadWrite],
        ..SimulatedDevice::default_capabilities()
    };
    let mut device = SimulatedDevice::new("sim", caps);
    let format = StreamFormat::new(48000, 2, 16).unwrap();
    let result = negotiate(&mut device, &format, &hints(TransferMode::Direct));
    assert!(matches!(result, Err(Error::Negotiation { step: NegotiationStep::Access, .. })));
}

#[test]
fn test_negotiated_device_is_prepared() {
    let format = StreamFormat::new(8000, 1, 16).unwrap();
    let mut device = sim_device();
    negotiate(&mut device, &format, &hints(TransferMode::Direct)).unwrap();
    assert_eq!(device.state(), pcmflow_play::device::DeviceState::Prepared);
}
