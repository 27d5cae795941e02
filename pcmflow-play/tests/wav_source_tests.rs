//! WAVE source integration tests
//!
//! Fixtures are written with hound, then read back through the raw reader
//! and the source selector.

mod helpers;

use helpers::*;
use pcmflow_common::SampleFormat;
use pcmflow_play::source::{open_source, FrameSource, WavSource};
use pcmflow_play::{Error, PlayRequest, Session};

#[test]
fn test_hound_fixture_reads_back_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", 44100, 2, 1500);

    let mut source = WavSource::open(&path).unwrap();
    assert_eq!(source.total_frames(), Some(1500));
    assert_eq!(source.format().sample_format, SampleFormat::S16Le);

    let mut buffer = vec![0u8; 1500 * 4];
    let mut filled = 0;
    loop {
        let n = source.read_frames(&mut buffer[filled * 4..], 400.min(1500 - filled)).unwrap();
        filled += n;
        if n < 400 || filled == 1500 {
            break;
        }
    }
    assert_eq!(filled, 1500);
    assert_eq!(buffer, ramp_bytes(2, 1500));
}

#[test]
fn test_24_bit_fixture_uses_three_byte_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deep.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 96000,
        bits_per_sample: 24,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for sample in [0x12_3456, -2, 7, -0x40_0000] {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    let mut source = WavSource::open(&path).unwrap();
    assert_eq!(source.format().sample_format, SampleFormat::S24Le3);
    assert_eq!(source.format().frame_bytes(), 6);
    assert_eq!(source.total_frames(), Some(2));

    let mut buffer = [0u8; 12];
    assert_eq!(source.read_frames(&mut buffer, 2).unwrap(), 2);
    assert_eq!(&buffer[0..3], &[0x56, 0x34, 0x12]);
    assert_eq!(&buffer[3..6], &[0xFE, 0xFF, 0xFF]);
}

#[test]
fn test_extensible_float_is_format_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = extensible_float_wav(dir.path());
    match open_source(&path) {
        Err(Error::FormatMismatch(reason)) => assert!(reason.contains("not linear PCM"), "{}", reason),
        Err(other) => panic!("expected format mismatch, got {}", other),
        Ok(_) => panic!("float file accepted as PCM"),
    }
}

#[test]
fn test_format_mismatch_reported_before_device_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = extensible_float_wav(dir.path());
    // A device that cannot exist: the header must fail first
    let request = PlayRequest::new(path).with_device("no-such-device-anywhere");
    match Session::open(&request) {
        Err(err) => {
            assert!(matches!(err, Error::FormatMismatch(_)));
            assert_eq!(err.exit_code(), 3);
        }
        Ok(_) => panic!("float file accepted as PCM"),
    }
}

#[test]
fn test_missing_file_is_source_open() {
    let dir = tempfile::tempdir().unwrap();
    let result = open_source(&dir.path().join("absent.wav"));
    assert!(matches!(result, Err(Error::SourceOpen { .. })));
}
