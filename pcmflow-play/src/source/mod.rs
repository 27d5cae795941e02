//! Frame sources
//!
//! A [`FrameSource`] yields interleaved PCM frames in one fixed
//! [`StreamFormat`]. Two implementations:
//!
//! - [`wav::WavSource`]: raw PCM read straight out of a RIFF/WAVE file
//! - [`bridge::DecoderBridge`]: adapts a block-oriented decoder (symphonia
//!   via [`decoder::SymphoniaDecoder`]) to on-demand frame reads

pub mod bridge;
pub mod decoder;
pub mod wav;

use crate::error::Result;
use pcmflow_common::StreamFormat;
use std::path::Path;
use tracing::info;

pub use bridge::{BlockDecoder, DecodedBlock, DecoderBridge, DecoderInfo, MAX_BLOCK_FRAMES};
pub use decoder::SymphoniaDecoder;
pub use wav::{WavHeader, WavSource};

/// Pull-based supplier of PCM frames
///
/// Resources are released when the source is dropped.
pub trait FrameSource {
    /// Stream format, fixed for the source's lifetime
    fn format(&self) -> StreamFormat;

    /// Total frames, when the container declares it
    fn total_frames(&self) -> Option<u64>;

    /// Read up to `max_frames` frames into `buffer`.
    ///
    /// `buffer` must hold at least `max_frames * format().frame_bytes()`
    /// bytes. Returns the number of frames written; fewer than `max_frames`
    /// (including zero) means the stream has ended.
    fn read_frames(&mut self, buffer: &mut [u8], max_frames: usize) -> Result<usize>;

    /// Short description of where the frames come from
    fn describe(&self) -> String;
}

/// True when the path's extension names a WAVE file
fn is_wave_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav") || ext.eq_ignore_ascii_case("wave"))
        .unwrap_or(false)
}

/// Open a file as a frame source.
///
/// WAVE files are read as raw PCM and must hold linear PCM; anything else
/// is decoded through symphonia and normalized to 32-bit samples.
///
/// # Errors
/// - `SourceOpen`: file missing or unreadable, no decodable track
/// - `FormatMismatch`: WAVE header describes something other than linear PCM
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>> {
    let source: Box<dyn FrameSource> = if is_wave_path(path) {
        Box::new(WavSource::open(path)?)
    } else {
        Box::new(DecoderBridge::new(SymphoniaDecoder::open(path)?)?)
    };
    info!(
        "Opened {}: {} ({})",
        path.display(),
        source.format(),
        source.describe()
    );
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_wave_extension_detection() {
        assert!(is_wave_path(Path::new("tone.wav")));
        assert!(is_wave_path(Path::new("/music/TONE.WAV")));
        assert!(is_wave_path(Path::new("x.wave")));
        assert!(!is_wave_path(Path::new("track.flac")));
        assert!(!is_wave_path(Path::new("noext")));
    }

    #[test]
    fn test_float_wave_is_rejected_not_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..64 {
            writer.write_sample(0.25f32).unwrap();
        }
        writer.finalize().unwrap();

        match open_source(&path) {
            Err(err) => {
                assert!(matches!(err, Error::FormatMismatch(_)), "{}", err);
                assert_eq!(err.exit_code(), 3);
            }
            Ok(source) => panic!("float WAVE opened as {}", source.describe()),
        }
    }

    #[test]
    fn test_missing_file_is_source_open_error() {
        match open_source(Path::new("/nonexistent/missing.wav")) {
            Err(err) => assert_eq!(err.exit_code(), 3),
            Ok(_) => panic!("missing file opened"),
        }
    }
}
