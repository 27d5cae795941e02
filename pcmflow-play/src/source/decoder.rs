//! Block decoder backed by symphonia
//!
//! Probes the container, picks the first decodable track and yields one
//! [`DecodedBlock`] per packet. Unsigned and floating-point output is
//! converted to signed samples so the bridge can treat every codec alike.

use super::bridge::{BlockDecoder, DecodedBlock, DecoderInfo};
use crate::error::{Error, Result};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::debug;

/// symphonia-backed [`BlockDecoder`]
pub struct SymphoniaDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: DecoderInfo,
    codec_name: String,
}

impl SymphoniaDecoder {
    /// Open and probe an audio file.
    ///
    /// # Errors
    /// `SourceOpen` when the file cannot be read, the format is not
    /// recognized, or no track declares its rate and channel count.
    pub fn open(path: &Path) -> Result<Self> {
        let open_error = |reason: String| Error::SourceOpen {
            path: path.display().to_string(),
            reason,
        };

        let file = std::fs::File::open(path).map_err(|e| open_error(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| open_error(format!("Failed to probe format: {}", e)))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| open_error("No audio track found".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| open_error("Sample rate not found".to_string()))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| open_error("Channel count not found".to_string()))?;

        let codecs = symphonia::default::get_codecs();
        let decoder = codecs
            .make(&params, &DecoderOptions::default())
            .map_err(|e| open_error(format!("Failed to create decoder: {}", e)))?;
        let codec_name = codecs
            .get_codec(params.codec)
            .map(|d| d.short_name.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let info = DecoderInfo {
            sample_rate,
            channels,
            bits_per_sample: params.bits_per_sample.map(|b| b as u16),
            total_frames: params.n_frames,
        };
        debug!(
            "Decoder: codec={} rate={} channels={} bits={:?} frames={:?}",
            codec_name, sample_rate, channels, info.bits_per_sample, info.total_frames
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            codec_name,
        })
    }
}

impl BlockDecoder for SymphoniaDecoder {
    fn info(&self) -> DecoderInfo {
        self.info
    }

    fn next_block(&mut self) -> Result<Option<DecodedBlock>> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(Error::Source(format!("Failed to read packet: {}", e))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            return match self.decoder.decode(&packet) {
                Ok(decoded) => Ok(Some(to_block(&decoded))),
                Err(e) => Err(Error::Source(format!("Decode error: {}", e))),
            };
        }
    }

    fn codec_name(&self) -> String {
        self.codec_name.clone()
    }
}

fn planes<S: Sample>(buf: &AudioBuffer<S>, convert: impl Fn(S) -> i32) -> Vec<Vec<i32>> {
    (0..buf.spec().channels.count())
        .map(|ch| buf.chan(ch).iter().map(|&s| convert(s)).collect())
        .collect()
}

fn float_to_i32(value: f64) -> i32 {
    (value.clamp(-1.0, 1.0) * i32::MAX as f64).round() as i32
}

/// Convert a decoded buffer to signed planar samples with their depth.
fn to_block(decoded: &AudioBufferRef<'_>) -> DecodedBlock {
    let (bits_per_sample, planes) = match decoded {
        AudioBufferRef::U8(buf) => (8, planes(&**buf, |s| s as i32 - 0x80)),
        AudioBufferRef::U16(buf) => (16, planes(&**buf, |s| s as i32 - 0x8000)),
        AudioBufferRef::U24(buf) => (24, planes(&**buf, |s| s.inner() as i32 - 0x80_0000)),
        AudioBufferRef::U32(buf) => (32, planes(&**buf, |s| (s as i64 - 0x8000_0000) as i32)),
        AudioBufferRef::S8(buf) => (8, planes(&**buf, |s| s as i32)),
        AudioBufferRef::S16(buf) => (16, planes(&**buf, |s| s as i32)),
        AudioBufferRef::S24(buf) => (24, planes(&**buf, |s| s.inner())),
        AudioBufferRef::S32(buf) => (32, planes(&**buf, |s| s)),
        AudioBufferRef::F32(buf) => (32, planes(&**buf, |s| float_to_i32(s as f64))),
        AudioBufferRef::F64(buf) => (32, planes(&**buf, float_to_i32)),
    };
    DecodedBlock { bits_per_sample, planes }
}
