//! Decoder bridge
//!
//! Decoders push out whole blocks of varying size; the transfer engine pulls
//! exactly as many frames as fit one device period. The bridge buffers one
//! decoded block at a time and hands it out across as many reads as needed,
//! requesting the next block only once the current one is used up.
//!
//! Samples are normalized to 32-bit containers by left-shifting
//! `32 - bits_per_sample`, so every decoded stream reaches the device as
//! `S32_LE` regardless of its native depth.

use super::FrameSource;
use crate::error::{Error, Result};
use pcmflow_common::{SampleFormat, StreamFormat};
use tracing::debug;

/// Largest block a decoder may deliver (frames)
pub const MAX_BLOCK_FRAMES: usize = 65535;

/// Container every decoded stream is normalized to
const OUTPUT_FORMAT: SampleFormat = SampleFormat::S32Le;

/// Stream properties a decoder reports before the first block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Native depth, when the codec declares one
    pub bits_per_sample: Option<u16>,
    pub total_frames: Option<u64>,
}

/// One decoded block, planar: `planes[channel][frame]`, right-justified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub bits_per_sample: u16,
    pub planes: Vec<Vec<i32>>,
}

impl DecodedBlock {
    pub fn frames(&self) -> usize {
        self.planes.first().map(|p| p.len()).unwrap_or(0)
    }
}

/// Block-oriented decoder feeding a [`DecoderBridge`]
pub trait BlockDecoder {
    fn info(&self) -> DecoderInfo;

    /// Next decoded block, or `None` at end of stream.
    fn next_block(&mut self) -> Result<Option<DecodedBlock>>;

    /// Codec name for display
    fn codec_name(&self) -> String {
        "decoder".to_string()
    }
}

/// Frame source pulling from a [`BlockDecoder`]
pub struct DecoderBridge<D> {
    decoder: D,
    format: StreamFormat,
    info: DecoderInfo,
    block: Option<DecodedBlock>,
    cursor: usize,
    finished: bool,
}

impl<D: BlockDecoder> DecoderBridge<D> {
    /// Wrap `decoder`; the output format is its rate and channels at 32 bits.
    pub fn new(decoder: D) -> Result<Self> {
        let info = decoder.info();
        let format = StreamFormat::new(info.sample_rate, info.channels, 32)
            .map_err(|e| Error::FormatMismatch(e.to_string()))?;
        Ok(Self {
            decoder,
            format,
            info,
            block: None,
            cursor: 0,
            finished: false,
        })
    }

    /// Pull and validate the next block. `false` at end of stream.
    fn refill(&mut self) -> Result<bool> {
        let Some(block) = self.decoder.next_block()? else {
            debug!("Decoder reached end of stream");
            self.finished = true;
            self.block = None;
            return Ok(false);
        };

        if block.frames() > MAX_BLOCK_FRAMES {
            return Err(Error::Source(format!(
                "decoded block of {} frames exceeds the {} frame limit",
                block.frames(),
                MAX_BLOCK_FRAMES
            )));
        }
        if block.planes.len() != self.format.channels as usize {
            return Err(Error::Source(format!(
                "decoded block has {} channels, stream has {}",
                block.planes.len(),
                self.format.channels
            )));
        }
        if block.planes.iter().any(|p| p.len() != block.frames()) {
            return Err(Error::Source("decoded block has ragged channel planes".to_string()));
        }
        if block.bits_per_sample == 0 || block.bits_per_sample > 32 {
            return Err(Error::Source(format!(
                "decoded block has invalid depth of {} bits",
                block.bits_per_sample
            )));
        }

        self.block = Some(block);
        self.cursor = 0;
        Ok(true)
    }
}

impl<D: BlockDecoder> FrameSource for DecoderBridge<D> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn total_frames(&self) -> Option<u64> {
        self.info.total_frames
    }

    fn read_frames(&mut self, buffer: &mut [u8], max_frames: usize) -> Result<usize> {
        let frame_bytes = self.format.frame_bytes();
        let mut written = 0;

        while written < max_frames {
            let exhausted = self.block.as_ref().map_or(true, |b| self.cursor >= b.frames());
            if exhausted {
                if self.finished || !self.refill()? {
                    break;
                }
                continue;
            }
            let Some(block) = self.block.as_ref() else {
                break;
            };

            let shift = 32 - block.bits_per_sample as u32;
            let take = (max_frames - written).min(block.frames() - self.cursor);
            for frame in 0..take {
                let base = (written + frame) * frame_bytes;
                for (channel, plane) in block.planes.iter().enumerate() {
                    let sample = plane[self.cursor + frame] << shift;
                    OUTPUT_FORMAT.write_sample(sample, &mut buffer[base + channel * OUTPUT_FORMAT.bytes()..]);
                }
            }
            self.cursor += take;
            written += take;
        }
        Ok(written)
    }

    fn describe(&self) -> String {
        match self.info.bits_per_sample {
            Some(bits) => format!("{}, {} bit, normalized to 32 bit", self.decoder.codec_name(), bits),
            None => format!("{}, normalized to 32 bit", self.decoder.codec_name()),
        }
    }
}
