//! Raw PCM from RIFF/WAVE files
//!
//! Header layout:
//!
//! ```text
//! "RIFF" <u32 size> "WAVE"
//!   "fmt " <u32 16|18|40> tag channels rate byte_rate block_align bits [ext]
//!   ... other chunks (skipped) ...
//!   "data" <u32 size> <interleaved little-endian samples>
//! ```
//!
//! Only linear PCM is accepted: format tag `0x0001`, or `0xFFFE`
//! (extensible) whose sub-format is PCM under the standard WAVE GUID.

use super::FrameSource;
use crate::error::{Error, Result};
use pcmflow_common::StreamFormat;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, trace, warn};

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Bytes 2..16 of the sub-format GUID shared by all standard WAVE formats
const WAVE_GUID_TAIL: [u8; 14] = [
    0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// Layout of the `fmt ` chunk, selected by its size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtLayout {
    /// 16 bytes: base fields only
    Pcm,
    /// 18 bytes: base fields plus an (empty) extension size
    PcmEx,
    /// 40 bytes: extensible format with sub-format GUID
    Extensible,
}

/// Parsed WAVE header, positioned at the start of sample data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub layout: FmtLayout,
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Extensible only
    pub valid_bits: Option<u16>,
    /// Extensible only
    pub channel_mask: Option<u32>,
    /// Byte offset of the first sample
    pub data_offset: u64,
    /// Declared sample data size in bytes
    pub data_len: u64,
}

fn mismatch(reason: impl Into<String>) -> Error {
    Error::FormatMismatch(reason.into())
}

/// `read_exact` where running out of bytes means a truncated header
fn read_header_bytes<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => mismatch(format!("truncated header ({})", what)),
        _ => Error::Io(e),
    })
}

fn skip_bytes<R: Read>(reader: &mut R, count: u64) -> Result<()> {
    let skipped = io::copy(&mut reader.take(count), &mut io::sink())?;
    if skipped < count {
        return Err(mismatch("truncated chunk"));
    }
    Ok(())
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl WavHeader {
    /// Parse the RIFF header and chunks up to the `data` chunk.
    ///
    /// Leaves `reader` positioned at the first sample byte. Chunks other than
    /// `fmt ` and `data` are skipped, including their pad byte.
    ///
    /// # Errors
    /// `FormatMismatch` for anything that is not a linear-PCM WAVE header,
    /// including truncated headers; `Io` for read failures.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut riff = [0u8; 12];
        read_header_bytes(reader, &mut riff, "RIFF header")?;
        if &riff[0..4] != b"RIFF" {
            return Err(mismatch("missing RIFF signature"));
        }
        if &riff[8..12] != b"WAVE" {
            return Err(mismatch("RIFF form type is not WAVE"));
        }

        let mut position = riff.len() as u64;
        let mut fmt: Option<WavHeader> = None;
        loop {
            let mut chunk = [0u8; 8];
            reader.read_exact(&mut chunk).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => mismatch("no data chunk found"),
                _ => Error::Io(e),
            })?;
            position += chunk.len() as u64;
            let size = le_u32(&chunk[4..8]) as u64;

            match &chunk[0..4] {
                b"fmt " => {
                    fmt = Some(Self::parse_fmt(reader, size)?);
                    position += size;
                }
                b"data" => {
                    let mut header = fmt.ok_or_else(|| mismatch("data chunk precedes fmt chunk"))?;
                    header.data_offset = position;
                    header.data_len = size;
                    return Ok(header);
                }
                other => {
                    let padded = size + (size & 1);
                    trace!("Skipping chunk {:?} ({} bytes)", String::from_utf8_lossy(other), size);
                    skip_bytes(reader, padded)?;
                    position += padded;
                }
            }
        }
    }

    fn parse_fmt<R: Read>(reader: &mut R, size: u64) -> Result<Self> {
        let layout = match size {
            16 => FmtLayout::Pcm,
            18 => FmtLayout::PcmEx,
            40 => FmtLayout::Extensible,
            other => {
                return Err(mismatch(format!(
                    "fmt chunk of {} bytes is not a WAVE layout (16, 18 or 40)",
                    other
                )))
            }
        };

        let mut base = [0u8; 16];
        read_header_bytes(reader, &mut base, "fmt chunk")?;
        let mut header = WavHeader {
            layout,
            format_tag: le_u16(&base[0..2]),
            channels: le_u16(&base[2..4]),
            sample_rate: le_u32(&base[4..8]),
            byte_rate: le_u32(&base[8..12]),
            block_align: le_u16(&base[12..14]),
            bits_per_sample: le_u16(&base[14..16]),
            valid_bits: None,
            channel_mask: None,
            data_offset: 0,
            data_len: 0,
        };

        match header.format_tag {
            WAVE_FORMAT_PCM => {}
            WAVE_FORMAT_EXTENSIBLE if layout == FmtLayout::Extensible => {}
            WAVE_FORMAT_EXTENSIBLE => {
                return Err(mismatch("extensible format tag without extension fields"));
            }
            tag => return Err(mismatch(format!("format tag 0x{:04X} is not linear PCM", tag))),
        }

        match layout {
            FmtLayout::Pcm => {}
            FmtLayout::PcmEx => skip_bytes(reader, 2)?,
            FmtLayout::Extensible => {
                let mut ext = [0u8; 24];
                read_header_bytes(reader, &mut ext, "fmt extension")?;
                header.valid_bits = Some(le_u16(&ext[2..4]));
                header.channel_mask = Some(le_u32(&ext[4..8]));
                let sub_format = le_u16(&ext[8..10]);
                if sub_format != WAVE_FORMAT_PCM {
                    return Err(mismatch(format!(
                        "extensible sub-format 0x{:04X} is not linear PCM",
                        sub_format
                    )));
                }
                if ext[10..24] != WAVE_GUID_TAIL {
                    return Err(mismatch("extensible sub-format GUID is not a WAVE GUID"));
                }
            }
        }
        Ok(header)
    }

    /// Declared frame count (`data_len / block_align`)
    pub fn total_frames(&self) -> u64 {
        if self.block_align == 0 {
            return 0;
        }
        self.data_len / self.block_align as u64
    }

    /// Stream format described by the header.
    ///
    /// # Errors
    /// `FormatMismatch` for bit depths other than 16/24/32, zero channels or
    /// rate, or a block alignment that disagrees with the sample layout.
    pub fn stream_format(&self) -> Result<StreamFormat> {
        let format = StreamFormat::new(self.sample_rate, self.channels, self.bits_per_sample)
            .map_err(|e| mismatch(e.to_string()))?;
        if format.frame_bytes() != self.block_align as usize {
            return Err(mismatch(format!(
                "block align {} does not match {} channels of {} bits",
                self.block_align, self.channels, self.bits_per_sample
            )));
        }
        Ok(format)
    }
}

/// Frame source reading raw PCM out of a WAVE file
pub struct WavSource<R = File> {
    reader: R,
    header: WavHeader,
    format: StreamFormat,
    frames_remaining: u64,
}

impl WavSource<File> {
    /// Open a WAVE file and parse its header.
    ///
    /// # Errors
    /// - `SourceOpen`: file cannot be opened or read
    /// - `FormatMismatch`: header is not linear PCM
    pub fn open(path: &Path) -> Result<Self> {
        let open_error = |reason: String| Error::SourceOpen {
            path: path.display().to_string(),
            reason,
        };
        let file = File::open(path).map_err(|e| open_error(e.to_string()))?;
        Self::from_reader(file).map_err(|e| match e {
            Error::Io(io) => open_error(io.to_string()),
            other => other,
        })
    }
}

impl<R: Read> WavSource<R> {
    /// Parse the header from `reader`, leaving it at the sample data.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let header = WavHeader::parse(&mut reader)?;
        let format = header.stream_format()?;
        let frames_remaining = header.total_frames();
        debug!(
            "WAVE header: {:?} tag=0x{:04X} {} data={} bytes at offset {}",
            header.layout, header.format_tag, format, header.data_len, header.data_offset
        );
        Ok(Self {
            reader,
            header,
            format,
            frames_remaining,
        })
    }

    pub fn header(&self) -> &WavHeader {
        &self.header
    }
}

/// Fill `buf` from `reader` until full or end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R: Read> FrameSource for WavSource<R> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.header.total_frames())
    }

    fn read_frames(&mut self, buffer: &mut [u8], max_frames: usize) -> Result<usize> {
        let frame_bytes = self.format.frame_bytes();
        let frames = (max_frames as u64).min(self.frames_remaining) as usize;
        if frames == 0 {
            return Ok(0);
        }

        let filled = read_full(&mut self.reader, &mut buffer[..frames * frame_bytes])
            .map_err(|e| Error::Source(format!("read failed: {}", e)))?;
        let got = filled / frame_bytes;
        if filled % frame_bytes != 0 {
            warn!("Discarding partial trailing frame ({} bytes)", filled % frame_bytes);
        }
        if got < frames {
            self.frames_remaining = 0;
        } else {
            self.frames_remaining -= got as u64;
        }
        Ok(got)
    }

    fn describe(&self) -> String {
        match self.header.layout {
            FmtLayout::Extensible => "WAVE extensible PCM".to_string(),
            _ => "WAVE PCM".to_string(),
        }
    }
}
