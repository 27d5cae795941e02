//! Decoder bridge integration tests
//!
//! A scripted decoder hands out irregular blocks; the engine pulls whole
//! periods through the bridge onto the simulated device.

mod helpers;

use helpers::*;
use pcmflow_common::{SampleFormat, TransferMode};
use pcmflow_play::engine::{negotiate, NoProgress, TransferEngine, TransferOutcome};
use pcmflow_play::source::{BlockDecoder, DecodedBlock, DecoderBridge, DecoderInfo, FrameSource};
use pcmflow_play::{Error, PlaybackFlags};
use std::collections::VecDeque;

/// Stereo 24-bit decoder: left carries the frame index, right its negation
struct IrregularDecoder {
    blocks: VecDeque<DecodedBlock>,
    total: u64,
}

impl IrregularDecoder {
    fn new(block_sizes: &[usize]) -> Self {
        let mut next = 0i32;
        let blocks = block_sizes
            .iter()
            .map(|&frames| {
                let left: Vec<i32> = (next..next + frames as i32).collect();
                let right = left.iter().map(|v| -v).collect();
                next += frames as i32;
                DecodedBlock { bits_per_sample: 24, planes: vec![left, right] }
            })
            .collect();
        Self {
            blocks,
            total: block_sizes.iter().sum::<usize>() as u64,
        }
    }
}

impl BlockDecoder for IrregularDecoder {
    fn info(&self) -> DecoderInfo {
        DecoderInfo {
            sample_rate: 8000,
            channels: 2,
            bits_per_sample: Some(24),
            total_frames: Some(self.total),
        }
    }

    fn next_block(&mut self) -> pcmflow_play::Result<Option<DecodedBlock>> {
        Ok(self.blocks.pop_front())
    }
}

fn expected_bytes(frames: usize) -> Vec<u8> {
    (0..frames as i32)
        .flat_map(|v| [v << 8, (-v) << 8])
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

#[test]
fn test_irregular_blocks_reach_device_in_order() {
    let sizes = [1152, 17, 4096, 3, 0, 611];
    let frames: usize = sizes.iter().sum();

    for transfer in [TransferMode::ReadWrite, TransferMode::Direct] {
        let mut source = DecoderBridge::new(IrregularDecoder::new(&sizes)).unwrap();
        assert_eq!(source.format().sample_format, SampleFormat::S32Le);

        let mut device = sim_device();
        let config = negotiate(&mut device, &source.format(), &hints(transfer)).unwrap();
        let flags = PlaybackFlags::new();
        let mut engine = TransferEngine::new(&mut device, config, quick_policy());
        let summary = engine.run(&mut source, &flags, &mut NoProgress).unwrap();

        assert_eq!(summary.outcome, TransferOutcome::Completed);
        assert_eq!(summary.frames_transferred, frames as u64);
        assert_eq!(device.probe().captured(), expected_bytes(frames), "{}", transfer);
    }
}

#[test]
fn test_oversized_block_aborts_session() {
    let mut source = DecoderBridge::new(IrregularDecoder::new(&[100, 70000])).unwrap();
    let mut device = sim_device();
    let config = negotiate(&mut device, &source.format(), &hints(TransferMode::ReadWrite)).unwrap();
    let flags = PlaybackFlags::new();
    let mut engine = TransferEngine::new(&mut device, config, quick_policy());
    let err = engine.run(&mut source, &flags, &mut NoProgress).unwrap_err();
    assert!(matches!(err, Error::Source(_)));
    assert_eq!(device.probe().drops(), 1);
}
