//! Transfer engine integration tests
//!
//! Every test plays a hound-written fixture on the simulated device and
//! checks what reached the device buffer.

mod helpers;

use helpers::*;
use pcmflow_common::TransferMode;
use pcmflow_play::device::{FaultPlan, SimulatedDevice};
use pcmflow_play::engine::{negotiate, SessionState, TransferEngine, TransferOutcome, TransferSummary};
use pcmflow_play::source::{FrameSource, WavSource};
use pcmflow_play::{Error, PlaybackFlags, Session};
use std::path::Path;

const RATE: u32 = 8000;
const FRAMES: usize = 2345;

fn play_fixture(
    path: &Path,
    device: &mut SimulatedDevice,
    transfer: TransferMode,
    sink: &mut RecordingSink,
) -> pcmflow_play::Result<TransferSummary> {
    let mut source = WavSource::open(path)?;
    let config = negotiate(device, &source.format(), &hints(transfer))?;
    let flags = PlaybackFlags::new();
    let mut engine = TransferEngine::new(device, config, quick_policy());
    engine.run(&mut source, &flags, sink)
}

fn count(states: &[SessionState], state: SessionState) -> usize {
    states.iter().filter(|s| **s == state).count()
}

#[test]
fn test_both_paths_deliver_every_frame_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 2, FRAMES);

    for transfer in [TransferMode::ReadWrite, TransferMode::Direct] {
        let mut device = sim_device();
        let mut sink = RecordingSink::default();
        let summary = play_fixture(&path, &mut device, transfer, &mut sink).unwrap();

        assert_eq!(summary.outcome, TransferOutcome::Completed, "{}", transfer);
        assert_eq!(summary.frames_total, Some(FRAMES as u64));
        assert_eq!(summary.frames_transferred, FRAMES as u64, "{}", transfer);
        assert_eq!(summary.frames_lost, 0);
        assert_eq!(device.probe().captured(), ramp_bytes(2, FRAMES), "{}", transfer);
        assert_eq!(device.probe().drains(), 1);
    }
}

#[test]
fn test_progress_is_monotonic_and_ends_at_total() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 1, FRAMES);
    let mut device = sim_device();
    let mut sink = RecordingSink::default();
    play_fixture(&path, &mut device, TransferMode::Direct, &mut sink).unwrap();

    assert!(!sink.periods.is_empty());
    assert!(sink
        .periods
        .windows(2)
        .all(|pair| pair[0].frames_transferred < pair[1].frames_transferred));
    let last = sink.periods.last().unwrap();
    assert_eq!(last.frames_transferred, FRAMES as u64);
    assert_eq!(last.fraction(), Some(1.0));
}

#[test]
fn test_session_states_follow_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 2, FRAMES);
    let mut device = sim_device();
    let mut sink = RecordingSink::default();
    let summary = play_fixture(&path, &mut device, TransferMode::ReadWrite, &mut sink).unwrap();

    assert_eq!(
        summary.states,
        vec![
            SessionState::Idle,
            SessionState::Prepared,
            SessionState::Running,
            SessionState::Draining,
            SessionState::Stopped
        ]
    );
    assert_eq!(sink.states, &summary.states[1..]);
}

#[test]
fn test_underrun_on_avail_recovers_and_runs_again() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 2, FRAMES);
    let mut device = sim_device().with_faults(FaultPlan::none().underrun_at_avail(4));
    let mut sink = RecordingSink::default();
    let summary = play_fixture(&path, &mut device, TransferMode::Direct, &mut sink).unwrap();

    assert_eq!(summary.outcome, TransferOutcome::Completed);
    assert_eq!(summary.recoveries, 1);
    assert_eq!(summary.frames_transferred, FRAMES as u64);
    assert_eq!(device.probe().underruns(), 1);
    assert_eq!(count(&summary.states, SessionState::Running), 2);
    assert_eq!(count(&summary.states, SessionState::Prepared), 2);
}

#[test]
fn test_underrun_on_write_drops_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 2, FRAMES);
    let mut device = sim_device().with_faults(FaultPlan::none().underrun_at_write(6));
    let mut sink = RecordingSink::default();
    let summary = play_fixture(&path, &mut device, TransferMode::ReadWrite, &mut sink).unwrap();

    assert_eq!(summary.recoveries, 1);
    assert_eq!(summary.frames_transferred, FRAMES as u64);
    assert_eq!(device.probe().captured(), ramp_bytes(2, FRAMES));
}

#[test]
fn test_suspend_is_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 2, FRAMES);
    let mut device = sim_device().with_faults(FaultPlan::none().suspend_at_avail(3, 2));
    let mut sink = RecordingSink::default();
    let summary = play_fixture(&path, &mut device, TransferMode::Direct, &mut sink).unwrap();

    assert_eq!(summary.outcome, TransferOutcome::Completed);
    assert_eq!(summary.recoveries, 1);
    assert_eq!(device.probe().suspends(), 1);
    assert_eq!(summary.frames_transferred, FRAMES as u64);
}

#[test]
fn test_failing_prepare_faults_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 2, FRAMES);
    let mut device = sim_device().with_faults(FaultPlan::none().underrun_at_avail(2).failing_prepare());
    let mut sink = RecordingSink::default();
    let err = play_fixture(&path, &mut device, TransferMode::Direct, &mut sink).unwrap_err();

    assert!(matches!(err, Error::Device(_)));
    assert_eq!(err.exit_code(), 6);
    assert_eq!(sink.states.last(), Some(&SessionState::Faulted));
}

#[test]
fn test_stop_requested_twice_stops_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "ramp.wav", RATE, 2, FRAMES);
    let source: Box<dyn FrameSource> = Box::new(WavSource::open(&path).unwrap());
    let session = Session::with_device(
        source,
        Box::new(sim_device()),
        &hints(TransferMode::ReadWrite),
        quick_policy(),
    )
    .unwrap();

    let flags = PlaybackFlags::new();
    assert!(flags.request_stop());
    assert!(!flags.request_stop());
    let mut sink = RecordingSink::default();
    let summary = session.run(&flags, &mut sink).unwrap();

    assert_eq!(summary.outcome, TransferOutcome::Cancelled);
    assert_eq!(count(&summary.states, SessionState::Stopped), 1);
    assert_eq!(count(&summary.states, SessionState::Draining), 0);
}
