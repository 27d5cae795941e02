//! Playback controller tests
//!
//! Sessions run on the real-time `null` device, so fixtures stay short.

mod helpers;

use helpers::*;
use pcmflow_play::engine::{SessionState, TransferOutcome};
use pcmflow_play::{PlayRequest, PlaybackController};

#[test]
fn test_plays_to_completion_and_publishes_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "short.wav", 8000, 2, 2000);
    let controller = PlaybackController::new();
    let position = controller.position();

    let handle = controller
        .play(PlayRequest::new(path).with_device("null"))
        .unwrap()
        .expect("session should start");
    let summary = handle.join().unwrap().unwrap();

    assert_eq!(summary.outcome, TransferOutcome::Completed);
    assert_eq!(summary.frames_transferred, 2000);
    assert_eq!(position.borrow().frames_transferred, 2000);
    assert!(!controller.is_playing());
    assert!(!controller.flags().stop_requested());
}

#[test]
fn test_second_play_refused_while_playing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "long.wav", 8000, 2, 16000);
    let controller = PlaybackController::new();

    let handle = controller
        .play(PlayRequest::new(&path).with_device("null"))
        .unwrap()
        .expect("session should start");
    assert!(controller.is_playing());
    assert!(controller.play(PlayRequest::new(&path).with_device("null")).unwrap().is_none());

    controller.stop();
    let summary = handle.join().unwrap().unwrap();
    assert_eq!(summary.outcome, TransferOutcome::Cancelled);
    assert!(!controller.is_playing());
}

#[test]
fn test_stop_twice_ends_session_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_ramp_wav(dir.path(), "long.wav", 8000, 2, 16000);
    let controller = PlaybackController::new();

    let handle = controller
        .play(PlayRequest::new(path).with_device("null"))
        .unwrap()
        .expect("session should start");
    controller.stop();
    controller.stop();
    let summary = handle.join().unwrap().unwrap();

    assert_eq!(summary.outcome, TransferOutcome::Cancelled);
    assert_eq!(summary.states.iter().filter(|s| **s == SessionState::Stopped).count(), 1);
    assert!(summary.frames_transferred < 16000);
}
