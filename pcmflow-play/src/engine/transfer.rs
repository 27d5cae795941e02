//! Transfer engine
//!
//! Moves frames from a [`FrameSource`] to a negotiated [`PcmDevice`] one
//! period at a time, by one of two paths:
//!
//! - **Copy** (`ReadWrite`): read a period into a staging buffer, then write
//!   it; partial writes resume from where the device stopped accepting.
//! - **Direct** (`Direct`): query free space, start the device or wait for
//!   readiness when less than a period is free, then let the source fill a
//!   device-owned window which is committed afterwards.
//!
//! Faults go through the [`RecoveryController`]; after a recovery the
//! device is restarted lazily on the next loop iteration. Frames a failed or
//! short commit did not take are held and committed again before the source
//! is read any further. A stop is only observed between periods.
//!
//! # Session states
//!
//! ```text
//! Idle → Prepared → Running ⇄ Prepared (recovery)
//!                   Running → Draining → Stopped
//!        any active state   → Stopped  (stop request)
//!                   Running → Faulted  (recovery exhausted)
//! ```

use super::negotiator::DeviceConfig;
use super::progress::{Progress, ProgressSink};
use super::recovery::{RecoveryController, RecoveryOutcome, RecoveryPolicy};
use crate::control::PlaybackFlags;
use crate::device::{DeviceError, DeviceState, PcmDevice};
use crate::error::{Error, Result};
use crate::source::FrameSource;
use pcmflow_common::TransferMode;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Lifecycle of one playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Prepared,
    Running,
    Draining,
    Stopped,
    Faulted,
}

impl SessionState {
    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Prepared)
                | (Prepared, Running)
                | (Running, Prepared)
                | (Prepared, Draining)
                | (Running, Draining)
                | (Draining, Stopped)
                | (Prepared, Stopped)
                | (Running, Stopped)
                | (Prepared, Faulted)
                | (Running, Faulted)
                | (Draining, Faulted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Faulted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Position and state of one playback run
#[derive(Debug, Clone)]
pub struct TransferSession {
    frames_total: Option<u64>,
    frames_read: u64,
    frames_transferred: u64,
    frames_lost: u64,
    state: SessionState,
    pending_restart: bool,
    history: Vec<SessionState>,
}

impl TransferSession {
    pub fn new(frames_total: Option<u64>) -> Self {
        Self {
            frames_total,
            frames_read: 0,
            frames_transferred: 0,
            frames_lost: 0,
            state: SessionState::Idle,
            pending_restart: true,
            history: vec![SessionState::Idle],
        }
    }

    pub fn frames_total(&self) -> Option<u64> {
        self.frames_total
    }

    /// Frames pulled from the source
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Frames the device accepted
    pub fn frames_transferred(&self) -> u64 {
        self.frames_transferred
    }

    /// Frames read from the source but discarded by a stop before the
    /// device accepted them
    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state the session has been in, in order
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Frames to request next: one period, or what is left of a known total
    fn next_request(&self, period_frames: usize) -> usize {
        match self.frames_total {
            Some(total) => (total.saturating_sub(self.frames_read)).min(period_frames as u64) as usize,
            None => period_frames,
        }
    }

    fn transition(&mut self, next: SessionState, sink: &mut dyn ProgressSink) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("Unexpected session transition {} -> {}", self.state, next);
        }
        trace!("Session {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        sink.on_state(next);
    }

    fn progress(&self, sample_rate: u32) -> Progress {
        Progress {
            frames_transferred: self.frames_transferred,
            frames_total: self.frames_total,
            sample_rate,
        }
    }
}

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferOutcome {
    /// Source exhausted and the device drained
    Completed,
    /// Stop requested
    Cancelled,
}

/// Report of a finished session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSummary {
    pub outcome: TransferOutcome,
    pub frames_total: Option<u64>,
    pub frames_transferred: u64,
    pub frames_lost: u64,
    pub recoveries: u32,
    pub elapsed: Duration,
    /// Final session state history
    pub states: Vec<SessionState>,
}

/// Why a transfer loop returned
enum LoopExit {
    Exhausted,
    Cancelled,
}

/// Drives one session on a negotiated device
pub struct TransferEngine<'d> {
    device: &'d mut dyn PcmDevice,
    config: DeviceConfig,
    recovery: RecoveryController,
}

impl<'d> TransferEngine<'d> {
    pub fn new(device: &'d mut dyn PcmDevice, config: DeviceConfig, policy: RecoveryPolicy) -> Self {
        Self {
            device,
            config,
            recovery: RecoveryController::new(policy),
        }
    }

    /// Play `source` to completion, cancellation or a fatal error.
    ///
    /// The stop flag is checked at every period boundary. On completion the
    /// device drains queued frames before it is stopped; on cancellation
    /// queued frames are discarded.
    ///
    /// # Errors
    /// - `Source`: the source failed or ended before its declared length
    /// - `Device`: a fault that recovery could not clear
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        flags: &PlaybackFlags,
        sink: &mut dyn ProgressSink,
    ) -> Result<TransferSummary> {
        let started = Instant::now();
        let mut session = TransferSession::new(source.total_frames());

        if self.device.state() != DeviceState::Prepared {
            self.device.prepare()?;
        }
        session.transition(SessionState::Prepared, sink);
        debug!(
            "Transfer starting: {} path, period {} frames, total {:?}",
            self.config.transfer, self.config.period_frames, session.frames_total
        );

        let result = match self.config.transfer {
            TransferMode::ReadWrite => self.copy_loop(&mut session, source, flags, sink),
            TransferMode::Direct => self.direct_loop(&mut session, source, flags, sink),
        };

        let outcome = match result.and_then(|exit| self.check_exhausted(&session, exit)) {
            Ok(LoopExit::Exhausted) => {
                self.finish(&mut session, sink);
                TransferOutcome::Completed
            }
            Ok(LoopExit::Cancelled) => {
                info!("Stop requested, discarding queued frames");
                self.stop_device();
                session.transition(SessionState::Stopped, sink);
                TransferOutcome::Cancelled
            }
            Err(e) => {
                self.stop_device();
                if !session.state.is_terminal() {
                    session.transition(SessionState::Stopped, sink);
                }
                return Err(e);
            }
        };

        let summary = TransferSummary {
            outcome,
            frames_total: session.frames_total,
            frames_transferred: session.frames_transferred,
            frames_lost: session.frames_lost,
            recoveries: self.recovery.recoveries(),
            elapsed: started.elapsed(),
            states: session.history.clone(),
        };
        info!(
            "Transfer {:?}: {} frames transferred, {} lost, {} recoveries",
            summary.outcome, summary.frames_transferred, summary.frames_lost, summary.recoveries
        );
        Ok(summary)
    }

    /// A short source with a declared length is truncated, not finished.
    fn check_exhausted(&self, session: &TransferSession, exit: LoopExit) -> Result<LoopExit> {
        if let (LoopExit::Exhausted, Some(total)) = (&exit, session.frames_total) {
            if session.frames_read < total {
                return Err(Error::Source(format!(
                    "stream ended after {} of {} frames",
                    session.frames_read, total
                )));
            }
        }
        Ok(exit)
    }

    fn copy_loop(
        &mut self,
        session: &mut TransferSession,
        source: &mut dyn FrameSource,
        flags: &PlaybackFlags,
        sink: &mut dyn ProgressSink,
    ) -> Result<LoopExit> {
        let frame_bytes = self.config.format.frame_bytes();
        let mut block = vec![0u8; self.config.period_bytes()];

        loop {
            if flags.stop_requested() {
                return Ok(LoopExit::Cancelled);
            }
            let want = session.next_request(self.config.period_frames);
            if want == 0 {
                return Ok(LoopExit::Exhausted);
            }

            let got = source.read_frames(&mut block[..want * frame_bytes], want)?;
            session.frames_read += got as u64;

            let mut offset = 0;
            while offset < got {
                match self.device.write_interleaved(&block[offset * frame_bytes..got * frame_bytes]) {
                    Ok(0) | Err(DeviceError::Again) => {
                        if let Err(e) = self.device.wait(Some(self.config.period_time)) {
                            self.handle_fault(session, &e, sink)?;
                        }
                    }
                    Ok(written) => {
                        offset += written;
                        session.frames_transferred += written as u64;
                    }
                    Err(e) => self.handle_fault(session, &e, sink)?,
                }
            }

            if got > 0 {
                self.period_done(session, sink);
            }
            if got < want {
                return Ok(LoopExit::Exhausted);
            }
        }
    }

    fn direct_loop(
        &mut self,
        session: &mut TransferSession,
        source: &mut dyn FrameSource,
        flags: &PlaybackFlags,
        sink: &mut dyn ProgressSink,
    ) -> Result<LoopExit> {
        let frame_bytes = self.config.format.frame_bytes();
        // Frames read from the source that the device has not accepted yet.
        // They go into the next window ahead of any new source frames.
        let mut held: Vec<u8> = Vec::new();
        let mut window_copy: Vec<u8> = Vec::with_capacity(self.config.period_bytes());
        let mut source_done = false;

        loop {
            if flags.stop_requested() {
                session.frames_lost += (held.len() / frame_bytes) as u64;
                return Ok(LoopExit::Cancelled);
            }
            let held_frames = held.len() / frame_bytes;
            let want = if held_frames > 0 {
                held_frames.min(self.config.period_frames)
            } else if source_done {
                0
            } else {
                session.next_request(self.config.period_frames)
            };
            if want == 0 {
                return Ok(LoopExit::Exhausted);
            }

            let avail = match self.device.avail() {
                Ok(avail) => avail,
                Err(e) => {
                    self.handle_fault(session, &e, sink)?;
                    continue;
                }
            };

            if avail < want {
                if session.pending_restart && self.device.state() != DeviceState::Running {
                    match self.device.start() {
                        Ok(()) => {
                            session.pending_restart = false;
                            session.transition(SessionState::Running, sink);
                        }
                        Err(e) => self.handle_fault(session, &e, sink)?,
                    }
                } else {
                    session.pending_restart = false;
                    if let Err(e) = self.device.wait(None) {
                        self.handle_fault(session, &e, sink)?;
                    }
                }
                continue;
            }

            let area = match self.device.mmap_begin(want) {
                Ok(area) => area,
                Err(e) => {
                    self.handle_fault(session, &e, sink)?;
                    continue;
                }
            };
            let granted = area.frames();
            let replaying = held_frames > 0;
            let filled = {
                let region = self.device.mmap_region(&area);
                if replaying {
                    let frames = granted.min(held_frames);
                    let bytes = frames * frame_bytes;
                    region[..bytes].copy_from_slice(&held[..bytes]);
                    Ok(frames)
                } else {
                    match source.read_frames(region, granted) {
                        Ok(frames) => {
                            window_copy.clear();
                            window_copy.extend_from_slice(&region[..frames * frame_bytes]);
                            Ok(frames)
                        }
                        Err(e) => Err(e),
                    }
                }
            };
            let filled = match filled {
                Ok(filled) => filled,
                Err(e) => {
                    if let Err(commit_err) = self.device.mmap_commit(area, 0) {
                        debug!("Releasing window after source error failed: {}", commit_err);
                    }
                    return Err(e);
                }
            };
            if !replaying {
                session.frames_read += filled as u64;
                if filled < granted {
                    source_done = true;
                }
            }

            let accepted = match self.device.mmap_commit(area, filled) {
                Ok(committed) => committed.min(filled),
                Err(e) => {
                    warn!("Commit of {} frames failed: {}", filled, e);
                    self.handle_fault(session, &e, sink)?;
                    0
                }
            };
            if accepted < filled {
                debug!("Holding {} uncommitted frames for the next window", filled - accepted);
            }
            if replaying {
                held.drain(..accepted * frame_bytes);
            } else if accepted < filled {
                held.extend_from_slice(&window_copy[accepted * frame_bytes..filled * frame_bytes]);
            }

            if accepted > 0 {
                session.frames_transferred += accepted as u64;
                self.period_done(session, sink);
            }
        }
    }

    /// Bookkeeping after a period reached the device.
    fn period_done(&mut self, session: &mut TransferSession, sink: &mut dyn ProgressSink) {
        if session.state == SessionState::Prepared {
            session.transition(SessionState::Running, sink);
        }
        if self.device.state() == DeviceState::Running {
            session.pending_restart = false;
        }
        self.recovery.period_completed();
        sink.on_period(&session.progress(self.config.format.sample_rate));
    }

    /// Hand a device fault to recovery; `Err` when the session must end.
    fn handle_fault(
        &mut self,
        session: &mut TransferSession,
        err: &DeviceError,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        match self.recovery.recover(&mut *self.device, err) {
            RecoveryOutcome::Resumed => {
                session.pending_restart = true;
                session.transition(SessionState::Prepared, sink);
                Ok(())
            }
            RecoveryOutcome::Aborted => {
                session.transition(SessionState::Faulted, sink);
                Err(Error::Device(err.clone()))
            }
        }
    }

    /// Let queued frames play out, then stop the device.
    fn finish(&mut self, session: &mut TransferSession, sink: &mut dyn ProgressSink) {
        session.transition(SessionState::Draining, sink);
        if let Err(e) = self.device.drain() {
            warn!("Drain did not complete: {}", e);
        }
        self.stop_device();
        session.transition(SessionState::Stopped, sink);
    }

    fn stop_device(&mut self) {
        if let Err(e) = self.device.drop_pending() {
            debug!("Dropping device frames failed: {}", e);
        }
    }
}
