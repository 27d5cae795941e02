//! Device fault recovery
//!
//! Classifies a device fault and tries to bring the device back to a usable
//! state without ending the session:
//!
//! - **Underrun**: re-prepare the device.
//! - **Suspended**: poll `resume` at a fixed interval while the device
//!   answers "try again"; if resume is refused outright (or never succeeds
//!   within the poll budget), fall back to re-preparing.
//!
//! Each condition has its own budget of consecutive recoveries. A period
//! that transfers without a fault resets both budgets.

use crate::device::{DeviceError, PcmDevice};
use pcmflow_common::config::RecoveryConfig;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Recovery limits
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    /// Consecutive recoveries of one condition before giving up
    pub max_retries: u32,
    /// Interval between resume attempts
    pub suspend_poll: Duration,
    /// Resume attempts before falling back to prepare
    pub suspend_max_polls: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for RecoveryPolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            suspend_poll: Duration::from_millis(config.suspend_poll_ms),
            suspend_max_polls: config.suspend_max_polls,
        }
    }
}

/// Recoverable fault condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCondition {
    Underrun,
    Suspended,
}

impl FaultCondition {
    /// `None` for faults no recovery applies to
    pub fn classify(err: &DeviceError) -> Option<Self> {
        match err {
            DeviceError::Underrun => Some(FaultCondition::Underrun),
            DeviceError::Suspended => Some(FaultCondition::Suspended),
            _ => None,
        }
    }
}

/// Result of one recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Device is usable again; the engine must restart it lazily
    Resumed,
    /// Fault is fatal for the session
    Aborted,
}

/// Recovers a device from transient faults within a retry budget
#[derive(Debug)]
pub struct RecoveryController {
    policy: RecoveryPolicy,
    consecutive_underruns: u32,
    consecutive_suspends: u32,
    total: u32,
}

impl RecoveryController {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            consecutive_underruns: 0,
            consecutive_suspends: 0,
            total: 0,
        }
    }

    /// Successful recoveries over the session
    pub fn recoveries(&self) -> u32 {
        self.total
    }

    /// A period went through without a fault.
    pub fn period_completed(&mut self) {
        self.consecutive_underruns = 0;
        self.consecutive_suspends = 0;
    }

    /// Attempt to recover `device` from `err`.
    ///
    /// # Returns
    /// [`RecoveryOutcome::Resumed`] when the device was re-prepared or
    /// resumed; [`RecoveryOutcome::Aborted`] when the fault is not
    /// recoverable, the budget for its condition is spent, or the recovery
    /// call itself failed.
    pub fn recover(&mut self, device: &mut dyn PcmDevice, err: &DeviceError) -> RecoveryOutcome {
        let Some(condition) = FaultCondition::classify(err) else {
            error!("Unrecoverable device error: {}", err);
            return RecoveryOutcome::Aborted;
        };

        let attempt = match condition {
            FaultCondition::Underrun => {
                self.consecutive_underruns += 1;
                self.consecutive_underruns
            }
            FaultCondition::Suspended => {
                self.consecutive_suspends += 1;
                self.consecutive_suspends
            }
        };
        if attempt > self.policy.max_retries {
            error!(
                "Giving up after {} consecutive {:?} recoveries",
                self.policy.max_retries, condition
            );
            return RecoveryOutcome::Aborted;
        }

        let outcome = match condition {
            FaultCondition::Underrun => {
                warn!(
                    "Buffer underrun, re-preparing device (attempt {}/{})",
                    attempt, self.policy.max_retries
                );
                self.prepare(device)
            }
            FaultCondition::Suspended => {
                warn!(
                    "Device suspended, waiting for resume (attempt {}/{})",
                    attempt, self.policy.max_retries
                );
                self.resume(device)
            }
        };
        if outcome == RecoveryOutcome::Resumed {
            self.total += 1;
        }
        outcome
    }

    fn prepare(&self, device: &mut dyn PcmDevice) -> RecoveryOutcome {
        match device.prepare() {
            Ok(()) => RecoveryOutcome::Resumed,
            Err(e) => {
                error!("Cannot re-prepare device: {}", e);
                RecoveryOutcome::Aborted
            }
        }
    }

    fn resume(&self, device: &mut dyn PcmDevice) -> RecoveryOutcome {
        for poll in 0..self.policy.suspend_max_polls {
            match device.resume() {
                Ok(()) => {
                    info!("Device resumed after {} polls", poll);
                    return RecoveryOutcome::Resumed;
                }
                Err(DeviceError::Again) => std::thread::sleep(self.policy.suspend_poll),
                Err(e) => {
                    debug!("Resume refused ({}), falling back to prepare", e);
                    break;
                }
            }
        }
        self.prepare(device)
    }
}
