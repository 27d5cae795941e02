//! Playback engine: negotiation, transfer, recovery and progress

pub mod negotiator;
pub mod progress;
pub mod recovery;
pub mod transfer;

pub use negotiator::{negotiate, DeviceConfig, NegotiationHints, NegotiationStep};
pub use progress::{LogProgress, NoProgress, Progress, ProgressSink, WatchProgress};
pub use recovery::{RecoveryController, RecoveryOutcome, RecoveryPolicy};
pub use transfer::{SessionState, TransferEngine, TransferOutcome, TransferSession, TransferSummary};
