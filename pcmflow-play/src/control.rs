//! Cooperative playback control
//!
//! A front end (GUI or CLI signal handler) and the session thread share
//! exactly two atomic flags. The front end raises `stop_requested`; the
//! transfer engine polls it at every period boundary and winds down on its
//! own. Nothing else crosses the thread boundary except the position
//! channel, which only the session writes.

use crate::engine::{Progress, TransferSummary, WatchProgress};
use crate::error::{Error, Result};
use crate::player::{PlayRequest, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Name of the background thread running a session
pub const SESSION_THREAD_NAME: &str = "pcmflow-session";

/// Flags shared between a front end and the session thread
#[derive(Debug, Default)]
pub struct PlaybackFlags {
    is_playing: AtomicBool,
    stop_requested: AtomicBool,
}

impl PlaybackFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running session to stop at its next period boundary.
    ///
    /// # Returns
    /// `true` if this call raised the flag, `false` if it was already raised
    pub fn request_stop(&self) -> bool {
        !self.stop_requested.swap(true, Ordering::AcqRel)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Acquire)
    }

    /// Mark a session as starting. `false` if one is already playing.
    fn try_claim(&self) -> bool {
        let claimed = self
            .is_playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.stop_requested.store(false, Ordering::Release);
        }
        claimed
    }

    /// Mark the session as ended; clears both flags.
    fn release(&self) {
        self.stop_requested.store(false, Ordering::Release);
        self.is_playing.store(false, Ordering::Release);
    }
}

/// Handle to a session running on its own thread
pub type SessionHandle = JoinHandle<Result<TransferSummary>>;

/// Starts and stops playback sessions on a background thread
///
/// At most one session runs at a time. Each session opens its own device
/// handle and owns its buffers; the controller only holds the shared flags
/// and the position channel.
#[derive(Debug)]
pub struct PlaybackController {
    flags: Arc<PlaybackFlags>,
    position: Arc<watch::Sender<Progress>>,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackController {
    pub fn new() -> Self {
        let (position, _) = watch::channel(Progress::default());
        Self {
            flags: Arc::new(PlaybackFlags::new()),
            position: Arc::new(position),
        }
    }

    pub fn flags(&self) -> Arc<PlaybackFlags> {
        Arc::clone(&self.flags)
    }

    /// Receiver for the position indicator, updated once per period
    pub fn position(&self) -> watch::Receiver<Progress> {
        self.position.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        self.flags.is_playing()
    }

    /// Start playing `request` on a background thread.
    ///
    /// # Returns
    /// - `Ok(Some(handle))`: session started; joining yields its summary
    /// - `Ok(None)`: a session is already playing, request refused
    ///
    /// # Errors
    /// `Io` if the session thread cannot be spawned.
    pub fn play(&self, request: PlayRequest) -> Result<Option<SessionHandle>> {
        if !self.flags.try_claim() {
            info!("Playback already in progress, ignoring play request");
            return Ok(None);
        }
        self.position.send_replace(Progress::default());

        let flags = Arc::clone(&self.flags);
        let position = Arc::clone(&self.position);
        let spawned = thread::Builder::new()
            .name(SESSION_THREAD_NAME.to_string())
            .spawn(move || {
                let mut sink = WatchProgress::new(position);
                let result = Session::open(&request).and_then(|session| session.run(&flags, &mut sink));
                if let Err(e) = &result {
                    error!("Session for {} failed: {}", request.path.display(), e);
                }
                flags.release();
                debug!("Session thread exiting");
                result
            });

        match spawned {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                self.flags.release();
                Err(Error::Io(e))
            }
        }
    }

    /// Request a cooperative stop. Safe to call when nothing is playing.
    pub fn stop(&self) {
        if self.flags.is_playing() && self.flags.request_stop() {
            info!("Stop requested");
        }
    }
}
