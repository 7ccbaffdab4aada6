//! Per-session bookkeeping owned by the session loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Greeted,
    CommandWait,
    Dispatching,
    BulkReadWait,
    Closing,
    Closed,
}

/// Last-activity clock, shared with the connection's activity callback.
#[derive(Debug, Clone)]
pub struct Activity {
    origin: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Activity {
    fn new(origin: Instant) -> Self {
        Self {
            origin,
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last())
    }
}

/// State the loop keeps for one connection.
///
/// Protocol state (authentication, selected mailbox, open transaction)
/// lives in the protocol value, not here.
#[derive(Debug)]
pub struct SessionContext {
    id: u64,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    phase: SessionPhase,
    bad_commands: usize,
    started: Instant,
    activity: Activity,
}

impl SessionContext {
    pub fn new(id: u64, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        let started = Instant::now();
        Self {
            id,
            local,
            remote,
            phase: SessionPhase::Connecting,
            bad_commands: 0,
            started,
            activity: Activity::new(started),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    /// Count an unrecognized or invalid command.
    pub fn record_bad_command(&mut self) {
        self.bad_commands += 1;
    }

    pub fn bad_commands(&self) -> usize {
        self.bad_commands
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn activity(&self) -> Activity {
        self.activity.clone()
    }

    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }
}
