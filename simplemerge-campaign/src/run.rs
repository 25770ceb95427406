//! Run state shared between the dispatch task and its observers

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use ulid::Ulid;

use crate::progress::{ProgressSink, ProgressSnapshot};

/// Cooperative cancellation flag.
///
/// Setting it is idempotent and safe from any task.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns `true` only for the first request.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifecycle of a campaign run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunPhase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub(crate) struct RunState {
    pub(crate) id: Ulid,
    pub(crate) dry_run: bool,
    pub(crate) stop: StopFlag,
    pub(crate) progress: ProgressSink,
    phase: watch::Sender<RunPhase>,
}

impl RunState {
    pub(crate) fn new(dry_run: bool) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            id: Ulid::new(),
            dry_run,
            stop: StopFlag::new(),
            progress: ProgressSink::new(),
            phase,
        }
    }

    /// Move to `next` unless the run has already finished.
    pub(crate) fn transition(&self, next: RunPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if phase.is_terminal() || *phase == next {
                false
            } else {
                *phase = next;
                true
            }
        })
    }

    pub(crate) fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }
}

/// Handle to a launched run, shared by the daemon and any observer.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub(crate) state: Arc<RunState>,
}

impl RunHandle {
    pub(crate) fn new(state: RunState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Unique id of this run.
    #[must_use]
    pub fn run_id(&self) -> String {
        self.state.id.to_string()
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.state.phase()
    }

    /// `true` until the run reaches a terminal phase.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.phase().is_terminal()
    }

    /// Ask the dispatch loop to stop at its next suspension point.
    ///
    /// Returns `true` if this was the first stop request for the run.
    pub fn request_stop(&self) -> bool {
        let first = self.state.stop.request();
        if first {
            tracing::info!(run_id = %self.state.id, "Stop requested");
        }
        first
    }

    /// Point-in-time view of progress.
    #[must_use]
    pub fn poll_progress(&self) -> ProgressSnapshot {
        self.state
            .progress
            .snapshot(&self.run_id(), self.phase(), self.state.dry_run)
    }

    /// Wait until the run reaches a terminal phase and return it.
    pub async fn wait(&self) -> RunPhase {
        let mut receiver = self.state.phase.subscribe();
        match receiver.wait_for(|phase| phase.is_terminal()).await {
            Ok(phase) => *phase,
            // The sender lives as long as `self.state`, so this cannot close
            // while we hold a handle.
            Err(_) => self.phase(),
        }
    }

    pub(crate) fn stop_flag(&self) -> &StopFlag {
        &self.state.stop
    }

    pub(crate) fn progress(&self) -> &ProgressSink {
        &self.state.progress
    }
}
