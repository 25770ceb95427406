//! Live progress reporting
//!
//! The dispatch task is the only writer. Observers (the control socket, the
//! daemon's own logging) read through [`ProgressSink::snapshot`] at any time.
//! Every cell is individually guarded so a poll never blocks a send for
//! longer than a single field update.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::run::RunPhase;

/// Per-sender status label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderStatus {
    Ready,
    Sending,
    Sent,
    /// A dry-run send that was simulated
    Simulated,
    /// The last recipient looked at was already in the ledger
    Skipped,
    Errored(String),
    AuthFailed,
    /// Inter-round countdown, in whole seconds remaining
    Waiting(u64),
    Exhausted,
    Cancelled,
}

impl SenderStatus {
    /// Whether the inter-round countdown may overwrite this status.
    #[must_use]
    pub const fn accepts_countdown(&self) -> bool {
        !matches!(
            self,
            Self::AuthFailed | Self::Errored(_) | Self::Skipped | Self::Exhausted | Self::Cancelled
        )
    }
}

impl fmt::Display for SenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::Sending => f.write_str("Sending..."),
            Self::Sent => f.write_str("Sent"),
            Self::Simulated => f.write_str("Sent (dry run)"),
            Self::Skipped => f.write_str("Skipped"),
            Self::Errored(reason) => write!(f, "Error: {reason}"),
            Self::AuthFailed => f.write_str("Auth failed"),
            Self::Waiting(secs) => write!(f, "Waiting {secs}s"),
            Self::Exhausted => f.write_str("Exhausted"),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// What happened to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientOutcome {
    Sent,
    Simulated,
    Skipped,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientReport {
    pub address: String,
    pub outcome: RecipientOutcome,
}

#[derive(Debug)]
struct SenderProgress {
    sender: Arc<str>,
    target: RwLock<Option<String>>,
    status: RwLock<SenderStatus>,
    sent: AtomicU32,
    recipients: RwLock<Vec<RecipientReport>>,
}

impl SenderProgress {
    fn new(sender: Arc<str>) -> Self {
        Self {
            sender,
            target: RwLock::new(None),
            status: RwLock::new(SenderStatus::Ready),
            sent: AtomicU32::new(0),
            recipients: RwLock::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            sender: self.sender.to_string(),
            target: self.target.read().clone(),
            sent: self.sent.load(Ordering::Acquire),
            status: self.status.read().clone(),
            recipients: self.recipients.read().clone(),
        }
    }
}

/// Thread-safe progress table keyed by sender.
#[derive(Debug, Default)]
pub struct ProgressSink {
    rows: RwLock<Vec<Arc<SenderProgress>>>,
    index: RwLock<AHashMap<Arc<str>, usize>>,
    subject: RwLock<Option<String>>,
    total_sent: AtomicU64,
    total_goal: AtomicU64,
    rounds: AtomicU64,
    ledger_failures: AtomicU64,
}

impl ProgressSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row for `sender`; rows keep the order they were registered in.
    pub fn register(&self, sender: &Arc<str>) {
        let mut index = self.index.write();
        if index.contains_key(sender) {
            return;
        }

        let mut rows = self.rows.write();
        index.insert(Arc::clone(sender), rows.len());
        rows.push(Arc::new(SenderProgress::new(Arc::clone(sender))));
    }

    fn row(&self, sender: &str) -> Option<Arc<SenderProgress>> {
        let position = *self.index.read().get(sender)?;
        self.rows.read().get(position).cloned()
    }

    pub fn set_status(&self, sender: &str, status: SenderStatus) {
        if let Some(row) = self.row(sender) {
            *row.status.write() = status;
        }
    }

    /// Set the countdown label on every sender whose status allows it.
    pub fn set_countdown(&self, remaining_secs: u64) {
        for row in self.rows.read().iter() {
            let mut status = row.status.write();
            if status.accepts_countdown() {
                *status = SenderStatus::Waiting(remaining_secs);
            }
        }
    }

    /// Mark every sender whose status is still live as cancelled.
    pub fn mark_cancelled(&self) {
        for row in self.rows.read().iter() {
            let mut status = row.status.write();
            if status.accepts_countdown() {
                *status = SenderStatus::Cancelled;
            }
        }
    }

    #[must_use]
    pub fn status(&self, sender: &str) -> Option<SenderStatus> {
        self.row(sender).map(|row| row.status.read().clone())
    }

    pub fn set_target(&self, sender: &str, recipient: &str) {
        if let Some(row) = self.row(sender) {
            *row.target.write() = Some(recipient.to_string());
        }
    }

    /// Count one completed (or simulated) send for `sender`.
    pub fn increment_sent(&self, sender: &str) {
        if let Some(row) = self.row(sender) {
            row.sent.fetch_add(1, Ordering::AcqRel);
            self.total_sent.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn record_outcome(&self, sender: &str, address: &str, outcome: RecipientOutcome) {
        if let Some(row) = self.row(sender) {
            row.recipients.write().push(RecipientReport {
                address: address.to_string(),
                outcome,
            });
        }
    }

    pub fn set_subject(&self, subject: &str) {
        *self.subject.write() = Some(subject.to_string());
    }

    pub fn set_goal(&self, goal: u64) {
        self.total_goal.store(goal, Ordering::Release);
    }

    pub fn increment_rounds(&self) -> u64 {
        self.rounds.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn increment_ledger_failures(&self) {
        self.ledger_failures.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total_goal(&self) -> u64 {
        self.total_goal.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    /// A consistent-enough copy of the table for display.
    ///
    /// Individual cells are read atomically; the snapshot as a whole is not,
    /// which is fine for a poller.
    #[must_use]
    pub fn snapshot(&self, run_id: &str, phase: RunPhase, dry_run: bool) -> ProgressSnapshot {
        let rows: Vec<_> = self.rows.read().iter().cloned().collect();

        ProgressSnapshot {
            run_id: run_id.to_string(),
            phase,
            dry_run,
            subject: self.subject.read().clone(),
            total_sent: self.total_sent(),
            total_goal: self.total_goal(),
            rounds: self.rounds(),
            ledger_failures: self.ledger_failures.load(Ordering::Acquire),
            senders: rows.iter().map(|row| row.snapshot()).collect(),
        }
    }
}

/// Point-in-time copy of one sender's row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSnapshot {
    pub sender: String,
    pub target: Option<String>,
    pub sent: u32,
    pub status: SenderStatus,
    pub recipients: Vec<RecipientReport>,
}

/// Point-in-time copy of a run's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: String,
    pub phase: RunPhase,
    pub dry_run: bool,
    pub subject: Option<String>,
    pub total_sent: u64,
    pub total_goal: u64,
    pub rounds: u64,
    pub ledger_failures: u64,
    pub senders: Vec<SenderSnapshot>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn sender(&self, sender: &str) -> Option<&SenderSnapshot> {
        self.senders.iter().find(|row| row.sender == sender)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sink(senders: &[&str]) -> ProgressSink {
        let sink = ProgressSink::new();
        for sender in senders {
            sink.register(&Arc::from(*sender));
        }
        sink
    }

    #[test]
    fn labels() {
        assert_eq!(SenderStatus::Sending.to_string(), "Sending...");
        assert_eq!(
            SenderStatus::Errored("Rejected: bad".to_string()).to_string(),
            "Error: Rejected: bad"
        );
        assert_eq!(SenderStatus::AuthFailed.to_string(), "Auth failed");
        assert_eq!(SenderStatus::Waiting(7).to_string(), "Waiting 7s");
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let sink = sink(&["b@x.com", "a@x.com"]);
        sink.register(&Arc::from("b@x.com"));

        let snapshot = sink.snapshot("run", RunPhase::Running, false);
        let senders: Vec<_> = snapshot.senders.iter().map(|s| s.sender.as_str()).collect();
        assert_eq!(senders, vec!["b@x.com", "a@x.com"]);
    }

    #[test]
    fn increment_updates_row_and_total() {
        let sink = sink(&["a@x.com", "b@x.com"]);
        sink.set_goal(4);
        sink.increment_sent("a@x.com");
        sink.increment_sent("a@x.com");
        sink.increment_sent("b@x.com");
        sink.increment_sent("unknown@x.com");

        let snapshot = sink.snapshot("run", RunPhase::Running, false);
        assert_eq!(snapshot.total_sent, 3);
        assert_eq!(snapshot.total_goal, 4);
        assert_eq!(snapshot.sender("a@x.com").map(|s| s.sent), Some(2));
    }

    #[test]
    fn countdown_skips_terminal_labels() {
        let sink = sink(&["a@x.com", "b@x.com", "c@x.com", "d@x.com"]);
        sink.set_status("a@x.com", SenderStatus::Sent);
        sink.set_status("b@x.com", SenderStatus::AuthFailed);
        sink.set_status("c@x.com", SenderStatus::Errored("x".to_string()));
        sink.set_status("d@x.com", SenderStatus::Skipped);

        sink.set_countdown(12);

        assert_eq!(sink.status("a@x.com"), Some(SenderStatus::Waiting(12)));
        assert_eq!(sink.status("b@x.com"), Some(SenderStatus::AuthFailed));
        assert_eq!(
            sink.status("c@x.com"),
            Some(SenderStatus::Errored("x".to_string()))
        );
        assert_eq!(sink.status("d@x.com"), Some(SenderStatus::Skipped));
    }

    #[test]
    fn concurrent_reads_during_writes() {
        let sink = Arc::new(sink(&["a@x.com"]));
        sink.set_goal(1_000);

        let reader = {
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1_000 {
                    let snapshot = sink.snapshot("run", RunPhase::Running, false);
                    assert!(snapshot.total_sent >= last);
                    assert!(snapshot.total_sent <= snapshot.total_goal);
                    last = snapshot.total_sent;
                }
            })
        };

        for _ in 0..1_000 {
            sink.increment_sent("a@x.com");
        }

        reader.join().unwrap();
        assert_eq!(sink.total_sent(), 1_000);
    }
}
