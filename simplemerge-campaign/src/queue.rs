//! Per-sender recipient queues

use std::sync::Arc;

use crate::{ledger::DedupLedger, types::Credential, types::Recipient};

/// The next recipient to send to, plus anything skipped on the way there.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Pending {
    /// `None` when the queue ran out
    pub recipient: Option<Recipient>,
    /// Addresses passed over because they were already in the ledger
    pub skipped: Vec<String>,
}

/// One sender's ordered backlog for the current run.
///
/// The cursor never moves backwards, `sent` never exceeds `max`, and the
/// cursor never passes the end of the recipient list.
#[derive(Debug)]
pub struct SenderQueue {
    sender: Arc<str>,
    credential: Credential,
    recipients: Vec<Recipient>,
    cursor: usize,
    sent: u32,
    max: u32,
}

impl SenderQueue {
    #[must_use]
    pub fn new(
        sender: Arc<str>,
        credential: Credential,
        recipients: Vec<Recipient>,
        max: u32,
    ) -> Self {
        Self {
            sender,
            credential,
            recipients,
            cursor: 0,
            sent: 0,
            max,
        }
    }

    #[must_use]
    pub const fn sender(&self) -> &Arc<str> {
        &self.sender
    }

    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub const fn sent(&self) -> u32 {
        self.sent
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// The most this queue can contribute to the run's goal.
    #[must_use]
    pub fn goal(&self) -> u64 {
        u64::try_from(self.recipients.len())
            .unwrap_or(u64::MAX)
            .min(u64::from(self.max))
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.sent < self.max && self.cursor < self.recipients.len()
    }

    /// Advance past ledger hits to the next recipient needing a send.
    ///
    /// Skipped recipients do not use up any of the send allowance.
    pub fn next_pending(&mut self, ledger: &DedupLedger, subject: &str) -> Pending {
        let mut pending = Pending::default();
        if self.sent >= self.max {
            return pending;
        }

        pending.skipped = self.skip_known(ledger, subject);
        pending.recipient = self.recipients.get(self.cursor).cloned();
        pending
    }

    /// Move the cursor past any leading recipients already in the ledger.
    ///
    /// A queue that has used up its allowance is left untouched, since it
    /// will never reach those recipients.
    pub fn skip_known(&mut self, ledger: &DedupLedger, subject: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        if self.sent >= self.max {
            return skipped;
        }

        while let Some(recipient) = self.recipients.get(self.cursor) {
            if !ledger.contains(&recipient.address, subject) {
                break;
            }
            skipped.push(recipient.address.clone());
            self.cursor += 1;
        }
        skipped
    }

    /// Consume the recipient at the cursor.
    pub fn advance(&mut self, success: bool) {
        if self.cursor < self.recipients.len() {
            self.cursor += 1;
        }
        if success {
            self.sent = self.sent.saturating_add(1).min(self.max);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{policy::RetryPolicy, testing::MemoryLedger};

    fn queue(addresses: &[&str], max: u32) -> SenderQueue {
        SenderQueue::new(
            Arc::from("me@x.com"),
            Credential::new("me@x.com", "token"),
            addresses.iter().map(Recipient::new).collect(),
            max,
        )
    }

    async fn ledger(sent: &[&str]) -> DedupLedger {
        let store = sent
            .iter()
            .fold(MemoryLedger::new(), |store, address| store.with_sent(address, "Subj"));
        DedupLedger::load(Arc::new(store), RetryPolicy::default()).await
    }

    #[tokio::test]
    async fn next_pending_skips_ledger_hits_without_spending_allowance() {
        let ledger = ledger(&["a@x.com", "b@x.com"]).await;
        let mut queue = queue(&["a@x.com", "b@x.com", "c@x.com"], 1);

        let pending = queue.next_pending(&ledger, "Subj");

        assert_eq!(pending.skipped, vec!["a@x.com", "b@x.com"]);
        assert_eq!(pending.recipient, Some(Recipient::new("c@x.com")));
        assert_eq!(queue.cursor(), 2);
        assert_eq!(queue.sent(), 0);
        assert!(queue.has_capacity());
    }

    #[tokio::test]
    async fn next_pending_reports_exhaustion() {
        let ledger = ledger(&["a@x.com"]).await;
        let mut queue = queue(&["a@x.com"], 5);

        let pending = queue.next_pending(&ledger, "Subj");

        assert_eq!(pending.recipient, None);
        assert_eq!(pending.skipped, vec!["a@x.com"]);
        assert!(!queue.has_capacity());
    }

    #[tokio::test]
    async fn other_subjects_are_not_deduplicated() {
        let ledger = ledger(&["a@x.com"]).await;
        let mut queue = queue(&["a@x.com"], 5);

        let pending = queue.next_pending(&ledger, "Different");
        assert_eq!(pending.recipient, Some(Recipient::new("a@x.com")));
        assert!(pending.skipped.is_empty());
    }

    #[tokio::test]
    async fn capped_queue_does_not_skip_ahead() {
        let ledger = ledger(&["a@x.com"]).await;
        let mut queue = queue(&["b@x.com", "a@x.com"], 1);

        queue.advance(true);
        assert!(queue.skip_known(&ledger, "Subj").is_empty());
        assert_eq!(queue.cursor(), 1);
        assert!(!queue.has_capacity());
    }

    #[test]
    fn advance_counts_only_successes() {
        let mut queue = queue(&["a@x.com", "b@x.com", "c@x.com"], 2);

        queue.advance(false);
        assert_eq!((queue.cursor(), queue.sent()), (1, 0));

        queue.advance(true);
        queue.advance(true);
        assert_eq!((queue.cursor(), queue.sent()), (3, 2));
        assert!(!queue.has_capacity());

        // Never passes the end
        queue.advance(true);
        assert_eq!((queue.cursor(), queue.sent()), (3, 2));
    }

    #[test]
    fn capacity_limited_by_max() {
        let mut queue = queue(&["a@x.com", "b@x.com"], 1);
        assert_eq!(queue.goal(), 1);

        queue.advance(true);
        assert!(!queue.has_capacity());
        assert_eq!(queue.cursor(), 1);
    }
}
