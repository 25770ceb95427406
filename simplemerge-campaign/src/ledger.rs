//! The dedup ledger: every `(recipient, subject)` pair already sent
//!
//! The in-memory set is the authority for the current run. Each successful
//! send is also appended to the [`LedgerStore`] so future runs sharing the
//! subject skip the recipient. A durable write that keeps failing is
//! reported but never blocks the in-memory record.

use std::sync::Arc;

use ahash::AHashSet;
use chrono::Utc;
use simplemerge_common::{incoming, outgoing, tracing};

use crate::{
    error::LedgerError,
    policy::RetryPolicy,
    service::LedgerStore,
    types::{LedgerKey, SendRecord},
};

pub struct DedupLedger {
    entries: AHashSet<LedgerKey>,
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for DedupLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupLedger")
            .field("entries", &self.entries.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DedupLedger {
    /// Load the sent log from `store`.
    ///
    /// A read failure leaves the ledger empty; the run proceeds without
    /// dedup rather than failing.
    pub async fn load(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        let entries = match store.read_sent_log().await {
            Ok(entries) => {
                incoming!(level = DEBUG, entries = entries.len(), "Loaded sent log");
                entries
            }
            Err(err) => {
                tracing::warn!(error = %err, "Unable to read sent log, continuing without dedup");
                AHashSet::default()
            }
        };

        Self {
            entries,
            store,
            retry,
        }
    }

    #[must_use]
    pub fn contains(&self, recipient: &str, subject: &str) -> bool {
        self.entries.contains(&LedgerKey::new(recipient, subject))
    }

    /// Record a pair in memory only. Returns `false` if it was already present.
    pub fn insert(&mut self, recipient: &str, subject: &str) -> bool {
        self.entries.insert(LedgerKey::new(recipient, subject))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a successful send in memory and then durably.
    ///
    /// The in-memory insert always happens first. The durable append is
    /// retried per the configured [`RetryPolicy`].
    ///
    /// # Errors
    ///
    /// Returns the last [`LedgerError`] if every durable attempt failed.
    pub async fn record(
        &mut self,
        recipient: &str,
        subject: &str,
        sender: &str,
    ) -> Result<(), LedgerError> {
        self.insert(recipient, subject);

        let record = SendRecord {
            address: recipient.trim().to_string(),
            subject: subject.trim().to_string(),
            sender: sender.to_string(),
            sent_at: Utc::now(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.append_sent_log(&record).await {
                Ok(()) => {
                    outgoing!(level = DEBUG, attempt, "Appended sent log row");
                    return Ok(());
                }
                Err(err) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::debug!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Sent log append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        attempts = attempt,
                        "Sent log append failed; recipient may be contacted again by a future run"
                    );
                    return Err(err);
                }
            }
        }
    }
}
