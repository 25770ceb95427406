//! Unified inbox across every sender account, and replies into a thread

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use simplemerge_common::{incoming, tracing};

use crate::{
    error::TransportError,
    service::IdentityProvider,
    types::{Credential, OutgoingMessage},
};

/// Default number of threads listed per account.
pub const DEFAULT_THREADS_PER_ACCOUNT: usize = 10;

/// One conversation in an account's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// The sender account whose inbox holds the thread
    pub account: String,
    pub thread_id: String,
    pub subject: String,
    /// The other party, as shown in the last message's `From` header
    pub counterpart: String,
    pub snippet: String,
    /// Milliseconds since the Unix epoch
    pub last_message_at: i64,
    /// `Message-ID` of the last message, used to thread replies
    pub last_rfc_message_id: Option<String>,
}

/// Lists inbox threads for a single account.
#[async_trait]
pub trait InboxReader: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the provider could not be queried.
    async fn list_threads(
        &self,
        credential: &Credential,
        max: usize,
    ) -> Result<Vec<ThreadSummary>, TransportError>;
}

/// Merge the inboxes of `accounts`, newest thread first.
///
/// Accounts without a usable credential, or whose inbox cannot be read, are
/// left out.
pub async fn unified_inbox(
    identities: &Arc<dyn IdentityProvider>,
    reader: &Arc<dyn InboxReader>,
    accounts: &[String],
    max_per_account: usize,
) -> Vec<ThreadSummary> {
    let mut threads = Vec::new();

    for account in accounts {
        let Some(credential) = identities.resolve(account).await else {
            tracing::debug!(account = %account, "No credential, inbox skipped");
            continue;
        };

        match reader.list_threads(&credential, max_per_account).await {
            Ok(mut listed) => {
                incoming!(level = DEBUG, account = %account, threads = listed.len(), "Listed inbox");
                threads.append(&mut listed);
            }
            Err(err) => {
                tracing::warn!(account = %account, error = %err, "Unable to list inbox");
            }
        }
    }

    threads.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    threads
}

/// `Re: <subject>`, unless the subject already starts with `Re:`.
#[must_use]
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// A reply to an existing thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    thread: ThreadSummary,
    body: String,
}

impl Reply {
    /// # Errors
    ///
    /// Returns [`TransportError::Message`] if `body` is blank.
    pub fn new(thread: ThreadSummary, body: impl Into<String>) -> Result<Self, TransportError> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(TransportError::Message("reply body is empty".to_string()));
        }

        Ok(Self { thread, body })
    }

    #[must_use]
    pub const fn thread(&self) -> &ThreadSummary {
        &self.thread
    }

    /// Build the message, threaded onto the original conversation.
    #[must_use]
    pub fn into_message(self, display_name: &str) -> OutgoingMessage {
        let mut message = OutgoingMessage::new(
            self.thread.account.as_str(),
            display_name,
            self.thread.counterpart.as_str(),
            reply_subject(&self.thread.subject),
            self.body,
        );
        message.in_reply_to.clone_from(&self.thread.last_rfc_message_id);
        message.references = self.thread.last_rfc_message_id;
        message.thread_id = Some(self.thread.thread_id);
        message
    }
}
