//! Collaborator traits consumed by the dispatch engine
//!
//! The engine never talks to an identity provider, document store, sheet or
//! mail API directly. Each of those is reached through one of these traits so
//! that backends can be swapped (and faked in tests) without touching the
//! dispatch loop.

use ahash::AHashSet;
use async_trait::async_trait;

use crate::{
    error::{LedgerError, TemplateError, TransportError},
    template::Template,
    types::{Credential, LedgerKey, OutgoingMessage, Recipient, SendRecord},
};

/// Resolves a sender address to a usable credential.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns `None` when the account has no valid credential.
    async fn resolve(&self, account: &str) -> Option<Credential>;
}

/// Supplies the campaign template.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetch and parse the template stored under `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is missing or malformed. The engine
    /// treats this as a setup failure.
    async fn fetch_template(&self, reference: &str) -> Result<Template, TemplateError>;
}

/// Source of recipients and home of the durable sent log.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read the ordered recipient rows stored under `source`.
    ///
    /// # Errors
    ///
    /// The engine downgrades any error to an empty queue for that sender.
    async fn read_recipients(&self, source: &str) -> Result<Vec<Recipient>, LedgerError>;

    /// Read every `(address, subject)` pair already sent.
    ///
    /// # Errors
    ///
    /// The engine downgrades any error to an empty ledger.
    async fn read_sent_log(&self) -> Result<AHashSet<LedgerKey>, LedgerError>;

    /// Durably append one sent-log row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row could not be written.
    async fn append_sent_log(&self, record: &SendRecord) -> Result<(), LedgerError>;
}

/// Transmits a single message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`TransportError`] scoped to this one message.
    async fn send(
        &self,
        credential: &Credential,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError>;
}
