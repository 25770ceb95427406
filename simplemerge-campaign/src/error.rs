//! Typed error handling for campaign operations.
//!
//! Errors are split along the lines of how far they propagate:
//! - Setup failures abort a run before anything is dispatched
//! - Transport failures are contained to a single recipient
//! - Ledger failures are contained to the durable sent log

use thiserror::Error;

/// Top-level campaign error type.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// The run could not be prepared; nothing was dispatched.
    #[error("Setup failure: {0}")]
    Setup(#[from] SetupError),

    /// A single send was rejected by the mail transport.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The ledger store could not be read or written.
    #[error("Ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

impl CampaignError {
    /// Returns `true` if this error aborted a run before it started.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    /// Returns `true` if this error is scoped to a single recipient.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if this error came from the ledger store.
    #[must_use]
    pub const fn is_ledger(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }
}

/// Failures that prevent a run from starting.
#[derive(Debug, Error)]
pub enum SetupError {
    /// A configuration value is invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    /// The message template could not be fetched or parsed.
    #[error("Template unavailable: {0}")]
    Template(#[from] TemplateError),

    /// None of the configured senders produced a usable credential.
    #[error("No configured sender could be authenticated")]
    NoUsableSenders,
}

/// Errors raised by a template store.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// No template exists under the given reference.
    #[error("Template not found: {0}")]
    NotFound(String),

    /// The template exists but could not be understood.
    #[error("Template could not be parsed: {0}")]
    Parse(String),

    /// I/O error while reading the template.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a mail transport for a single message.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The recipient or message was refused by the provider.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// The sender's credential was refused.
    #[error("Credential refused: {0}")]
    Unauthorized(String),

    /// The provider asked us to slow down.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The provider could not be reached.
    #[error("Provider unreachable: {0}")]
    Network(String),

    /// The message could not be assembled or written.
    #[error("Message could not be built: {0}")]
    Message(String),
}

impl TransportError {
    /// Longest reason carried into a status label.
    const SUMMARY_LIMIT: usize = 60;

    /// A short, operator-facing reason.
    ///
    /// Provider messages are cut at the first `]` (where API error payloads
    /// start) and at [`Self::SUMMARY_LIMIT`] characters.
    #[must_use]
    pub fn summary(&self) -> String {
        let (kind, detail) = match self {
            Self::Rejected(detail) => ("Rejected", detail),
            Self::Unauthorized(detail) => ("Unauthorized", detail),
            Self::RateLimited(detail) => ("Rate limited", detail),
            Self::Network(detail) => ("Network", detail),
            Self::Message(detail) => ("Message", detail),
        };

        let detail = detail.split(']').next().unwrap_or_default().trim();
        let detail: String = detail.chars().take(Self::SUMMARY_LIMIT).collect();

        if detail.is_empty() {
            kind.to_string()
        } else {
            format!("{kind}: {detail}")
        }
    }
}

/// Errors raised by a ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store could not be read.
    #[error("Ledger read error: {0}")]
    Read(String),

    /// The store could not be written.
    #[error("Ledger write error: {0}")]
    Write(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
