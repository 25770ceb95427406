//! Core types shared by the dispatch engine and its collaborators

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque, cheaply cloned handle to a resolved sender credential.
///
/// The secret is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    account: Arc<str>,
    secret: Arc<str>,
}

impl Credential {
    /// Wrap a resolved secret for `account`.
    pub fn new(account: impl Into<Arc<str>>, secret: impl Into<Arc<str>>) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
        }
    }

    /// The sender address this credential belongs to.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The raw secret, e.g. an OAuth access token.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A single row of a sender's recipient source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

impl Recipient {
    /// A recipient with no personalization fields; the address is trimmed.
    pub fn new(address: impl AsRef<str>) -> Self {
        Self {
            address: address.as_ref().trim().to_string(),
            company: None,
            job_title: None,
        }
    }

    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    #[must_use]
    pub fn with_job_title(mut self, job_title: impl Into<String>) -> Self {
        self.job_title = Some(job_title.into());
        self
    }
}

/// A `(recipient address, campaign subject)` pair that has already been sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub address: String,
    pub subject: String,
}

impl LedgerKey {
    /// Build a key, trimming both halves so stored and live values compare equal.
    ///
    /// Tabs and line breaks become spaces, matching how the sent log stores
    /// them.
    pub fn new(address: impl AsRef<str>, subject: impl AsRef<str>) -> Self {
        Self {
            address: normalize(address.as_ref()),
            subject: normalize(subject.as_ref()),
        }
    }
}

fn normalize(field: &str) -> String {
    field.replace(['\t', '\r', '\n'], " ").trim().to_string()
}

/// A durable sent-log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecord {
    pub address: String,
    pub subject: String,
    pub sender: String,
    pub sent_at: DateTime<Utc>,
}

impl SendRecord {
    /// Format used for the timestamp column of the sent log.
    pub const TIMESTAMP_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S UTC";

    /// The timestamp rendered for storage.
    #[must_use]
    pub fn timestamp(&self) -> String {
        self.sent_at.format(Self::TIMESTAMP_FORMAT).to_string()
    }
}

/// A fully rendered message ready for a [`crate::MailTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub display_name: String,
    pub to: String,
    pub subject: String,
    /// HTML body
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    /// Provider thread to attach a reply to
    pub thread_id: Option<String>,
}

impl OutgoingMessage {
    /// A new top-level message (not part of a thread).
    pub fn new(
        from: impl Into<String>,
        display_name: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            display_name: display_name.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            in_reply_to: None,
            references: None,
            thread_id: None,
        }
    }

    /// The `From` header value, `Name <address>`.
    #[must_use]
    pub fn from_header(&self) -> String {
        if self.display_name.is_empty() {
            self.from.clone()
        } else {
            format!("{} <{}>", self.display_name, self.from)
        }
    }
}
