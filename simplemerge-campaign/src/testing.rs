//! In-memory collaborators
//!
//! These back the engine's own tests and are usable by downstream crates
//! that need a campaign without touching the network or filesystem. Every
//! send and every sent-log append is recorded so tests can assert on exactly
//! what left the engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::{LedgerError, TemplateError, TransportError},
    service::{IdentityProvider, LedgerStore, MailTransport, TemplateStore},
    template::Template,
    types::{Credential, LedgerKey, OutgoingMessage, Recipient, SendRecord},
};

/// Identity provider backed by a fixed account → token map.
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentities {
    tokens: AHashMap<String, String>,
}

impl MemoryIdentities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, account: &str, token: &str) -> Self {
        self.tokens.insert(account.to_string(), token.to_string());
        self
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentities {
    async fn resolve(&self, account: &str) -> Option<Credential> {
        self.tokens
            .get(account)
            .filter(|token| !token.is_empty())
            .map(|token| Credential::new(account, token.as_str()))
    }
}

/// Template store backed by a map of references.
#[derive(Debug, Default, Clone)]
pub struct MemoryTemplates {
    templates: AHashMap<String, Template>,
}

impl MemoryTemplates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, reference: &str, template: Template) -> Self {
        self.templates.insert(reference.to_string(), template);
        self
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplates {
    async fn fetch_template(&self, reference: &str) -> Result<Template, TemplateError> {
        self.templates
            .get(reference)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(reference.to_string()))
    }
}

/// Ledger store holding recipients per source and an append-only sent log.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    recipients: AHashMap<String, Vec<Recipient>>,
    sent: AHashSet<LedgerKey>,
    appended: RwLock<Vec<SendRecord>>,
    append_attempts: AtomicUsize,
    fail_reads: AtomicBool,
    fail_appends: AtomicBool,
    fail_next_appends: AtomicUsize,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the recipients for `source`.
    #[must_use]
    pub fn with_recipients(mut self, source: &str, recipients: Vec<Recipient>) -> Self {
        self.recipients.insert(source.to_string(), recipients);
        self
    }

    /// Seed a sent-log entry from a previous run.
    #[must_use]
    pub fn with_sent(mut self, address: impl AsRef<str>, subject: impl AsRef<str>) -> Self {
        self.sent.insert(LedgerKey::new(address, subject));
        self
    }

    /// Make every read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Make every append fail.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Release);
    }

    /// Make the next `count` appends fail.
    pub fn fail_next_appends(&self, count: usize) {
        self.fail_next_appends.store(count, Ordering::Release);
    }

    /// Rows successfully appended, in order.
    #[must_use]
    pub fn appended(&self) -> Vec<SendRecord> {
        self.appended.read().clone()
    }

    /// Every append call, successful or not.
    #[must_use]
    pub fn append_attempts(&self) -> usize {
        self.append_attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn read_recipients(&self, source: &str) -> Result<Vec<Recipient>, LedgerError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(LedgerError::Read(format!("{source} unavailable")));
        }
        Ok(self.recipients.get(source).cloned().unwrap_or_default())
    }

    async fn read_sent_log(&self) -> Result<AHashSet<LedgerKey>, LedgerError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(LedgerError::Read("sent log unavailable".to_string()));
        }

        let mut entries = self.sent.clone();
        entries.extend(
            self.appended
                .read()
                .iter()
                .map(|record| LedgerKey::new(&record.address, &record.subject)),
        );
        Ok(entries)
    }

    async fn append_sent_log(&self, record: &SendRecord) -> Result<(), LedgerError> {
        self.append_attempts.fetch_add(1, Ordering::AcqRel);

        if self.fail_appends.load(Ordering::Acquire) {
            return Err(LedgerError::Write("sent log is read-only".to_string()));
        }

        let transient = self
            .fail_next_appends
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(LedgerError::Write("temporarily unavailable".to_string()));
        }

        self.appended.write().push(record.clone());
        Ok(())
    }
}

type SendHook = Box<dyn Fn(&OutgoingMessage) + Send + Sync>;

/// Mail transport that records every message instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: RwLock<Vec<(String, OutgoingMessage)>>,
    failing: RwLock<AHashSet<String>>,
    on_send: Option<SendHook>,
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTransport")
            .field("sent", &self.sent.read().len())
            .field("failing", &self.failing.read())
            .finish_non_exhaustive()
    }
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` at the start of every send, before the outcome is decided.
    #[must_use]
    pub fn on_send(mut self, hook: impl Fn(&OutgoingMessage) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Box::new(hook));
        self
    }

    /// Reject every message addressed to `address`.
    pub fn fail_for(&self, address: &str) {
        self.failing.write().insert(address.to_string());
    }

    /// `(sending account, message)` for every message attempted, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        self.sent.read().clone()
    }

    #[must_use]
    pub fn sends_to(&self, address: &str) -> usize {
        self.sent
            .read()
            .iter()
            .filter(|(_, message)| message.to == address)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.read().is_empty()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(
        &self,
        credential: &Credential,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        if let Some(hook) = &self.on_send {
            hook(message);
        }

        self.sent
            .write()
            .push((credential.account().to_string(), message.clone()));

        if self.failing.read().contains(&message.to) {
            return Err(TransportError::Rejected(format!(
                "Invalid To header {}] details",
                message.to
            )));
        }

        Ok(())
    }
}
