//! Audit logging for campaign lifecycle events
//!
//! Every event is emitted through `tracing` under the `audit` span with a
//! stable `event` field, so a JSON or log-shipping subscriber can pick them
//! out of the regular engine chatter.
//!
//! ## Audit Events
//!
//! - `CampaignLaunched`: A run passed setup and its dispatch loop started
//! - `SendAttempt`: A message is about to be handed to the mail transport
//! - `SendSuccess`: The mail transport accepted a message
//! - `SendFailure`: The mail transport rejected a message (not retried)
//! - `RecipientSkipped`: A recipient was already present in the dedup ledger
//! - `LedgerWriteFailure`: A successful send could not be durably recorded
//! - `CampaignFinished`: The dispatch loop reached a terminal state
//!
//! ## PII Redaction
//!
//! Sender and recipient addresses can be redacted independently. Redaction
//! keeps the domain so deliverability problems can still be correlated.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for campaign events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact sender addresses from audit logs
    #[serde(default)]
    pub redact_sender: bool,

    /// Redact recipient addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sender: false,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Initialize audit logging with configuration
///
/// Only the first call has any effect.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact an email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Log that a campaign run started dispatching
pub fn log_campaign_launched(run_id: &str, subject: &str, senders: usize, goal: u64, dry_run: bool) {
    let config = config();
    if !config.enabled {
        return;
    }

    crate::log!(
        tracing::Level::INFO,
        "audit",
        event = "CampaignLaunched",
        run_id = %run_id,
        subject = %subject,
        senders = senders,
        goal = goal,
        dry_run = dry_run,
        "Audit: Campaign launched"
    );
}

/// Log a send attempt
pub fn log_send_attempt(run_id: &str, sender: &str, recipient: &str, round: u64) {
    let config = config();
    if !config.enabled {
        return;
    }

    let sender = redact_email(sender, config.redact_sender);
    let recipient = redact_email(recipient, config.redact_recipients);

    crate::log!(
        tracing::Level::INFO,
        "audit",
        event = "SendAttempt",
        run_id = %run_id,
        sender = %sender,
        recipient = %recipient,
        round = round,
        "Audit: Send attempt"
    );
}

/// Log a successful (or simulated) send
pub fn log_send_success(
    run_id: &str,
    sender: &str,
    recipient: &str,
    dry_run: bool,
    duration_ms: u128,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let sender = redact_email(sender, config.redact_sender);
    let recipient = redact_email(recipient, config.redact_recipients);

    crate::log!(
        tracing::Level::INFO,
        "audit",
        event = "SendSuccess",
        run_id = %run_id,
        sender = %sender,
        recipient = %recipient,
        dry_run = dry_run,
        duration_ms = duration_ms,
        "Audit: Send successful"
    );
}

/// Log a failed send
pub fn log_send_failure(run_id: &str, sender: &str, recipient: &str, error: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    let sender = redact_email(sender, config.redact_sender);
    let recipient = redact_email(recipient, config.redact_recipients);

    crate::log!(
        tracing::Level::WARN,
        "audit",
        event = "SendFailure",
        run_id = %run_id,
        sender = %sender,
        recipient = %recipient,
        error = %error,
        "Audit: Send failed"
    );
}

/// Log a recipient skipped because the ledger already holds it
pub fn log_recipient_skipped(run_id: &str, sender: &str, recipient: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    let sender = redact_email(sender, config.redact_sender);
    let recipient = redact_email(recipient, config.redact_recipients);

    crate::log!(
        tracing::Level::INFO,
        "audit",
        event = "RecipientSkipped",
        run_id = %run_id,
        sender = %sender,
        recipient = %recipient,
        "Audit: Recipient already contacted"
    );
}

/// Log a durable ledger write that failed after all retries
pub fn log_ledger_write_failure(run_id: &str, recipient: &str, error: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    crate::log!(
        tracing::Level::WARN,
        "audit",
        event = "LedgerWriteFailure",
        run_id = %run_id,
        recipient = %recipient,
        error = %error,
        "Audit: Sent log write failed, recipient may be contacted again after a restart"
    );
}

/// Log the terminal state of a run
pub fn log_campaign_finished(run_id: &str, outcome: &str, sent: u64, goal: u64, rounds: u64) {
    let config = config();
    if !config.enabled {
        return;
    }

    crate::log!(
        tracing::Level::INFO,
        "audit",
        event = "CampaignFinished",
        run_id = %run_id,
        outcome = %outcome,
        sent = sent,
        goal = goal,
        rounds = rounds,
        "Audit: Campaign finished"
    );
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
        assert_eq!(redact_email("invalid", false), "invalid");
    }

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.redact_sender);
        assert!(!config.redact_recipients);
    }

    #[test]
    fn test_audit_events_do_not_panic() {
        init(AuditConfig {
            enabled: false,
            redact_sender: true,
            redact_recipients: true,
        });

        log_campaign_launched("run", "Subj", 2, 10, true);
        log_send_attempt("run", "me@example.com", "you@example.com", 1);
        log_send_success("run", "me@example.com", "you@example.com", false, 12);
        log_send_failure("run", "me@example.com", "you@example.com", "boom");
        log_recipient_skipped("run", "me@example.com", "you@example.com");
        log_ledger_write_failure("run", "you@example.com", "disk full");
        log_campaign_finished("run", "Completed", 10, 10, 5);
    }
}
