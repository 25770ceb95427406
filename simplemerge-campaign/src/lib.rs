//! Campaign scheduling and dispatch engine
//!
//! This crate provides functionality to:
//! - Load a dedup ledger of already-contacted recipients
//! - Build per-sender recipient queues from a ledger store
//! - Drive a cancellable, round-robin send loop with jittered pacing
//! - Publish live progress for an observer to poll
//! - Aggregate inbox threads across every sender account

mod config;
mod error;
mod governor;
pub mod inbox;
mod ledger;
pub mod policy;
mod processor;
mod progress;
mod queue;
mod run;
mod service;
mod template;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod types;

pub use config::{CampaignConfig, PersonalizationDefaults, SenderConfig};
pub use error::{CampaignError, LedgerError, SetupError, TemplateError, TransportError};
pub use governor::{
    MIN_ROUND_DELAY, RateGovernor, WAIT_INCREMENT, Wait, delay_for_round, wait_cancellable,
};
pub use ledger::DedupLedger;
pub use processor::{Campaign, Collaborators, Launched};
pub use progress::{
    ProgressSink, ProgressSnapshot, RecipientOutcome, RecipientReport, SenderSnapshot,
    SenderStatus,
};
pub use queue::{Pending, SenderQueue};
pub use run::{RunHandle, RunPhase, StopFlag};
pub use service::{IdentityProvider, LedgerStore, MailTransport, TemplateStore};
pub use template::{Personalization, Template, first_name};
pub use types::{Credential, LedgerKey, OutgoingMessage, Recipient, SendRecord};
