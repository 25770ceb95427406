//! Concrete collaborators for the campaign engine

use std::sync::Arc;

use simplemerge_campaign::{Collaborators, MailTransport, inbox::InboxReader};

use crate::config::{BackendsConfig, TransportConfig};

mod files;
mod gmail;
mod mime;
mod pickup;
mod templates;
mod tokens;

pub use files::FileLedger;
pub use gmail::GmailTransport;
pub use pickup::PickupTransport;
pub use templates::TemplateDirectory;
pub use tokens::TokenDirectory;

/// Everything the daemon talks to
#[derive(Clone)]
pub struct Backends {
    pub collaborators: Collaborators,
    /// Absent when the transport has no mailbox to read
    pub inbox: Option<Arc<dyn InboxReader>>,
}

impl Backends {
    /// Build the backends named by the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed
    pub fn from_config(
        backends: &BackendsConfig,
        transport: &TransportConfig,
    ) -> anyhow::Result<Self> {
        let (transport, inbox) = match transport {
            TransportConfig::Gmail { endpoint } => {
                let gmail = Arc::new(GmailTransport::new(endpoint)?);
                let transport: Arc<dyn MailTransport> = gmail.clone();
                let inbox: Arc<dyn InboxReader> = gmail;
                (transport, Some(inbox))
            }
            TransportConfig::Pickup { path } => {
                let transport: Arc<dyn MailTransport> = Arc::new(PickupTransport::new(path));
                (transport, None)
            }
        };

        Ok(Self {
            collaborators: Collaborators {
                identities: Arc::new(TokenDirectory::new(&backends.token_dir)),
                templates: Arc::new(TemplateDirectory::new(&backends.template_dir)),
                ledger: Arc::new(FileLedger::new(
                    &backends.recipient_dir,
                    &backends.sent_log,
                )),
                transport,
            },
            inbox,
        })
    }
}

/// Whether `key` can name a file inside a backend directory
fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | ' '))
}
