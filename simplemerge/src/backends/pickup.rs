//! Pickup-directory transport
//!
//! Writes every message as `<ulid>.eml` into a directory watched by a local
//! MTA. Files are written under a `.tmp_` name and renamed into place, so a
//! watcher never sees a partial message.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use simplemerge_campaign::{Credential, MailTransport, OutgoingMessage, TransportError};
use simplemerge_common::outgoing;
use tokio::fs;
use ulid::Ulid;

use super::mime;

#[derive(Debug, Clone)]
pub struct PickupTransport {
    path: PathBuf,
}

impl PickupTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MailTransport for PickupTransport {
    async fn send(
        &self,
        credential: &Credential,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        let to_error = |e: std::io::Error| TransportError::Message(format!("{}: {e}", self.path.display()));

        fs::create_dir_all(&self.path).await.map_err(to_error)?;

        let filename = format!("{}.eml", Ulid::new());
        let temp_path = self.path.join(format!(".tmp_{filename}"));
        let path = self.path.join(&filename);

        fs::write(&temp_path, mime::compose(message))
            .await
            .map_err(to_error)?;
        fs::rename(&temp_path, &path).await.map_err(to_error)?;

        outgoing!(
            level = DEBUG,
            sender = %credential.account(),
            recipient = %message.to,
            "Dropped message at {}",
            path.display()
        );

        Ok(())
    }
}
