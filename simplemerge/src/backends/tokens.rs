//! File-backed identity provider
//!
//! Each sender keeps its OAuth token in `TOKEN_<SAFE_EMAIL>.json`, where the
//! safe form of `jane.doe@x.com` is `JANE_DOE_X_COM`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use simplemerge_campaign::{Credential, IdentityProvider};
use simplemerge_common::{incoming, tracing};

/// Contents of a token file
///
/// Refresh tokens are left to the tooling that writes these files.
#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(alias = "token")]
    access_token: String,

    #[serde(default, alias = "expiry")]
    expires_at: Option<DateTime<Utc>>,
}

/// Resolves sender identities from a directory of token files
#[derive(Debug, Clone)]
pub struct TokenDirectory {
    dir: PathBuf,
}

impl TokenDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The token file for `account`, if the address can name one
    #[must_use]
    pub fn token_path(&self, account: &str) -> Option<PathBuf> {
        safe_email(account).map(|safe| self.dir.join(format!("TOKEN_{safe}.json")))
    }

    fn parse(account: &str, content: &str, now: DateTime<Utc>) -> Option<Credential> {
        let token: TokenFile = match serde_json::from_str(content) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(account = %account, error = %err, "Token file is not valid JSON");
                return None;
            }
        };

        if token.access_token.trim().is_empty() {
            tracing::warn!(account = %account, "Token file has an empty access token");
            return None;
        }

        if let Some(expires_at) = token.expires_at
            && expires_at <= now
        {
            tracing::warn!(account = %account, %expires_at, "Access token has expired");
            return None;
        }

        Some(Credential::new(account, token.access_token.trim()))
    }
}

#[async_trait]
impl IdentityProvider for TokenDirectory {
    async fn resolve(&self, account: &str) -> Option<Credential> {
        let Some(path) = self.token_path(account) else {
            tracing::warn!(account = %account, "Account cannot be mapped to a token file");
            return None;
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(account = %account, path = %path.display(), "No token file");
                return None;
            }
            Err(err) => {
                tracing::warn!(account = %account, path = %path.display(), error = %err, "Unable to read token file");
                return None;
            }
        };

        let credential = Self::parse(account, &content, Utc::now())?;
        incoming!(level = DEBUG, account = %account, "Resolved credential");
        Some(credential)
    }
}

/// `jane.doe@x.com` → `JANE_DOE_X_COM`
///
/// Returns `None` for addresses that would escape the token directory.
fn safe_email(account: &str) -> Option<String> {
    let account = account.trim();
    if account.is_empty()
        || !account
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-' | '+'))
    {
        return None;
    }

    Some(account.replace(['@', '.'], "_").to_ascii_uppercase())
}
