//! Daemon configuration
//!
//! The daemon reads one RON document. Everything except the campaign itself
//! has a default, so a minimal file only names the senders and the template.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use simplemerge_campaign::CampaignConfig;
use simplemerge_common::audit::AuditConfig;
use simplemerge_control::DEFAULT_CONTROL_SOCKET;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV: &str = "SIMPLEMERGE_CONFIG";

/// Gmail REST root used when none is configured
pub const DEFAULT_GMAIL_ENDPOINT: &str = "https://gmail.googleapis.com/gmail/v1/";

/// Where the file-backed collaborators keep their data
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendsConfig {
    /// Directory of `TOKEN_<SAFE_EMAIL>.json` files
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,

    /// Directory of `<ref>.eml` templates
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,

    /// Directory of `<source>.csv` recipient lists
    #[serde(default = "default_recipient_dir")]
    pub recipient_dir: PathBuf,

    /// Tab separated log of every delivered message
    #[serde(default = "default_sent_log")]
    pub sent_log: PathBuf,
}

fn default_token_dir() -> PathBuf {
    PathBuf::from("/var/lib/simplemerge/tokens")
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("/var/lib/simplemerge/templates")
}

fn default_recipient_dir() -> PathBuf {
    PathBuf::from("/var/lib/simplemerge/recipients")
}

fn default_sent_log() -> PathBuf {
    PathBuf::from("/var/lib/simplemerge/sent.tsv")
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            token_dir: default_token_dir(),
            template_dir: default_template_dir(),
            recipient_dir: default_recipient_dir(),
            sent_log: default_sent_log(),
        }
    }
}

/// How messages leave the daemon
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum TransportConfig {
    /// Gmail REST API, authenticated with the sender's token
    Gmail {
        #[serde(default = "default_gmail_endpoint")]
        endpoint: String,
    },

    /// Drop each message as an `.eml` file for a local MTA to pick up
    Pickup { path: PathBuf },
}

fn default_gmail_endpoint() -> String {
    DEFAULT_GMAIL_ENDPOINT.to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Gmail {
            endpoint: default_gmail_endpoint(),
        }
    }
}

/// The whole daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub campaign: CampaignConfig,

    /// Path of the operator control socket
    ///
    /// Default: `/tmp/simplemerge.sock`
    #[serde(default = "default_control_socket")]
    pub control_socket: String,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub backends: BackendsConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_control_socket() -> String {
    DEFAULT_CONTROL_SOCKET.to_string()
}

impl DaemonConfig {
    /// Read and parse the configuration at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid RON
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    /// Parse a RON document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid configuration
    pub fn parse(content: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(content)
    }
}

/// Find the configuration file using the following precedence:
/// 1. `SIMPLEMERGE_CONFIG` environment variable
/// 2. ./simplemerge.config.ron (current working directory)
/// 3. /etc/simplemerge/simplemerge.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error naming every location tried if none exists
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = vec![
        PathBuf::from("./simplemerge.config.ron"),
        PathBuf::from("/etc/simplemerge/simplemerge.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = DaemonConfig::parse(
            r#"(
                campaign: (
                    senders: [(address: "a@x.com")],
                    template: "outreach",
                ),
            )"#,
        )
        .unwrap();

        assert_eq!(config.control_socket, DEFAULT_CONTROL_SOCKET);
        assert_eq!(config.backends, BackendsConfig::default());
        assert_eq!(config.transport, TransportConfig::default());
        assert!(config.audit.enabled);
        assert!(config.campaign.dry_run);
        assert_eq!(config.campaign.senders.len(), 1);
    }

    #[test]
    fn full_config_parses() {
        let config = DaemonConfig::parse(
            r#"(
                campaign: (
                    senders: [
                        (address: "a@x.com"),
                        (address: "b@x.com", source: Some("engineering"), enabled: false),
                    ],
                    max_per_sender: 5,
                    dry_run: false,
                    template: "outreach",
                ),
                control_socket: "/run/simplemerge.sock",
                audit: (redact_recipients: true),
                backends: (
                    token_dir: "/srv/tokens",
                    sent_log: "/srv/sent.tsv",
                ),
                transport: Pickup(path: "/var/spool/pickup"),
            )"#,
        )
        .unwrap();

        assert_eq!(config.control_socket, "/run/simplemerge.sock");
        assert!(config.audit.redact_recipients);
        assert_eq!(config.backends.token_dir, PathBuf::from("/srv/tokens"));
        assert_eq!(config.backends.template_dir, default_template_dir());
        assert_eq!(
            config.transport,
            TransportConfig::Pickup {
                path: PathBuf::from("/var/spool/pickup")
            }
        );
        assert_eq!(config.campaign.max_per_sender, 5);
        assert!(!config.campaign.senders[1].enabled);
    }

    #[test]
    fn gmail_endpoint_is_configurable() {
        let config = DaemonConfig::parse(
            r#"(
                campaign: (template: "t"),
                transport: Gmail(endpoint: "http://127.0.0.1:8080/gmail/v1/"),
            )"#,
        )
        .unwrap();

        assert_eq!(
            config.transport,
            TransportConfig::Gmail {
                endpoint: "http://127.0.0.1:8080/gmail/v1/".to_string()
            }
        );
    }

    #[test]
    fn missing_campaign_is_an_error() {
        assert!(DaemonConfig::parse("()").is_err());
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.ron");

        let err = DaemonConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing.ron"));
    }
}
