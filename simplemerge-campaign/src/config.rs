//! Per-run campaign configuration

use std::time::Duration;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{error::SetupError, policy::RetryPolicy};

const MAX_PER_SENDER: std::ops::RangeInclusive<u32> = 1..=500;
const ROUND_DELAY_SECS: std::ops::RangeInclusive<u64> = 5..=600;

const fn default_max_per_sender() -> u32 {
    20
}

const fn default_round_delay_secs() -> u64 {
    20
}

const fn default_round_jitter_secs() -> u64 {
    2
}

const fn default_min_send_interval_millis() -> u64 {
    1_000
}

const fn default_dry_run() -> bool {
    true
}

const fn default_enabled() -> bool {
    true
}

fn default_display_name() -> String {
    String::from("Recruitment Team")
}

/// A sender identity taking part in a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// The sending account's address
    pub address: String,

    /// Recipient source key.
    ///
    /// Default: `filter<index>`, where index is the sender's position in
    /// the full sender list (disabled senders included)
    #[serde(default)]
    pub source: Option<String>,

    /// Whether this sender takes part in the run
    ///
    /// Default: `true`
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SenderConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            source: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The recipient source key for a sender at position `index`.
    #[must_use]
    pub fn source_key(&self, index: usize) -> String {
        self.source
            .clone()
            .unwrap_or_else(|| format!("filter{index}"))
    }
}

/// Values substituted when a recipient row leaves a field blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalizationDefaults {
    #[serde(default = "PersonalizationDefaults::default_company")]
    pub company: String,

    #[serde(default = "PersonalizationDefaults::default_job_title")]
    pub job_title: String,
}

impl PersonalizationDefaults {
    fn default_company() -> String {
        String::from("Your Company")
    }

    fn default_job_title() -> String {
        String::from("the open position")
    }
}

impl Default for PersonalizationDefaults {
    fn default() -> Self {
        Self {
            company: Self::default_company(),
            job_title: Self::default_job_title(),
        }
    }
}

/// Immutable configuration for a single campaign run.
///
/// Assembled once at launch and validated before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Sender identities, in the order they take turns each round
    #[serde(default)]
    pub senders: Vec<SenderConfig>,

    /// Maximum number of sends per sender for this run
    ///
    /// Default: 20
    #[serde(default = "default_max_per_sender")]
    pub max_per_sender: u32,

    /// Base delay between rounds (in seconds)
    ///
    /// Default: 20 seconds
    #[serde(default = "default_round_delay_secs")]
    pub round_delay_secs: u64,

    /// The round delay is randomized within ±this many seconds
    ///
    /// Default: 2 seconds
    #[serde(default = "default_round_jitter_secs")]
    pub round_jitter_secs: u64,

    /// Minimum gap between two sends from the same sender (in milliseconds)
    ///
    /// Default: 1000 milliseconds
    #[serde(default = "default_min_send_interval_millis")]
    pub min_send_interval_millis: u64,

    /// Simulate sends without touching the transport or the ledger
    ///
    /// Default: `true`
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    /// Display name used in the `From` header
    ///
    /// Default: "Recruitment Team"
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Template store reference
    #[serde(default)]
    pub template: String,

    /// Fallbacks for blank recipient fields
    #[serde(default)]
    pub defaults: PersonalizationDefaults,

    /// Retry policy for durable sent-log appends
    #[serde(default)]
    pub ledger_retry: RetryPolicy,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            senders: Vec::default(),
            max_per_sender: default_max_per_sender(),
            round_delay_secs: default_round_delay_secs(),
            round_jitter_secs: default_round_jitter_secs(),
            min_send_interval_millis: default_min_send_interval_millis(),
            dry_run: default_dry_run(),
            display_name: default_display_name(),
            template: String::default(),
            defaults: PersonalizationDefaults::default(),
            ledger_retry: RetryPolicy::default(),
        }
    }
}

impl CampaignConfig {
    pub const fn round_delay(&self) -> Duration {
        Duration::from_secs(self.round_delay_secs)
    }

    pub const fn round_jitter(&self) -> Duration {
        Duration::from_secs(self.round_jitter_secs)
    }

    pub const fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_millis)
    }

    /// Senders taking part in the run, paired with their recipient source key.
    pub fn active_senders(&self) -> impl Iterator<Item = (&SenderConfig, String)> {
        self.senders
            .iter()
            .enumerate()
            .filter(|(_, sender)| sender.enabled)
            .map(|(index, sender)| (sender, sender.source_key(index)))
    }

    /// Check the configuration before a run is started.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidConfiguration`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), SetupError> {
        let invalid = |field, reason: String| SetupError::InvalidConfiguration { field, reason };

        if self.active_senders().next().is_none() {
            return Err(invalid("senders", "no enabled senders".to_string()));
        }

        let mut seen = AHashSet::with_capacity(self.senders.len());
        for sender in &self.senders {
            let address = sender.address.trim().to_ascii_lowercase();
            if address.is_empty() || !address.contains('@') {
                return Err(invalid(
                    "senders",
                    format!("'{}' is not an email address", sender.address),
                ));
            }
            if !seen.insert(address) {
                return Err(invalid(
                    "senders",
                    format!("'{}' is listed more than once", sender.address),
                ));
            }
        }

        if !MAX_PER_SENDER.contains(&self.max_per_sender) {
            return Err(invalid(
                "max_per_sender",
                format!(
                    "{} is outside {}..={}",
                    self.max_per_sender,
                    MAX_PER_SENDER.start(),
                    MAX_PER_SENDER.end()
                ),
            ));
        }

        if !ROUND_DELAY_SECS.contains(&self.round_delay_secs) {
            return Err(invalid(
                "round_delay_secs",
                format!(
                    "{} is outside {}..={}",
                    self.round_delay_secs,
                    ROUND_DELAY_SECS.start(),
                    ROUND_DELAY_SECS.end()
                ),
            ));
        }

        if self.round_jitter_secs >= self.round_delay_secs {
            return Err(invalid(
                "round_jitter_secs",
                format!(
                    "jitter {}s must be smaller than the round delay {}s",
                    self.round_jitter_secs, self.round_delay_secs
                ),
            ));
        }

        if self.template.trim().is_empty() {
            return Err(invalid("template", "no template reference".to_string()));
        }

        if self.ledger_retry.max_attempts == 0 {
            return Err(invalid(
                "ledger_retry",
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn valid() -> CampaignConfig {
        CampaignConfig {
            senders: vec![SenderConfig::new("a@x.com"), SenderConfig::new("b@x.com")],
            template: "outreach".to_string(),
            ..CampaignConfig::default()
        }
    }

    fn rejected_field(config: &CampaignConfig) -> &'static str {
        match config.validate() {
            Err(SetupError::InvalidConfiguration { field, .. }) => field,
            other => panic!("expected invalid configuration, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_safe() {
        let config = CampaignConfig::default();
        assert!(config.dry_run);
        assert_eq!(config.max_per_sender, 20);
        assert_eq!(config.round_delay_secs, 20);
        assert_eq!(config.round_jitter_secs, 2);
        assert_eq!(config.display_name, "Recruitment Team");
        assert_eq!(config.defaults.company, "Your Company");
        assert_eq!(config.defaults.job_title, "the open position");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: CampaignConfig = ron::from_str(
            r#"(
                senders: [(address: "a@x.com"), (address: "b@x.com", source: Some("north"))],
                template: "outreach",
                dry_run: false,
            )"#,
        )
        .unwrap();

        assert!(!config.dry_run);
        assert_eq!(config.max_per_sender, 20);
        assert_eq!(config.ledger_retry, RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn source_keys_follow_full_list_position() {
        let config = CampaignConfig {
            senders: vec![
                SenderConfig::new("a@x.com").disabled(),
                SenderConfig::new("b@x.com"),
                SenderConfig::new("c@x.com").with_source("custom"),
            ],
            ..valid()
        };

        let keys: Vec<_> = config
            .active_senders()
            .map(|(sender, key)| (sender.address.as_str(), key))
            .collect();

        assert_eq!(
            keys,
            vec![
                ("b@x.com", "filter1".to_string()),
                ("c@x.com", "custom".to_string())
            ]
        );
    }

    #[test]
    fn rejects_missing_and_duplicate_senders() {
        let config = CampaignConfig {
            senders: Vec::new(),
            ..valid()
        };
        assert_eq!(rejected_field(&config), "senders");

        let config = CampaignConfig {
            senders: vec![SenderConfig::new("a@x.com").disabled()],
            ..valid()
        };
        assert_eq!(rejected_field(&config), "senders");

        let config = CampaignConfig {
            senders: vec![SenderConfig::new("a@x.com"), SenderConfig::new("A@x.com ")],
            ..valid()
        };
        assert_eq!(rejected_field(&config), "senders");
    }

    #[test]
    fn rejects_out_of_range_limits() {
        assert_eq!(
            rejected_field(&CampaignConfig {
                max_per_sender: 0,
                ..valid()
            }),
            "max_per_sender"
        );
        assert_eq!(
            rejected_field(&CampaignConfig {
                max_per_sender: 501,
                ..valid()
            }),
            "max_per_sender"
        );
        assert_eq!(
            rejected_field(&CampaignConfig {
                round_delay_secs: 4,
                ..valid()
            }),
            "round_delay_secs"
        );
        assert_eq!(
            rejected_field(&CampaignConfig {
                round_delay_secs: 10,
                round_jitter_secs: 10,
                ..valid()
            }),
            "round_jitter_secs"
        );
    }

    #[test]
    fn rejects_empty_template() {
        assert_eq!(
            rejected_field(&CampaignConfig {
                template: "  ".to_string(),
                ..valid()
            }),
            "template"
        );
    }
}
