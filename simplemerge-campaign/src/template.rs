//! Message templates and per-recipient personalization
//!
//! Placeholders are literal substrings (`{first_name}`, `{company}`,
//! `{job_title}`), not a templating language. Anything else in braces is left
//! exactly as written.

use serde::{Deserialize, Serialize};

use crate::{config::PersonalizationDefaults, types::Recipient};

const FIRST_NAME: &str = "{first_name}";
const COMPANY: &str = "{company}";
const JOB_TITLE: &str = "{job_title}";

/// A campaign template as fetched from a [`crate::TemplateStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub subject: String,
    /// HTML body containing placeholders
    pub body: String,
}

impl Template {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Render the body for one recipient.
    #[must_use]
    pub fn render(&self, personalization: &Personalization) -> String {
        personalization.apply(&self.body)
    }

    /// Render the subject for one recipient.
    ///
    /// The ledger is keyed on the unrendered subject; this is only used for
    /// the outgoing message.
    #[must_use]
    pub fn render_subject(&self, personalization: &Personalization) -> String {
        personalization.apply(&self.subject)
    }

    /// Render with sample values, for previewing without sending.
    #[must_use]
    pub fn preview(&self) -> (String, String) {
        let sample = Personalization::sample();
        (self.render_subject(&sample), self.render(&sample))
    }
}

/// The values substituted into a template for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personalization {
    pub first_name: String,
    pub company: String,
    pub job_title: String,
}

impl Personalization {
    /// Build the substitutions for `recipient`, falling back to `defaults`
    /// for blank fields.
    #[must_use]
    pub fn for_recipient(recipient: &Recipient, defaults: &PersonalizationDefaults) -> Self {
        let pick = |value: Option<&String>, fallback: &str| {
            value
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        Self {
            first_name: first_name(&recipient.address),
            company: pick(recipient.company.as_ref(), &defaults.company),
            job_title: pick(recipient.job_title.as_ref(), &defaults.job_title),
        }
    }

    /// Sample values shown by template previews.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            first_name: String::from("John"),
            company: String::from("TechCorp"),
            job_title: String::from("Analyst"),
        }
    }

    /// Single left-to-right pass; substituted values are never re-scanned.
    fn apply(&self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find('{') {
            output.push_str(&rest[..start]);
            let candidate = &rest[start..];

            let replacement = [
                (FIRST_NAME, &self.first_name),
                (COMPANY, &self.company),
                (JOB_TITLE, &self.job_title),
            ]
            .into_iter()
            .find(|(placeholder, _)| candidate.starts_with(placeholder));

            if let Some((placeholder, value)) = replacement {
                output.push_str(value);
                rest = &candidate[placeholder.len()..];
            } else {
                output.push('{');
                rest = &candidate[1..];
            }
        }

        output.push_str(rest);
        output
    }
}

/// Derive a first name from an address: `jane.doe@x.com` gives `Jane`.
#[must_use]
pub fn first_name(address: &str) -> String {
    let local = address.trim().split('@').next().unwrap_or_default();
    let name = local.split('.').next().unwrap_or_default();

    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn first_name_from_address() {
        assert_eq!(first_name("jane.doe@x.com"), "Jane");
        assert_eq!(first_name("bob@x.com"), "Bob");
        assert_eq!(first_name("  émile.z@x.com"), "Émile");
        assert_eq!(first_name("@x.com"), "");
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let template = Template::new(
            "Role at {company}",
            "<p>Hi {first_name}, about {job_title} at {company}.</p>",
        );
        let recipient = Recipient::new("jane.doe@x.com").with_company("Acme");
        let personalization =
            Personalization::for_recipient(&recipient, &PersonalizationDefaults::default());

        assert_eq!(
            template.render(&personalization),
            "<p>Hi Jane, about the open position at Acme.</p>"
        );
        assert_eq!(template.render_subject(&personalization), "Role at Acme");
    }

    #[test]
    fn unknown_placeholders_are_left_verbatim() {
        let template = Template::new("s", "Dear {title} {first_name} {unclosed");
        let personalization = Personalization::sample();

        assert_eq!(template.render(&personalization), "Dear {title} John {unclosed");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let template = Template::new("s", "{company}");
        let recipient = Recipient::new("a@x.com").with_company("{first_name} Ltd");
        let personalization =
            Personalization::for_recipient(&recipient, &PersonalizationDefaults::default());

        assert_eq!(template.render(&personalization), "{first_name} Ltd");
    }

    #[test]
    fn blank_fields_use_defaults() {
        let recipient = Recipient::new("a@x.com")
            .with_company("  ")
            .with_job_title("Engineer");
        let personalization =
            Personalization::for_recipient(&recipient, &PersonalizationDefaults::default());

        assert_eq!(personalization.company, "Your Company");
        assert_eq!(personalization.job_title, "Engineer");
    }

    #[test]
    fn preview_uses_sample_values() {
        let template = Template::new("{job_title} role", "Hi {first_name} from {company}");
        assert_eq!(
            template.preview(),
            ("Analyst role".to_string(), "Hi John from TechCorp".to_string())
        );
    }
}
