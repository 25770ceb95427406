//! File-backed template store
//!
//! A template is an ordinary `.eml` document: its `Subject` header is the
//! subject template and its HTML part (or plain body) is the body template.

use std::path::PathBuf;

use async_trait::async_trait;
use mailparse::{MailHeaderMap, ParsedMail};
use simplemerge_campaign::{Template, TemplateError, TemplateStore};
use simplemerge_common::incoming;

use super::valid_key;

#[derive(Debug, Clone)]
pub struct TemplateDirectory {
    dir: PathBuf,
}

impl TemplateDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Parse a template from raw `.eml` bytes
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Parse`] if the document is not a message or
    /// has no subject.
    pub fn parse(raw: &[u8]) -> Result<Template, TemplateError> {
        let mail = mailparse::parse_mail(raw).map_err(|e| TemplateError::Parse(e.to_string()))?;

        let subject = mail
            .headers
            .get_first_value("Subject")
            .map(|subject| subject.trim().to_string())
            .filter(|subject| !subject.is_empty())
            .ok_or_else(|| TemplateError::Parse("missing Subject header".to_string()))?;

        let body = find_body(&mail, "text/html")
            .or_else(|| find_body(&mail, "text/plain"))
            .unwrap_or(&mail)
            .get_body()
            .map_err(|e| TemplateError::Parse(e.to_string()))?;

        Ok(Template::new(subject, body))
    }
}

/// The first non-multipart part with the given MIME type
fn find_body<'a>(mail: &'a ParsedMail<'a>, mimetype: &str) -> Option<&'a ParsedMail<'a>> {
    if mail.subparts.is_empty() {
        return mail
            .ctype
            .mimetype
            .eq_ignore_ascii_case(mimetype)
            .then_some(mail);
    }

    mail.subparts
        .iter()
        .find_map(|part| find_body(part, mimetype))
}

#[async_trait]
impl TemplateStore for TemplateDirectory {
    async fn fetch_template(&self, reference: &str) -> Result<Template, TemplateError> {
        if !valid_key(reference) {
            return Err(TemplateError::NotFound(reference.to_string()));
        }

        let path = self.dir.join(format!("{reference}.eml"));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(reference.to_string()));
            }
            Err(err) => return Err(TemplateError::Io(err)),
        };

        let template = Self::parse(&raw)?;
        incoming!(
            level = DEBUG,
            reference = %reference,
            subject = %template.subject,
            "Loaded template from {}",
            path.display()
        );

        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MULTIPART: &str = "Subject: Opening at {company}\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hi {first_name}\r\n\
--b1\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Hi {first_name}</p>\r\n\
--b1--\r\n";

    #[test]
    fn html_part_is_preferred() {
        let template = TemplateDirectory::parse(MULTIPART.as_bytes()).unwrap();
        assert_eq!(template.subject, "Opening at {company}");
        assert_eq!(template.body.trim(), "<p>Hi {first_name}</p>");
    }

    #[test]
    fn single_part_body() {
        let raw = "Subject: Hello\r\nContent-Type: text/html\r\n\r\n<b>{job_title}</b>";
        let template = TemplateDirectory::parse(raw.as_bytes()).unwrap();
        assert_eq!(template.subject, "Hello");
        assert_eq!(template.body, "<b>{job_title}</b>");
    }

    #[test]
    fn missing_subject_is_a_parse_error() {
        let result = TemplateDirectory::parse(b"Content-Type: text/html\r\n\r\n<p>hi</p>");
        assert!(matches!(result, Err(TemplateError::Parse(_))));
    }

    #[tokio::test]
    async fn fetches_by_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("outreach.eml"), MULTIPART).unwrap();

        let store = TemplateDirectory::new(dir.path());
        let template = store.fetch_template("outreach").await.unwrap();
        assert_eq!(template.subject, "Opening at {company}");

        assert!(matches!(
            store.fetch_template("missing").await,
            Err(TemplateError::NotFound(_))
        ));
        assert!(matches!(
            store.fetch_template("../outreach").await,
            Err(TemplateError::NotFound(_))
        ));
    }
}
