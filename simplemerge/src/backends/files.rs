//! File-backed ledger store
//!
//! Recipients live in `<dir>/<source>.csv`, one per row, with the address,
//! company and job title in the first three columns. The sent log is a tab
//! separated file with one row per delivered message:
//!
//! ```text
//! address \t subject \t sender \t %Y-%m-%d %H:%M:%S UTC
//! ```

use std::path::{Path, PathBuf};

use ahash::AHashSet;
use async_trait::async_trait;
use simplemerge_campaign::{LedgerError, LedgerKey, LedgerStore, Recipient, SendRecord};
use simplemerge_common::{incoming, outgoing};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use super::valid_key;

#[derive(Debug, Clone)]
pub struct FileLedger {
    recipient_dir: PathBuf,
    sent_log: PathBuf,
}

impl FileLedger {
    pub fn new(recipient_dir: impl Into<PathBuf>, sent_log: impl Into<PathBuf>) -> Self {
        Self {
            recipient_dir: recipient_dir.into(),
            sent_log: sent_log.into(),
        }
    }

    #[must_use]
    pub fn sent_log(&self) -> &Path {
        &self.sent_log
    }

    /// Parse recipient rows
    ///
    /// Rows whose first column is not an address (blank lines, headers) are
    /// dropped.
    #[must_use]
    pub fn parse_recipients(content: &str) -> Vec<Recipient> {
        content
            .lines()
            .filter_map(|line| {
                let mut fields = split_csv_row(line).into_iter();
                let address = fields.next()?;
                if !address.contains('@') {
                    return None;
                }

                let mut recipient = Recipient::new(address);
                if let Some(company) = fields.next().filter(|f| !f.is_empty()) {
                    recipient = recipient.with_company(company);
                }
                if let Some(job_title) = fields.next().filter(|f| !f.is_empty()) {
                    recipient = recipient.with_job_title(job_title);
                }
                Some(recipient)
            })
            .collect()
    }

    /// Parse sent log rows into ledger keys
    ///
    /// Only the first two columns matter; short rows are ignored.
    #[must_use]
    pub fn parse_sent_log(content: &str) -> AHashSet<LedgerKey> {
        content
            .lines()
            .filter_map(|line| {
                let mut columns = line.split('\t');
                let address = columns.next()?.trim();
                let subject = columns.next()?.trim();
                (!address.is_empty()).then(|| LedgerKey::new(address, subject))
            })
            .collect()
    }

    /// One sent log row, newline terminated
    #[must_use]
    pub fn format_row(record: &SendRecord) -> String {
        format!(
            "{}\t{}\t{}\t{}\n",
            sanitize(&record.address),
            sanitize(&record.subject),
            sanitize(&record.sender),
            record.timestamp()
        )
    }
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn read_recipients(&self, source: &str) -> Result<Vec<Recipient>, LedgerError> {
        if !valid_key(source) {
            return Err(LedgerError::Read(format!("invalid recipient source '{source}'")));
        }

        let path = self.recipient_dir.join(format!("{source}.csv"));
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            LedgerError::Read(format!("unable to read {}: {e}", path.display()))
        })?;

        let recipients = Self::parse_recipients(&content);
        incoming!(
            level = DEBUG,
            source = %source,
            recipients = recipients.len(),
            "Read recipients from {}",
            path.display()
        );

        Ok(recipients)
    }

    async fn read_sent_log(&self) -> Result<AHashSet<LedgerKey>, LedgerError> {
        let content = match tokio::fs::read_to_string(&self.sent_log).await {
            Ok(content) => content,
            // Nothing has been sent yet
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(AHashSet::new()),
            Err(err) => {
                return Err(LedgerError::Read(format!(
                    "unable to read {}: {err}",
                    self.sent_log.display()
                )));
            }
        };

        let entries = Self::parse_sent_log(&content);
        incoming!(level = DEBUG, entries = entries.len(), "Read sent log");
        Ok(entries)
    }

    async fn append_sent_log(&self, record: &SendRecord) -> Result<(), LedgerError> {
        if let Some(parent) = self.sent_log.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.sent_log)
            .await
            .map_err(|e| {
                LedgerError::Write(format!("unable to open {}: {e}", self.sent_log.display()))
            })?;

        // One write per row keeps rows whole under O_APPEND
        file.write_all(Self::format_row(record).as_bytes())
            .await
            .map_err(|e| LedgerError::Write(e.to_string()))?;
        file.flush().await?;

        outgoing!(level = DEBUG, recipient = %record.address, "Appended to sent log");
        Ok(())
    }
}

fn sanitize(field: &str) -> String {
    field.replace(['\t', '\r', '\n'], " ")
}

/// Split one comma separated row, honouring double-quoted fields
fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());

    fields
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn csv_rows_honour_quotes() {
        assert_eq!(split_csv_row("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(
            split_csv_row(r#"a@x.com,"Acme, Inc.","Say ""hi""""#),
            vec!["a@x.com", "Acme, Inc.", r#"Say "hi""#]
        );
    }

    #[test]
    fn recipients_use_first_three_columns() {
        let content = "email,company,title\n\
                        jane@y.com , Acme , Engineer, ignored\n\
                        \n\
                        bob@z.com,,\n\
                        carol@w.com";

        let recipients = FileLedger::parse_recipients(content);
        assert_eq!(
            recipients,
            vec![
                Recipient::new("jane@y.com")
                    .with_company("Acme")
                    .with_job_title("Engineer"),
                Recipient::new("bob@z.com"),
                Recipient::new("carol@w.com"),
            ]
        );
    }

    #[test]
    fn sent_log_ignores_short_rows() {
        let content = "jane@y.com\tOpening\ta@x.com\t2024-01-01 00:00:00 UTC\n\
                        broken-row\n\
                        \tno address\n\
                        bob@z.com \t Opening \n";

        let entries = FileLedger::parse_sent_log(content);
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&LedgerKey::new("jane@y.com", "Opening")));
        assert!(entries.contains(&LedgerKey::new("bob@z.com", "Opening")));
    }

    #[tokio::test]
    async fn appended_rows_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileLedger::new(dir.path(), dir.path().join("logs").join("sent.tsv"));

        assert!(ledger.read_sent_log().await.unwrap().is_empty());

        let record = SendRecord {
            address: "jane@y.com".to_string(),
            subject: "Opening\tnow".to_string(),
            sender: "a@x.com".to_string(),
            sent_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
        };
        ledger.append_sent_log(&record).await.unwrap();

        let content = std::fs::read_to_string(ledger.sent_log()).unwrap();
        assert_eq!(
            content,
            "jane@y.com\tOpening now\ta@x.com\t2024-03-09 14:05:00 UTC\n"
        );

        let entries = ledger.read_sent_log().await.unwrap();
        assert!(entries.contains(&LedgerKey::new("jane@y.com", "Opening now")));
        // The key built from the template's raw subject still matches
        assert!(entries.contains(&LedgerKey::new("jane@y.com", "Opening\tnow")));
    }

    #[tokio::test]
    async fn missing_recipient_source_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("filter0.csv"), "jane@y.com,Acme\n").unwrap();

        let ledger = FileLedger::new(dir.path(), dir.path().join("sent.tsv"));
        assert_eq!(ledger.read_recipients("filter0").await.unwrap().len(), 1);
        assert!(matches!(
            ledger.read_recipients("filter1").await,
            Err(LedgerError::Read(_))
        ));
        assert!(matches!(
            ledger.read_recipients("../secrets").await,
            Err(LedgerError::Read(_))
        ));
    }
}
