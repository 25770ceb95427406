//! Control protocol types and framing

use std::fmt::{Display, Formatter};

use chrono::{TimeZone, Utc, offset::LocalResult};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use simplemerge_campaign::{ProgressSnapshot, inbox::ThreadSummary};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ControlError, Result};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest request a server will read (1MB)
pub const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Largest response a client will read (10MB)
pub const MAX_RESPONSE_SIZE: u32 = 10_000_000;

/// Format a timestamp (milliseconds since epoch) as human-readable
#[must_use]
pub fn format_timestamp(timestamp_ms: i64) -> String {
    if let LocalResult::Single(dt) = Utc.timestamp_millis_opt(timestamp_ms) {
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        "unknown".to_string()
    }
}

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// The actual command to execute
    pub command: RequestCommand,
}

/// Request command types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    /// Daemon health and status
    System(SystemCommand),
    /// The current campaign run
    Campaign(CampaignCommand),
    /// Sender inboxes
    Inbox(InboxCommand),
}

/// System management commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Health check / ping
    Ping,
    /// Get daemon status
    Status,
}

/// Campaign commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CampaignCommand {
    /// Snapshot of the current run's progress
    Progress,
    /// Ask the current run to stop at its next check
    Stop,
    /// Render the configured template with sample values
    Preview,
}

/// Inbox commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InboxCommand {
    /// Newest threads across every sender account
    List {
        /// Threads fetched per account
        max_per_account: usize,
    },
    /// Answer a thread from the unified inbox as the account that owns it
    Reply {
        /// The thread as it was listed
        thread: ThreadSummary,
        /// HTML body of the reply
        body: String,
    },
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

/// Response payload types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Success with no data
    Ok,
    /// Success with data
    Data(Box<ResponseData>),
    /// Error message
    Error(String),
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Progress of the current run
    Progress(ProgressSnapshot),
    /// Daemon status
    SystemStatus(SystemStatus),
    /// Rendered template preview
    Preview(TemplatePreview),
    /// Unified inbox
    Inbox(Vec<ThreadSummary>),
    /// Free-form message
    Message(String),
}

/// Daemon status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Daemon version
    pub version: String,
    /// Seconds since the daemon started
    pub uptime_secs: u64,
    /// Current run id, if a run was launched
    pub run_id: Option<String>,
    /// Current run phase, if a run was launched
    pub phase: Option<String>,
    /// Whether the daemon is in dry-run mode
    pub dry_run: bool,
    /// Number of configured senders
    pub senders: usize,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version:   {}", self.version)?;
        writeln!(f, "Uptime:    {}s", self.uptime_secs)?;
        writeln!(f, "Senders:   {}", self.senders)?;
        writeln!(f, "Dry run:   {}", self.dry_run)?;
        match (&self.run_id, &self.phase) {
            (Some(run_id), Some(phase)) => write!(f, "Run:       {run_id} ({phase})"),
            _ => write!(f, "Run:       none"),
        }
    }
}

/// A template rendered with sample values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePreview {
    pub subject: String,
    pub body: String,
}

impl Display for TemplatePreview {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Subject: {}", self.subject)?;
        f.write_str("\n--- Body ---\n")?;
        writeln!(f, "{}", self.body)
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
        }
    }

    /// Check if the request version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    /// Create an error response
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    /// Create a success response with no data
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    /// Create a response with data
    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    /// Check if the response indicates success (not an error)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Check if the response version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

/// Read one length-prefixed frame.
pub(crate) async fn read_frame<T, S>(stream: &mut S, limit: u32) -> Result<T>
where
    T: DeserializeOwned,
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let len = u32::from_be_bytes(len_buf);
    if len > limit {
        return Err(ControlError::FrameTooLarge(len));
    }

    let mut bytes = vec![0u8; len as usize];
    stream.read_exact(&mut bytes).await?;

    let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
    Ok(value)
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<T, S>(stream: &mut S, value: &T) -> Result<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let len = u32::try_from(bytes.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_to_current_version() {
        let request = Request::new(RequestCommand::Campaign(CampaignCommand::Progress));
        assert!(request.is_version_compatible());

        let request = Request {
            version: PROTOCOL_VERSION + 1,
            ..request
        };
        assert!(!request.is_version_compatible());
    }

    #[test]
    fn test_response_success() {
        assert!(Response::ok().is_success());
        assert!(Response::data(ResponseData::Message("hi".to_string())).is_success());
        assert!(!Response::error("nope").is_success());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14 22:13:20 UTC");
    }

    #[tokio::test]
    async fn test_frame_rejects_oversized_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_REQUEST_SIZE + 1).to_be_bytes())
            .await
            .unwrap();

        let result: Result<Request> = read_frame(&mut server, MAX_REQUEST_SIZE).await;
        assert!(matches!(result, Err(ControlError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_frame_reports_closed_connection() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let result: Result<Request> = read_frame(&mut server, MAX_REQUEST_SIZE).await;
        assert!(matches!(result, Err(ControlError::ConnectionClosed)));
    }
}
