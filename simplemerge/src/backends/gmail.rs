//! Gmail REST transport
//!
//! Messages are sent through `users/me/messages/send` with the sender's own
//! access token, so each message leaves from the sender's mailbox and shows
//! up in its Sent folder. The same client lists inbox threads for the
//! unified inbox.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use simplemerge_campaign::{
    Credential, MailTransport, OutgoingMessage, TransportError,
    inbox::{InboxReader, ThreadSummary},
};
use simplemerge_common::{incoming, outgoing};

use super::mime;

/// Threads shown in the unified inbox
const INBOX_QUERY: &str = "in:inbox -from:mailer-daemon";

/// Headers needed to summarise a thread
const SUMMARY_HEADERS: [&str; 3] = ["Subject", "From", "Message-ID"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadRef>,
}

#[derive(Debug, Deserialize)]
struct ThreadRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Thread {
    id: String,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl Message {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    fn internal_date(&self) -> i64 {
        self.internal_date
            .as_deref()
            .and_then(|date| date.parse().ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Mail transport and inbox reader backed by the Gmail REST API
#[derive(Debug, Clone)]
pub struct GmailTransport {
    http: reqwest::Client,
    base_url: String,
}

impl GmailTransport {
    /// Create a transport rooted at `endpoint`
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is empty or not an absolute URL, or
    /// the HTTP client cannot be built.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let base_url = endpoint.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TransportError::Message("endpoint must not be empty".to_string()));
        }
        reqwest::Url::parse(&base_url)
            .map_err(|e| TransportError::Message(format!("invalid endpoint {base_url}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    fn build_url(&self, segments: &[&str]) -> Result<reqwest::Url, TransportError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| TransportError::Message(e.to_string()))?;
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                TransportError::Message("endpoint must be an absolute URL".to_string())
            })?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, TransportError> {
        let response = self
            .http
            .get(self.build_url(segments)?)
            .query(query)
            .bearer_auth(credential.secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Self::handle_response(response).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        credential: &Credential,
        segments: &[&str],
        body: &B,
    ) -> Result<T, TransportError> {
        let response = self
            .http
            .post(self.build_url(segments)?)
            .json(body)
            .bearer_auth(credential.secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| TransportError::Network(format!("malformed response: {e}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify(status, &body))
        }
    }

    fn summarize(account: &str, thread: Thread) -> Option<ThreadSummary> {
        let first = thread.messages.first()?;
        let last = thread.messages.last()?;

        let counterpart = thread
            .messages
            .iter()
            .rev()
            .filter_map(|message| message.header("From"))
            .find(|from| !from.contains(account))
            .unwrap_or("Unknown");

        Some(ThreadSummary {
            account: account.to_string(),
            subject: first.header("Subject").unwrap_or("No Subject").to_string(),
            counterpart: counterpart.to_string(),
            snippet: last.snippet.clone(),
            last_message_at: last.internal_date(),
            last_rfc_message_id: last
                .header("Message-ID")
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ToString::to_string),
            thread_id: thread.id,
        })
    }
}

/// Map a failed API call onto the transport error taxonomy
fn classify(status: reqwest::StatusCode, body: &str) -> TransportError {
    let detail = serde_json::from_str::<ApiError>(body)
        .map_or_else(|_| body.trim().to_string(), |error| error.error.message);
    let detail = format!("{} {detail}", status.as_u16()).trim_end().to_string();

    match status.as_u16() {
        401 | 403 => TransportError::Unauthorized(detail),
        429 => TransportError::RateLimited(detail),
        400..=499 => TransportError::Rejected(detail),
        _ => TransportError::Network(detail),
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn send(
        &self,
        credential: &Credential,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        let request = SendRequest {
            raw: URL_SAFE_NO_PAD.encode(mime::compose(message)),
            thread_id: message.thread_id.clone(),
        };

        let sent: SentMessage = self
            .post_json(credential, &["users", "me", "messages", "send"], &request)
            .await?;

        outgoing!(
            level = DEBUG,
            sender = %credential.account(),
            recipient = %message.to,
            id = %sent.id,
            thread = ?sent.thread_id,
            "Gmail accepted message"
        );

        Ok(())
    }
}

#[async_trait]
impl InboxReader for GmailTransport {
    async fn list_threads(
        &self,
        credential: &Credential,
        max: usize,
    ) -> Result<Vec<ThreadSummary>, TransportError> {
        let max = max.to_string();
        let list: ThreadList = self
            .get_json(
                credential,
                &["users", "me", "threads"],
                &[("maxResults", max.as_str()), ("q", INBOX_QUERY)],
            )
            .await?;

        let mut query = vec![("format", "metadata")];
        query.extend(SUMMARY_HEADERS.iter().map(|header| ("metadataHeaders", *header)));

        let mut summaries = Vec::with_capacity(list.threads.len());
        for thread in list.threads {
            let thread: Thread = self
                .get_json(credential, &["users", "me", "threads", thread.id.as_str()], &query)
                .await?;

            if let Some(summary) = Self::summarize(credential.account(), thread) {
                summaries.push(summary);
            }
        }

        incoming!(
            level = DEBUG,
            account = %credential.account(),
            threads = summaries.len(),
            "Listed Gmail threads"
        );

        Ok(summaries)
    }
}
