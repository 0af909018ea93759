//! Gmail client.
//!
//! Listing is two-step: `messages.list` returns ids only, then every
//! message is fetched in full, concurrently. A message that fails to load
//! or whose body cannot be decoded is dropped and counted; the listing as a
//! whole still succeeds.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::outcome::Listing;
use crate::rest::RestClient;
use crate::transport::HttpRequest;

/// Gmail body data is base64url; padding is sometimes present.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Receive time from Gmail's `internalDate`.
    pub date: Option<DateTime<Utc>>,
    pub snippet: String,
    /// Plain-text body, or the HTML body when there is no plain part.
    pub body: String,
    pub labels: Vec<String>,
}

impl MailMessage {
    pub fn is_unread(&self) -> bool {
        self.labels.iter().any(|l| l == "UNREAD")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    internal_date: Option<String>,
    payload: Option<ApiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<ApiHeader>,
    body: Option<ApiBody>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Deserialize)]
struct ApiHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ApiBody {
    data: Option<String>,
}

impl ApiPart {
    fn header(&self, name: &str) -> String {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    }

    /// Depth-first search for the first part of `mime_type` carrying data.
    fn find_data(&self, mime_type: &str) -> Option<&str> {
        if self.mime_type.eq_ignore_ascii_case(mime_type)
            && let Some(data) = self.body.as_ref().and_then(|b| b.data.as_deref())
        {
            return Some(data);
        }
        self.parts.iter().find_map(|part| part.find_data(mime_type))
    }
}

fn decode_body(data: &str) -> ApiResult<String> {
    let bytes = BODY_ENGINE
        .decode(data.trim())
        .map_err(|e| ApiError::decode(format!("message body is not valid base64url: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn decode_message(message: ApiMessage) -> ApiResult<MailMessage> {
    let date = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);

    let (from, to, subject, body) = match &message.payload {
        Some(payload) => {
            let body = match payload
                .find_data("text/plain")
                .or_else(|| payload.find_data("text/html"))
            {
                Some(data) => decode_body(data)
                    .map_err(|e| ApiError::decode(format!("message {}: {}", message.id, e.message())))?,
                None => String::new(),
            };
            (
                payload.header("From"),
                payload.header("To"),
                payload.header("Subject"),
                body,
            )
        }
        None => Default::default(),
    };

    Ok(MailMessage {
        id: message.id,
        thread_id: message.thread_id,
        from,
        to,
        subject,
        date,
        snippet: message.snippet,
        body,
        labels: message.label_ids,
    })
}

/// Gmail operations for the signed-in user.
#[derive(Debug, Clone)]
pub struct MailClient {
    rest: RestClient,
}

impl MailClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// A copy whose calls stop at `cancel`.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self::new(self.rest.scoped(cancel))
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Most recent inbox messages, up to `max_results`.
    pub async fn list_inbox(&self, max_results: u32) -> ApiResult<Listing<MailMessage>> {
        let request = HttpRequest::get(self.rest.endpoint("users/me/messages"))
            .query("labelIds", "INBOX")
            .query("maxResults", max_results.to_string());
        self.fetch_listing(request).await
    }

    /// Messages matching a Gmail search query such as `from:dean is:unread`.
    pub async fn search(&self, query: &str, max_results: u32) -> ApiResult<Listing<MailMessage>> {
        let request = HttpRequest::get(self.rest.endpoint("users/me/messages"))
            .query("q", query)
            .query("maxResults", max_results.to_string());
        self.fetch_listing(request).await
    }

    /// One message by id.
    pub async fn get_message(&self, id: &str) -> ApiResult<MailMessage> {
        let message: ApiMessage = self.rest.fetch(self.message_request(id)).await?;
        decode_message(message).map_err(|e| e.with_provider(self.rest.provider()))
    }

    fn message_request(&self, id: &str) -> HttpRequest {
        let path = format!("users/me/messages/{}", urlencoding::encode(id));
        HttpRequest::get(self.rest.endpoint(&path)).query("format", "full")
    }

    async fn fetch_listing(&self, request: HttpRequest) -> ApiResult<Listing<MailMessage>> {
        let list: MessageList = self.rest.fetch(request).await?;
        let ids: Vec<String> = list.messages.into_iter().map(|m| m.id).collect();
        debug!(count = ids.len(), "fetching messages");

        let results = join_all(ids.iter().map(|id| self.get_message(id))).await;

        let mut items = Vec::with_capacity(results.len());
        let mut dropped = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(message) => items.push(message),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(message_id = %id, "skipping message: {e}");
                    dropped += 1;
                }
            }
        }
        Ok(Listing::new(items, dropped))
    }
}
