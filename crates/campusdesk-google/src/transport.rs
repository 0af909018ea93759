//! HTTP transport used by the sessions and clients.
//!
//! All network traffic goes through [`HttpTransport`]. The production
//! implementation is [`ReqwestTransport`]; the trait exists so the whole
//! session and client stack can run against canned responses.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{ApiError, ApiResult};

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    /// Pre-encoded bytes with an explicit content type.
    Raw { content_type: String, data: Vec<u8> },
}

/// An outgoing request. The query string is kept apart from the URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            bearer: None,
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Appends a query parameter when `value` is present.
    pub fn query_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    pub fn raw(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.body = Some(RequestBody::Raw {
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Returns the value of the first query parameter named `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A response with the body fully read.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A response carrying `value` serialized as JSON.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON. An empty body parses as `{}`.
    pub fn decode<T: DeserializeOwned>(&self) -> ApiResult<T> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|e| {
            ApiError::decode(format!("unexpected response shape: {e}")).with_source(e)
        })
    }
}

/// Sends HTTP requests.
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Sends `request` and reads the full response.
    ///
    /// Only failures to obtain a response are errors; any HTTP status,
    /// including 4xx and 5xx, is returned as `Ok`.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, ApiResult<HttpResponse>>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client with the given timeout and user agent.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialised.
    pub fn new(timeout: Duration, user_agent: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                ApiError::configuration(format!("failed to create HTTP client: {e}"))
                    .with_source(e)
            })?;
        Ok(Self { client })
    }

    async fn execute(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        trace!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            Some(RequestBody::Json(value)) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(value.to_string()),
            Some(RequestBody::Form(pairs)) => builder
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(encode_form(&pairs)),
            Some(RequestBody::Raw { content_type, data }) => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "request timeout".to_string()
            } else if e.is_connect() {
                format!("connection failed: {e}")
            } else {
                format!("request failed: {e}")
            };
            ApiError::network(message).with_source(e)
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            ApiError::network(format!("failed to read response: {e}")).with_source(e)
        })?;
        trace!(status, bytes = body.len(), "received response");

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, ApiResult<HttpResponse>> {
        Box::pin(self.execute(request))
    }
}

fn encode_form(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_query_and_auth() {
        let request = HttpRequest::get("https://example.test/v1/items")
            .query("pageSize", "10")
            .query_opt("pageToken", None::<String>)
            .query_opt("q", Some("trashed = false"))
            .bearer("tok");
        assert_eq!(request.query.len(), 2);
        assert_eq!(request.query_value("q"), Some("trashed = false"));
        assert_eq!(request.bearer.as_deref(), Some("tok"));
        assert!(request.body.is_none());
    }

    #[test]
    fn empty_body_decodes_as_empty_object() {
        let response = HttpResponse::new(204, Vec::new());
        let value: serde_json::Value = response.decode().unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn bad_json_is_a_decode_error() {
        let response = HttpResponse::new(200, "<html>");
        let err = response.decode::<serde_json::Value>().unwrap_err();
        assert_eq!(err.code(), crate::error::ApiErrorCode::DecodeFailed);
    }

    #[test]
    fn form_encoding_escapes_values() {
        let encoded = encode_form(&[
            ("code".to_string(), "4/a b".to_string()),
            ("grant_type".to_string(), "authorization_code".to_string()),
        ]);
        assert_eq!(encoded, "code=4%2Fa%20b&grant_type=authorization_code");
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(304, "").is_success());
        assert!(!HttpResponse::new(401, "").is_success());
    }
}
