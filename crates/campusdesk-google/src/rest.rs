//! Authenticated REST client shared by the four provider adapters.
//!
//! A [`RestClient`] knows its provider, its base URL and where to find a
//! token: the copy pushed by the session context, or the token store until
//! the context has pushed anything. Every request it sends carries `Authorization: Bearer <token>`.
//! Non-2xx answers become `RequestFailed` with the provider's own error
//! message when one can be found in the body.

use std::sync::{Arc, PoisonError, RwLock};

use campusdesk_core::ProviderKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::tokens::TokenStore;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Longest raw body quoted in an error message.
const MAX_ERROR_BODY: usize = 200;

/// A bearer token and when it stops being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// One page of a `nextPageToken`-style listing.
pub trait Page: DeserializeOwned {
    type Item;

    /// Splits the page into its items and the token of the next page.
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

/// The client's view of its provider's sign-in.
#[derive(Debug, Clone, Default)]
enum TokenSlot {
    /// Nothing pushed yet; the token store is consulted.
    #[default]
    Unsynced,
    /// Signed out. The store is not consulted.
    SignedOut,
    Token(AccessToken),
}

#[derive(Debug)]
struct Shared {
    provider: ProviderKind,
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    token: RwLock<TokenSlot>,
}

/// Authenticated client for one provider's REST API.
///
/// Clones share the token copy. A clone made with [`RestClient::scoped`]
/// additionally stops at the given cancellation token.
#[derive(Debug, Clone)]
pub struct RestClient {
    shared: Arc<Shared>,
    cancel: Option<CancellationToken>,
}

impl RestClient {
    pub fn new(
        provider: ProviderKind,
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                base_url: base_url.into(),
                transport,
                store,
                token: RwLock::new(TokenSlot::Unsynced),
            }),
            cancel: None,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.shared.provider
    }

    pub fn base_url(&self) -> &str {
        &self.shared.base_url
    }

    /// Replaces the in-memory token copy. `None` marks the client signed
    /// out: from then on the store is no longer consulted.
    pub fn set_token(&self, token: Option<AccessToken>) {
        *self
            .shared
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = match token {
            Some(token) => TokenSlot::Token(token),
            None => TokenSlot::SignedOut,
        };
    }

    /// The in-memory token copy, without looking at the store.
    pub fn token(&self) -> Option<AccessToken> {
        match self.slot() {
            TokenSlot::Token(token) => Some(token),
            TokenSlot::Unsynced | TokenSlot::SignedOut => None,
        }
    }

    fn slot(&self) -> TokenSlot {
        self.shared
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A clone whose requests resolve to `Cancelled` once `cancel` fires.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cancel: Some(cancel),
        }
    }

    /// Joins `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.shared.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Resolves the token to send: the pushed copy, or the store when
    /// nothing has been pushed yet.
    ///
    /// # Errors
    ///
    /// `NotSignedIn` when signed out or nothing is stored, `SessionExpired`
    /// when the token is past its expiry.
    pub fn access_token(&self) -> ApiResult<String> {
        let provider = self.shared.provider;
        let token = match self.slot() {
            TokenSlot::Token(token) => token,
            TokenSlot::SignedOut => return Err(ApiError::not_signed_in(provider)),
            TokenSlot::Unsynced => {
                let record = self
                    .shared
                    .store
                    .get(provider)
                    .map_err(|e| ApiError::not_signed_in(provider).with_source(e))?
                    .ok_or_else(|| ApiError::not_signed_in(provider))?;
                let token = AccessToken::new(record.access_token, record.expires_at);
                self.set_token(Some(token.clone()));
                token
            }
        };
        if token.is_expired() {
            return Err(ApiError::session_expired(provider));
        }
        Ok(token.token)
    }

    fn check_cancelled(&self) -> ApiResult<()> {
        match &self.cancel {
            Some(cancel) if cancel.is_cancelled() => {
                Err(ApiError::cancelled().with_provider(self.shared.provider))
            }
            _ => Ok(()),
        }
    }

    /// Sends `request` with the bearer token and checks the status.
    ///
    /// # Errors
    ///
    /// Token errors as for [`access_token`](Self::access_token), transport
    /// errors, `RequestFailed` for non-2xx and `Cancelled`.
    pub async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        self.check_cancelled()?;
        let provider = self.shared.provider;
        let request = request.bearer(self.access_token()?);
        debug!(%provider, method = %request.method, url = %request.url, "api request");

        let sent = self.shared.transport.send(request);
        let response = match &self.cancel {
            Some(cancel) => tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ApiError::cancelled().with_provider(provider)),
                response = sent => response,
            },
            None => sent.await,
        }
        .map_err(|e| e.with_provider(provider))?;

        if !response.is_success() {
            debug!(%provider, status = response.status, "api request failed");
            return Err(
                ApiError::request_failed(response.status, error_message(&response))
                    .with_provider(provider),
            );
        }
        Ok(response)
    }

    /// Sends `request` and decodes the JSON body.
    pub async fn fetch<T: DeserializeOwned>(&self, request: HttpRequest) -> ApiResult<T> {
        let response = self.send(request).await?;
        response
            .decode()
            .map_err(|e| e.with_provider(self.shared.provider))
    }

    /// Sends `request` and returns the raw body.
    pub async fn fetch_bytes(&self, request: HttpRequest) -> ApiResult<Vec<u8>> {
        Ok(self.send(request).await?.body)
    }

    /// Sends `request`, ignoring the body.
    pub async fn execute(&self, request: HttpRequest) -> ApiResult<()> {
        self.send(request).await.map(|_| ())
    }

    /// Follows `nextPageToken` until the last page and concatenates items.
    ///
    /// `build` receives the page token (none for the first page) and returns
    /// the request for that page.
    pub async fn collect_pages<P, F>(&self, build: F) -> ApiResult<Vec<P::Item>>
    where
        P: Page,
        F: Fn(Option<&str>) -> HttpRequest,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page: P = self.fetch(build(page_token.as_deref())).await?;
            let (page_items, next) = page.into_parts();
            items.extend(page_items);
            match next {
                Some(next) if !next.is_empty() && page_token.as_deref() != Some(&next) => {
                    page_token = Some(next);
                }
                _ => break,
            }
        }
        Ok(items)
    }
}

/// Extracts a readable message from an error response.
///
/// Understands Google API errors (`{"error": {"message": ..}}`) and OAuth
/// errors (`{"error": "..", "error_description": ".."}`); anything else is
/// quoted raw.
pub fn error_message(response: &HttpResponse) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&response.body) {
        let error = &value["error"];
        if let Some(message) = error["message"].as_str() {
            return message.to_string();
        }
        if let Some(description) = value["error_description"].as_str() {
            return description.to_string();
        }
        if let Some(code) = error.as_str() {
            return code.to_string();
        }
    }

    let text = response.text();
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP {}", response.status);
    }
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use campusdesk_core::UserProfile;
    use chrono::Duration;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::error::ApiErrorCode;
    use crate::fake::FakeTransport;
    use crate::tokens::{MemoryTokenStore, TokenRecord};
    use crate::transport::Method;

    const BASE: &str = "https://api.test/v1";

    fn client(transport: &Arc<FakeTransport>, store: Arc<MemoryTokenStore>) -> RestClient {
        RestClient::new(ProviderKind::Drive, BASE, transport.clone(), store)
    }

    #[test]
    fn endpoint_joins_paths() {
        let c = client(&FakeTransport::new(), Arc::new(MemoryTokenStore::new()));
        assert_eq!(c.endpoint("files"), "https://api.test/v1/files");
        assert_eq!(c.endpoint("/files/a"), "https://api.test/v1/files/a");
    }

    #[tokio::test]
    async fn missing_token_is_not_signed_in_without_request() {
        let transport = FakeTransport::new();
        let c = client(&transport, Arc::new(MemoryTokenStore::new()));
        let err = c.send(HttpRequest::get(c.endpoint("files"))).await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::NotSignedIn);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refused_locally() {
        let transport = FakeTransport::new();
        let c = client(&transport, Arc::new(MemoryTokenStore::new()));
        c.set_token(Some(AccessToken::new("old", Some(Utc::now() - Duration::minutes(1)))));
        let err = c.send(HttpRequest::get(c.endpoint("files"))).await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::SessionExpired);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_store_token() {
        let transport = FakeTransport::new();
        transport.on_json(Method::Get, "/files", 200, json!({}));
        let store = Arc::new(MemoryTokenStore::new());
        store
            .set(&TokenRecord::new(
                ProviderKind::Drive,
                "stored-token",
                UserProfile::new("Ada", "ada@college.edu"),
            ))
            .unwrap();

        let c = client(&transport, store);
        c.execute(HttpRequest::get(c.endpoint("files"))).await.unwrap();
        assert_eq!(transport.requests()[0].bearer.as_deref(), Some("stored-token"));
        assert_eq!(c.token().unwrap().token, "stored-token");
    }

    #[tokio::test]
    async fn signed_out_client_ignores_stored_token() {
        let transport = FakeTransport::new();
        transport.on_json(Method::Get, "/files", 200, json!({}));
        let store = Arc::new(MemoryTokenStore::new());
        store
            .set(&TokenRecord::new(
                ProviderKind::Drive,
                "left-behind",
                UserProfile::new("Ada", "ada@college.edu"),
            ))
            .unwrap();

        let c = client(&transport, store);
        c.set_token(None);
        let err = c.send(HttpRequest::get(c.endpoint("files"))).await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::NotSignedIn);
        assert_eq!(transport.request_count(), 0);
        assert!(c.token().is_none());
    }

    #[tokio::test]
    async fn error_status_carries_provider_message() {
        let transport = FakeTransport::new();
        transport.on_json(
            Method::Get,
            "/files",
            403,
            json!({"error": {"code": 403, "message": "The user does not have sufficient permissions"}}),
        );
        let c = client(&transport, Arc::new(MemoryTokenStore::new()));
        c.set_token(Some(AccessToken::new("tok", None)));

        let err = c.send(HttpRequest::get(c.endpoint("files"))).await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::RequestFailed);
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.provider(), Some(ProviderKind::Drive));
        assert_eq!(err.message(), "The user does not have sufficient permissions");
    }

    #[tokio::test]
    async fn cancelled_scope_never_delivers() {
        let transport = FakeTransport::new();
        transport.on_json(Method::Get, "/files", 200, json!({}));
        let c = client(&transport, Arc::new(MemoryTokenStore::new()));
        c.set_token(Some(AccessToken::new("tok", None)));

        let cancel = CancellationToken::new();
        let scoped = c.scoped(cancel.clone());
        cancel.cancel();
        let err = scoped
            .execute(HttpRequest::get(c.endpoint("files")))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.request_count(), 0);

        // The unscoped client is unaffected.
        c.execute(HttpRequest::get(c.endpoint("files"))).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_request() {
        let transport = FakeTransport::new();
        transport.on_json(Method::Get, "/slow", 200, json!({}));
        transport.delay(std::time::Duration::from_secs(30));
        let c = client(&transport, Arc::new(MemoryTokenStore::new()));
        c.set_token(Some(AccessToken::new("tok", None)));

        let cancel = CancellationToken::new();
        let scoped = c.scoped(cancel.clone());
        let request = tokio::spawn(async move {
            scoped.execute(HttpRequest::get("https://api.test/v1/slow")).await
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        let err = request.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct NumberPage {
        #[serde(default)]
        numbers: Vec<u32>,
        next_page_token: Option<String>,
    }

    impl Page for NumberPage {
        type Item = u32;

        fn into_parts(self) -> (Vec<u32>, Option<String>) {
            (self.numbers, self.next_page_token)
        }
    }

    #[tokio::test]
    async fn collect_pages_follows_tokens() {
        let transport = FakeTransport::new();
        transport.on(Method::Get, "/numbers", |req| {
            let body = match req.query_value("pageToken") {
                None => json!({"numbers": [1, 2], "nextPageToken": "p2"}),
                Some("p2") => json!({"numbers": [3], "nextPageToken": "p3"}),
                _ => json!({"numbers": [4]}),
            };
            Ok(HttpResponse::json(200, &body))
        });
        let c = client(&transport, Arc::new(MemoryTokenStore::new()));
        c.set_token(Some(AccessToken::new("tok", None)));

        let numbers = c
            .collect_pages::<NumberPage, _>(|token| {
                HttpRequest::get(c.endpoint("numbers")).query_opt("pageToken", token)
            })
            .await
            .unwrap();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn error_message_shapes() {
        let oauth = HttpResponse::json(
            400,
            &json!({"error": "invalid_grant", "error_description": "Token has been expired or revoked."}),
        );
        assert_eq!(error_message(&oauth), "Token has been expired or revoked.");

        let bare = HttpResponse::json(400, &json!({"error": "invalid_token"}));
        assert_eq!(error_message(&bare), "invalid_token");

        assert_eq!(error_message(&HttpResponse::new(502, "")), "HTTP 502");
        let long = HttpResponse::new(500, "x".repeat(500));
        assert_eq!(error_message(&long).len(), MAX_ERROR_BODY + 3);
    }
}
