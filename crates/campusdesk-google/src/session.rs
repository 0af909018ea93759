//! Per-provider OAuth session.
//!
//! ```text
//! Uninitialized --initialize--> Ready --sign_in--> SignedIn
//!                                 ^                   |
//!                                 +-----sign_out------+
//! ```
//!
//! Startup restore takes a stored record straight to `SignedIn` when the
//! token is unexpired and the userinfo endpoint still accepts it. Any other
//! stored record is deleted.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use campusdesk_core::{ProviderKind, UserProfile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::GoogleEndpoints;
use crate::error::{ApiError, ApiResult};
use crate::oauth::{ConsentFlow, fetch_userinfo, revoke_token};
use crate::rest::AccessToken;
use crate::tokens::{TokenRecord, TokenStore};
use crate::transport::HttpTransport;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Ready,
    SignedIn,
}

/// Observable auth state of one provider.
///
/// `is_signed_in` is true exactly when both a token and a user are present;
/// the fields are only changed through methods that keep it that way. The
/// token itself is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    provider: ProviderKind,
    is_signed_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserProfile>,
    #[serde(skip)]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl AuthSession {
    /// Signed-out state for `provider`.
    pub fn signed_out(provider: ProviderKind) -> Self {
        Self {
            provider,
            is_signed_in: false,
            user: None,
            access_token: None,
            expires_at: None,
            loading: false,
            last_error: None,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn is_signed_in(&self) -> bool {
        self.is_signed_in
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Token and expiry as handed to a REST client.
    pub fn token_copy(&self) -> Option<AccessToken> {
        self.access_token
            .as_ref()
            .map(|token| AccessToken::new(token.clone(), self.expires_at))
    }

    fn sign_in_with(&mut self, record: &TokenRecord) {
        self.access_token = Some(record.access_token.clone());
        self.user = Some(record.user.clone());
        self.expires_at = record.expires_at;
        self.is_signed_in = true;
        self.loading = false;
        self.last_error = None;
    }

    fn clear(&mut self) {
        *self = Self::signed_out(self.provider);
    }
}

/// What [`OAuthSession::restore`] did with the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// Nothing was stored.
    NoToken,
    /// The stored token is live; the session is signed in as this user.
    Restored(UserProfile),
    /// A stored record was deleted for the given reason.
    Discarded(String),
}

/// OAuth session for one provider.
#[derive(Debug)]
pub struct OAuthSession {
    provider: ProviderKind,
    client_id: String,
    endpoints: GoogleEndpoints,
    consent: Arc<dyn ConsentFlow>,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    scope: OnceLock<String>,
    state: RwLock<AuthSession>,
}

impl OAuthSession {
    pub fn new(
        provider: ProviderKind,
        client_id: impl Into<String>,
        endpoints: GoogleEndpoints,
        consent: Arc<dyn ConsentFlow>,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            provider,
            client_id: client_id.into(),
            endpoints,
            consent,
            transport,
            store,
            scope: OnceLock::new(),
            state: RwLock::new(AuthSession::signed_out(provider)),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Binds the scope string. Idempotent.
    ///
    /// # Errors
    ///
    /// `Configuration` when no OAuth client id is configured.
    pub fn initialize(&self) -> ApiResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(
                ApiError::configuration("no OAuth client id configured").with_provider(self.provider)
            );
        }
        self.scope.get_or_init(|| {
            debug!(provider = %self.provider, "session initialized");
            self.provider.scope_string()
        });
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        if self.scope.get().is_none() {
            SessionState::Uninitialized
        } else if self.read().is_signed_in() {
            SessionState::SignedIn
        } else {
            SessionState::Ready
        }
    }

    /// Copy of the observable state.
    pub fn snapshot(&self) -> AuthSession {
        self.read().clone()
    }

    /// Flags a sign-in or sign-out as in flight.
    pub fn set_loading(&self, loading: bool) {
        self.write().loading = loading;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AuthSession> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AuthSession> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, err: ApiError) -> ApiError {
        let mut state = self.write();
        state.loading = false;
        state.last_error = Some(err.message().to_string());
        err.with_provider(self.provider)
    }

    /// Runs interactive consent and signs in.
    ///
    /// On success the record is persisted and the profile returned. On any
    /// failure the session keeps its previous sign-in state, and a token
    /// obtained along the way is revoked.
    pub async fn sign_in(&self) -> ApiResult<UserProfile> {
        self.initialize().map_err(|e| self.fail(e))?;
        let scope = self.scope.get().cloned().unwrap_or_default();
        self.set_loading(true);
        info!(provider = %self.provider, "signing in");

        let grant = match self.consent.request_token(self.provider, &scope).await {
            Ok(grant) => grant,
            Err(e) => return Err(self.fail(e)),
        };
        let user = match fetch_userinfo(
            self.transport.as_ref(),
            &self.endpoints.userinfo_url,
            &grant.access_token,
        )
        .await
        {
            Ok(user) => user,
            Err(e) => {
                self.abandon(&grant.access_token).await;
                return Err(self.fail(e));
            }
        };

        let record = TokenRecord::new(self.provider, grant.access_token.clone(), user.clone())
            .with_expires_at(grant.expires_at(Utc::now()));
        if let Err(e) = self.store.set(&record) {
            self.abandon(&grant.access_token).await;
            return Err(self.fail(e));
        }
        self.write().sign_in_with(&record);
        info!(provider = %self.provider, email = %user.email, "signed in");
        Ok(user)
    }

    /// Best-effort revoke of a token that will not be kept.
    async fn abandon(&self, token: &str) {
        if let Err(e) = revoke_token(self.transport.as_ref(), &self.endpoints.revoke_url, token).await
        {
            warn!(provider = %self.provider, "could not revoke unused token: {e}");
        }
    }

    /// Revokes the token, then forgets it in the store and in memory.
    ///
    /// A failed revoke is logged and does not stop the sign-out. A failed
    /// store clear is returned, but the session is signed out in memory
    /// regardless. Signing out while signed out only clears the store.
    pub async fn sign_out(&self) -> ApiResult<()> {
        let token = self.read().access_token.clone();
        if let Some(token) = token {
            self.set_loading(true);
            if let Err(e) =
                revoke_token(self.transport.as_ref(), &self.endpoints.revoke_url, &token).await
            {
                warn!(provider = %self.provider, "token revoke failed: {e}");
            }
        }
        let cleared = self.store.clear(self.provider);
        self.write().clear();
        if let Err(e) = cleared {
            return Err(self.fail(e));
        }
        info!(provider = %self.provider, "signed out");
        Ok(())
    }

    /// Rehydrates the session from the token store.
    ///
    /// # Errors
    ///
    /// Only configuration problems. A stale or unusable record is deleted
    /// and reported as [`RestoreOutcome::Discarded`].
    pub async fn restore(&self) -> ApiResult<RestoreOutcome> {
        self.initialize()?;
        let record = match self.store.get(self.provider) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(RestoreOutcome::NoToken),
            Err(e) => return Ok(self.discard(format!("unreadable record: {}", e.message()))),
        };

        if record.is_expired() {
            return Ok(self.discard("token expired".to_string()));
        }

        self.set_loading(true);
        let probe = fetch_userinfo(
            self.transport.as_ref(),
            &self.endpoints.userinfo_url,
            &record.access_token,
        )
        .await;
        match probe {
            Ok(_) => {
                self.write().sign_in_with(&record);
                info!(provider = %self.provider, "restored session");
                Ok(RestoreOutcome::Restored(record.user))
            }
            Err(e) => Ok(self.discard(format!("token rejected: {}", e.message()))),
        }
    }

    fn discard(&self, reason: String) -> RestoreOutcome {
        info!(provider = %self.provider, %reason, "discarding stored token");
        self.write().clear();
        if let Err(e) = self.store.clear(self.provider) {
            warn!(provider = %self.provider, "could not clear stale token: {e}");
        }
        RestoreOutcome::Discarded(reason)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::error::ApiErrorCode;
    use crate::fake::{FakeConsent, FakeTransport, FlakyStore};
    use crate::tokens::MemoryTokenStore;
    use crate::transport::{HttpResponse, Method};

    struct Harness {
        session: OAuthSession,
        transport: Arc<FakeTransport>,
        consent: Arc<FakeConsent>,
        store: Arc<MemoryTokenStore>,
    }

    fn harness(client_id: &str) -> Harness {
        let transport = FakeTransport::new();
        let consent = FakeConsent::new();
        let store = Arc::new(MemoryTokenStore::new());
        let session = OAuthSession::new(
            ProviderKind::Mail,
            client_id,
            GoogleEndpoints::default(),
            consent.clone(),
            transport.clone(),
            store.clone(),
        );
        Harness {
            session,
            transport,
            consent,
            store,
        }
    }

    fn accept_userinfo(transport: &FakeTransport) {
        transport.on_json(
            Method::Get,
            "/userinfo",
            200,
            json!({"name": "Ada", "email": "ada@college.edu"}),
        );
    }

    fn stored(h: &Harness, token: &str, expires_at: Option<DateTime<Utc>>) {
        h.store
            .set(
                &TokenRecord::new(ProviderKind::Mail, token, UserProfile::new("Ada", "ada@college.edu"))
                    .with_expires_at(expires_at),
            )
            .unwrap();
    }

    #[test]
    fn initialize_requires_client_id() {
        let h = harness(" ");
        assert_eq!(h.session.state(), SessionState::Uninitialized);
        let err = h.session.initialize().unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::Configuration);

        let h = harness("desk.apps.googleusercontent.com");
        h.session.initialize().unwrap();
        h.session.initialize().unwrap();
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn sign_in_persists_same_token() {
        let h = harness("desk.apps.googleusercontent.com");
        h.consent.grant("ya29.fresh");
        accept_userinfo(&h.transport);

        let user = h.session.sign_in().await.unwrap();
        assert_eq!(user.email, "ada@college.edu");
        assert_eq!(h.session.state(), SessionState::SignedIn);

        let snapshot = h.session.snapshot();
        assert!(snapshot.is_signed_in());
        assert!(!snapshot.is_loading());
        assert_eq!(snapshot.access_token(), Some("ya29.fresh"));
        assert!(snapshot.expires_at().unwrap() > Utc::now());

        let record = h.store.get(ProviderKind::Mail).unwrap().unwrap();
        assert_eq!(record.access_token, "ya29.fresh");
        assert_eq!(record.user, user);
    }

    #[tokio::test]
    async fn denied_consent_stays_ready() {
        let h = harness("desk.apps.googleusercontent.com");
        h.consent.deny();

        let err = h.session.sign_in().await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::ConsentDenied);
        assert_eq!(err.provider(), Some(ProviderKind::Mail));
        assert_eq!(h.session.state(), SessionState::Ready);

        let snapshot = h.session.snapshot();
        assert!(!snapshot.is_loading());
        assert_eq!(snapshot.last_error(), Some("popup closed by user"));
        assert!(h.store.is_empty());
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn missing_client_id_fails_sign_in_without_consent() {
        let h = harness("");
        let err = h.session.sign_in().await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::Configuration);
        assert_eq!(h.consent.calls(), 0);

        let snapshot = h.session.snapshot();
        assert!(!snapshot.is_loading());
        assert_eq!(snapshot.last_error(), Some("no OAuth client id configured"));
    }

    #[tokio::test]
    async fn rejected_userinfo_revokes_new_token() {
        let h = harness("desk.apps.googleusercontent.com");
        h.consent.grant("ya29.orphan");
        h.transport.on_json(Method::Get, "/userinfo", 500, json!({"error": {"message": "backend error"}}));
        h.transport.on_json(Method::Post, "/revoke", 200, json!({}));

        let err = h.session.sign_in().await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::RequestFailed);
        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(h.store.is_empty());

        assert_eq!(h.transport.count(Method::Post, "/revoke"), 1);
    }

    fn flaky_session(store: Arc<FlakyStore>) -> (OAuthSession, Arc<FakeTransport>, Arc<FakeConsent>) {
        let transport = FakeTransport::new();
        let consent = FakeConsent::new();
        accept_userinfo(&transport);
        transport.on_json(Method::Post, "/revoke", 200, json!({}));
        let session = OAuthSession::new(
            ProviderKind::Drive,
            "desk.apps.googleusercontent.com",
            GoogleEndpoints::default(),
            consent.clone(),
            transport.clone(),
            store,
        );
        (session, transport, consent)
    }

    #[tokio::test]
    async fn unpersisted_sign_in_is_an_error() {
        let store = FlakyStore::new();
        store.fail_writes();
        let (session, transport, consent) = flaky_session(store.clone());
        consent.grant("ya29.drive");

        let err = session.sign_in().await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::Storage);
        assert_eq!(err.provider(), Some(ProviderKind::Drive));
        assert!(!session.snapshot().is_signed_in());
        assert!(!session.snapshot().is_loading());
        assert!(store.is_empty());
        assert_eq!(transport.count(Method::Post, "/revoke"), 1);
    }

    #[tokio::test]
    async fn failed_store_clear_still_signs_out_in_memory() {
        let store = FlakyStore::new();
        let (session, _transport, consent) = flaky_session(store.clone());
        consent.grant("ya29.drive");
        session.sign_in().await.unwrap();

        store.fail_removes();
        let err = session.sign_out().await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::Storage);

        let snapshot = session.snapshot();
        assert!(!snapshot.is_signed_in());
        assert_eq!(snapshot.access_token(), None);
        assert!(!snapshot.is_loading());
    }

    #[tokio::test]
    async fn sign_out_revokes_and_clears() {
        let h = harness("desk.apps.googleusercontent.com");
        h.consent.grant("ya29.fresh");
        accept_userinfo(&h.transport);
        h.transport.on_json(Method::Post, "/revoke", 200, json!({}));
        h.session.sign_in().await.unwrap();

        h.session.sign_out().await.unwrap();
        assert!(!h.session.snapshot().is_signed_in());
        assert_eq!(h.session.snapshot().access_token(), None);
        assert_eq!(h.store.get(ProviderKind::Mail).unwrap(), None);
        assert_eq!(h.transport.count(Method::Post, "/revoke"), 1);
    }

    #[tokio::test]
    async fn failed_revoke_still_signs_out() {
        let h = harness("desk.apps.googleusercontent.com");
        h.consent.grant("ya29.fresh");
        accept_userinfo(&h.transport);
        h.transport.on(Method::Post, "/revoke", |_| Err(ApiError::network("offline")));
        h.session.sign_in().await.unwrap();

        h.session.sign_out().await.unwrap();
        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn sign_out_when_signed_out_makes_no_request() {
        let h = harness("desk.apps.googleusercontent.com");
        h.session.sign_out().await.unwrap();
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn restore_with_live_token() {
        let h = harness("desk.apps.googleusercontent.com");
        stored(&h, "ya29.saved", None);
        accept_userinfo(&h.transport);

        let outcome = h.session.restore().await.unwrap();
        assert_eq!(
            outcome,
            RestoreOutcome::Restored(UserProfile::new("Ada", "ada@college.edu"))
        );
        assert_eq!(h.session.snapshot().access_token(), Some("ya29.saved"));
        assert_eq!(h.transport.requests()[0].bearer.as_deref(), Some("ya29.saved"));
    }

    #[tokio::test]
    async fn restore_with_rejected_token_clears_record() {
        let h = harness("desk.apps.googleusercontent.com");
        stored(&h, "ya29.revoked", None);
        h.transport.on(Method::Get, "/userinfo", |_| {
            Ok(HttpResponse::json(401, &json!({"error": {"code": 401, "message": "Invalid Credentials"}})))
        });

        let outcome = h.session.restore().await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::Discarded(ref r) if r.contains("Invalid Credentials")));
        assert!(!h.session.snapshot().is_signed_in());
        assert!(!h.session.snapshot().is_loading());
        assert_eq!(h.store.get(ProviderKind::Mail).unwrap(), None);
    }

    #[tokio::test]
    async fn restore_discards_expired_without_network() {
        let h = harness("desk.apps.googleusercontent.com");
        stored(&h, "ya29.old", Some(Utc::now() - Duration::hours(1)));

        let outcome = h.session.restore().await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Discarded("token expired".to_string()));
        assert_eq!(h.transport.request_count(), 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn restore_discards_corrupt_record() {
        let h = harness("desk.apps.googleusercontent.com");
        use crate::tokens::KeyValueStore;
        h.store.write("mail_access_token", "tok").unwrap();
        h.store.write("mail_user", "not json").unwrap();

        let outcome = h.session.restore().await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::Discarded(_)));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn restore_without_record() {
        let h = harness("desk.apps.googleusercontent.com");
        assert_eq!(h.session.restore().await.unwrap(), RestoreOutcome::NoToken);
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[test]
    fn serialized_session_hides_token() {
        let mut session = AuthSession::signed_out(ProviderKind::Drive);
        session.sign_in_with(&TokenRecord::new(
            ProviderKind::Drive,
            "secret-token",
            UserProfile::new("Ada", "ada@college.edu"),
        ));
        insta::assert_json_snapshot!(session, @r#"
        {
          "provider": "drive",
          "isSignedIn": true,
          "user": {
            "name": "Ada",
            "email": "ada@college.edu"
          },
          "loading": false
        }
        "#);
    }
}
