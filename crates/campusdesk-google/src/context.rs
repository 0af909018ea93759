//! The four provider sessions and clients behind one handle.
//!
//! [`SessionContext`] owns everything: sessions, clients, the shared
//! transport and the token store. After every state change it copies the
//! session's token into the matching client and publishes a fresh
//! [`AuthSnapshot`] on a watch channel.

use std::sync::Arc;

use campusdesk_core::{ProviderKind, UserProfile};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::calendar::CalendarClient;
use crate::classroom::ClassroomClient;
use crate::config::GoogleConfig;
use crate::drive::DriveClient;
use crate::error::{ApiError, ApiErrorCode, ApiResult};
use crate::mail::MailClient;
use crate::oauth::{ConsentFlow, LoopbackConsent};
use crate::outcome::Outcome;
use crate::rest::RestClient;
use crate::session::{AuthSession, OAuthSession, RestoreOutcome};
use crate::tokens::{FileTokenStore, TokenStore};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Auth state of all four providers at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSnapshot {
    pub mail: AuthSession,
    pub drive: AuthSession,
    pub classroom: AuthSession,
    pub calendar: AuthSession,
}

impl AuthSnapshot {
    fn signed_out() -> Self {
        Self {
            mail: AuthSession::signed_out(ProviderKind::Mail),
            drive: AuthSession::signed_out(ProviderKind::Drive),
            classroom: AuthSession::signed_out(ProviderKind::Classroom),
            calendar: AuthSession::signed_out(ProviderKind::Calendar),
        }
    }

    pub fn get(&self, provider: ProviderKind) -> &AuthSession {
        match provider {
            ProviderKind::Mail => &self.mail,
            ProviderKind::Drive => &self.drive,
            ProviderKind::Classroom => &self.classroom,
            ProviderKind::Calendar => &self.calendar,
        }
    }

    pub fn signed_in_count(&self) -> usize {
        ProviderKind::ALL
            .iter()
            .filter(|p| self.get(**p).is_signed_in())
            .count()
    }
}

/// Per-provider result of [`SessionContext::sign_out_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignOutReport {
    pub results: Vec<(ProviderKind, Outcome<()>)>,
}

impl SignOutReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, outcome)| outcome.is_success())
    }
}

/// Owner of the sessions and clients.
#[derive(Debug)]
pub struct SessionContext {
    mail_session: OAuthSession,
    drive_session: OAuthSession,
    classroom_session: OAuthSession,
    calendar_session: OAuthSession,
    mail: MailClient,
    drive: DriveClient,
    classroom: ClassroomClient,
    calendar: CalendarClient,
    snapshot: watch::Sender<AuthSnapshot>,
}

impl SessionContext {
    /// Wires sessions and clients around the given collaborators.
    pub fn new(
        config: &GoogleConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        consent: Arc<dyn ConsentFlow>,
    ) -> Self {
        let endpoints = &config.endpoints;
        let session = |provider| {
            OAuthSession::new(
                provider,
                config.credentials.client_id.clone(),
                endpoints.clone(),
                Arc::clone(&consent),
                Arc::clone(&transport),
                Arc::clone(&store),
            )
        };
        let rest = |provider, base: &str| {
            RestClient::new(provider, base, Arc::clone(&transport), Arc::clone(&store))
        };

        let (snapshot, _) = watch::channel(AuthSnapshot::signed_out());
        Self {
            mail_session: session(ProviderKind::Mail),
            drive_session: session(ProviderKind::Drive),
            classroom_session: session(ProviderKind::Classroom),
            calendar_session: session(ProviderKind::Calendar),
            mail: MailClient::new(rest(ProviderKind::Mail, &endpoints.gmail_base)),
            drive: DriveClient::new(
                rest(ProviderKind::Drive, &endpoints.drive_base),
                endpoints.drive_upload_base.clone(),
            ),
            classroom: ClassroomClient::new(rest(ProviderKind::Classroom, &endpoints.classroom_base)),
            calendar: CalendarClient::new(rest(ProviderKind::Calendar, &endpoints.calendar_base)),
            snapshot,
        }
    }

    /// Production wiring: reqwest, a file token store and browser consent.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when the HTTP client cannot be
    /// built.
    pub fn from_config(config: &GoogleConfig) -> ApiResult<Self> {
        config.validate()?;
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.timeout, &config.user_agent)?);
        let store = Arc::new(FileTokenStore::new(config.token_dir.clone()));
        let consent = Arc::new(LoopbackConsent::new(
            config.credentials.clone(),
            &config.endpoints,
            config.loopback_port_range,
            config.consent_timeout,
            Arc::clone(&transport),
        ));
        Ok(Self::new(config, transport, store, consent))
    }

    pub fn session(&self, provider: ProviderKind) -> &OAuthSession {
        match provider {
            ProviderKind::Mail => &self.mail_session,
            ProviderKind::Drive => &self.drive_session,
            ProviderKind::Classroom => &self.classroom_session,
            ProviderKind::Calendar => &self.calendar_session,
        }
    }

    fn rest(&self, provider: ProviderKind) -> &RestClient {
        match provider {
            ProviderKind::Mail => self.mail.rest(),
            ProviderKind::Drive => self.drive.rest(),
            ProviderKind::Classroom => self.classroom.rest(),
            ProviderKind::Calendar => self.calendar.rest(),
        }
    }

    pub fn mail(&self) -> &MailClient {
        &self.mail
    }

    pub fn drive(&self) -> &DriveClient {
        &self.drive
    }

    pub fn classroom(&self) -> &ClassroomClient {
        &self.classroom
    }

    pub fn calendar(&self) -> &CalendarClient {
        &self.calendar
    }

    /// Current auth state of all providers.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn is_signed_in(&self, provider: ProviderKind) -> bool {
        self.session(provider).snapshot().is_signed_in()
    }

    /// Pushes the session's token into its client and republishes.
    fn sync(&self, provider: ProviderKind) {
        let state = self.session(provider).snapshot();
        self.rest(provider).set_token(state.token_copy());
        self.snapshot.send_modify(|snapshot| {
            let slot = match provider {
                ProviderKind::Mail => &mut snapshot.mail,
                ProviderKind::Drive => &mut snapshot.drive,
                ProviderKind::Classroom => &mut snapshot.classroom,
                ProviderKind::Calendar => &mut snapshot.calendar,
            };
            *slot = state;
        });
    }

    async fn restore_one(&self, provider: ProviderKind) -> (ProviderKind, Outcome<RestoreOutcome>) {
        let result = self.session(provider).restore().await;
        if let Err(e) = &result {
            warn!(%provider, "restore failed: {e}");
        }
        self.sync(provider);
        (provider, result.into())
    }

    /// Restores every provider from the token store, concurrently. Each
    /// provider's outcome is independent of the others.
    pub async fn restore_all(&self) -> Vec<(ProviderKind, Outcome<RestoreOutcome>)> {
        let results = join_all(ProviderKind::ALL.map(|p| self.restore_one(p))).await;
        info!(
            signed_in = self.snapshot().signed_in_count(),
            "restored sessions"
        );
        results
    }

    /// Interactive sign-in. Refused while a sign-in or sign-out for the same
    /// provider is in flight.
    pub async fn sign_in(&self, provider: ProviderKind) -> Outcome<UserProfile> {
        let session = self.session(provider);
        if session.snapshot().is_loading() {
            return Outcome::failure(
                ApiErrorCode::Internal,
                format!("{} sign-in already in progress", provider.label()),
            );
        }
        session.set_loading(true);
        self.sync(provider);

        let result = session.sign_in().await;
        self.sync(provider);
        result.into()
    }

    pub async fn sign_out(&self, provider: ProviderKind) -> Outcome<()> {
        let session = self.session(provider);
        session.set_loading(true);
        self.sync(provider);

        let result = session.sign_out().await;
        if result.is_err() {
            session.set_loading(false);
        }
        self.sync(provider);
        result.into()
    }

    /// Signs out of every provider concurrently. Never fails as a whole.
    pub async fn sign_out_all(&self) -> SignOutReport {
        let results = join_all(
            ProviderKind::ALL.map(|provider| async move { (provider, self.sign_out(provider).await) }),
        )
        .await;
        for (provider, outcome) in &results {
            if let Some(error) = &outcome.error {
                warn!(%provider, "sign-out failed: {error}");
            }
        }
        SignOutReport { results }
    }

    /// Fails with `NotSignedIn` unless `provider` has a session.
    pub fn require_signed_in(&self, provider: ProviderKind) -> ApiResult<()> {
        if self.is_signed_in(provider) {
            Ok(())
        } else {
            Err(ApiError::not_signed_in(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::OAuthCredentials;
    use crate::fake::{FakeConsent, FakeTransport, FlakyStore};
    use crate::tokens::{MemoryTokenStore, TokenRecord};
    use crate::transport::{HttpResponse, Method};

    struct Harness {
        context: Arc<SessionContext>,
        transport: Arc<FakeTransport>,
        consent: Arc<FakeConsent>,
        store: Arc<MemoryTokenStore>,
    }

    fn harness() -> Harness {
        let transport = FakeTransport::new();
        transport.on_json(
            Method::Get,
            "/userinfo",
            200,
            json!({"name": "Ada", "email": "ada@college.edu"}),
        );
        transport.on_json(Method::Post, "/revoke", 200, json!({}));
        let consent = FakeConsent::new();
        let store = Arc::new(MemoryTokenStore::new());
        let config = GoogleConfig::new(OAuthCredentials::new(
            "desk.apps.googleusercontent.com",
            "secret",
        ));
        let context = Arc::new(SessionContext::new(
            &config,
            transport.clone(),
            store.clone(),
            consent.clone(),
        ));
        Harness {
            context,
            transport,
            consent,
            store,
        }
    }

    fn context_with(
        client_id: &str,
        store: Arc<dyn TokenStore>,
    ) -> (SessionContext, Arc<FakeTransport>, Arc<FakeConsent>) {
        let transport = FakeTransport::new();
        transport.on_json(
            Method::Get,
            "/userinfo",
            200,
            json!({"name": "Ada", "email": "ada@college.edu"}),
        );
        transport.on_json(Method::Post, "/revoke", 200, json!({}));
        let consent = FakeConsent::new();
        let config = GoogleConfig::new(OAuthCredentials::new(client_id, "secret"));
        let context = SessionContext::new(&config, transport.clone(), store, consent.clone());
        (context, transport, consent)
    }
    #[tokio::test]
    async fn sign_in_publishes_and_feeds_client() {
        let h = harness();
        let mut updates = h.context.subscribe();
        h.consent.grant("ya29.mail");

        let outcome = h.context.sign_in(ProviderKind::Mail).await;
        assert!(outcome.is_success());
        assert!(updates.has_changed().unwrap());

        let snapshot = updates.borrow_and_update().clone();
        assert!(snapshot.mail.is_signed_in());
        assert!(!snapshot.drive.is_signed_in());
        assert_eq!(
            h.context.mail().rest().token().map(|t| t.token).as_deref(),
            Some("ya29.mail")
        );
        assert_eq!(
            h.store.get(ProviderKind::Mail).unwrap().unwrap().access_token,
            "ya29.mail"
        );
    }

    #[tokio::test]
    async fn concurrent_sign_in_is_refused() {
        let h = harness();
        h.consent.grant("ya29.first");
        h.consent.grant("ya29.second");

        let (first, second) = tokio::join!(
            h.context.sign_in(ProviderKind::Drive),
            h.context.sign_in(ProviderKind::Drive)
        );
        assert!(first.is_success());
        assert!(!second.is_success());
        assert!(second.error.unwrap().contains("already in progress"));
        assert_eq!(h.consent.calls(), 1);
    }

    #[tokio::test]
    async fn failed_sign_in_reports_error_and_clears_loading() {
        let h = harness();
        h.consent.deny();
        let outcome = h.context.sign_in(ProviderKind::Classroom).await;
        assert_eq!(outcome.code, Some(ApiErrorCode::ConsentDenied));

        let snapshot = h.context.snapshot();
        assert!(!snapshot.classroom.is_signed_in());
        assert!(!snapshot.classroom.is_loading());

        // A second attempt goes through.
        h.consent.grant("ya29.retry");
        assert!(h.context.sign_in(ProviderKind::Classroom).await.is_success());
    }

    #[tokio::test]
    async fn sign_out_all_with_two_signed_in() {
        let h = harness();
        h.consent.grant("ya29.mail");
        h.consent.grant("ya29.calendar");
        assert!(h.context.sign_in(ProviderKind::Mail).await.is_success());
        assert!(h.context.sign_in(ProviderKind::Calendar).await.is_success());
        assert_eq!(h.context.snapshot().signed_in_count(), 2);

        let report = h.context.sign_out_all().await;
        assert_eq!(report.results.len(), 4);
        assert!(report.all_succeeded());
        assert_eq!(h.context.snapshot().signed_in_count(), 0);
        assert!(h.store.is_empty());
        assert_eq!(h.transport.count(Method::Post, "/revoke"), 2);
        assert!(h.context.calendar().rest().token().is_none());
    }

    #[tokio::test]
    async fn restore_all_is_independent_per_provider() {
        let h = harness();
        let profile = UserProfile::new("Ada", "ada@college.edu");
        h.store
            .set(&TokenRecord::new(ProviderKind::Mail, "live", profile.clone()))
            .unwrap();
        h.store
            .set(&TokenRecord::new(ProviderKind::Drive, "revoked", profile))
            .unwrap();
        h.transport.on(Method::Get, "/userinfo", |req| {
            if req.bearer.as_deref() == Some("live") {
                Ok(HttpResponse::json(200, &json!({"email": "ada@college.edu"})))
            } else {
                Ok(HttpResponse::json(401, &json!({"error": {"code": 401, "message": "Invalid Credentials"}})))
            }
        });

        let results = h.context.restore_all().await;
        assert_eq!(results.len(), 4);
        let snapshot = h.context.snapshot();
        assert!(snapshot.mail.is_signed_in());
        assert!(!snapshot.drive.is_signed_in());
        assert!(!snapshot.classroom.is_signed_in());
        assert_eq!(h.store.get(ProviderKind::Drive).unwrap(), None);
        assert!(h.store.get(ProviderKind::Mail).unwrap().is_some());

        let (_, drive) = &results[1];
        assert!(matches!(drive.data, Some(RestoreOutcome::Discarded(_))));
        let (_, classroom) = &results[2];
        assert_eq!(classroom.data, Some(RestoreOutcome::NoToken));
    }

    #[tokio::test]
    async fn clients_fail_after_sign_out() {
        let h = harness();
        h.consent.grant("ya29.drive");
        h.context.sign_in(ProviderKind::Drive).await;
        h.context.sign_out(ProviderKind::Drive).await;

        let err = h.context.drive().get_file("abc").await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::NotSignedIn);
        assert!(h.context.require_signed_in(ProviderKind::Drive).is_err());
    }

    #[tokio::test]
    async fn configuration_error_does_not_wedge_sign_in() {
        let (context, _transport, consent) =
            context_with("", Arc::new(MemoryTokenStore::new()));

        for _ in 0..2 {
            let outcome = context.sign_in(ProviderKind::Mail).await;
            assert_eq!(outcome.code, Some(ApiErrorCode::Configuration));
            assert!(!context.snapshot().mail.is_loading());
        }
        assert_eq!(consent.calls(), 0);
    }

    #[tokio::test]
    async fn client_stays_signed_out_when_store_clear_fails() {
        let store = FlakyStore::new();
        let (context, transport, consent) =
            context_with("desk.apps.googleusercontent.com", store.clone());
        transport.on_json(Method::Get, "/files/abc", 200, json!({"id": "abc"}));
        consent.grant("ya29.drive");
        assert!(context.sign_in(ProviderKind::Drive).await.is_success());

        store.fail_removes();
        let outcome = context.sign_out(ProviderKind::Drive).await;
        assert_eq!(outcome.code, Some(ApiErrorCode::Storage));
        assert!(!context.is_signed_in(ProviderKind::Drive));

        let err = context.drive().get_file("abc").await.unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::NotSignedIn);
        assert_eq!(transport.count(Method::Get, "/files/abc"), 0);
    }
}
