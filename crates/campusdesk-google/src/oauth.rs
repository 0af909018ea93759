//! OAuth 2.0 consent, userinfo and revocation.
//!
//! [`ConsentFlow`] is the interactive step that turns a scope string into an
//! access token. [`LoopbackConsent`] implements it for desktop use with the
//! authorization-code flow, PKCE (RFC 7636) and a redirect to a listener on
//! `127.0.0.1`:
//!
//! 1. Generate a verifier, its S256 challenge and a random state
//! 2. Bind the first free port of the configured range
//! 3. Open the consent page in the browser
//! 4. Accept one `GET /callback?code=..&state=..` and check the state
//! 5. Exchange the code for an access token
//!
//! Offline access is never requested, so no refresh token comes back.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use campusdesk_core::{ProviderKind, UserProfile};
use chrono::{DateTime, Utc};
use rand::Rng as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::config::{GoogleEndpoints, OAuthCredentials};
use crate::error::{ApiError, ApiResult};
use crate::rest::error_message;
use crate::tokens::expiry_from_lifetime;
use crate::transport::{BoxFuture, HttpRequest, HttpTransport};

/// Verifier entropy in bytes, before base64 encoding.
const CODE_VERIFIER_LENGTH: usize = 32;

/// How often the loopback listener checks for a connection.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Longest wait for a connected browser to send its request line.
const CALLBACK_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Access token handed back by a consent flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds as reported by the token endpoint.
    pub expires_in: Option<i64>,
    /// Scopes actually granted, space separated.
    pub scope: Option<String>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>, expires_in: Option<i64>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            scope: None,
        }
    }

    /// Absolute expiry, `None` when the server gave no lifetime.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        expiry_from_lifetime(now, self.expires_in)
    }
}

/// Interactive user consent for one provider's scopes.
pub trait ConsentFlow: Send + Sync + std::fmt::Debug {
    /// Runs consent for `scope` and returns the granted token.
    ///
    /// A user who closes or refuses the prompt yields `ConsentDenied`.
    fn request_token<'a>(
        &'a self,
        provider: ProviderKind,
        scope: &'a str,
    ) -> BoxFuture<'a, ApiResult<TokenGrant>>;
}

/// PKCE verifier, challenge and state for one authorization attempt.
#[derive(Debug)]
pub struct PkceFlow {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl PkceFlow {
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
            state: random_token(16),
        }
    }

    fn compute_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    /// Builds the consent page URL.
    ///
    /// # Errors
    ///
    /// Fails when `auth_url` is not a valid URL.
    pub fn build_auth_url(
        &self,
        auth_url: &str,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
    ) -> ApiResult<String> {
        let url = url::Url::parse_with_params(
            auth_url,
            &[
                ("client_id", client_id),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope),
                ("code_challenge", self.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", self.state.as_str()),
                ("include_granted_scopes", "true"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| ApiError::configuration(format!("invalid authorization URL: {e}")))?;
        Ok(url.into())
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Authorization code and state extracted from the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Callback {
    code: String,
    state: String,
}

/// Parses an HTTP request line hitting the loopback listener.
///
/// Returns `None` for requests that are not the OAuth redirect (favicon
/// probes and the like), so the listener keeps waiting.
fn parse_callback(request_line: &str) -> Option<ApiResult<Callback>> {
    let mut parts = request_line.split_whitespace();
    let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
        return None;
    };
    let url = url::Url::parse(&format!("http://127.0.0.1{target}")).ok()?;
    if url.path() != "/callback" {
        return None;
    }

    let mut code = None;
    let mut state = None;
    let mut denied = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => denied = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(reason) = denied {
        let err = if reason == "access_denied" {
            ApiError::consent_denied("consent was refused in the browser")
        } else {
            ApiError::oauth(format!("authorization failed: {reason}"))
        };
        return Some(Err(err));
    }
    match code {
        Some(code) => Some(Ok(Callback {
            code,
            state: state.unwrap_or_default(),
        })),
        None => Some(Err(ApiError::oauth("redirect carried no authorization code"))),
    }
}

const PAGE_SUCCESS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Signed in</h1><p>You can close this tab and return to campusdesk.</p></body></html>";
const PAGE_FAILURE: &str = "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Sign-in failed</h1><p>You can close this tab.</p></body></html>";

fn answer_callback(mut stream: TcpStream) -> Option<ApiResult<Callback>> {
    let mut request_line = String::new();
    BufReader::new(&stream).read_line(&mut request_line).ok()?;
    let result = parse_callback(&request_line)?;

    let page = if result.is_ok() { PAGE_SUCCESS } else { PAGE_FAILURE };
    if let Err(e) = stream.write_all(page.as_bytes()).and_then(|()| stream.flush()) {
        debug!("could not answer browser: {e}");
    }
    Some(result)
}

fn bind_loopback((start, end): (u16, u16)) -> ApiResult<(TcpListener, u16)> {
    for port in start..=end {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            debug!(port, "bound loopback listener");
            return Ok((listener, port));
        }
    }
    Err(ApiError::configuration(format!(
        "no free loopback port in range {start}-{end}"
    )))
}

/// Blocks until the redirect arrives or `timeout` elapses. The listener is
/// dropped on return either way, freeing the port.
fn wait_for_callback(listener: TcpListener, timeout: Duration) -> ApiResult<Callback> {
    listener
        .set_nonblocking(true)
        .map_err(|e| ApiError::internal(format!("loopback listener: {e}")))?;
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        match listener.accept() {
            Ok((stream, _)) => {
                // Accepted sockets inherit non-blocking mode on some platforms.
                let ready = stream
                    .set_nonblocking(false)
                    .and_then(|()| stream.set_read_timeout(Some(CALLBACK_READ_TIMEOUT)));
                if let Err(e) = ready {
                    debug!("dropping loopback connection: {e}");
                    continue;
                }
                if let Some(result) = answer_callback(stream) {
                    return result;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                error!("failed to accept loopback connection: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    Err(ApiError::consent_denied(
        "no response from the browser before the timeout",
    ))
}

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Browser-based consent with a loopback redirect.
#[derive(Debug, Clone)]
pub struct LoopbackConsent {
    credentials: OAuthCredentials,
    auth_url: String,
    token_url: String,
    port_range: (u16, u16),
    callback_timeout: Duration,
    transport: Arc<dyn HttpTransport>,
}

impl LoopbackConsent {
    pub fn new(
        credentials: OAuthCredentials,
        endpoints: &GoogleEndpoints,
        port_range: (u16, u16),
        callback_timeout: Duration,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            credentials,
            auth_url: endpoints.auth_url.clone(),
            token_url: endpoints.token_url.clone(),
            port_range,
            callback_timeout,
            transport,
        }
    }

    async fn authorize(&self, provider: ProviderKind, scope: &str) -> ApiResult<TokenGrant> {
        let pkce = PkceFlow::new();
        let (listener, port) = bind_loopback(self.port_range)?;
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let url = pkce.build_auth_url(
            &self.auth_url,
            &self.credentials.client_id,
            &redirect_uri,
            scope,
        )?;

        info!(%provider, "opening browser for consent");
        debug!("authorization URL: {url}");
        if let Err(e) = open::that(&url) {
            warn!("failed to open browser: {e}");
            eprintln!("\nOpen this URL to sign in to {}:\n\n{url}\n", provider.label());
        }

        let timeout = self.callback_timeout;
        let callback = tokio::task::spawn_blocking(move || wait_for_callback(listener, timeout))
            .await
            .map_err(|e| ApiError::internal(format!("loopback task failed: {e}")))??;

        if callback.state != pkce.state {
            return Err(ApiError::oauth("state mismatch in OAuth redirect"));
        }

        debug!(%provider, "exchanging authorization code");
        self.exchange_code(&callback.code, &pkce.verifier, &redirect_uri)
            .await
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> ApiResult<TokenGrant> {
        let request = HttpRequest::post(&self.token_url).form([
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ]);
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::oauth(format!(
                "token exchange failed ({}): {}",
                response.status,
                error_message(&response)
            )));
        }
        let token: TokenResponse = response.decode()?;
        Ok(TokenGrant {
            access_token: token.access_token,
            expires_in: token.expires_in,
            scope: token.scope,
        })
    }
}

impl ConsentFlow for LoopbackConsent {
    fn request_token<'a>(
        &'a self,
        provider: ProviderKind,
        scope: &'a str,
    ) -> BoxFuture<'a, ApiResult<TokenGrant>> {
        Box::pin(self.authorize(provider, scope))
    }
}

/// Userinfo endpoint body.
#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Fetches the profile behind `token`.
///
/// # Errors
///
/// `RequestFailed` for a non-2xx answer (an invalid or revoked token gives
/// 401), `DecodeFailed` for an unexpected body.
pub async fn fetch_userinfo(
    transport: &dyn HttpTransport,
    userinfo_url: &str,
    token: &str,
) -> ApiResult<UserProfile> {
    let response = transport
        .send(HttpRequest::get(userinfo_url).bearer(token))
        .await?;
    if !response.is_success() {
        return Err(ApiError::request_failed(
            response.status,
            error_message(&response),
        ));
    }
    let info: UserInfo = response.decode()?;
    let email = info.email.unwrap_or_default();
    let mut profile = UserProfile::new(info.name.unwrap_or_else(|| email.clone()), email);
    profile.image_url = info.picture;
    Ok(profile)
}

/// Revokes `token` at the authorization server.
///
/// # Errors
///
/// `RequestFailed` when the server refuses, typically because the token is
/// already invalid.
pub async fn revoke_token(
    transport: &dyn HttpTransport,
    revoke_url: &str,
    token: &str,
) -> ApiResult<()> {
    let response = transport
        .send(HttpRequest::post(revoke_url).form([("token", token)]))
        .await?;
    if response.is_success() {
        Ok(())
    } else {
        Err(ApiError::request_failed(
            response.status,
            error_message(&response),
        ))
    }
}
