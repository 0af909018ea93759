//! Canned transport, consent flow and token store for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use campusdesk_core::ProviderKind;

use crate::error::{ApiError, ApiResult};
use crate::oauth::{ConsentFlow, TokenGrant};
use crate::tokens::{KeyValueStore, MemoryTokenStore};
use crate::transport::{BoxFuture, HttpRequest, HttpResponse, HttpTransport, Method};

type Handler = Box<dyn Fn(&HttpRequest) -> ApiResult<HttpResponse> + Send + Sync>;

struct Route {
    method: Method,
    fragment: String,
    handler: Handler,
}

/// Routes requests by method and URL suffix (query excluded); the longest
/// matching suffix wins. Unrouted requests get a 404.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("requests", &self.request_count())
            .finish()
    }
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on<F>(&self, method: Method, fragment: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> ApiResult<HttpResponse> + Send + Sync + 'static,
    {
        self.routes.lock().unwrap().push(Route {
            method,
            fragment: fragment.to_string(),
            handler: Box::new(handler),
        });
    }

    pub(crate) fn on_json(&self, method: Method, fragment: &str, status: u16, body: serde_json::Value) {
        self.on(method, fragment, move |_| Ok(HttpResponse::json(status, &body)));
    }

    /// Makes every request wait before answering.
    pub(crate) fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Requests whose method matches and whose URL contains `fragment`.
    pub(crate) fn count(&self, method: Method, fragment: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.contains(fragment))
            .count()
    }

    fn respond(&self, request: &HttpRequest) -> ApiResult<HttpResponse> {
        let routes = self.routes.lock().unwrap();
        let route = routes
            .iter()
            .filter(|r| r.method == request.method && request.url.ends_with(&r.fragment))
            .max_by_key(|r| r.fragment.len());
        match route {
            Some(route) => (route.handler)(request),
            None => Ok(HttpResponse::json(
                404,
                &serde_json::json!({"error": {"code": 404, "message": "Not Found"}}),
            )),
        }
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, ApiResult<HttpResponse>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(request.clone());
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.respond(&request)
        })
    }
}

/// Consent flow that hands out queued results in order.
#[derive(Debug, Default)]
pub(crate) struct FakeConsent {
    results: Mutex<VecDeque<ApiResult<TokenGrant>>>,
    calls: AtomicUsize,
}

impl FakeConsent {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn grant(&self, token: &str) {
        self.results
            .lock()
            .unwrap()
            .push_back(Ok(TokenGrant::new(token, Some(3599))));
    }

    pub(crate) fn deny(&self) {
        self.results
            .lock()
            .unwrap()
            .push_back(Err(ApiError::consent_denied("popup closed by user")));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConsentFlow for FakeConsent {
    fn request_token<'a>(
        &'a self,
        _provider: ProviderKind,
        _scope: &'a str,
    ) -> BoxFuture<'a, ApiResult<TokenGrant>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.results.lock().unwrap().pop_front();
        Box::pin(async move {
            // Let other tasks observe the in-flight state.
            tokio::task::yield_now().await;
            next.unwrap_or_else(|| Err(ApiError::consent_denied("no consent queued")))
        })
    }
}

/// In-memory store whose writes or removals can be switched to fail.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryTokenStore,
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_removes(&self) {
        self.fail_removes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl KeyValueStore for FlakyStore {
    fn read(&self, key: &str) -> ApiResult<Option<String>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &str) -> ApiResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::storage("disk full"));
        }
        self.inner.write(key, value)
    }

    fn remove(&self, key: &str) -> ApiResult<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(ApiError::storage("read-only file system"));
        }
        self.inner.remove(key)
    }
}
