//! Authenticated request gateway.
//!
//! Every outbound call goes through [`Gateway::send`], which:
//!
//! 1. attaches the current access token as a bearer header,
//! 2. on a 401 from a non-auth endpoint, joins (or starts) the single
//!    in-flight credential refresh,
//! 3. retries the original request once with the refreshed token,
//! 4. tears the session down when the refresh fails or a retried request is
//!    still rejected.
//!
//! Concurrent 401s share one refresh: the first caller to find the slot empty
//! spawns the refresh task and stores its handle before anyone can observe
//! the slot again; later callers clone that handle. The task clears the slot
//! when it settles, whatever the outcome.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::auth_service::{AuthEndpoints, AuthService, IssuedCredential};
use super::error::{ApiError, RefreshError};
use super::request::{ApiRequest, RequestAttempt};
use super::response::ApiResponse;
use super::transport::Transport;
use crate::auth::CredentialStore;

/// Upper bound on a single refresh call when none is configured
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

type SharedRefresh = Shared<BoxFuture<'static, Result<IssuedCredential, RefreshError>>>;

/// What to do with a response
enum Disposition {
    Deliver(ApiResponse),
    Reject(ApiError),
    Refresh,
}

struct GatewayInner {
    transport: Arc<dyn Transport>,
    auth: AuthService,
    store: CredentialStore,
    refresh_timeout: Duration,
    in_flight: Mutex<Option<SharedRefresh>>,
}

/// Clone is cheap - all clones share the transport, store, and refresh slot.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        Self::builder(transport, store).build()
    }

    pub fn builder(transport: Arc<dyn Transport>, store: CredentialStore) -> GatewayBuilder {
        GatewayBuilder {
            transport,
            store,
            endpoints: AuthEndpoints::default(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Whether a refresh is currently running
    pub fn refresh_in_flight(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Send a request through the authenticated lifecycle.
    ///
    /// Returns the (possibly retried) 2xx response, or the error the request
    /// ended with.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut attempt = RequestAttempt::first(request);
        loop {
            let outgoing = self.authorize(&attempt.request);
            let response = self.inner.transport.send(outgoing).await?;

            match self.classify(&attempt, response) {
                Disposition::Deliver(response) => return Ok(response),
                Disposition::Reject(err) => return Err(err),
                Disposition::Refresh => {
                    let retry = attempt.retry();
                    self.refresh().await.map_err(ApiError::RefreshFailed)?;
                    debug!(path = %retry.request.path, "Retrying request with refreshed credential");
                    attempt = retry;
                }
            }
        }
    }

    /// Request interceptor: bearer header and content type.
    fn authorize(&self, request: &ApiRequest) -> ApiRequest {
        let mut outgoing = request.clone();

        if let Some(token) = self.inner.store.access_token() {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    outgoing.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("Stored access token is not a valid header value"),
            }
        }

        if !outgoing.body.is_raw() {
            outgoing
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        outgoing
    }

    /// Response interceptor decision.
    fn classify(&self, attempt: &RequestAttempt, response: ApiResponse) -> Disposition {
        if response.is_success() {
            return Disposition::Deliver(response);
        }
        if response.status != StatusCode::UNAUTHORIZED {
            return Disposition::Reject(response.into_error());
        }

        let path = &attempt.request.path;
        if attempt.retried || self.inner.auth.endpoints().is_excluded(path) {
            debug!(path = %path, retried = attempt.retried, "Terminal 401, clearing session");
            self.inner.store.clear();
            return Disposition::Reject(response.into_error());
        }

        debug!(path = %path, "Access token rejected, refreshing");
        Disposition::Refresh
    }

    /// Join the in-flight refresh, starting one if none is running.
    async fn refresh(&self) -> Result<IssuedCredential, RefreshError> {
        let handle = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let handle = self.spawn_refresh();
                    *slot = Some(handle.clone());
                    handle
                }
            }
        };
        handle.await
    }

    fn spawn_refresh(&self) -> SharedRefresh {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _reset = SlotReset(Arc::clone(&inner));
            inner.run_refresh().await
        });

        let inner = Arc::clone(&self.inner);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Refresh task did not complete, ending session");
                    inner.store.clear();
                    Err(RefreshError::Aborted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Empties the in-flight slot when the refresh task ends, including by
/// panic or abort.
struct SlotReset(Arc<GatewayInner>);

impl Drop for SlotReset {
    fn drop(&mut self) {
        self.0.slot().take();
    }
}

impl GatewayInner {
    fn slot(&self) -> MutexGuard<'_, Option<SharedRefresh>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One refresh with its side effects; runs once per shared handle.
    async fn run_refresh(&self) -> Result<IssuedCredential, RefreshError> {
        let call = AssertUnwindSafe(tokio::time::timeout(self.refresh_timeout, self.auth.refresh()));
        let outcome = match call.catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RefreshError::TimedOut(self.refresh_timeout)),
            Err(_) => Err(RefreshError::Aborted("refresh call panicked".to_string())),
        };

        match outcome {
            Ok(issued) => {
                info!(user = %issued.user.email, "Access token refreshed");
                self.transport.remember_access_token(&issued.access_token);
                let cookies = self.transport.cookies_for(&self.auth.endpoints().refresh);
                self.store
                    .apply_refresh(issued.access_token.clone(), issued.user.clone(), cookies);
                Ok(issued)
            }
            Err(err) => {
                warn!(error = %err, "Credential refresh failed, ending session");
                let stale = self.store.access_token();
                if let Err(e) = self.auth.logout(stale.as_deref()).await {
                    warn!(error = %e, "Logout after failed refresh also failed");
                }
                self.store.clear();
                Err(err)
            }
        }
    }
}

pub struct GatewayBuilder {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    endpoints: AuthEndpoints,
    refresh_timeout: Duration,
}

impl GatewayBuilder {
    pub fn endpoints(mut self, endpoints: AuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Build the gateway, handing any cookies saved with the session back
    /// to the transport.
    pub fn build(self) -> Gateway {
        if let Some(cookies) = self.store.cookies() {
            self.transport.restore_cookies(&self.endpoints.refresh, &cookies);
        }
        let auth = AuthService::new(Arc::clone(&self.transport), self.endpoints);
        Gateway {
            inner: Arc::new(GatewayInner {
                transport: self.transport,
                auth,
                store: self.store,
                refresh_timeout: self.refresh_timeout,
                in_flight: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{bearer, MockTransport};
    use crate::auth::{session::MemorySessionStorage, SessionData, SessionStorage};
    use crate::models::{Role, UserIdentity};

    const REFRESH: &str = "/auth/refresh-token";
    const LOGOUT: &str = "/auth/logout";

    fn user() -> UserIdentity {
        UserIdentity {
            id: "u1".to_string(),
            email: "shopper@example.com".to_string(),
            name: None,
            role: Role::Customer,
        }
    }

    fn logged_in(token: &str) -> CredentialStore {
        let store = CredentialStore::in_memory();
        store.login(SessionData::new(token.to_string(), user())).unwrap();
        store
    }

    fn gateway(mock: &Arc<MockTransport>, store: CredentialStore) -> Gateway {
        Gateway::new(mock.clone(), store)
    }

    #[tokio::test]
    async fn test_attaches_bearer_and_json_content_type() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/cart", StatusCode::OK, r#"{"data": {}}"#);
        let gw = gateway(&mock, logged_in("T1"));

        gw.send(ApiRequest::get("/cart")).await.unwrap();

        let sent = &mock.requests_to("/cart")[0];
        assert_eq!(bearer(sent).as_deref(), Some("T1"));
        assert_eq!(sent.headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_raw_body_keeps_its_content_type() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/vendor/uploads", StatusCode::OK, "{}");
        let gw = gateway(&mock, CredentialStore::in_memory());

        gw.send(ApiRequest::post("/vendor/uploads").bytes(Some("image/png".to_string()), vec![1, 2]))
            .await
            .unwrap();

        let sent = &mock.requests_to("/vendor/uploads")[0];
        assert!(sent.headers.get(CONTENT_TYPE).is_none());
        assert!(sent.headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_single_request_refreshes_and_retries() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", r#"{"data": []}"#);
        mock.respond_refresh_ok("T2");
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        let response = gw.send(ApiRequest::get("/orders")).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let calls = mock.requests_to("/orders");
        assert_eq!(calls.len(), 2);
        assert_eq!(bearer(&calls[0]).as_deref(), Some("T1"));
        assert_eq!(bearer(&calls[1]).as_deref(), Some("T2"));
        assert_eq!(mock.count(REFRESH), 1);
        assert_eq!(store.access_token().as_deref(), Some("T2"));
        assert_eq!(mock.remembered_tokens(), vec!["T2".to_string()]);
        assert!(!gw.refresh_in_flight());
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let mock = Arc::new(MockTransport::new());
        for path in ["/cart", "/wishlist", "/orders"] {
            mock.respond_authorized(path, "T2", r#"{"data": []}"#);
        }
        mock.respond_refresh_ok("T2");
        mock.delay(REFRESH, Duration::from_millis(50));
        let gw = gateway(&mock, logged_in("T1"));

        let (cart, wishlist, orders) = tokio::join!(
            gw.send(ApiRequest::get("/cart")),
            gw.send(ApiRequest::get("/wishlist")),
            gw.send(ApiRequest::get("/orders")),
        );

        assert!(cart.is_ok() && wishlist.is_ok() && orders.is_ok());
        assert_eq!(mock.count(REFRESH), 1);
        for path in ["/cart", "/wishlist", "/orders"] {
            let calls = mock.requests_to(path);
            assert_eq!(calls.len(), 2, "{} should be retried exactly once", path);
            assert_eq!(bearer(&calls[1]).as_deref(), Some("T2"));
        }
    }

    #[tokio::test]
    async fn test_concurrent_401s_on_spawned_tasks_share_one_refresh() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", r#"{"data": []}"#);
        mock.respond_refresh_ok("T2");
        mock.delay(REFRESH, Duration::from_millis(100));
        let gw = gateway(&mock, logged_in("T1"));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let gw = gw.clone();
                tokio::spawn(async move { gw.send(ApiRequest::get("/orders")).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(mock.count(REFRESH), 1);
        assert_eq!(mock.count("/orders"), 16);
    }

    #[tokio::test]
    async fn test_retried_401_is_not_retried_again() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/orders", StatusCode::UNAUTHORIZED, r#"{"apiError": {"message": "nope"}}"#);
        mock.respond_refresh_ok("T2");
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        let err = gw.send(ApiRequest::get("/orders")).await.unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "nope"));
        assert_eq!(mock.count("/orders"), 2);
        assert_eq!(mock.count(REFRESH), 1);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_refresh_logs_out_and_clears() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", r#"{"data": []}"#);
        mock.respond(REFRESH, StatusCode::UNAUTHORIZED, r#"{"apiError": {"message": "expired"}}"#);
        mock.fail(LOGOUT, "connection reset");
        let storage = Arc::new(MemorySessionStorage::with_session(SessionData::new(
            "T1".to_string(),
            user(),
        )));
        let store = CredentialStore::hydrate(storage.clone());
        let gw = gateway(&mock, store.clone());

        let err = gw.send(ApiRequest::get("/orders")).await.unwrap_err();

        match err {
            ApiError::RefreshFailed(RefreshError::Rejected { status, message }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "expired");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(mock.count("/orders"), 1);
        assert_eq!(mock.count(LOGOUT), 1);
        assert_eq!(bearer(&mock.requests_to(LOGOUT)[0]).as_deref(), Some("T1"));
        let session = store.snapshot();
        assert!(!session.authenticated);
        assert!(session.identity.is_none());
        assert!(!storage.exists());
    }

    #[tokio::test]
    async fn test_failed_refresh_reaches_every_waiter() {
        let mock = Arc::new(MockTransport::new());
        for path in ["/cart", "/wishlist", "/orders"] {
            mock.respond_authorized(path, "T2", r#"{"data": []}"#);
        }
        mock.respond(REFRESH, StatusCode::UNAUTHORIZED, "");
        mock.respond(LOGOUT, StatusCode::OK, "");
        mock.delay(REFRESH, Duration::from_millis(50));
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        let results = futures::future::join_all(
            ["/cart", "/wishlist", "/orders"].map(|p| gw.send(ApiRequest::get(p))),
        )
        .await;

        for result in results {
            assert!(matches!(
                result,
                Err(ApiError::RefreshFailed(RefreshError::Rejected { .. }))
            ));
        }
        assert_eq!(mock.count(REFRESH), 1);
        assert_eq!(mock.count(LOGOUT), 1);
        assert_eq!(store.snapshot(), crate::auth::Session::default());
    }

    #[tokio::test]
    async fn test_auth_endpoints_never_refresh() {
        let mock = Arc::new(MockTransport::new());
        let body = r#"{"apiError": {"message": "Invalid email or password"}}"#;
        mock.respond("/auth/login", StatusCode::UNAUTHORIZED, body);
        mock.respond("/auth/register", StatusCode::UNAUTHORIZED, body);
        mock.respond(REFRESH, StatusCode::UNAUTHORIZED, body);
        let gw = gateway(&mock, CredentialStore::in_memory());

        let err = gw.send(ApiRequest::post("/auth/login")).await.unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: Invalid email or password");
        assert!(gw.send(ApiRequest::post("/auth/register")).await.is_err());
        assert!(gw.send(ApiRequest::post(REFRESH)).await.is_err());

        // Only the direct refresh-endpoint call above; none triggered by a 401
        assert_eq!(mock.count(REFRESH), 1);
        assert_eq!(mock.count("/auth/login"), 1);
        assert_eq!(mock.count(LOGOUT), 0);
    }

    #[tokio::test]
    async fn test_other_failures_pass_through() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/orders/o9", StatusCode::NOT_FOUND, r#"{"apiError": {"message": "No such order"}}"#);
        mock.respond("/cart", StatusCode::INTERNAL_SERVER_ERROR, "boom");
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        let err = gw.send(ApiRequest::get("/orders/o9")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(ref m) if m == "No such order"));
        let err = gw.send(ApiRequest::get("/cart")).await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));

        assert_eq!(mock.count(REFRESH), 0);
        assert_eq!(store.access_token().as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_transport_error_leaves_session_alone() {
        let mock = Arc::new(MockTransport::new());
        mock.fail("/cart", "connection refused");
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        let err = gw.send(ApiRequest::get("/cart")).await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_hung_refresh_times_out() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", "{}");
        mock.respond_refresh_ok("T2");
        mock.delay(REFRESH, Duration::from_secs(30));
        mock.respond(LOGOUT, StatusCode::OK, "");
        let store = logged_in("T1");
        let gw = Gateway::builder(mock.clone(), store.clone())
            .refresh_timeout(Duration::from_millis(20))
            .build();

        let err = gw.send(ApiRequest::get("/orders")).await.unwrap_err();
        assert!(matches!(err, ApiError::RefreshFailed(RefreshError::TimedOut(_))));
        assert!(!store.is_authenticated());
        assert!(!gw.refresh_in_flight());
    }

    #[tokio::test]
    async fn test_panicking_refresh_frees_the_slot_and_ends_session() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", "{}");
        mock.route(REFRESH, |_| panic!("refresh handler exploded"));
        mock.respond(LOGOUT, StatusCode::OK, "");
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        let err = gw.send(ApiRequest::get("/orders")).await.unwrap_err();
        assert!(matches!(err, ApiError::RefreshFailed(RefreshError::Aborted(_))));
        assert!(!gw.refresh_in_flight());
        assert!(!store.is_authenticated());
        assert_eq!(mock.count(LOGOUT), 1);

        // The next 401 gets a brand new refresh
        mock.respond_refresh_ok("T2");
        store.login(SessionData::new("T1".to_string(), user())).unwrap();
        gw.send(ApiRequest::get("/orders")).await.unwrap();
        assert_eq!(mock.count(REFRESH), 2);
        assert_eq!(store.access_token().as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_saved_cookies_are_restored_on_build() {
        let mock = Arc::new(MockTransport::new());
        let store = CredentialStore::in_memory();
        store
            .login(SessionData::new("T1".to_string(), user()).with_cookies(Some("refresh_token=R1".to_string())))
            .unwrap();

        let _gw = gateway(&mock, store);
        assert_eq!(
            mock.restored_cookies(),
            vec![(REFRESH.to_string(), "refresh_token=R1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_refresh_saves_rotated_cookies() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", "{}");
        mock.respond_refresh_ok("T2");
        mock.set_cookies("refresh_token=R2");
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        gw.send(ApiRequest::get("/orders")).await.unwrap();
        assert_eq!(store.cookies().as_deref(), Some("refresh_token=R2"));
    }

    #[tokio::test]
    async fn test_later_401_starts_a_fresh_refresh() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", "{}");
        mock.respond_refresh_ok("T2");
        let store = logged_in("T1");
        let gw = gateway(&mock, store.clone());

        gw.send(ApiRequest::get("/orders")).await.unwrap();
        // Server rotates again
        store.apply_refresh("T1".to_string(), user(), None);
        gw.send(ApiRequest::get("/orders")).await.unwrap();

        assert_eq!(mock.count(REFRESH), 2);
    }

    #[tokio::test]
    async fn test_retry_is_verbatim() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_authorized("/orders", "T2", r#"{"data": {}}"#);
        mock.respond_refresh_ok("T2");
        let gw = gateway(&mock, logged_in("T1"));

        let request = ApiRequest::post("/orders")
            .json(&serde_json::json!({"address_id": "a1"}))
            .unwrap()
            .idempotency_key("order-key-1")
            .unwrap();
        gw.send(request).await.unwrap();

        let calls = mock.requests_to("/orders");
        assert_eq!(calls[0].body, calls[1].body);
        assert_eq!(calls[0].idempotency_key_value(), Some("order-key-1"));
        assert_eq!(calls[1].idempotency_key_value(), Some("order-key-1"));
    }
}
