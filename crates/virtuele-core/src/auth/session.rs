//! Authenticated HTTP session.
//!
//! `SessionClient` attaches the stored access token to every request. A 401
//! triggers one refresh through the identity endpoint followed by exactly one
//! replay of the failed request. If the refresh itself is rejected the
//! session is logged out and the refresh error is returned.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::store::{Credentials, TokenStore};
use crate::api::{ApiError, SessionError};

// ============================================================================
// Constants
// ============================================================================

/// Identity endpoint route issuing an access/refresh pair
const LOGIN_PATH: &str = "/jwt/create/";

/// Identity endpoint route exchanging a refresh token for an access token
const REFRESH_PATH: &str = "/jwt/refresh/";

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Label placed before the access token in the `Authorization` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// `JWT <token>`, what the identity endpoint is configured to accept
    #[default]
    Jwt,
    /// `Bearer <token>`
    Bearer,
}

impl AuthScheme {
    pub fn label(&self) -> &'static str {
        match self {
            AuthScheme::Jwt => "JWT",
            AuthScheme::Bearer => "Bearer",
        }
    }

    pub fn header_value(&self, token: &str) -> String {
        format!("{} {}", self.label(), token)
    }
}

impl std::str::FromStr for AuthScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jwt" => Ok(AuthScheme::Jwt),
            "bearer" => Ok(AuthScheme::Bearer),
            other => Err(format!("Unknown auth scheme: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    RefreshPending,
    LoggedOut,
}

/// One outbound call: method, path relative to the API base, query, JSON body
/// and extra headers.
///
/// A spec is kept around when its call fails with 401 so it can be replayed
/// after the access token has been refreshed.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    headers: HeaderMap,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    /// Only present when the endpoint rotates refresh tokens
    #[serde(default)]
    refresh: Option<String>,
}

/// Credential-injecting, refresh-aware HTTP client.
///
/// Share it behind an `Arc`; concurrent 401s are coalesced into a single
/// refresh call.
pub struct SessionClient {
    client: Client,
    base_url: String,
    scheme: AuthScheme,
    store: Arc<dyn TokenStore>,
    state: RwLock<SessionState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SessionClient {
    /// Create a session client with the default timeout and `JWT` scheme.
    pub fn new(base_url: impl Into<String>, store: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, store, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            scheme: AuthScheme::default(),
            store,
            state: RwLock::new(SessionState::Unauthenticated),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_scheme(mut self, scheme: AuthScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Replace the HTTP client (custom TLS, proxies, tests).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state != next {
            debug!(from = ?*state, to = ?next, "Session state change");
            *state = next;
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.is_authenticated().await
    }

    /// Pick up tokens persisted by a previous run.
    pub async fn restore(&self) -> bool {
        let authenticated = self.store.is_authenticated().await;
        if authenticated {
            info!(store = self.store.name(), "Restored session from storage");
            self.set_state(SessionState::Authenticated);
        }
        authenticated
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // ===== Login / Refresh / Logout =====

    /// Exchange a username and password for a token pair and store it.
    ///
    /// Nothing is stored when the identity endpoint rejects the login.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credentials, SessionError> {
        let previous = self.state();
        self.set_state(SessionState::Authenticating);
        info!(username, "Logging in");

        let credentials = match self.obtain_tokens(username, password).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.set_state(previous);
                return Err(SessionError::Transport(e));
            }
        };

        if let Err(e) = self
            .store
            .set_tokens(&credentials.access, &credentials.refresh)
            .await
        {
            error!(error = %e, "Failed to persist tokens after login");
            self.set_state(previous);
            return Err(e.into());
        }

        self.set_state(SessionState::Authenticated);
        info!(username, store = self.store.name(), "Login successful");
        Ok(credentials)
    }

    async fn obtain_tokens(&self, username: &str, password: &str) -> Result<Credentials, ApiError> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&LoginBody { username, password })
            .send()
            .await?;

        let response = ApiError::check(response).await?;

        response
            .json::<Credentials>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Returns the new access token. API failures come back as
    /// `SessionError::RefreshFailure`; this method does not log out on its own.
    pub async fn refresh(&self) -> Result<String, SessionError> {
        let previous = self.state();
        self.set_state(SessionState::RefreshPending);

        match self.exchange_refresh_token().await {
            Ok(access) => {
                self.set_state(SessionState::Authenticated);
                info!("Access token refreshed");
                Ok(access)
            }
            Err(e) => {
                self.set_state(previous);
                Err(e)
            }
        }
    }

    async fn exchange_refresh_token(&self) -> Result<String, SessionError> {
        let refresh = self
            .store
            .refresh()
            .await
            .ok_or(SessionError::RefreshFailure(ApiError::NotAuthenticated))?;

        debug!("Refreshing access token");
        let body = self
            .request_refresh(&refresh)
            .await
            .map_err(SessionError::RefreshFailure)?;

        match body.refresh.as_deref() {
            Some(rotated) if !rotated.is_empty() => {
                debug!("Identity endpoint rotated the refresh token");
                self.store.set_tokens(&body.access, rotated).await?;
            }
            _ => self.store.set_access(&body.access).await?,
        }
        Ok(body.access)
    }

    async fn request_refresh(&self, refresh: &str) -> Result<RefreshResponse, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshBody { refresh })
            .send()
            .await?;

        let response = ApiError::check(response).await?;

        response
            .json::<RefreshResponse>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse refresh response: {}", e)))
    }

    /// Forget both tokens. Safe to call when already logged out.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.store.clear().await?;
        self.set_state(SessionState::LoggedOut);
        info!("Logged out");
        Ok(())
    }

    // ===== Authenticated requests =====

    /// Issue an authenticated request.
    ///
    /// Successful responses are returned untouched. A 401 refreshes the
    /// access token and replays the request once; any other failure is
    /// returned as `SessionError::Transport` without retrying.
    ///
    /// A success with a stored token moves the state to `Authenticated`, so
    /// calling [`restore`](Self::restore) first is optional.
    pub async fn request(&self, spec: RequestSpec) -> Result<Response, SessionError> {
        let token = self.store.access().await;
        let response = self.send(&spec, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            let response = ApiError::check(response).await.map_err(SessionError::Transport)?;
            if token.is_some() {
                self.set_state(SessionState::Authenticated);
            }
            return Ok(response);
        }

        debug!(method = %spec.method, path = %spec.path, "Request unauthorized, refreshing token");
        let fresh = self.refresh_after_unauthorized(token.as_deref()).await?;

        let response = self.send(&spec, Some(&fresh)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %spec.method, path = %spec.path, "Request still unauthorized after refresh");
        }
        ApiError::check(response).await.map_err(SessionError::Transport)
    }

    /// Issue an authenticated request and parse the JSON body.
    pub async fn request_json<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T, SessionError> {
        let path = spec.path.clone();
        let response = self.request(spec).await?;
        response.json().await.map_err(|e| {
            SessionError::Transport(ApiError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {}",
                path, e
            )))
        })
    }

    /// Obtain a usable access token after a request carrying `stale` got a 401.
    ///
    /// Refreshes are serialized. A caller that finds the token already
    /// replaced by another request's refresh reuses it instead of refreshing
    /// again.
    async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> Result<String, SessionError> {
        let _guard = self.refresh_lock.lock().await;

        match (self.store.access().await, stale) {
            (Some(current), Some(stale)) if current != stale => {
                debug!("Access token already refreshed by a concurrent request");
                return Ok(current);
            }
            (None, Some(_)) => {
                // A concurrent refresh failed and cleared the session
                return Err(SessionError::RefreshFailure(ApiError::NotAuthenticated));
            }
            _ => {}
        }

        match self.refresh().await {
            Ok(access) => Ok(access),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                if let Err(clear_err) = self.logout().await {
                    error!(error = %clear_err, "Failed to clear tokens after refresh failure");
                }
                Err(e)
            }
        }
    }

    async fn send(&self, spec: &RequestSpec, token: Option<&str>) -> Result<Response, ApiError> {
        let mut builder = self
            .client
            .request(spec.method.clone(), self.url(&spec.path))
            .headers(spec.headers.clone());

        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        if let Some(ref body) = spec.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, self.scheme.header_value(token));
        }

        let response = builder.send().await?;
        debug!(method = %spec.method, path = %spec.path, status = %response.status(), "Response received");
        Ok(response)
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.base_url)
            .field("scheme", &self.scheme)
            .field("store", &self.store.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;

    #[test]
    fn test_auth_scheme_labels() {
        assert_eq!(AuthScheme::default(), AuthScheme::Jwt);
        assert_eq!(AuthScheme::Jwt.header_value("abc"), "JWT abc");
        assert_eq!(AuthScheme::Bearer.header_value("abc"), "Bearer abc");
        assert_eq!("BEARER".parse::<AuthScheme>(), Ok(AuthScheme::Bearer));
        assert!("basic".parse::<AuthScheme>().is_err());
    }

    #[test]
    fn test_request_spec_builder() {
        let spec = RequestSpec::post("/cart/checkout/")
            .query("checked", "false")
            .json(serde_json::json!({"rating": 5}));
        assert_eq!(spec.method(), &Method::POST);
        assert_eq!(spec.path(), "/cart/checkout/");
        assert_eq!(spec.query, vec![("checked".to_string(), "false".to_string())]);
        assert!(spec.body.is_some());
    }

    #[test]
    fn test_url_joining() {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let client = SessionClient::new("http://localhost:8000/api/v1/", store).unwrap();
        assert_eq!(client.url("/cart/"), "http://localhost:8000/api/v1/cart/");
        assert_eq!(client.url("cart/"), "http://localhost:8000/api/v1/cart/");
        assert_eq!(client.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_restore_from_populated_store() {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::with_tokens("a", "r"));
        let client = SessionClient::new("http://localhost", store).unwrap();
        assert!(client.restore().await);
        assert_eq!(client.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_refresh_without_token_fails_offline() {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        // Port 9 is discard; the call must never get that far
        let client = SessionClient::new("http://127.0.0.1:9", store).unwrap();
        let err = client.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::RefreshFailure(ApiError::NotAuthenticated)
        ));
        assert_eq!(client.state(), SessionState::Unauthenticated);
    }
}
