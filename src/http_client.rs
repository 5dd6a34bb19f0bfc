// Session-aware HTTP client
// Attaches credentials to every request and drives refresh-and-retry on 401

use chrono::Duration;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::SessionError;
use crate::navigation::Navigator;
use crate::session::{
    decode_issued_credentials, CredentialPair, CredentialSnapshot, CredentialStore, Generation,
    LoginRequest, RefreshCoordinator, RefreshEndpoint, Refresher, RouteGuard,
    SessionMachine, SessionState,
};
use crate::transport::{ApiRequest, ApiResponse, RequestKind, Transport};

/// Endpoint and policy settings for [`SessionClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Sign-in path
    pub auth_path: String,

    /// Refresh path
    pub refresh_path: String,

    /// Cookie carrying the refresh token
    pub refresh_cookie_name: String,

    /// Refresh ahead of time when the pair expires within this many seconds (0 = never)
    pub refresh_threshold: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auth_path: "/v1/api/auth/signin".to_string(),
            refresh_path: "/v1/api/auth/refresh".to_string(),
            refresh_cookie_name: "refreshToken".to_string(),
            refresh_threshold: 0,
        }
    }
}

/// The only entry point application code uses to talk to the API
///
/// Handles automatically:
/// - attaching "{tokenType} {accessToken}" when a session exists
/// - 401: one shared refresh, then exactly one resend
/// - terminal 401s: logout and a login prompt
/// - everything else: passed back to the caller untouched
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionMachine>,
    coordinator: RefreshCoordinator,
    navigator: Arc<dyn Navigator>,
    options: ClientOptions,
}

impl SessionClient {
    /// Create a client refreshing through `options.refresh_path` on `transport`
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        options: ClientOptions,
    ) -> Self {
        let refresher = Arc::new(RefreshEndpoint::new(
            transport.clone(),
            options.refresh_path.clone(),
            options.refresh_cookie_name.clone(),
        ));
        Self::with_refresher(transport, store, navigator, refresher, options)
    }

    /// Create a client with a custom refresh mechanism
    pub fn with_refresher(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        refresher: Arc<dyn Refresher>,
        options: ClientOptions,
    ) -> Self {
        let session = Arc::new(SessionMachine::restore(store));
        let coordinator = RefreshCoordinator::new(session.clone(), refresher);

        Self {
            transport,
            session,
            coordinator,
            navigator,
            options,
        }
    }

    pub fn current_session_state(&self) -> SessionState {
        self.session.current()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    /// Current credentials, for display; never needed to send requests
    pub fn credentials(&self) -> Option<CredentialPair> {
        self.session.snapshot().map(|s| s.pair)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(self.session.clone())
    }

    /// Sign in and start a new session
    pub async fn login(&self, email: &str, password: &str) -> Result<Generation, SessionError> {
        let request = ApiRequest::login(&self.options.auth_path)
            .json(&LoginRequest { email, password })?;

        let response = self.attach_and_send(request).await?;
        let pair = decode_issued_credentials(&response, &self.options.refresh_cookie_name)?;

        Ok(self.session.on_login(pair))
    }

    /// End the session: clear credentials and ask for the login surface
    pub fn logout(&self) {
        self.session.on_logout();
        if self.session.claim_login_prompt() {
            self.navigator.go_to_login();
        }
    }

    /// Send a request on behalf of the application
    pub async fn attach_and_send(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        tracing::debug!(
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
            kind = ?request.kind,
            "Dispatching request"
        );

        let used = match request.kind {
            RequestKind::Regular => self.credentials_for_dispatch().await?,
            RequestKind::Login | RequestKind::Refresh => None,
        };

        let err = match self.dispatch(&request, used.as_ref().map(|s| &s.pair)).await {
            Ok(response) => return Ok(response),
            Err(SessionError::AuthorizationExpired) => SessionError::AuthorizationExpired,
            Err(other) => return Err(self.surface(other)),
        };
        tracing::debug!(request_id = %request_id, error = %err, "Authorization failure");

        let used = match (request.kind, used) {
            (RequestKind::Refresh, _) => {
                return Err(self.force_logout(SessionError::session_expired(
                    "refresh endpoint rejected the session",
                )))
            }
            (RequestKind::Login, _) => {
                return Err(self.force_logout(SessionError::session_expired(
                    "credentials were rejected",
                )))
            }
            (RequestKind::Regular, None) => return Err(self.reject_unauthenticated()),
            (RequestKind::Regular, Some(used)) => used,
        };

        let fresh = match self.coordinator.request_refresh(used.generation).await {
            Ok(pair) => pair,
            Err(failure) => return Err(self.force_logout(failure.into())),
        };

        tracing::debug!(request_id = %request_id, "Resending with refreshed credentials");
        match self.dispatch(&request, Some(&fresh)).await {
            Ok(response) => Ok(response),
            Err(SessionError::AuthorizationExpired) => {
                tracing::warn!(
                    request_id = %request_id,
                    path = %request.path,
                    "Request rejected again after refresh"
                );
                Err(self.force_logout(SessionError::session_expired(
                    "request was rejected again after refreshing credentials",
                )))
            }
            Err(other) => Err(self.surface(other)),
        }
    }

    /// Snapshot to send with; refreshes first when the pair is about to expire
    async fn credentials_for_dispatch(&self) -> Result<Option<CredentialSnapshot>, SessionError> {
        let snapshot = self.session.snapshot();
        if self.options.refresh_threshold == 0 {
            return Ok(snapshot);
        }

        let threshold = i64::try_from(self.options.refresh_threshold)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        match snapshot {
            Some(s) if s.pair.is_expiring_within(threshold) => {
                tracing::debug!("Credentials expiring soon, refreshing before dispatch");
                match self.coordinator.request_refresh(s.generation).await {
                    Ok(_) => Ok(self.session.snapshot()),
                    Err(failure) => Err(self.force_logout(failure.into())),
                }
            }
            other => Ok(other),
        }
    }

    /// One attempt over the transport; non-2xx statuses become errors
    async fn dispatch(
        &self,
        request: &ApiRequest,
        credentials: Option<&CredentialPair>,
    ) -> Result<ApiResponse, SessionError> {
        let mut outbound = request.clone();
        if let Some(pair) = credentials {
            let mut value = HeaderValue::from_str(&pair.authorization()).map_err(|e| {
                SessionError::Internal(anyhow::anyhow!("Invalid authorization header: {}", e))
            })?;
            value.set_sensitive(true);
            outbound.headers.insert(AUTHORIZATION, value);
        }

        let response = self.transport.send(outbound).await?;
        if response.is_success() {
            return Ok(response);
        }

        tracing::warn!(
            status = response.status.as_u16(),
            path = %request.path,
            "Received error response"
        );
        Err(SessionError::from_response(&response))
    }

    /// Hand a non-authorization failure back, flagging unexpected ones
    fn surface(&self, err: SessionError) -> SessionError {
        if let SessionError::Unexpected { status, ref body } = err {
            tracing::error!(status = status, response_body = %body, "Unexpected API failure");
            self.navigator.go_to_error_surface();
        }
        err
    }

    /// 401 on a request sent without credentials
    ///
    /// A session that started while the request was in flight is left alone.
    fn reject_unauthenticated(&self) -> SessionError {
        if self.session.is_logged_in() {
            tracing::debug!("Anonymous request rejected, a session has started since it was sent");
            return SessionError::SessionExpired {
                retryable: true,
                reason: "request was sent before the current session started".to_string(),
            };
        }

        if self.session.claim_login_prompt() {
            self.navigator.go_to_login();
        }
        SessionError::session_expired("request requires an authenticated session")
    }

    /// Tear the session down and prompt for login once per session loss
    fn force_logout(&self, err: SessionError) -> SessionError {
        tracing::warn!("Forcing logout: {}", err);
        self.session.on_logout();
        if self.session.claim_login_prompt() {
            self.navigator.go_to_login();
        }
        err
    }
}
