//! Main authenticated HTTP client implementation.
//!
//! Provides [`SessionClient`], which stamps requests with the session's bearer
//! token, classifies failures, and hands expired-token failures to an installed
//! [`RefreshCoordinator`].
//!
//! # Examples
//!
//! ## Plain requests
//!
//! ```ignore
//! use authed_http::{ClientConfig, SessionClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SessionClient::new(ClientConfig::with_base_url("http://localhost:3333"))?;
//!     let response = client.get("/exercises/groups").await?;
//!     println!("Status: {}", response.status);
//!     Ok(())
//! }
//! ```
//!
//! ## With token refresh
//!
//! ```ignore
//! use authed_http::{ClientConfig, MemoryTokenStore, SessionClient, SignOut};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SessionClient::new(ClientConfig::default())?;
//!     let store = Arc::new(MemoryTokenStore::new());
//!     let sign_out = SignOut::new(client.session().clone(), store.clone())
//!         .on_sign_out(|| println!("signed out"));
//!     let coordinator = Arc::new(client.coordinator(store, sign_out)?);
//!     let _handle = client.intercept(coordinator);
//!
//!     let user = client.sign_in("ana@example.com", "secret").await?;
//!     let history = client.get("/history").await?;
//!     Ok(())
//! }
//! ```

use super::config::ClientConfig;
use super::transport::{ReqwestTransport, Transport};
use super::utils::join_url;
use crate::auth::{HttpTokenRefresher, RefreshCoordinator, SignOut, TokenStore};
use crate::error::{ClientError, Result};
use crate::protocol::{self, constants, FailureKind, GENERIC_SERVER_ERROR};
use crate::types::{HttpResponse, OutgoingRequest, RequestEnvelope, SignInResponse};
use http::{header, HeaderValue};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

type InterceptorSlot = Arc<RwLock<Option<Arc<RefreshCoordinator>>>>;

/// HTTP client bound to one session.
///
/// # Features
///
/// - `Authorization: Bearer` stamped from [`SessionState`](crate::SessionState) on every send
/// - Application errors carry the server's `message` verbatim
/// - Expired-token failures are refreshed once and replayed transparently
///   when a [`RefreshCoordinator`] is installed
///
/// Cloning yields another handle to the same session and interceptor.
#[derive(Clone)]
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    session: crate::auth::SessionState,
    interceptor: InterceptorSlot,
}

impl SessionClient {
    /// Create a client using the reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config));
        Self::with_transport(config, transport)
    }

    /// Create a client on top of a custom transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        join_url(&config.base_url, "")?;
        Ok(SessionClient {
            transport,
            config: Arc::new(config),
            session: crate::auth::SessionState::new(),
            interceptor: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session mirror used to stamp requests
    pub fn session(&self) -> &crate::auth::SessionState {
        &self.session
    }

    /// Transport shared by requests and refresh calls
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Resolve `path` against the base URL.
    pub fn url(&self, path: &str) -> Result<url::Url> {
        join_url(&self.config.base_url, path)
    }

    /// Build a coordinator that refreshes through this client's transport and
    /// writes to this client's session.
    pub fn coordinator(
        &self,
        store: Arc<dyn TokenStore>,
        sign_out: SignOut,
    ) -> Result<RefreshCoordinator> {
        let refresher =
            HttpTokenRefresher::new(self.transport.clone(), self.url(&self.config.refresh_path)?);
        Ok(RefreshCoordinator::new(
            self.session.clone(),
            store,
            Arc::new(refresher),
            sign_out,
        )
        .with_queue_timeout(self.config.queue_timeout()))
    }

    /// Install `coordinator` as the expired-token interceptor.
    ///
    /// Replaces any previously installed coordinator. The returned handle
    /// removes it again.
    pub fn intercept(&self, coordinator: Arc<RefreshCoordinator>) -> InterceptorHandle {
        let previous = self.interceptor.write().replace(coordinator.clone());
        if previous.is_some() {
            tracing::debug!("replacing installed refresh coordinator");
        }
        InterceptorHandle {
            slot: Arc::downgrade(&self.interceptor),
            coordinator,
        }
    }

    /// Currently installed coordinator
    pub fn interceptor(&self) -> Option<Arc<RefreshCoordinator>> {
        self.interceptor.read().clone()
    }

    /// `GET path`
    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.send(RequestEnvelope::get(path)).await
    }

    /// `POST path` with a JSON body
    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<HttpResponse> {
        self.send(RequestEnvelope::post(path).with_json(body)).await
    }

    /// Send `envelope` with the current session token.
    ///
    /// Resolves with a 2xx response or a terminal error. An expired-token 401
    /// is never returned while a coordinator is installed and the refresh
    /// succeeds; the caller sees the replayed response instead.
    pub async fn send(&self, envelope: RequestEnvelope) -> Result<HttpResponse> {
        let envelope = match self.session.current() {
            Some(token) => envelope.with_bearer(&token),
            None => envelope,
        };

        let response = self.dispatch(&envelope).await?;
        if response.is_success() {
            return Ok(response);
        }

        let status = response.status;
        let kind = protocol::classify_failure(status, &response.body);
        let Some(coordinator) = self.interceptor() else {
            return Err(ClientError::api(status, failure_message(kind)));
        };

        if !kind.is_refreshable() {
            return match kind {
                FailureKind::Unauthorized(message) => {
                    tracing::warn!(
                        correlation_id = %envelope.correlation_id(),
                        "credentials rejected, signing out"
                    );
                    coordinator.sign_out().await;
                    Err(ClientError::Unauthorized {
                        reason: message.unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string()),
                    })
                }
                other => Err(ClientError::api(status, failure_message(other))),
            };
        }

        let failure = ClientError::Unauthorized {
            reason: failure_message(kind).unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string()),
        };
        let this = self;
        coordinator
            .recover(envelope, failure, move |replay| async move {
                this.send_replay(replay).await
            })
            .await
    }

    /// Send a replay copy. Never intercepted: a 401 here is final.
    async fn send_replay(&self, envelope: RequestEnvelope) -> Result<HttpResponse> {
        let response = self.dispatch(&envelope).await?;
        if response.is_success() {
            return Ok(response);
        }
        match protocol::classify_failure(response.status, &response.body) {
            FailureKind::Application(message) => Err(ClientError::api(response.status, message)),
            kind => Err(ClientError::Unauthorized {
                reason: failure_message(kind).unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string()),
            }),
        }
    }

    /// Turn an envelope into a wire request and execute it.
    async fn dispatch(&self, envelope: &RequestEnvelope) -> Result<HttpResponse> {
        let url = self.url(envelope.path())?;

        let mut headers = envelope.headers().clone();
        if let Some(content_type) = envelope.body().content_type() {
            if !headers.contains_key(header::CONTENT_TYPE) {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        if let Ok(id) = HeaderValue::from_str(&envelope.correlation_id().to_string()) {
            headers.insert(constants::REQUEST_ID, id);
        }
        let body = envelope.body().to_bytes()?;

        if self.config.enable_logging {
            tracing::debug!(
                method = %envelope.method(),
                url = %url,
                correlation_id = %envelope.correlation_id(),
                replay = envelope.is_replay(),
                "sending request"
            );
        }

        let result = self
            .transport
            .execute(OutgoingRequest {
                method: envelope.method().clone(),
                url,
                headers,
                body,
            })
            .await;

        if self.config.enable_logging {
            match &result {
                Ok(response) => tracing::debug!(
                    correlation_id = %envelope.correlation_id(),
                    status = response.status,
                    "response received"
                ),
                Err(e) => tracing::debug!(
                    correlation_id = %envelope.correlation_id(),
                    error = %e,
                    "request failed"
                ),
            }
        }
        result
    }

    /// Sign in with e-mail and password.
    ///
    /// Installs the returned credential pair (persisted when a coordinator is
    /// installed) and returns the user profile.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<serde_json::Value> {
        let envelope = RequestEnvelope::post(self.config.sign_in_path.clone()).with_json(
            serde_json::json!({ "email": email, "password": password }),
        );

        let response = self.dispatch(&envelope).await?;
        if !response.is_success() {
            return Err(ClientError::api(
                response.status,
                protocol::error_message(&response.body),
            ));
        }

        let signed_in: SignInResponse = response.json()?;
        match self.interceptor() {
            Some(coordinator) => {
                coordinator.install(signed_in.credentials()).await?;
                if let Some(profiles) = coordinator.sign_out_handler().profile_store() {
                    profiles.save_profile(&signed_in.user).await?;
                }
            }
            None => self.session.set_token(signed_in.token.clone()),
        }

        tracing::info!("signed in");
        Ok(signed_in.user)
    }

    /// Load a persisted session into memory.
    ///
    /// Returns whether the client is now authenticated.
    pub async fn restore(&self) -> Result<bool> {
        match self.interceptor() {
            Some(coordinator) => coordinator.restore().await,
            None => Ok(self.session.is_authenticated()),
        }
    }

    /// Stored profile of the signed-in user, if a profile store is configured.
    pub async fn profile(&self) -> Result<Option<serde_json::Value>> {
        let Some(coordinator) = self.interceptor() else {
            return Ok(None);
        };
        match coordinator.sign_out_handler().profile_store() {
            Some(profiles) => profiles.get_profile().await,
            None => Ok(None),
        }
    }

    /// End the session.
    pub async fn sign_out(&self) {
        match self.interceptor() {
            Some(coordinator) => coordinator.sign_out().await,
            None => self.session.clear(),
        }
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("intercepting", &self.interceptor.read().is_some())
            .finish()
    }
}

fn failure_message(kind: FailureKind) -> Option<String> {
    match kind {
        FailureKind::TokenExpired => Some(protocol::TOKEN_EXPIRED.to_string()),
        FailureKind::TokenInvalid => Some(protocol::TOKEN_INVALID.to_string()),
        FailureKind::Unauthorized(message) | FailureKind::Application(message) => message,
    }
}

/// Handle returned by [`SessionClient::intercept`].
///
/// Dropping the handle leaves the coordinator installed; call
/// [`detach`](InterceptorHandle::detach) to remove it.
#[derive(Debug)]
pub struct InterceptorHandle {
    slot: Weak<RwLock<Option<Arc<RefreshCoordinator>>>>,
    coordinator: Arc<RefreshCoordinator>,
}

impl InterceptorHandle {
    /// The coordinator this handle installed
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Remove the coordinator if it is still the installed one.
    ///
    /// A refresh already in flight still settles its queue.
    pub fn detach(self) -> Arc<RefreshCoordinator> {
        if let Some(slot) = self.slot.upgrade() {
            let mut installed = slot.write();
            if installed
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, &self.coordinator))
            {
                *installed = None;
                tracing::debug!("refresh coordinator detached");
            }
        }
        self.coordinator
    }
}
