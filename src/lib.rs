#![warn(missing_docs)]

//! # authed_http: bearer-token HTTP client with transparent refresh
//!
//! An HTTP client for APIs that issue short-lived access tokens alongside a
//! longer-lived refresh token. When a request fails with
//! `401 {"message": "token.expired"}` (or `token.invalid`), the client
//! obtains a new credential pair and replays the request, so callers only
//! ever see the final outcome.
//!
//! ## Key Features
//!
//! - **Single-flight refresh**: any number of concurrent expired-token
//!   failures trigger exactly one refresh call
//! - **FIFO replay**: requests blocked by the refresh are replayed in the
//!   order their failures arrived, with only `Authorization` changed
//! - **Lossless bodies**: structured payloads are captured before
//!   serialization and encoded once per send
//! - **Clean failure**: if the refresh fails, every blocked request is
//!   rejected with the same error and sign-out runs exactly once
//! - **Pluggable storage and transport**: `TokenStore`, `ProfileStore`,
//!   and `Transport` traits, with reqwest, in-memory, and JSON-file
//!   implementations
//!
//! ## Usage
//!
//! ```ignore
//! use authed_http::{ClientConfig, JsonFileStore, RequestEnvelope, SessionClient, SignOut};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> authed_http::Result<()> {
//!     let client = SessionClient::new(ClientConfig::with_base_url("http://localhost:3333"))?;
//!
//!     let store = Arc::new(JsonFileStore::new("session.json"));
//!     let sign_out = SignOut::new(client.session().clone(), store.clone())
//!         .with_profile_store(store.clone())
//!         .on_sign_out(|| eprintln!("please sign in again"));
//!     let coordinator = Arc::new(client.coordinator(store, sign_out)?);
//!     let _handle = client.intercept(coordinator);
//!
//!     if !client.restore().await? {
//!         client.sign_in("ana@example.com", "123456").await?;
//!     }
//!
//!     let response = client
//!         .send(RequestEnvelope::post("/history").with_json(serde_json::json!({ "exercise_id": 3 })))
//!         .await?;
//!     println!("{}", response.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - **[types]** - Credential pair, request envelope, response
//! - **[error]** - Error types and result handling
//! - **[client]** - `SessionClient`, transport, configuration
//! - **[auth]** - Session state, stores, sign-out, refresh coordinator
//! - **[protocol]** - Reason codes, header formatting, failure classification

pub mod auth;
pub mod client;
pub mod error;
pub mod protocol;
pub mod types;

pub use auth::{
    HttpTokenRefresher, JsonFileStore, MemoryProfileStore, MemoryTokenStore, ProfileStore,
    RefreshCoordinator, SessionState, SignOut, TokenRefresher, TokenStore,
};
pub use client::{ClientConfig, InterceptorHandle, ReqwestTransport, SessionClient, Transport};
pub use error::{ClientError, Result};
pub use types::{
    Body, CredentialPair, HttpResponse, OutgoingRequest, RequestEnvelope, SignInResponse,
};
