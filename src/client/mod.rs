//! Authenticated HTTP client.
//!
//! This module provides the client half of the crate:
//!
//! - **Stamp requests** with the session's bearer token
//! - **Classify failures** into application, auth, and transport errors
//! - **Intercept expired tokens** and hand them to a [`RefreshCoordinator`](crate::RefreshCoordinator)
//! - **Abstract the transport** so tests can script responses
//!
//! # Module Organization
//!
//! ```text
//! client/
//! ├── fetch     - SessionClient and interceptor registration
//! ├── transport - Transport trait and the reqwest implementation
//! ├── config    - Client configuration
//! └── utils     - URL joining and status helpers
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SessionClient`] | Main client; `send(envelope)` |
//! | [`InterceptorHandle`] | Detaches an installed coordinator |
//! | [`Transport`] | "send request, get response-or-error" seam |
//! | [`ClientConfig`] | Client configuration options |
//!
//! # Examples
//!
//! ```
//! use authed_http::client::{is_retryable_status, join_url, ClientConfig};
//!
//! let config = ClientConfig {
//!     request_timeout_ms: 10_000,
//!     ..Default::default()
//! };
//! let url = join_url(&config.base_url, "/sessions").unwrap();
//! assert_eq!(url.path(), "/sessions");
//!
//! assert!(is_retryable_status(503));
//! assert!(!is_retryable_status(404));
//! ```

mod config;
mod fetch;
mod transport;
mod utils;

pub use config::ClientConfig;
pub use fetch::{InterceptorHandle, SessionClient};
pub use transport::{ReqwestTransport, Transport};
pub use utils::*;
