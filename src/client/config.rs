//! Client configuration.

use crate::protocol::{DEFAULT_REFRESH_PATH, DEFAULT_SIGN_IN_PATH};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for [`SessionClient`](crate::SessionClient).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use authed_http::ClientConfig;
///
/// let config: ClientConfig =
///     serde_json::from_str(r#"{ "base_url": "http://10.0.1.168:3333" }"#).unwrap();
/// assert_eq!(config.request_timeout_ms, 5000);
/// assert_eq!(config.refresh_path, "/sessions/refresh-token");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL that relative envelope paths are joined onto
    pub base_url: String,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Path of the refresh endpoint
    pub refresh_path: String,

    /// Path of the sign-in endpoint
    pub sign_in_path: String,

    /// How long a request parked behind an in-flight refresh may wait, in milliseconds
    pub queue_timeout_ms: u64,

    /// Maximum idle connections kept per host
    pub max_total_connections: u32,

    /// Optional proxy for all traffic (empty = none)
    pub proxy_url: String,

    /// `User-Agent` header (empty = reqwest default)
    pub user_agent: String,

    /// Emit per-request debug logs
    pub enable_logging: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333".to_string(),
            request_timeout_ms: 5000,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            queue_timeout_ms: 30_000,
            max_total_connections: 16,
            proxy_url: String::new(),
            user_agent: String::new(),
            enable_logging: true,
        }
    }
}

impl ClientConfig {
    /// Config for `base_url` with everything else defaulted.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Queue timeout as a `Duration`
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}
