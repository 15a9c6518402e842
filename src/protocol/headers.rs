//! Bearer header formatting and error-body classification.
//!
//! # Header Formats
//!
//! | Header | Format | Example |
//! |--------|--------|---------|
//! | Authorization | `Bearer {token}` | `Bearer eyJhbGci...` |
//! | X-Request-Id | UUID v4 | `6f1c...` |
//!
//! # Examples
//!
//! ```
//! use authed_http::protocol::{format_bearer, parse_bearer};
//!
//! let header = format_bearer("t0k3n");
//! assert_eq!(parse_bearer(&header), Some("t0k3n"));
//! assert_eq!(parse_bearer("Basic Zm9v"), None);
//! ```

use super::constants::BEARER_PREFIX;
use super::{TOKEN_EXPIRED, TOKEN_INVALID};
use serde::Deserialize;

/// JSON error body returned by the API.
///
/// Only `message` is interpreted; other fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    /// Reason code or human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// How the client should react to a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// 401 with `token.expired`
    TokenExpired,
    /// 401 with `token.invalid`
    TokenInvalid,
    /// 401 with any other reason (or none)
    Unauthorized(Option<String>),
    /// Any other non-2xx status
    Application(Option<String>),
}

impl FailureKind {
    /// Whether this failure can be recovered by refreshing the access token.
    pub fn is_refreshable(&self) -> bool {
        matches!(self, FailureKind::TokenExpired | FailureKind::TokenInvalid)
    }
}

/// Format an `Authorization` header value.
pub fn format_bearer(token: &str) -> String {
    format!("{}{}", BEARER_PREFIX, token)
}

/// Extract the token from an `Authorization: Bearer ...` value.
///
/// The scheme is matched case-insensitively. Returns `None` for other schemes
/// or an empty token.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let value = value.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(BEARER_PREFIX.trim_end()) {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Extract the `message` field from an error body, if the body is JSON and has one.
pub fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
}

/// Classify a non-2xx response.
pub fn classify_failure(status: u16, body: &[u8]) -> FailureKind {
    let message = error_message(body);
    if status != 401 {
        return FailureKind::Application(message);
    }
    match message.as_deref() {
        Some(TOKEN_EXPIRED) => FailureKind::TokenExpired,
        Some(TOKEN_INVALID) => FailureKind::TokenInvalid,
        _ => FailureKind::Unauthorized(message),
    }
}
