//! Utility functions for the client.
//!
//! - URL joining for envelope paths
//! - Status code classification

use crate::error::{ClientError, Result};
use url::Url;

/// Resolve an envelope path against the base URL.
///
/// Absolute `http(s)` URLs are used as-is. Relative paths are appended to the
/// base, keeping any path prefix the base carries.
///
/// # Examples
///
/// ```
/// use authed_http::client::join_url;
///
/// let url = join_url("http://localhost:3333/api/", "/users").unwrap();
/// assert_eq!(url.as_str(), "http://localhost:3333/api/users");
///
/// let url = join_url("http://localhost:3333", "https://cdn.example.com/a.png").unwrap();
/// assert_eq!(url.host_str(), Some("cdn.example.com"));
/// ```
pub fn join_url(base: &str, path: &str) -> Result<Url> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(path).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", path, e)));
    }
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&joined).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", joined, e)))
}

/// Check if status code indicates retryable error
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_relative() {
        let url = join_url("http://localhost:3333", "users/avatar").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3333/users/avatar");
    }

    #[test]
    fn test_join_keeps_query() {
        let url = join_url("http://localhost:3333/", "/exercises/bygroup/costas?page=2").unwrap();
        assert_eq!(url.path(), "/exercises/bygroup/costas");
        assert_eq!(url.query(), Some("page=2"));
    }

    #[test]
    fn test_join_invalid_base() {
        assert!(matches!(
            join_url("not a url", "/x"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_is_retryable_status() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
    }
}
