//! Error types for the authenticated client.
//!
//! Failures fall into four families:
//!
//! | Family | Variants | Caller sees it when |
//! |--------|----------|---------------------|
//! | Transport | [`ClientError::Transport`], [`ClientError::Timeout`] | no response arrived at all |
//! | Application | [`ClientError::Api`] | any non-2xx response that is not a recoverable 401 |
//! | Unrecoverable auth | [`ClientError::Unauthorized`], [`ClientError::RefreshFailed`], [`ClientError::NoRefreshToken`], [`ClientError::SignedOut`] | the session could not be recovered |
//! | Local | the rest | the client itself could not complete the call |
//!
//! A `401 token.expired` that is recovered by a refresh never surfaces here.

use crate::protocol::GENERIC_SERVER_ERROR;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by [`SessionClient`](crate::SessionClient) and the auth components.
///
/// `Clone` so a single refresh failure can be delivered to every queued caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No response was received (connection refused, DNS, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with an error status.
    ///
    /// `message` is the body's `message` field verbatim, or the generic
    /// server-error reason when the body carried none.
    #[error("{message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// User-visible reason
        message: String,
    },

    /// 401 that cannot be recovered by a refresh.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Reason code or message from the response body
        reason: String,
    },

    /// The refresh endpoint rejected the refresh token or could not be reached.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// An expired-token failure arrived but no refresh token is stored.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The session was signed out while the request was waiting.
    #[error("session signed out")]
    SignedOut,

    /// A queued request waited longer than `queue_timeout_ms` for the refresh.
    #[error("timed out waiting for token refresh")]
    QueueTimeout,

    /// The in-flight refresh was abandoned before it settled.
    #[error("token refresh was cancelled")]
    Cancelled,

    /// A JSON payload could not be encoded or a response could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The request path could not be joined onto the base URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The token or profile store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Build an application error from a status and an optional body message.
    pub fn api(status: u16, message: Option<String>) -> Self {
        ClientError::Api {
            status,
            message: message.unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string()),
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout | ClientError::QueueTimeout => true,
            ClientError::Api { status, .. } => crate::client::is_retryable_status(*status),
            _ => false,
        }
    }

    /// Whether this error ended (or would end) the authenticated session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized { .. }
                | ClientError::RefreshFailed(_)
                | ClientError::NoRefreshToken
                | ClientError::SignedOut
        )
    }

    /// Message suitable for showing to a user.
    ///
    /// Application errors carry the server's message verbatim; everything
    /// else collapses to the generic server-error reason.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api { message, .. } => message.clone(),
            _ => GENERIC_SERVER_ERROR.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}
