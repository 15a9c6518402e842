//! Wire-level constants and helpers shared by the client and the auth components.
//!
//! # Reason codes
//!
//! The API reports authentication failures as `401` with a JSON body whose
//! `message` field carries a reason code:
//!
//! | Code | Meaning | Handling |
//! |------|---------|----------|
//! | `token.expired` | access token outlived its lifetime | refresh + replay |
//! | `token.invalid` | access token not recognised | refresh + replay |
//! | anything else | credentials rejected outright | sign out |
//!
//! # Examples
//!
//! ```
//! use authed_http::protocol::{classify_failure, format_bearer, FailureKind};
//!
//! assert_eq!(format_bearer("abc"), "Bearer abc");
//!
//! let body = br#"{"message":"token.expired"}"#;
//! assert_eq!(classify_failure(401, body), FailureKind::TokenExpired);
//! ```

pub mod headers;

pub use headers::{
    classify_failure, error_message, format_bearer, parse_bearer, ErrorBody, FailureKind,
};

/// Reason code for an expired access token.
pub const TOKEN_EXPIRED: &str = "token.expired";

/// Reason code for an access token the server does not recognise.
pub const TOKEN_INVALID: &str = "token.invalid";

/// Reason shown when an error response carries no `message`.
pub const GENERIC_SERVER_ERROR: &str = "Server error.";

/// Default path of the refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/sessions/refresh-token";

/// Default path of the sign-in endpoint.
pub const DEFAULT_SIGN_IN_PATH: &str = "/sessions";

/// Header names used by the client.
pub mod constants {
    /// `Authorization` header carrying the bearer token
    pub const AUTHORIZATION: http::HeaderName = http::header::AUTHORIZATION;

    /// Correlation header stamped on every outgoing request
    pub const REQUEST_ID: &str = "x-request-id";

    /// Bearer scheme prefix (including the separating space)
    pub const BEARER_PREFIX: &str = "Bearer ";
}
