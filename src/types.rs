//! Core data types: credentials, request envelopes, and responses.
//!
//! A [`RequestEnvelope`] is the complete, immutable description of one logical
//! call. The client can resend it any number of times; a replay is a copy with
//! only the `Authorization` header swapped.
//!
//! # Examples
//!
//! ```
//! use authed_http::{Body, RequestEnvelope};
//! use serde_json::json;
//!
//! let envelope = RequestEnvelope::post("/exercises/history")
//!     .with_json(json!({ "exercise_id": 7 }))
//!     .with_header("x-client", "mobile");
//!
//! let replay = envelope.with_bearer("fresh");
//! assert_eq!(replay.bearer(), Some("fresh"));
//! assert_eq!(replay.body(), envelope.body());
//! assert_eq!(replay.correlation_id(), envelope.correlation_id());
//! assert!(envelope.bearer().is_none());
//! ```

use crate::error::{ClientError, Result};
use crate::protocol::{self, constants};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An access/refresh token pair.
///
/// Both halves always travel together; a session is either fully present or absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived token stamped on requests
    #[serde(alias = "accessToken", alias = "token")]
    pub access_token: String,
    /// Long-lived token exchanged for a new pair
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

impl CredentialPair {
    /// Create a credential pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Whether a refresh can be attempted with this pair.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Request payload.
///
/// Structured payloads are held as [`serde_json::Value`] and serialized once per
/// send, so a replay carries exactly what the caller supplied. Raw bytes and
/// text are sent verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Opaque bytes (sent as-is)
    Bytes(Bytes),
    /// UTF-8 text (sent as-is)
    Text(String),
    /// Structured JSON, serialized at send time
    Json(serde_json::Value),
}

impl Body {
    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(b) => b.is_empty(),
            Body::Text(s) => s.is_empty(),
            Body::Json(_) => false,
        }
    }

    /// Encode for the wire.
    pub fn to_bytes(&self) -> Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(b) => Ok(b.clone()),
            Body::Text(s) => Ok(Bytes::from(s.clone())),
            Body::Json(v) => Ok(Bytes::from(serde_json::to_vec(v)?)),
        }
    }

    /// Content type implied by the body variant, if any.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Body::Json(_) => Some("application/json"),
            Body::Text(_) => Some("text/plain; charset=utf-8"),
            _ => None,
        }
    }
}

/// Immutable description of an HTTP call, sufficient to replay it.
///
/// Every `with_*` method consumes and returns the envelope, so once an envelope
/// has been handed to the client nothing can change it in place.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Body,
    correlation_id: Uuid,
    metadata: BTreeMap<String, String>,
    replay: bool,
}

impl RequestEnvelope {
    /// Create an envelope for `method` on `path`.
    ///
    /// `path` may be relative to the configured base URL or absolute.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            correlation_id: Uuid::new_v4(),
            metadata: BTreeMap::new(),
            replay: false,
        }
    }

    /// `GET` envelope
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST` envelope
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT` envelope
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH` envelope
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE` envelope
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a header. Invalid names or values are ignored with a warning.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "ignoring invalid header"),
        }
        self
    }

    /// Attach a structured JSON body.
    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    /// Serialize `payload` into a structured JSON body.
    pub fn with_payload<T: Serialize>(self, payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload)?;
        Ok(self.with_json(value))
    }

    /// Attach an opaque byte body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Bytes(body.into());
        self
    }

    /// Attach a text body.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = Body::Text(text.into());
        self
    }

    /// Attach caller metadata (not sent on the wire).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy of this envelope stamped with `token`.
    ///
    /// Only `Authorization` differs from the original.
    pub fn with_bearer(&self, token: &str) -> Self {
        let mut copy = self.clone();
        match HeaderValue::from_str(&protocol::format_bearer(token)) {
            Ok(value) => {
                copy.headers.insert(constants::AUTHORIZATION, value);
            }
            Err(_) => {
                copy.headers.remove(constants::AUTHORIZATION);
            }
        }
        copy
    }

    /// Copy of this envelope marked as a replay and stamped with `token`.
    pub(crate) fn to_replay(&self, token: &str) -> Self {
        let mut copy = self.with_bearer(token);
        copy.replay = true;
        copy
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path or absolute URL
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Headers (case-insensitive keys)
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Payload
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Correlation id, shared by the original and all its replays
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Caller metadata
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Whether this envelope is a replay after a token refresh
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    /// Bearer token currently stamped on the envelope, if any
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(constants::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(protocol::parse_bearer)
    }
}

/// A request ready for the transport: absolute URL, final headers, encoded body.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: url::Url,
    /// Final headers including `Authorization`
    pub headers: HeaderMap,
    /// Encoded body
    pub body: Bytes,
}

/// A response as seen by the client (any status).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers (lowercase keys)
    pub headers: BTreeMap<String, String>,
    /// Raw body
    pub body: Bytes,
}

impl HttpResponse {
    /// Create a response with no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(ClientError::from)
    }

    /// Body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Body of a successful sign-in.
#[derive(Debug, Clone, Deserialize)]
pub struct SignInResponse {
    /// Opaque user profile
    #[serde(default)]
    pub user: serde_json::Value,
    /// Access token
    #[serde(alias = "accessToken", alias = "access_token")]
    pub token: String,
    /// Refresh token
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

impl SignInResponse {
    /// The credential pair carried by this response.
    pub fn credentials(&self) -> CredentialPair {
        CredentialPair::new(self.token.clone(), self.refresh_token.clone())
    }
}
