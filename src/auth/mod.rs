//! Session state, credential storage, and token refresh coordination.
//!
//! # Module Organization
//!
//! ```text
//! auth/
//! ├── session  - SessionState, the in-memory access token mirror
//! ├── store    - TokenStore / ProfileStore and their implementations
//! ├── sign_out - SignOut, run when the session cannot be recovered
//! └── refresh  - RefreshCoordinator and the refresh endpoint call
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SessionState`] | Current access token, read before every send |
//! | [`TokenStore`] | Durable `{access_token, refresh_token}` storage |
//! | [`RefreshCoordinator`] | Single-flight refresh + FIFO replay |
//! | [`SignOut`] | Clears session and storage, notifies the owner |
//!
//! # Ownership
//!
//! The session owner builds one [`RefreshCoordinator`] per session and installs
//! it on the client. The coordinator is the only writer of fresh credentials;
//! sign-in and sign-out go through it too so every write bumps the same epoch.

mod refresh;
mod session;
mod sign_out;
mod store;

pub use refresh::{HttpTokenRefresher, RefreshCoordinator, TokenRefresher, DEFAULT_QUEUE_TIMEOUT};
pub use session::SessionState;
pub use sign_out::{SignOut, SignOutCallback};
pub use store::{JsonFileStore, MemoryProfileStore, MemoryTokenStore, ProfileStore, TokenStore};
