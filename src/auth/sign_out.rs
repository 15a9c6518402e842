//! Unrecoverable-auth handling.
//!
//! [`SignOut`] clears every copy of the session (in-memory token, stored pair,
//! stored profile) and then notifies the owner through an optional callback so
//! the UI can drop its view of the user.

use super::session::SessionState;
use super::store::{ProfileStore, TokenStore};
use std::sync::Arc;

/// Callback invoked after the session has been cleared.
pub type SignOutCallback = Arc<dyn Fn() + Send + Sync>;

/// Clears session state and notifies the owner.
#[derive(Clone)]
pub struct SignOut {
    session: SessionState,
    tokens: Arc<dyn TokenStore>,
    profile: Option<Arc<dyn ProfileStore>>,
    callback: Option<SignOutCallback>,
}

impl SignOut {
    /// Handler clearing `session` and `tokens`.
    pub fn new(session: SessionState, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            session,
            tokens,
            profile: None,
            callback: None,
        }
    }

    /// Also clear the stored profile.
    pub fn with_profile_store(mut self, profile: Arc<dyn ProfileStore>) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Notify the owner after clearing.
    pub fn on_sign_out<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Profile store cleared on sign-out, if any
    pub fn profile_store(&self) -> Option<&Arc<dyn ProfileStore>> {
        self.profile.as_ref()
    }

    /// Clear everything and fire the callback.
    ///
    /// Storage failures are logged, never returned: sign-out always completes.
    pub async fn sign_out(&self) {
        self.session.clear();

        if let Err(e) = self.tokens.remove().await {
            tracing::warn!(error = %e, "failed to remove stored credentials");
        }
        if let Some(profile) = &self.profile {
            if let Err(e) = profile.remove_profile().await {
                tracing::warn!(error = %e, "failed to remove stored profile");
            }
        }

        tracing::info!("session signed out");
        if let Some(callback) = &self.callback {
            callback();
        }
    }
}

impl std::fmt::Debug for SignOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignOut")
            .field("session", &self.session)
            .field("has_profile_store", &self.profile.is_some())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
