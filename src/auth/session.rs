//! In-memory mirror of the current access token.
//!
//! Read before every send to stamp `Authorization`. Writes come only from
//! sign-in, the refresh coordinator, and sign-out; the coordinator's state
//! machine guarantees one writer per credential epoch.

use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to the current access token.
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionState {
    /// Create an anonymous session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new access token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Drop the access token.
    pub fn clear(&self) {
        *self.token.write() = None;
    }

    /// Current access token, if authenticated.
    pub fn current(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Whether a token is installed.
    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let session = SessionState::new();
        assert_eq!(session.current(), None);

        session.set_token("abc");
        assert_eq!(session.current().as_deref(), Some("abc"));
        assert!(session.is_authenticated());

        session.clear();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_clone_shares_slot() {
        let a = SessionState::new();
        let b = a.clone();
        a.set_token("x");
        assert_eq!(b.current().as_deref(), Some("x"));
    }
}
