//! Session registry mapping session ids to cancellation tokens

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Table of live sessions.
///
/// Owned by a [`ProbeEngine`](super::ProbeEngine); each engine has its own
/// registry so concurrent sessions can be exercised in isolation.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, CancellationToken>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for `id`, replacing any stale entry
    pub fn begin(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        if self.sessions.insert(id.to_string(), token.clone()).is_some() {
            warn!(session = id, "replacing a session that is still registered");
        }
        token
    }

    /// Signal and remove the session's token.
    ///
    /// Returns whether a live session was found; unknown ids are ignored.
    pub fn cancel(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, token)) => {
                token.cancel();
                info!(session = id, "session cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop the session's entry after its batch completed
    pub fn end(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_end() {
        let registry = SessionRegistry::new();
        let token = registry.begin("a");
        assert!(registry.is_active("a"));
        assert!(!token.is_cancelled());

        registry.end("a");
        assert!(registry.is_empty());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_signals_token() {
        let registry = SessionRegistry::new();
        let token = registry.begin("a");

        assert!(registry.cancel("a"));
        assert!(token.is_cancelled());
        assert!(!registry.is_active("a"));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.begin("a");

        assert!(registry.cancel("a"));
        assert!(!registry.cancel("a"));
        assert!(!registry.cancel("unknown"));
        registry.end("a");
    }

    #[test]
    fn test_begin_replaces_stale_entry() {
        let registry = SessionRegistry::new();
        let stale = registry.begin("a");
        let fresh = registry.begin("a");
        assert_eq!(registry.len(), 1);

        registry.cancel("a");
        assert!(fresh.is_cancelled());
        assert!(!stale.is_cancelled());
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        let a = registry.begin("a");
        let b = registry.begin("b");

        registry.cancel("a");
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(registry.is_active("b"));
    }
}
