//! Process-wide bookkeeping of live call sessions.
//!
//! A local identity may own at most one session at a time: its capture
//! devices and its signaling identity are never shared between two calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use once_cell::sync::Lazy;

use super::error::{CallError, ErrorKind};

static GLOBAL_REGISTRY: Lazy<Arc<SessionRegistry>> = Lazy::new(|| Arc::new(SessionRegistry::new()));

#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// local user id -> token of the claim holding it
    active: DashMap<String, u64>,
    next_token: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every session in this process.
    pub fn global() -> Arc<SessionRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Reserve `local_user_id` for one session. The reservation lasts until
    /// the returned claim is dropped.
    pub fn claim(self: &Arc<Self>, local_user_id: &str) -> Result<SessionClaim, CallError> {
        match self.active.entry(local_user_id.to_owned()) {
            Entry::Occupied(_) => Err(CallError::new(
                ErrorKind::SessionAlreadyActive,
                format!("a call session is already active for {local_user_id}"),
            )),
            Entry::Vacant(slot) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slot.insert(token);
                debug!("Session claim {token} taken for {local_user_id}");
                Ok(SessionClaim {
                    registry: Arc::clone(self),
                    local_user_id: local_user_id.to_owned(),
                    token,
                })
            }
        }
    }

    pub fn is_active(&self, local_user_id: &str) -> bool {
        self.active.contains_key(local_user_id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Exclusive hold on a local identity, released on drop.
#[derive(Debug)]
pub struct SessionClaim {
    registry: Arc<SessionRegistry>,
    local_user_id: String,
    token: u64,
}

impl SessionClaim {
    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        let token = self.token;
        self.registry
            .active
            .remove_if(&self.local_user_id, |_, held| *held == token);
        debug!("Session claim {token} released for {}", self.local_user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_rejected_until_first_dropped() {
        let registry = Arc::new(SessionRegistry::new());

        let first = registry.claim("alice").unwrap();
        let err = registry.claim("alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionAlreadyActive);
        assert!(registry.is_active("alice"));

        drop(first);
        assert!(!registry.is_active("alice"));
        assert!(registry.claim("alice").is_ok());
    }

    #[test]
    fn test_identities_are_independent() {
        let registry = Arc::new(SessionRegistry::new());
        let alice = registry.claim("alice").unwrap();
        let bob = registry.claim("bob").unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(alice.local_user_id(), "alice");
        drop(bob);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_claim_does_not_release_holder() {
        let registry = Arc::new(SessionRegistry::new());
        let _held = registry.claim("alice").unwrap();

        for _ in 0..3 {
            assert!(registry.claim("alice").is_err());
        }
        assert!(registry.is_active("alice"));
    }
}
