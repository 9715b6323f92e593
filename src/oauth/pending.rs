//! Pending-authorization tracking for CSRF protection.
//!
//! Every issued authorization URL carries a state token recorded here; the
//! matching callback must present the same token within the TTL, and each
//! token is consumable exactly once.

use crate::service::Service;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One in-flight authorization flow.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    pub user_id: String,
    pub service: Service,
    pub created_at: DateTime<Utc>,
}

/// In-memory table of in-flight flows keyed by state token.
#[derive(Clone)]
pub struct PendingStore {
    entries: Arc<Mutex<HashMap<String, PendingAuthorization>>>,
    ttl: Duration,
}

impl PendingStore {
    /// `ttl_seconds` bounds how long an issued state token stays valid
    /// (default deployment value: 600).
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Record a new flow and return its state token (UUID v4).
    pub fn issue(&self, user_id: &str, service: Service) -> String {
        let state = Uuid::new_v4().to_string();
        let entry = PendingAuthorization {
            user_id: user_id.to_string(),
            service,
            created_at: Utc::now(),
        };

        self.entries.lock().unwrap().insert(state.clone(), entry);
        state
    }

    /// Atomic check-and-delete: returns the entry if the token exists and is
    /// within TTL, removing it either way (single use).
    pub fn consume(&self, state: &str) -> Option<PendingAuthorization> {
        let entry = self.entries.lock().unwrap().remove(state)?;

        if Utc::now() - entry.created_at > self.ttl {
            return None;
        }

        Some(entry)
    }

    /// Drop expired entries; called periodically to bound memory growth.
    pub fn evict_expired(&self) {
        let now = Utc::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| now - entry.created_at <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background task evicting expired pending authorizations.
pub async fn run_pending_eviction(store: PendingStore, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        store.evict_expired();
        tracing::debug!(pending = store.len(), "Pending-authorization eviction complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_consume() {
        let store = PendingStore::new(600);

        let state = store.issue("user123", Service::Gmail);
        assert!(!state.is_empty());

        let entry = store.consume(&state).expect("entry should be valid");
        assert_eq!(entry.user_id, "user123");
        assert_eq!(entry.service, Service::Gmail);
    }

    #[test]
    fn test_state_is_single_use() {
        let store = PendingStore::new(600);
        let state = store.issue("alice", Service::Calendar);

        assert!(store.consume(&state).is_some());
        assert!(store.consume(&state).is_none());
    }

    #[test]
    fn test_unknown_state_rejected() {
        let store = PendingStore::new(600);
        assert!(store.consume("no-such-state").is_none());
    }

    #[test]
    fn test_expired_state_rejected() {
        let store = PendingStore::new(0);
        let state = store.issue("bob", Service::Gmail);

        std::thread::sleep(std::time::Duration::from_millis(20));

        assert!(store.consume(&state).is_none());
    }

    #[test]
    fn test_eviction_removes_expired() {
        let store = PendingStore::new(0);
        store.issue("user1", Service::Gmail);
        store.issue("user2", Service::Calendar);
        assert_eq!(store.len(), 2);

        std::thread::sleep(std::time::Duration::from_millis(20));

        store.evict_expired();
        assert!(store.is_empty());
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = PendingStore::new(600);
        let a = store.issue("user1", Service::Gmail);
        let b = store.issue("user1", Service::Gmail);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }
}
