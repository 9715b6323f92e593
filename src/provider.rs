//! Read-only credential access for the agent process.
//!
//! The voice agent never touches the credential store directly; it asks this
//! provider for a currently-valid access token, and the provider handles
//! refresh and persistence behind a per-(user, service) lock so an
//! agent-triggered refresh cannot race a callback-triggered upsert.

use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::oauth::FlowEngine;
use crate::service::Service;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Token handed to a consumer, with its expiry so the consumer can cache it.
#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct CredentialProvider {
    engine: Arc<FlowEngine>,
    store: Arc<CredentialStore>,
    locks: DashMap<(String, Service), Arc<Mutex<()>>>,
}

impl CredentialProvider {
    pub fn new(engine: Arc<FlowEngine>, store: Arc<CredentialStore>) -> Self {
        Self {
            engine,
            store,
            locks: DashMap::new(),
        }
    }

    /// Fetch a currently-valid access token, refreshing (and persisting the
    /// refreshed record) if the stored one is stale.
    ///
    /// `NotAuthorized` when no record exists, the record is revoked or
    /// missing required scopes, or it is expired with no way to renew it;
    /// `RefreshFailed` when the provider is temporarily unreachable.
    pub async fn get_valid_token(
        &self,
        user_id: &str,
        service: Service,
    ) -> Result<IssuedToken, AuthError> {
        let key = (user_id.to_string(), service);
        let lock = self.locks.entry(key.clone()).or_default().value().clone();
        // Held across the refresh so concurrent callers for the same key
        // trigger at most one provider round trip
        let _guard = lock.lock().await;

        let Some(record) = self.store.get(user_id, service)? else {
            // Nothing left to serialize for this key; drop the lock entry so
            // deleted and purged records do not accumulate entries forever
            drop(_guard);
            self.locks.remove(&key);
            return Err(AuthError::NotAuthorized);
        };

        if record.revoked || !record.covers_scopes(service.required_scopes()) {
            return Err(AuthError::NotAuthorized);
        }

        let (record, changed) = self.engine.refresh_if_needed(user_id, service, record).await?;
        if changed {
            self.store.upsert(user_id, service, &record)?;
        }

        Ok(IssuedToken {
            access_token: record.access_token,
            expires_at: record.expires_at,
        })
    }

    /// Number of live per-key locks (for debugging/monitoring).
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
