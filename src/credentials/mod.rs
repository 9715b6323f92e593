//! Encrypted per-(user, service) credential storage.
//!
//! The store owns all credential persistence: one record per
//! (`user_id`, `service`) pair, written via atomic upserts, with both tokens
//! encrypted at rest using AES-256-GCM. Nothing outside this module touches
//! the backing database.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::TokenCipher;
pub use storage::CredentialStore;

/// One user's credentials for one service.
///
/// A record without a `refresh_token` is degraded: once `expires_at` passes
/// it cannot be renewed and reports as unauthorized. A `revoked` record is
/// kept as history but never usable again without full re-consent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Short-lived bearer token for provider API calls.
    pub access_token: String,

    /// Long-lived secret used to mint new access tokens. Google only
    /// guarantees one on the first consent (hence `prompt=consent`).
    pub refresh_token: Option<String>,

    /// Absolute access-token expiry.
    pub expires_at: DateTime<Utc>,

    /// Scopes actually granted by the provider.
    pub scopes: Vec<String>,

    /// Set when the provider definitively rejected the refresh token.
    pub revoked: bool,

    /// Consecutive refresh failures; reset to zero on success.
    pub refresh_failures: u32,

    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Fresh record as produced by a completed authorization flow.
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            scopes,
            revoked: false,
            refresh_failures: 0,
            updated_at: Utc::now(),
        }
    }

    /// True when the access token is expired or expires within `grace`.
    pub fn expires_within(&self, grace: Duration) -> bool {
        Utc::now() >= self.expires_at - grace
    }

    /// True when the granted scopes are a superset of `required`.
    pub fn covers_scopes(&self, required: &[&str]) -> bool {
        required
            .iter()
            .all(|needed| self.scopes.iter().any(|granted| granted == needed))
    }

    /// Advisory authorization check used by the status aggregator: the
    /// record must not be revoked, must cover the required scopes, and must
    /// either still be live or be renewable via a refresh token.
    pub fn is_authorized(&self, required: &[&str]) -> bool {
        !self.revoked
            && self.covers_scopes(required)
            && (self.expires_at > Utc::now() || self.refresh_token.is_some())
    }
}
