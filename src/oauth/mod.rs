//! OAuth 2.0 authorization flow engine.
//!
//! One parametrized engine drives both service flows:
//! 1. `GET /{service}/auth` → `begin_authorization` issues a state token and
//!    redirects the browser to Google
//! 2. User consents on Google's site
//! 3. Google redirects to `GET /{service}/callback`
//! 4. `handle_callback` validates the state token, exchanges the code, and
//!    upserts the credential record
//! 5. Later, `refresh_if_needed` renews the access token on demand

mod exchange;
mod pending;

pub use exchange::TokenGrant;
pub use pending::{run_pending_eviction, PendingAuthorization, PendingStore};

use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::AuthError;
use crate::service::{Service, ServiceRegistry};
use anyhow::Context;
use chrono::{Duration, Utc};
use exchange::RefreshError;
use std::sync::Arc;
use tracing::{info, warn};

/// Bounded timeout for every token-endpoint call.
const TOKEN_ENDPOINT_TIMEOUT_SECS: u64 = 10;

pub struct FlowEngine {
    registry: ServiceRegistry,
    store: Arc<CredentialStore>,
    pending: PendingStore,
    http: reqwest::Client,
    refresh_grace: Duration,
    purge_after_failures: Option<u32>,
}

impl FlowEngine {
    pub fn new(
        registry: ServiceRegistry,
        store: Arc<CredentialStore>,
        state_ttl_seconds: i64,
        refresh_grace_seconds: i64,
        purge_after_failures: Option<u32>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(TOKEN_ENDPOINT_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            registry,
            store,
            pending: PendingStore::new(state_ttl_seconds),
            http,
            refresh_grace: Duration::seconds(refresh_grace_seconds),
            purge_after_failures,
        })
    }

    /// Handle to the pending-authorization table, for the eviction task.
    pub fn pending(&self) -> PendingStore {
        self.pending.clone()
    }

    /// Start a flow: record a pending authorization and return the provider
    /// authorization URL the browser should be redirected to.
    pub fn begin_authorization(
        &self,
        user_id: &str,
        service: Service,
    ) -> Result<String, AuthError> {
        let descriptor = self
            .registry
            .descriptor(service)
            .ok_or(AuthError::InvalidService)?;

        let state = self.pending.issue(user_id, service);
        let url = descriptor.build_auth_url(&state);

        info!(user_id = %user_id, service = %service, "Issued authorization URL");
        Ok(url)
    }

    /// Complete a flow: consume the state token (single use), exchange the
    /// code, and persist the resulting record. Returns the owning user id
    /// alongside the record.
    pub async fn handle_callback(
        &self,
        service: Service,
        state: &str,
        code: &str,
    ) -> Result<(String, CredentialRecord), AuthError> {
        let pending = self
            .pending
            .consume(state)
            .ok_or(AuthError::UnknownOrExpiredState)?;

        // A state issued for one service must not complete another; report
        // the same error as an unknown token so nothing is leaked.
        if pending.service != service {
            warn!(
                expected = %pending.service,
                actual = %service,
                "State token presented to the wrong service callback"
            );
            return Err(AuthError::UnknownOrExpiredState);
        }

        let descriptor = self
            .registry
            .descriptor(service)
            .ok_or(AuthError::InvalidService)?;

        let grant = exchange::exchange_code(&self.http, descriptor, code).await?;

        if grant.refresh_token.is_none() {
            warn!(
                user_id = %pending.user_id,
                service = %service,
                "No refresh token in grant; record will degrade at expiry"
            );
        }

        let record = CredentialRecord::new(
            grant.access_token,
            grant.refresh_token,
            grant.expires_at,
            grant.scopes,
        );

        self.store.upsert(&pending.user_id, service, &record)?;

        info!(
            user_id = %pending.user_id,
            service = %service,
            has_refresh_token = record.refresh_token.is_some(),
            "Authorization flow completed"
        );

        Ok((pending.user_id, record))
    }

    /// Renew the access token when it is expired or expires within the grace
    /// period. Returns the (possibly updated) record and whether it changed;
    /// the caller persists changed records.
    ///
    /// A definitive provider rejection marks the stored record revoked and
    /// surfaces as `NotAuthorized`; transient failures surface as
    /// `RefreshFailed` and leave the record usable for a later retry.
    pub async fn refresh_if_needed(
        &self,
        user_id: &str,
        service: Service,
        record: CredentialRecord,
    ) -> Result<(CredentialRecord, bool), AuthError> {
        if !record.expires_within(self.refresh_grace) {
            return Ok((record, false));
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            // Degraded record: expired with nothing to renew it
            return Err(AuthError::NotAuthorized);
        };

        let descriptor = self
            .registry
            .descriptor(service)
            .ok_or(AuthError::InvalidService)?;

        match exchange::refresh_access_token(&self.http, descriptor, &refresh_token).await {
            Ok(grant) => {
                let refreshed = CredentialRecord {
                    access_token: grant.access_token,
                    // Google usually omits the refresh token on refresh;
                    // keep the one we already hold
                    refresh_token: grant.refresh_token.or(Some(refresh_token)),
                    expires_at: grant.expires_at,
                    scopes: if grant.scopes.is_empty() {
                        record.scopes
                    } else {
                        grant.scopes
                    },
                    revoked: false,
                    refresh_failures: 0,
                    updated_at: Utc::now(),
                };

                info!(user_id = %user_id, service = %service, "Access token refreshed");
                Ok((refreshed, true))
            }
            Err(RefreshError::Revoked(message)) => {
                let failures = self.store.mark_revoked(user_id, service)?;
                warn!(
                    user_id = %user_id,
                    service = %service,
                    failures,
                    error = %message,
                    "Refresh token revoked; record marked invalid"
                );
                self.maybe_purge(user_id, service, failures)?;
                Err(AuthError::NotAuthorized)
            }
            Err(RefreshError::Transient(message)) => {
                let failures = self.store.bump_refresh_failures(user_id, service)?;
                warn!(
                    user_id = %user_id,
                    service = %service,
                    failures,
                    error = %message,
                    "Token refresh failed"
                );
                self.maybe_purge(user_id, service, failures)?;
                Err(AuthError::RefreshFailed(message))
            }
        }
    }

    fn maybe_purge(&self, user_id: &str, service: Service, failures: u32) -> Result<(), AuthError> {
        if let Some(threshold) = self.purge_after_failures {
            if failures >= threshold {
                self.store.delete(user_id, service)?;
                info!(
                    user_id = %user_id,
                    service = %service,
                    failures,
                    "Record purged after repeated refresh failures; full re-consent required"
                );
            }
        }
        Ok(())
    }
}
