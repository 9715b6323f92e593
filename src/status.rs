//! Per-user authorization status snapshots.
//!
//! Status is advisory: it reflects what the store holds without touching the
//! network, so a `true` means "authorized and renewable", not "this exact
//! access token is live right now".

use crate::credentials::CredentialStore;
use crate::service::Service;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct StatusAggregator {
    store: Arc<CredentialStore>,
}

impl StatusAggregator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    /// Snapshot for every known service: true iff a record exists, is not
    /// revoked, covers the service's required scopes, and is either live or
    /// renewable via a refresh token.
    pub fn status_for(&self, user_id: &str) -> Result<BTreeMap<&'static str, bool>> {
        let mut statuses = BTreeMap::new();
        for service in Service::ALL {
            let authorized = self
                .store
                .get(user_id, service)?
                .map(|record| record.is_authorized(service.required_scopes()))
                .unwrap_or(false);
            statuses.insert(service.as_str(), authorized);
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialRecord;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::{Duration, Utc};

    fn create_test_store() -> Arc<CredentialStore> {
        let key = BASE64.encode([0u8; 32]);
        Arc::new(CredentialStore::new(":memory:", &key).unwrap())
    }

    fn full_scope_record(service: Service) -> CredentialRecord {
        CredentialRecord::new(
            "access".to_string(),
            Some("refresh".to_string()),
            Utc::now() + Duration::hours(1),
            service
                .required_scopes()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        )
    }

    #[test]
    fn test_unknown_user_all_false() {
        let aggregator = StatusAggregator::new(create_test_store());

        let statuses = aggregator.status_for("new_user").unwrap();
        assert_eq!(statuses.get("gmail"), Some(&false));
        assert_eq!(statuses.get("calendar"), Some(&false));
        assert_eq!(statuses.len(), 2);
    }

    #[test]
    fn test_partial_authorization() {
        let store = create_test_store();
        store
            .upsert("user1", Service::Gmail, &full_scope_record(Service::Gmail))
            .unwrap();

        let aggregator = StatusAggregator::new(store);
        let statuses = aggregator.status_for("user1").unwrap();
        assert_eq!(statuses.get("gmail"), Some(&true));
        assert_eq!(statuses.get("calendar"), Some(&false));
    }

    #[test]
    fn test_expired_without_refresh_token_reports_false() {
        let store = create_test_store();
        let mut record = full_scope_record(Service::Calendar);
        record.refresh_token = None;
        record.expires_at = Utc::now() - Duration::hours(1);
        store.upsert("user1", Service::Calendar, &record).unwrap();

        let aggregator = StatusAggregator::new(store);
        let statuses = aggregator.status_for("user1").unwrap();
        assert_eq!(statuses.get("calendar"), Some(&false));
    }

    #[test]
    fn test_expired_with_refresh_token_reports_true() {
        let store = create_test_store();
        let mut record = full_scope_record(Service::Gmail);
        record.expires_at = Utc::now() - Duration::hours(1);
        store.upsert("user1", Service::Gmail, &record).unwrap();

        let aggregator = StatusAggregator::new(store);
        let statuses = aggregator.status_for("user1").unwrap();
        assert_eq!(statuses.get("gmail"), Some(&true));
    }

    #[test]
    fn test_insufficient_scopes_report_false() {
        let store = create_test_store();
        let mut record = full_scope_record(Service::Gmail);
        record.scopes = vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()];
        store.upsert("user1", Service::Gmail, &record).unwrap();

        let aggregator = StatusAggregator::new(store);
        let statuses = aggregator.status_for("user1").unwrap();
        assert_eq!(statuses.get("gmail"), Some(&false));
    }
}
