//! SQLite-backed credential store.
//!
//! # Schema
//! ```sql
//! CREATE TABLE credentials (
//!     id INTEGER PRIMARY KEY,
//!     user_id TEXT NOT NULL,
//!     service TEXT NOT NULL,
//!     access_token TEXT NOT NULL,       -- Encrypted
//!     access_token_nonce TEXT NOT NULL,
//!     refresh_token TEXT,               -- Encrypted (optional)
//!     refresh_token_nonce TEXT,
//!     expires_at TEXT NOT NULL,         -- ISO 8601
//!     scopes TEXT NOT NULL,             -- Space-separated grant
//!     revoked INTEGER NOT NULL,
//!     refresh_failures INTEGER NOT NULL,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     UNIQUE(user_id, service)
//! );
//! ```
//!
//! # Thread safety
//! The connection sits behind a mutex; every statement runs to completion
//! under it, so per-key upserts and the revocation bookkeeping are atomic.

use super::{encryption::TokenCipher, CredentialRecord};
use crate::service::Service;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl CredentialStore {
    /// Open (or create) a store at `db_path` with a base64-encoded
    /// 32-byte master key.
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher = TokenCipher::from_base64(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                service TEXT NOT NULL,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT NOT NULL,
                scopes TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                refresh_failures INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, service)
            )
            "#,
            [],
        )
        .context("Failed to create credentials table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_user_service ON credentials(user_id, service)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Write a record for (`user_id`, `service`), replacing any existing one.
    pub fn upsert(&self, user_id: &str, service: Service, record: &CredentialRecord) -> Result<()> {
        let (access_token, access_token_nonce) = self
            .cipher
            .seal(&record.access_token)
            .context("Failed to encrypt access token")?;

        let (refresh_token, refresh_token_nonce) = match &record.refresh_token {
            Some(token) => {
                let (sealed, nonce) = self
                    .cipher
                    .seal(token)
                    .context("Failed to encrypt refresh token")?;
                (Some(sealed), Some(nonce))
            }
            None => (None, None),
        };

        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO credentials (
                    user_id, service,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    expires_at, scopes, revoked, refresh_failures,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(user_id, service) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    expires_at = excluded.expires_at,
                    scopes = excluded.scopes,
                    revoked = excluded.revoked,
                    refresh_failures = excluded.refresh_failures,
                    updated_at = excluded.updated_at
                "#,
                params![
                    user_id,
                    service.as_str(),
                    access_token,
                    access_token_nonce,
                    refresh_token,
                    refresh_token_nonce,
                    record.expires_at.to_rfc3339(),
                    record.scopes.join(" "),
                    record.revoked,
                    record.refresh_failures,
                    now,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to upsert credentials")?;

        Ok(())
    }

    /// Point lookup; decrypts tokens on the way out.
    pub fn get(&self, user_id: &str, service: Service) -> Result<Option<CredentialRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       expires_at, scopes, revoked, refresh_failures, updated_at
                FROM credentials
                WHERE user_id = ?1 AND service = ?2
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![user_id, service.as_str()])
            .context("Failed to execute query")?;

        let Some(row) = rows.next().context("Failed to read row")? else {
            return Ok(None);
        };

        let access_token_sealed: String = row.get(0)?;
        let access_token_nonce: String = row.get(1)?;
        let access_token = self
            .cipher
            .open(&access_token_sealed, &access_token_nonce)
            .context("Failed to decrypt access token")?;

        let refresh_token_sealed: Option<String> = row.get(2)?;
        let refresh_token_nonce: Option<String> = row.get(3)?;
        let refresh_token = match (refresh_token_sealed, refresh_token_nonce) {
            (Some(sealed), Some(nonce)) => Some(
                self.cipher
                    .open(&sealed, &nonce)
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        let expires_at: String = row.get(4)?;
        let expires_at = parse_timestamp(&expires_at)?;

        let scopes: String = row.get(5)?;
        let scopes = scopes.split_whitespace().map(str::to_string).collect();

        let revoked: bool = row.get(6)?;
        let refresh_failures: u32 = row.get(7)?;

        let updated_at: String = row.get(8)?;
        let updated_at = parse_timestamp(&updated_at)?;

        Ok(Some(CredentialRecord {
            access_token,
            refresh_token,
            expires_at,
            scopes,
            revoked,
            refresh_failures,
            updated_at,
        }))
    }

    /// Remove a record. Returns whether one existed.
    pub fn delete(&self, user_id: &str, service: Service) -> Result<bool> {
        let rows_affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM credentials WHERE user_id = ?1 AND service = ?2",
                params![user_id, service.as_str()],
            )
            .context("Failed to delete credentials")?;

        Ok(rows_affected > 0)
    }

    /// Mark a record revoked after the provider rejected its refresh token.
    /// The record is degraded, not deleted, so authorization history survives.
    /// Returns the updated consecutive failure count (0 if no record exists).
    pub fn mark_revoked(&self, user_id: &str, service: Service) -> Result<u32> {
        self.record_failure(user_id, service, true)
    }

    /// Count a transient refresh failure without revoking. Returns the
    /// updated consecutive failure count (0 if no record exists).
    pub fn bump_refresh_failures(&self, user_id: &str, service: Service) -> Result<u32> {
        self.record_failure(user_id, service, false)
    }

    fn record_failure(&self, user_id: &str, service: Service, revoke: bool) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE credentials
            SET refresh_failures = refresh_failures + 1,
                revoked = CASE WHEN ?3 THEN 1 ELSE revoked END,
                updated_at = ?4
            WHERE user_id = ?1 AND service = ?2
            "#,
            params![user_id, service.as_str(), revoke, Utc::now().to_rfc3339()],
        )
        .context("Failed to record refresh failure")?;

        let failures: Option<u32> = conn
            .query_row(
                "SELECT refresh_failures FROM credentials WHERE user_id = ?1 AND service = ?2",
                params![user_id, service.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read failure count")?;

        Ok(failures.unwrap_or(0))
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Failed to parse stored timestamp")?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration;

    fn create_test_store() -> CredentialStore {
        let key = BASE64.encode([0u8; 32]);
        CredentialStore::new(":memory:", &key).expect("Failed to create test store")
    }

    fn create_test_record() -> CredentialRecord {
        CredentialRecord::new(
            "access-token-12345".to_string(),
            Some("refresh-token-67890".to_string()),
            Utc::now() + Duration::hours(1),
            vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        )
    }

    #[test]
    fn test_upsert_and_get() {
        let store = create_test_store();
        let record = create_test_record();

        store
            .upsert("user1", Service::Gmail, &record)
            .expect("Failed to upsert");

        let retrieved = store
            .get("user1", Service::Gmail)
            .expect("Failed to get")
            .expect("Record not found");

        assert_eq!(retrieved.access_token, record.access_token);
        assert_eq!(retrieved.refresh_token, record.refresh_token);
        assert_eq!(retrieved.scopes, record.scopes);
        assert!(!retrieved.revoked);
        assert_eq!(retrieved.refresh_failures, 0);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = create_test_store();
        let result = store.get("user1", Service::Gmail).expect("Failed to get");
        assert!(result.is_none());
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let store = create_test_store();
        store
            .upsert("user1", Service::Gmail, &create_test_record())
            .unwrap();

        let replacement = CredentialRecord::new(
            "new-access-token".to_string(),
            Some("new-refresh-token".to_string()),
            Utc::now() + Duration::hours(2),
            vec!["scope.x".to_string()],
        );
        store.upsert("user1", Service::Gmail, &replacement).unwrap();

        let retrieved = store.get("user1", Service::Gmail).unwrap().unwrap();
        assert_eq!(retrieved.access_token, "new-access-token");
        assert_eq!(retrieved.scopes, vec!["scope.x".to_string()]);
    }

    #[test]
    fn test_records_isolated_by_service() {
        let store = create_test_store();
        let gmail = create_test_record();
        let calendar = CredentialRecord::new(
            "calendar-access".to_string(),
            Some("calendar-refresh".to_string()),
            Utc::now() + Duration::hours(1),
            vec!["https://www.googleapis.com/auth/calendar.readonly".to_string()],
        );

        store.upsert("user1", Service::Gmail, &gmail).unwrap();
        store.upsert("user1", Service::Calendar, &calendar).unwrap();

        let g = store.get("user1", Service::Gmail).unwrap().unwrap();
        let c = store.get("user1", Service::Calendar).unwrap().unwrap();
        assert_eq!(g.access_token, "access-token-12345");
        assert_eq!(c.access_token, "calendar-access");
    }

    #[test]
    fn test_records_isolated_by_user() {
        let store = create_test_store();
        store
            .upsert("alice", Service::Gmail, &create_test_record())
            .unwrap();

        assert!(store.get("bob", Service::Gmail).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        store
            .upsert("user1", Service::Gmail, &create_test_record())
            .unwrap();

        assert!(store.delete("user1", Service::Gmail).unwrap());
        assert!(store.get("user1", Service::Gmail).unwrap().is_none());
        assert!(!store.delete("user1", Service::Gmail).unwrap());
    }

    #[test]
    fn test_mark_revoked() {
        let store = create_test_store();
        store
            .upsert("user1", Service::Gmail, &create_test_record())
            .unwrap();

        let failures = store.mark_revoked("user1", Service::Gmail).unwrap();
        assert_eq!(failures, 1);

        let record = store.get("user1", Service::Gmail).unwrap().unwrap();
        assert!(record.revoked);
        assert_eq!(record.refresh_failures, 1);
        // Tokens survive revocation (audit history)
        assert_eq!(record.access_token, "access-token-12345");
    }

    #[test]
    fn test_bump_refresh_failures_accumulates() {
        let store = create_test_store();
        store
            .upsert("user1", Service::Gmail, &create_test_record())
            .unwrap();

        assert_eq!(store.bump_refresh_failures("user1", Service::Gmail).unwrap(), 1);
        assert_eq!(store.bump_refresh_failures("user1", Service::Gmail).unwrap(), 2);

        let record = store.get("user1", Service::Gmail).unwrap().unwrap();
        assert!(!record.revoked);
        assert_eq!(record.refresh_failures, 2);
    }

    #[test]
    fn test_failure_bookkeeping_on_missing_record() {
        let store = create_test_store();
        assert_eq!(store.mark_revoked("ghost", Service::Gmail).unwrap(), 0);
        assert_eq!(
            store.bump_refresh_failures("ghost", Service::Gmail).unwrap(),
            0
        );
    }

    #[test]
    fn test_record_without_refresh_token() {
        let store = create_test_store();
        let record = CredentialRecord::new(
            "access-only".to_string(),
            None,
            Utc::now() + Duration::hours(1),
            vec![],
        );

        store.upsert("user1", Service::Gmail, &record).unwrap();

        let retrieved = store.get("user1", Service::Gmail).unwrap().unwrap();
        assert_eq!(retrieved.access_token, "access-only");
        assert!(retrieved.refresh_token.is_none());
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("credentials.db");
        let key = BASE64.encode([0u8; 32]);

        {
            let store = CredentialStore::new(&db_path, &key).unwrap();
            store
                .upsert("user1", Service::Gmail, &create_test_record())
                .unwrap();
        }

        // Records survive a process restart
        let store = CredentialStore::new(&db_path, &key).unwrap();
        let record = store.get("user1", Service::Gmail).unwrap().unwrap();
        assert_eq!(record.access_token, "access-token-12345");
        assert_eq!(record.refresh_token, Some("refresh-token-67890".to_string()));
    }

    #[test]
    fn test_invalid_encryption_key() {
        assert!(CredentialStore::new(":memory:", "short").is_err());
        assert!(CredentialStore::new(":memory:", "not-valid-base64!@#$").is_err());
    }
}
