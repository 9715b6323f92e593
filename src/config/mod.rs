//! Environment-driven settings.
//!
//! Everything deployment-specific arrives via environment variables:
//! per-service OAuth client credentials, the public callback base URL,
//! storage location, encryption key, and flow tuning knobs.

use crate::service::{Service, ServiceDescriptor, ServiceRegistry};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// OAuth client credentials for one service.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

/// Complete server settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Listening port (Cloud Run style: `PORT`, default 8000).
    pub port: u16,

    /// Public base URL callbacks are registered under,
    /// e.g. `http://localhost:8000`.
    pub callback_base_url: String,

    /// Where the browser is sent after a successful callback.
    pub post_auth_redirect: String,

    /// SQLite database path for the credential store.
    pub credentials_db: String,

    /// Base64-encoded 32-byte master key for token encryption.
    pub encryption_key: String,

    /// How long an issued state token stays valid (seconds).
    pub state_ttl_seconds: i64,

    /// Refresh this long before an access token expires (seconds).
    pub refresh_grace_seconds: i64,

    /// Delete a record after this many consecutive refresh failures.
    /// `None` (the default) never purges; revoked records are kept as
    /// unauthorized history.
    pub purge_after_failures: Option<u32>,

    pub gmail: OAuthClient,
    pub calendar: OAuthClient,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .context("PORT must be a valid port number")?;

        let callback_base_url = std::env::var("VALET_CALLBACK_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let post_auth_redirect = std::env::var("VALET_POST_AUTH_REDIRECT")
            .unwrap_or_else(|_| "/".to_string());

        let credentials_db = std::env::var("VALET_CREDENTIALS_DB")
            .unwrap_or_else(|_| "credentials.db".to_string());

        let encryption_key = std::env::var("VALET_ENCRYPTION_KEY")
            .context("VALET_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

        let state_ttl_seconds = std::env::var("VALET_STATE_TTL_SECONDS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .context("VALET_STATE_TTL_SECONDS must be an integer")?;

        let refresh_grace_seconds = std::env::var("VALET_REFRESH_GRACE_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("VALET_REFRESH_GRACE_SECONDS must be an integer")?;

        let purge_after_failures = match std::env::var("VALET_PURGE_AFTER_FAILURES") {
            Ok(v) => Some(
                v.parse()
                    .context("VALET_PURGE_AFTER_FAILURES must be an integer")?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            port,
            callback_base_url,
            post_auth_redirect,
            credentials_db,
            encryption_key,
            state_ttl_seconds,
            refresh_grace_seconds,
            purge_after_failures,
            gmail: oauth_client(Service::Gmail)?,
            calendar: oauth_client(Service::Calendar)?,
        })
    }

    /// Build the service registry from these settings. Callback paths follow
    /// the HTTP surface: `{base}/{service}/callback`.
    pub fn registry(&self) -> ServiceRegistry {
        let mut descriptors = HashMap::new();
        for (service, client) in [
            (Service::Gmail, &self.gmail),
            (Service::Calendar, &self.calendar),
        ] {
            descriptors.insert(
                service,
                ServiceDescriptor::google(
                    service,
                    client.client_id.clone(),
                    client.client_secret.clone(),
                    format!("{}/{}/callback", self.callback_base_url, service),
                ),
            );
        }
        ServiceRegistry::new(descriptors)
    }
}

fn oauth_client(service: Service) -> Result<OAuthClient> {
    let prefix = service.as_str().to_uppercase();
    let client_id = std::env::var(format!("VALET_{}_CLIENT_ID", prefix))
        .with_context(|| format!("VALET_{}_CLIENT_ID is required", prefix))?;
    let client_secret = std::env::var(format!("VALET_{}_CLIENT_SECRET", prefix))
        .with_context(|| format!("VALET_{}_CLIENT_SECRET is required", prefix))?;
    Ok(OAuthClient {
        client_id,
        client_secret,
    })
}
