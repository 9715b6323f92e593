//! Google services the broker can authorize, plus their OAuth descriptors.
//!
//! The two flows (Gmail, Calendar) share one parametrized engine; everything
//! service-specific lives in a `ServiceDescriptor` looked up through the
//! `ServiceRegistry`.

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Google OAuth 2.0 authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google OAuth 2.0 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// A service the broker can hold credentials for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Gmail,
    Calendar,
}

impl Service {
    /// Every known service, in status-report order.
    pub const ALL: [Service; 2] = [Service::Calendar, Service::Gmail];

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Gmail => "gmail",
            Service::Calendar => "calendar",
        }
    }

    /// Scopes a credential record must cover to be considered authorized
    /// for this service.
    pub fn required_scopes(self) -> &'static [&'static str] {
        match self {
            Service::Gmail => &[
                "https://www.googleapis.com/auth/gmail.readonly",
                "https://www.googleapis.com/auth/gmail.compose",
                "https://www.googleapis.com/auth/gmail.send",
            ],
            Service::Calendar => &[
                "https://www.googleapis.com/auth/calendar.readonly",
                "https://www.googleapis.com/auth/calendar.events",
            ],
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gmail" => Ok(Service::Gmail),
            "calendar" => Ok(Service::Calendar),
            _ => Err(AuthError::InvalidService),
        }
    }
}

/// Per-service OAuth configuration: endpoints, scopes, client credentials,
/// and the redirect URI registered with the provider.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ServiceDescriptor {
    /// Descriptor for a Google service with the standard endpoints and the
    /// service's required scopes.
    pub fn google(
        service: Service,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: service
                .required_scopes()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    /// Build the provider authorization URL for one flow.
    ///
    /// `access_type=offline` guarantees a refresh token is issued;
    /// `prompt=consent` forces Google to re-issue one on re-consent instead
    /// of silently reusing a prior grant.
    pub fn build_auth_url(&self, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code&access_type=offline&include_granted_scopes=true&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}

/// Lookup table from service to descriptor.
#[derive(Clone, Debug)]
pub struct ServiceRegistry {
    descriptors: HashMap<Service, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn new(descriptors: HashMap<Service, ServiceDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn descriptor(&self, service: Service) -> Option<&ServiceDescriptor> {
        self.descriptors.get(&service)
    }
}
