//! Token-endpoint calls: code exchange and refresh.

use crate::error::AuthError;
use crate::service::ServiceDescriptor;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Google omits `expires_in` only in edge cases; fall back to its
/// documented default lifetime.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Tokens obtained from the provider, either by code exchange or refresh.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

/// Why a refresh attempt failed. `Revoked` means the provider definitively
/// rejected the refresh token (4xx); `Transient` covers network errors and
/// provider 5xx, which may succeed on retry.
#[derive(Debug)]
pub enum RefreshError {
    Revoked(String),
    Transient(String),
}

/// Standard OAuth 2.0 token response.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// `requested` fills in when the provider omits the `scope` field.
    fn into_grant(self, requested: &[String]) -> TokenGrant {
        let expires_at =
            Utc::now() + Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN));

        let scopes = match self.scope {
            Some(s) => s.split_whitespace().map(str::to_string).collect(),
            None => requested.to_vec(),
        };

        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            scopes,
        }
    }
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    descriptor: &ServiceDescriptor,
    code: &str,
) -> Result<TokenGrant, AuthError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);
    form.insert("redirect_uri", descriptor.redirect_uri.as_str());
    form.insert("client_id", descriptor.client_id.as_str());
    form.insert("client_secret", descriptor.client_secret.as_str());

    tracing::debug!(token_url = %descriptor.token_url, "Exchanging authorization code");

    let response = http
        .post(&descriptor.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| AuthError::TokenExchangeFailed(format!("request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unreadable body".to_string());
        return Err(AuthError::TokenExchangeFailed(format!(
            "provider returned {}: {}",
            status, body
        )));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::TokenExchangeFailed(format!("invalid token response: {}", e)))?;

    tracing::debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token exchange successful"
    );

    Ok(token_response.into_grant(&descriptor.scopes))
}

/// Mint a new access token from a refresh token.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    descriptor: &ServiceDescriptor,
    refresh_token: &str,
) -> Result<TokenGrant, RefreshError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "refresh_token");
    form.insert("refresh_token", refresh_token);
    form.insert("client_id", descriptor.client_id.as_str());
    form.insert("client_secret", descriptor.client_secret.as_str());

    tracing::debug!(token_url = %descriptor.token_url, "Refreshing access token");

    let response = http
        .post(&descriptor.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| RefreshError::Transient(format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unreadable body".to_string());
        let message = format!("provider returned {}: {}", status, body);
        // 4xx (invalid_grant and friends) will never succeed on retry
        return if status.is_client_error() {
            Err(RefreshError::Revoked(message))
        } else {
            Err(RefreshError::Transient(message))
        };
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::Transient(format!("invalid token response: {}", e)))?;

    Ok(token_response.into_grant(&descriptor.scopes))
}
