//! Error taxonomy for the credential lifecycle manager.
//!
//! These variants map directly onto HTTP statuses at the API boundary:
//! `InvalidService` and `UnknownOrExpiredState` are client errors (400),
//! `TokenExchangeFailed` and `RefreshFailed` are upstream failures (502),
//! and `NotAuthorized` tells a consumer that re-authorization is required.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The requested service is not one of the known services.
    #[error("unknown service")]
    InvalidService,

    /// The callback carried a state token that is absent, already consumed,
    /// expired, or bound to a different service. The cases are deliberately
    /// indistinguishable to the caller (CSRF/replay defense).
    #[error("unknown or expired authorization state")]
    UnknownOrExpiredState,

    /// The provider rejected the authorization code.
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// The provider could not be reached or returned a transient failure
    /// while refreshing an access token.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// No usable credentials exist for this (user, service) pair: no record,
    /// revoked, missing required scopes, or expired without a refresh token.
    #[error("re-authorization required")]
    NotAuthorized,

    /// Storage or crypto failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
