// HTTP API (auth flow, status, internal token endpoint)
pub mod api;

// Environment-driven settings
pub mod config;

// Encrypted credential storage
pub mod credentials;

// Error taxonomy
pub mod error;

// OAuth flow engine and pending-authorization tracking
pub mod oauth;

// Read-only token accessor for the agent process
pub mod provider;

// Service enum and per-service OAuth descriptors
pub mod service;

// Per-user authorization status snapshots
pub mod status;
