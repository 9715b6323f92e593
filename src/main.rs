use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use valet::api::{create_router, AppState};
use valet::config::Settings;
use valet::credentials::CredentialStore;
use valet::oauth::{run_pending_eviction, FlowEngine};
use valet::provider::CredentialProvider;
use valet::status::StatusAggregator;

/// How often the pending-authorization table is swept.
const EVICTION_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "valet=info".into()),
        )
        .init();

    info!("Valet starting...");

    let settings = Settings::from_env().context("Failed to load settings")?;
    info!(
        port = settings.port,
        callback_base_url = %settings.callback_base_url,
        credentials_db = %settings.credentials_db,
        state_ttl_seconds = settings.state_ttl_seconds,
        "Configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::new(&settings.credentials_db, &settings.encryption_key)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let engine = Arc::new(
        FlowEngine::new(
            settings.registry(),
            Arc::clone(&store),
            settings.state_ttl_seconds,
            settings.refresh_grace_seconds,
            settings.purge_after_failures,
        )
        .context("Failed to initialize flow engine")?,
    );

    let provider = Arc::new(CredentialProvider::new(
        Arc::clone(&engine),
        Arc::clone(&store),
    ));
    let status = Arc::new(StatusAggregator::new(Arc::clone(&store)));

    // Bound memory growth from abandoned flows
    tokio::spawn(run_pending_eviction(
        engine.pending(),
        EVICTION_INTERVAL_SECS,
    ));

    let router = create_router(AppState {
        engine,
        provider,
        status,
        post_auth_redirect: settings.post_auth_redirect.clone(),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port))
        .await
        .context("Failed to bind listening port")?;
    info!(port = settings.port, "Valet listening");

    axum::serve(listener, router)
        .await
        .context("Server error")?;

    Ok(())
}
