use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::Extension, http::header, http::Method, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearth_hub::config::Config;
use hearth_hub::routes::{auth_router, health_router, AuthState, HealthState};
use hearth_hub::services::{AuthService, CredentialBackend, FileCredentials};
use hearth_hub::websocket::{ws_handler, SessionEngine};
use hearth_statestore::{MemoryStateStore, StateStore};

/// Build the CORS layer based on configuration
///
/// Production without configured origins rejects all cross-origin
/// requests; development without them is permissive for convenience.
fn build_cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let allowed: Vec<_> = origins
                .iter()
                .filter_map(|origin| {
                    origin.parse().ok().or_else(|| {
                        tracing::warn!("Invalid CORS origin '{}', skipping", origin);
                        None
                    })
                })
                .collect();
            if allowed.is_empty() {
                tracing::error!("No valid CORS origins configured, CORS requests will be rejected");
                CorsLayer::new()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
            }
        }
        _ if config.is_production() => {
            tracing::warn!(
                "HEARTH_CORS_ORIGINS not configured in production mode, \
                 CORS requests will be rejected"
            );
            CorsLayer::new()
        }
        _ => {
            tracing::warn!("Using permissive CORS in development mode");
            CorsLayer::permissive()
        }
    }
}

/// Resolve the credential backend from configuration
fn build_credentials(config: &Config) -> anyhow::Result<Arc<dyn CredentialBackend>> {
    match &config.credentials_path {
        Some(path) => {
            let creds = FileCredentials::load(path)?;
            Ok(Arc::new(creds))
        }
        None => {
            tracing::warn!(
                "HEARTH_CREDENTIALS_FILE not set, token issuance will refuse all requests"
            );
            Ok(Arc::new(EmptyCredentials))
        }
    }
}

/// Backend with no accounts, used when no credential file is configured
struct EmptyCredentials;

#[async_trait::async_trait]
impl CredentialBackend for EmptyCredentials {
    async fn lookup(
        &self,
        _user: &str,
    ) -> Result<Option<hearth_hub::services::UserAccount>, hearth_hub::services::CredentialError>
    {
        Ok(None)
    }

    async fn check_password(
        &self,
        _user: &str,
        _password: &str,
    ) -> Result<bool, hearth_hub::services::CredentialError> {
        Ok(false)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!(
        environment = %config.common.environment,
        port = config.port,
        "Starting Hearth hub"
    );

    // The networked store adapter is deployed separately; a standalone hub
    // runs against the in-memory store.
    // TODO: wire the remote store adapter once its transport settles.
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    tracing::warn!("Using in-memory state store; state will not survive a restart");

    let credentials = build_credentials(&config)?;
    let auth_service = AuthService::new(
        credentials,
        config.token_secret.clone(),
        config.token_ttl_secs,
    );

    let engine = SessionEngine::new(Arc::clone(&store), config.session.clone());
    engine.start().await?;

    let cors_layer = build_cors_layer(&config);
    let app = Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .nest(
            "/health",
            health_router(HealthState {
                store: Arc::clone(&store),
            }),
        )
        .nest(
            "/auth",
            auth_router(AuthState {
                auth_service: auth_service.clone(),
            }),
        )
        .layer(Extension(auth_service))
        .layer(Extension(engine.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then ask every client to disconnect
async fn shutdown_signal(engine: SessionEngine) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown handler");
        return;
    }
    tracing::info!("Shutdown signal received");
    engine.shutdown();
}

async fn root() -> &'static str {
    "Hearth hub - real-time home automation sync"
}
