//! Router assembly and server entry point.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::accounts;
use super::terminal;
use crate::config::Config;
use crate::oauth::OAuthClient;
use crate::relay::SessionRelay;
use crate::vault::Vault;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub vault: Arc<Vault>,
    pub relay: Arc<SessionRelay>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/accounts",
            get(accounts::list_accounts).post(accounts::create_account),
        )
        .route(
            "/api/accounts/:id",
            axum::routing::put(accounts::update_account).delete(accounts::delete_account),
        )
        .route("/api/accounts/:id/status", get(accounts::account_status))
        .route("/api/accounts/:id/capture-oauth", post(accounts::capture_oauth))
        .route("/api/accounts/:id/refresh", post(accounts::refresh_account))
        .route("/api/accounts/:id/launch", post(accounts::launch_command))
        .route("/api/aliases", get(accounts::aliases))
        .route("/api/export", get(accounts::export_accounts))
        .route("/api/import", post(accounts::import_accounts))
        .route("/api/terminal/ws", get(terminal::terminal_ws))
        .route("/api/health", get(accounts::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let refresher = Arc::new(OAuthClient::new(config.refresh_timeout));
    let vault = Arc::new(Vault::open(&config, refresher).await?);
    let relay = Arc::new(SessionRelay::new(vault.clone(), config.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config,
        vault,
        relay,
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
