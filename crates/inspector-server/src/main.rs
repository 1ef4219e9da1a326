//! Kubernetes Inspector Server
//!
//! Serves the live watch channel of the inspection core:
//! - `GET /api/watch?context=<name>`: WebSocket; subscribe/unsubscribe/setContext in, updates out
//! - `GET /health`: liveness and the active context
//!
//! Authentication and the REST surface live in front of this process.

mod config;
mod error;
mod routes;
mod websocket;

use anyhow::Context;
use cluster_client::KubeConnector;
use config::ServerConfig;
use error::ServerError;
use inspector::{InspectorConfig, InspectorService};
use routes::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube is built with rustls; a provider must be chosen before the first client
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Kubernetes Inspector");

    let server_config = ServerConfig::from_env()?;
    let inspector_config = InspectorConfig::from_env().map_err(ServerError::from)?;

    info!("Configuration:");
    info!("  Listen: {}", server_config.bind_addr());
    info!("  Kubeconfig: {}", inspector_config.kubeconfig_path.display());
    info!("  Managed cache TTL: {:?}", inspector_config.managed_cache_ttl);
    info!("  Watch resync: {:?}", inspector_config.watch_resync);

    let service = Arc::new(InspectorService::new(
        inspector_config,
        Arc::new(KubeConnector::new()),
    ));
    service.initialize().await;
    let hub = service.watch_hub();

    let addr = server_config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!("Listening on {}", addr);

    axum::serve(listener, routes::router(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)
        .context("server terminated")?;

    hub.shutdown().await;
    info!("Kubernetes Inspector stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
