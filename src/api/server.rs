use std::sync::Arc;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info};

use super::{services, state::AppState};
use crate::config::Config;
use crate::observability::Metrics;
use crate::retention::RetentionSweeper;
use crate::stream::StreamStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All stream routes over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(services::health))
        .route(
            "/streams/{key}/records",
            post(services::append_record)
                .put(services::edit_record)
                .delete(services::delete_record)
                .get(services::list_records),
        )
        .route("/streams/{key}/finalize", post(services::finalize_stream))
        .route(
            "/streams/{key}",
            get(services::get_document).delete(services::delete_document),
        )
        .with_state(state)
        // Transparently decompress gzip request bodies
        .layer(RequestDecompressionLayer::new())
}

/// Open the store, serve until a shutdown signal, then drain every stream
pub async fn run(config: Config) -> Result<(), AnyError> {
    let metrics = Arc::new(Metrics::new());
    let store = StreamStore::open(&config.storage, Arc::clone(&metrics))
        .await
        .map_err(|e| format!("Failed to open stream store: {e}"))?;

    let sweeper = if config.retention.enabled {
        Some(RetentionSweeper::from_config(store.clone(), &config.retention).start())
    } else {
        info!("Retention sweeper disabled");
        None
    };

    let address = config.server.bind_addr;
    let app = router(AppState::new(config, store.clone(), metrics));

    let listener = TcpListener::bind(address).await?;
    info!(%address, "StreamBox API listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(sweeper) = sweeper {
        sweeper.stop().await;
    }
    let closed = store.shutdown().await;
    info!(closed, "Stream handles closed");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
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
