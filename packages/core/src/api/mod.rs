//! Read-only HTTP surface over the monitor's history and metrics.

pub mod headers;
pub mod health;
pub mod networks;

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use crate::error::AppError;
use crate::scheduler::MonitorView;
use crate::shutdown::ShutdownSignal;

pub fn router(view: MonitorView) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/networks", get(networks::list_networks))
        .route("/networks/:network/history", get(networks::history))
        .route("/networks/:network/latest", get(networks::latest))
        .route("/networks/:network/stats", get(networks::stats))
        .layer(CorsLayer::permissive())
        .with_state(view)
}

/// Serve `router(view)` on `addr` until `shutdown` fires.
pub async fn serve(addr: SocketAddr, view: MonitorView, shutdown: ShutdownSignal) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Read API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(view))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}
