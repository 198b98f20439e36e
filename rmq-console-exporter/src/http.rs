//! Prometheus scrape endpoint.
//!
//! `GET <metrics path>` runs a collection and answers with the rendered text.
//! `/health` always answers 200; `/ready` answers 503 until the first
//! collection has succeeded.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::exporter::SharedExporter;

/// Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Routes for the scrape, health and readiness endpoints.
pub fn router(exporter: SharedExporter, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(scrape))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(CorsLayer::permissive())
        .with_state(exporter)
}

async fn scrape(State(exporter): State<SharedExporter>) -> impl IntoResponse {
    // a skipped scrape still renders the self statistics
    let outcome = exporter.scrape().await;
    let body = exporter.render(outcome.metric_sets());
    ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body)
}

async fn health() -> &'static str {
    "healthy\n"
}

async fn ready(State(exporter): State<SharedExporter>) -> (StatusCode, &'static str) {
    match exporter.stats().collections_succeeded {
        0 => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no successful collection yet\n",
        ),
        _ => (StatusCode::OK, "ready\n"),
    }
}

/// Serves the exporter until told to stop.
pub struct HttpServer {
    exporter: SharedExporter,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(exporter: SharedExporter, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            exporter,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the configured address, then [`serve`](Self::serve).
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Accept scrapes on `listener` until `shutdown` turns true or its sender is dropped.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, path = %self.metrics_path, "Serving scrapes");

        axum::serve(listener, router(self.exporter, &self.metrics_path))
            .with_graceful_shutdown(wait_for_shutdown(shutdown))
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!(addr = %addr, "HTTP server stopped");
        Ok(())
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    // an error means the sender is gone, which also ends serving
    let _ = shutdown.wait_for(|stop| *stop).await;
    info!("HTTP server draining connections");
}
