//! API server — HTTP REST endpoints plus the Prometheus metrics exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post, put};
use axum::Router;
use insight_analytics::InsightService;
use insight_core::config::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the REST router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Ingestion
        .route("/v1/events", post(rest::handle_ingest))
        .route("/v1/users/:user_id/attributes", put(rest::handle_set_user))
        .route("/v1/track/view", post(rest::handle_track_view))
        .route("/v1/track/booking", post(rest::handle_track_booking))
        // Queries
        .route("/v1/query/window-sum", post(rest::handle_window_sum))
        .route("/v1/query/last-24h", get(rest::handle_tracked_totals))
        .route("/v1/query/last-24h/:event_name", get(rest::handle_last_24h))
        .route("/v1/query/rolling-average", post(rest::handle_rolling_average))
        .route(
            "/v1/query/conversion-rates",
            post(rest::handle_conversion_rates),
        )
        .route(
            "/v1/query/most-likely-converter",
            post(rest::handle_most_likely_converter),
        )
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main API server.
pub struct ApiServer {
    config: AppConfig,
    service: Arc<InsightService>,
}

impl ApiServer {
    pub fn new(config: AppConfig, service: Arc<InsightService>) -> Self {
        Self { config, service }
    }

    /// Start the HTTP REST server. Runs until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            service: self.service.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the Prometheus exporter on its own port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
