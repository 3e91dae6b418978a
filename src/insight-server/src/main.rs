//! Insight — hourly event aggregation and conversion prediction service.
//!
//! Main entry point that initializes the stores and starts the server.

use chrono::Utc;
use clap::Parser;
use insight_analytics::InsightService;
use insight_api::ApiServer;
use insight_core::config::AppConfig;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "insight-server")]
#[command(about = "Hourly event aggregation and conversion prediction service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "INSIGHT__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "INSIGHT__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Evict buckets older than this many hours (overrides config)
    #[arg(long, env = "INSIGHT__RETENTION__MAX_AGE_HOURS")]
    retention_hours: Option<u32>,

    /// Do not start the Prometheus exporter
    #[arg(long, default_value_t = false)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "insight_server=info,insight_analytics=info,insight_api=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Insight starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(hours) = cli.retention_hours {
        config.retention.max_age_hours = Some(hours);
    }
    if cli.no_metrics {
        config.metrics.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        boundary = ?config.query.boundary,
        retention_hours = ?config.retention.max_age_hours,
        "Configuration loaded"
    );

    let service = Arc::new(InsightService::new(&config));

    // Spawn retention sweeper
    if config.retention.max_age_hours.is_some() {
        let sweeper = service.clone();
        let every = std::time::Duration::from_secs(config.retention.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                sweeper.enforce_retention(Utc::now());
            }
        });
    } else {
        info!("Retention unbounded; no sweeper started");
    }

    let api_server = ApiServer::new(config.clone(), service);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Insight is ready to serve traffic");

    // Blocks until shutdown
    api_server.start_http().await?;

    Ok(())
}
