use crate::error::InsightResult;
use crate::types::WindowBoundary;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `INSIGHT__` (nested keys separated by `__`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub events: EventNamesConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Event names used by the view/booking tracking shortcuts.
#[derive(Debug, Clone, Deserialize)]
pub struct EventNamesConfig {
    #[serde(default = "default_view_event")]
    pub view_event: String,
    #[serde(default = "default_book_event")]
    pub book_event: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_rolling_window_hours")]
    pub rolling_window_hours: u32,
    #[serde(default = "default_conversion_window_hours")]
    pub conversion_window_hours: u32,
    /// Upper bound on `window_hours` accepted by any query.
    #[serde(default = "default_max_window_hours")]
    pub max_window_hours: u32,
    /// Upper bound on the length of a rolling-average series.
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    #[serde(default)]
    pub boundary: WindowBoundary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Buckets older than this many hours are evicted. Unset keeps history forever.
    #[serde(default)]
    pub max_age_hours: Option<u32>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_view_event() -> String {
    "View page".to_string()
}
fn default_book_event() -> String {
    "Book demo".to_string()
}
fn default_rolling_window_hours() -> u32 {
    6
}
fn default_conversion_window_hours() -> u32 {
    24
}
fn default_max_window_hours() -> u32 {
    24 * 366
}
fn default_max_points() -> usize {
    24 * 31
}
fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for EventNamesConfig {
    fn default() -> Self {
        Self {
            view_event: default_view_event(),
            book_event: default_book_event(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            rolling_window_hours: default_rolling_window_hours(),
            conversion_window_hours: default_conversion_window_hours(),
            max_window_hours: default_max_window_hours(),
            max_points: default_max_points(),
            boundary: WindowBoundary::default(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            events: EventNamesConfig::default(),
            query: QueryConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> InsightResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("INSIGHT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let app: AppConfig = config.try_deserialize()?;
        tracing::debug!(node_id = %app.node_id, "Configuration deserialized");
        Ok(app)
    }
}
