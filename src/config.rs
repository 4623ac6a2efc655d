//! Configuration for the ingestion core

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Stores
    pub database_url: Option<String>,
    pub redis_url: Option<String>,

    // Provider API keys
    pub newsdata_api_key: Option<String>,
    pub mediastack_api_key: Option<String>,
    pub gnews_api_key: Option<String>,
    pub newsapi_api_key: Option<String>,

    // Provider base URLs (overridable for tests)
    #[serde(default = "default_newsdata_base")]
    pub newsdata_base_url: String,
    #[serde(default = "default_mediastack_base")]
    pub mediastack_base_url: String,
    #[serde(default = "default_gnews_base")]
    pub gnews_base_url: String,
    #[serde(default = "default_newsapi_base")]
    pub newsapi_base_url: String,

    // Per-provider rate limits (requests per minute)
    #[serde(default = "default_provider_rate_limit")]
    pub newsdata_rate_limit_rpm: u32,
    #[serde(default = "default_provider_rate_limit")]
    pub mediastack_rate_limit_rpm: u32,
    #[serde(default = "default_provider_rate_limit")]
    pub gnews_rate_limit_rpm: u32,
    #[serde(default = "default_provider_rate_limit")]
    pub newsapi_rate_limit_rpm: u32,

    // Per-provider daily budgets
    #[serde(default = "default_newsdata_daily")]
    pub newsdata_daily_limit: u32,
    #[serde(default = "default_mediastack_daily")]
    pub mediastack_daily_limit: u32,
    #[serde(default = "default_gnews_daily")]
    pub gnews_daily_limit: u32,
    #[serde(default = "default_newsapi_daily")]
    pub newsapi_daily_limit: u32,
    /// Hourly cap for GNews (0 = uncapped); the other providers are
    /// day-limited only.
    #[serde(default = "default_gnews_hourly")]
    pub gnews_hourly_limit: u32,

    // Concurrency
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    // Timeouts
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_admission_timeout")]
    pub admission_timeout_secs: u64,

    // Circuit breaker
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout")]
    pub circuit_breaker_reset_timeout_secs: u64,

    // Reference timezone, minutes east of UTC (IST = +330)
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset_minutes: i32,

    // Deduplication policy
    #[serde(default = "default_title_threshold")]
    pub dedup_title_threshold: f64,
    #[serde(default = "default_combined_title_threshold")]
    pub dedup_combined_title_threshold: f64,
    #[serde(default = "default_time_window_hours")]
    pub dedup_time_window_hours: i64,
    #[serde(default = "default_dedup_cache_cap")]
    pub dedup_cache_cap: usize,

    // Adaptive cache TTLs (seconds)
    #[serde(default = "default_event_ttl")]
    pub cache_event_ttl_secs: u64,
    #[serde(default = "default_peak_ttl")]
    pub cache_peak_ttl_secs: u64,
    #[serde(default = "default_offpeak_ttl")]
    pub cache_offpeak_ttl_secs: u64,

    // Daemon refresh loop
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_categories")]
    pub refresh_categories: Vec<String>,

    // Metrics server
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_newsdata_base() -> String {
    "https://newsdata.io/api/1".to_string()
}

fn default_mediastack_base() -> String {
    "http://api.mediastack.com/v1".to_string()
}

fn default_gnews_base() -> String {
    "https://gnews.io/api/v4".to_string()
}

fn default_newsapi_base() -> String {
    "https://newsapi.org/v2".to_string()
}

fn default_provider_rate_limit() -> u32 {
    30
}

fn default_newsdata_daily() -> u32 {
    200
}

fn default_mediastack_daily() -> u32 {
    150
}

fn default_gnews_daily() -> u32 {
    100
}

fn default_newsapi_daily() -> u32 {
    50
}

fn default_gnews_hourly() -> u32 {
    10
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_admission_timeout() -> u64 {
    3
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout() -> u64 {
    60
}

fn default_timezone_offset() -> i32 {
    330 // IST
}

fn default_title_threshold() -> f64 {
    0.70
}

fn default_combined_title_threshold() -> f64 {
    0.60
}

fn default_time_window_hours() -> i64 {
    24
}

fn default_dedup_cache_cap() -> usize {
    10_000
}

fn default_event_ttl() -> u64 {
    120
}

fn default_peak_ttl() -> u64 {
    300
}

fn default_offpeak_ttl() -> u64 {
    900
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_refresh_categories() -> Vec<String> {
    vec![
        "general".to_string(),
        "business".to_string(),
        "sports".to_string(),
    ]
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_enabled() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// A config with all defaults and no credentials, for tests.
    pub fn for_tests() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("defaults deserialize")
    }

    pub fn has_newsdata(&self) -> bool {
        self.newsdata_api_key.is_some()
    }

    pub fn has_mediastack(&self) -> bool {
        self.mediastack_api_key.is_some()
    }

    pub fn has_gnews(&self) -> bool {
        self.gnews_api_key.is_some()
    }

    pub fn has_newsapi(&self) -> bool {
        self.newsapi_api_key.is_some()
    }

    /// True if at least one upstream provider is usable.
    pub fn has_any_provider(&self) -> bool {
        self.has_newsdata() || self.has_mediastack() || self.has_gnews() || self.has_newsapi()
    }
}
