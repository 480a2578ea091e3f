use crate::types::BanditAlgorithm;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CREATIVE_OPTIMIZER__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub bayesian: BayesianConfig,
    #[serde(default)]
    pub rebalancer: RebalancerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub control_loop: ControlLoopConfig,
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
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Bounds every read and write against the event/config collaborators.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_window_minutes")]
    pub default_window_minutes: i64,
    /// Longest window a caller may request; larger windows are rejected.
    #[serde(default = "default_max_window_minutes")]
    pub max_window_minutes: i64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// A stale snapshot may be served for `ttl * stale_grace_multiplier`
    /// while the event store is unavailable.
    #[serde(default = "default_stale_grace_multiplier")]
    pub stale_grace_multiplier: u32,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    #[serde(default)]
    pub default_algorithm: BanditAlgorithm,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_feature_key")]
    pub feature_key: String,
    #[serde(default = "default_feature_threshold")]
    pub feature_threshold: f64,
    #[serde(default = "default_feature_boost")]
    pub feature_boost: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BayesianConfig {
    #[serde(default = "default_simulations")]
    pub simulations: usize,
    #[serde(default = "default_credible_z")]
    pub credible_z: f64,
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,
    #[serde(default = "default_min_impressions")]
    pub min_impressions: u64,
    /// Threads used for the probability-of-best simulation.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalancerConfig {
    #[serde(default = "default_min_weight")]
    pub min_weight: u32,
    #[serde(default = "default_total_weight")]
    pub total_weight: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_low_ctr_percent")]
    pub low_ctr_percent: f64,
    #[serde(default = "default_low_ctr_min_impressions")]
    pub low_ctr_min_impressions: u64,
    #[serde(default = "default_low_impressions")]
    pub low_impressions: u64,
    #[serde(default = "default_low_revenue")]
    pub low_revenue: f64,
    #[serde(default = "default_low_revenue_min_impressions")]
    pub low_revenue_min_impressions: u64,
    #[serde(default = "default_ab_ready_probability")]
    pub ab_ready_probability: f64,
    #[serde(default = "default_ending_within_days")]
    pub ending_within_days: i64,
    /// Alerts queued for delivery before new ones are dropped.
    #[serde(default = "default_notify_buffer")]
    pub notify_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlLoopConfig {
    #[serde(default = "default_control_loop_enabled")]
    pub enabled: bool,
    #[serde(default = "default_control_interval_secs")]
    pub interval_secs: u64,
    /// Deactivate losing creatives automatically once a test is significant.
    #[serde(default)]
    pub auto_conclude_tests: bool,
}

// Default functions
fn default_node_id() -> String {
    "optimizer-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_store_timeout_ms() -> u64 {
    250
}
fn default_window_minutes() -> i64 {
    24 * 60
}
fn default_max_window_minutes() -> i64 {
    366 * 24 * 60
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_stale_grace_multiplier() -> u32 {
    3
}
fn default_cache_max_entries() -> usize {
    100_000
}
fn default_confidence_level() -> f64 {
    1.96
}
fn default_epsilon() -> f64 {
    0.1
}
fn default_feature_key() -> String {
    "coin_balance".to_string()
}
fn default_feature_threshold() -> f64 {
    1000.0
}
fn default_feature_boost() -> f64 {
    1.1
}
fn default_simulations() -> usize {
    10_000
}
fn default_credible_z() -> f64 {
    1.96
}
fn default_significance_threshold() -> f64 {
    0.95
}
fn default_min_impressions() -> u64 {
    100
}
fn default_workers() -> usize {
    4
}
fn default_min_weight() -> u32 {
    5
}
fn default_total_weight() -> u32 {
    100
}
fn default_low_ctr_percent() -> f64 { 1.0 }
fn default_low_ctr_min_impressions() -> u64 { 100 }
fn default_low_impressions() -> u64 { 50 }
fn default_low_revenue() -> f64 { 100.0 }
fn default_low_revenue_min_impressions() -> u64 { 1000 }
fn default_ab_ready_probability() -> f64 { 0.80 }
fn default_ending_within_days() -> i64 { 3 }
fn default_notify_buffer() -> usize { 1024 }
fn default_control_loop_enabled() -> bool { true }
fn default_control_interval_secs() -> u64 { 900 }

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
            port: default_metrics_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            default_window_minutes: default_window_minutes(),
            max_window_minutes: default_max_window_minutes(),
            cache_ttl_secs: default_cache_ttl_secs(),
            stale_grace_multiplier: default_stale_grace_multiplier(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            default_algorithm: BanditAlgorithm::default(),
            confidence_level: default_confidence_level(),
            epsilon: default_epsilon(),
            feature_key: default_feature_key(),
            feature_threshold: default_feature_threshold(),
            feature_boost: default_feature_boost(),
        }
    }
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            simulations: default_simulations(),
            credible_z: default_credible_z(),
            significance_threshold: default_significance_threshold(),
            min_impressions: default_min_impressions(),
            workers: default_workers(),
        }
    }
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            min_weight: default_min_weight(),
            total_weight: default_total_weight(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            low_ctr_percent: default_low_ctr_percent(),
            low_ctr_min_impressions: default_low_ctr_min_impressions(),
            low_impressions: default_low_impressions(),
            low_revenue: default_low_revenue(),
            low_revenue_min_impressions: default_low_revenue_min_impressions(),
            ab_ready_probability: default_ab_ready_probability(),
            ending_within_days: default_ending_within_days(),
            notify_buffer: default_notify_buffer(),
        }
    }
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_loop_enabled(),
            interval_secs: default_control_interval_secs(),
            auto_conclude_tests: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            store: StoreConfig::default(),
            aggregator: AggregatorConfig::default(),
            bandit: BanditConfig::default(),
            bayesian: BayesianConfig::default(),
            rebalancer: RebalancerConfig::default(),
            alerts: AlertConfig::default(),
            control_loop: ControlLoopConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, overridden by
    /// environment variables.
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CREATIVE_OPTIMIZER")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
