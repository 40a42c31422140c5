//! Configuration management for feed-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Hard cap on messages per marketplace feed document
pub const MARKETPLACE_MAX_BATCH: usize = 9990;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Per-store configuration keyed by store id
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,

    /// Marketplace feed API configuration
    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    /// Outbound HTTP configuration shared by providers
    #[serde(default)]
    pub http: HttpConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Failure snapshot configuration
    #[serde(default)]
    pub failure_log: FailureLogConfig,

    /// Daemon scheduling configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix FEED_SYNC_
    ///
    /// Stores cannot be declared this way; the result only carries the
    /// shared sections.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("FEED_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(dir) = std::env::var("FEED_SYNC_FAILURE_LOG_DIR") {
            config.failure_log.dir = dir;
        }
        if let Ok(level) = std::env::var("FEED_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("FEED_SYNC_LOG_FORMAT") {
            config.logging.format = format;
        }

        if let Ok(endpoint) = std::env::var("FEED_SYNC_MARKETPLACE_ENDPOINT") {
            config.marketplace.endpoint = endpoint;
        }
        if let Ok(client_id) = std::env::var("FEED_SYNC_MARKETPLACE_CLIENT_ID") {
            config.marketplace.client_id = client_id;
        }
        if let Ok(secret) = std::env::var("FEED_SYNC_MARKETPLACE_CLIENT_SECRET") {
            config.marketplace.client_secret = secret;
        }
        if let Ok(token) = std::env::var("FEED_SYNC_MARKETPLACE_REFRESH_TOKEN") {
            config.marketplace.refresh_token = token;
        }
        if let Ok(seller_id) = std::env::var("FEED_SYNC_MARKETPLACE_SELLER_ID") {
            config.marketplace.seller_id = seller_id;
        }
        if let Ok(marketplace_id) = std::env::var("FEED_SYNC_MARKETPLACE_ID") {
            config.marketplace.marketplace_id = marketplace_id;
        }
        if let Ok(interval) = std::env::var("FEED_SYNC_MARKETPLACE_POLL_INTERVAL_SECS") {
            config.marketplace.poll_interval_secs = interval
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid poll interval".to_string()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut flag_owners: HashMap<i64, &str> = HashMap::new();

        for (id, store) in &self.stores {
            if store.requests_per_second == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "stores.{}.requests_per_second must be greater than zero",
                    id
                )));
            }
            if store.max_concurrent == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "stores.{}.max_concurrent must be greater than zero",
                    id
                )));
            }
            if store.update_flag_value == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "stores.{}.update_flag_value must not be 0 (reserved for clean rows)",
                    id
                )));
            }
            if let Some(other) = flag_owners.insert(store.update_flag_value, id) {
                return Err(ConfigError::InvalidValue(format!(
                    "update_flag_value {} is shared by stores {} and {}",
                    store.update_flag_value, other, id
                )));
            }
        }

        if self.marketplace.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "marketplace.poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Look up a store by id
    pub fn store(&self, id: &str) -> Option<&StoreConfig> {
        self.stores.get(id)
    }
}

/// How the supplier delivery window midpoint is turned into whole days
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LeadTimeRounding {
    /// Round up
    #[default]
    Ceil,
    /// Round down
    Floor,
}

/// Per-store sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Provider id; defaults to the store id
    #[serde(default)]
    pub provider: Option<String>,

    /// Whether the daemon schedules this store
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Supplier API base URL override
    #[serde(default)]
    pub base_url: Option<String>,

    /// Raw stock must strictly exceed this to count as in stock
    #[serde(default = "default_stock_level_threshold")]
    pub stock_level_threshold: i64,

    /// Quantity published for in-stock products
    #[serde(default = "default_stock_level")]
    pub stock_level: i64,

    /// Products per feed document; capped at [`MARKETPLACE_MAX_BATCH`]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Supplier request starts per rolling second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Supplier requests in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Marketplace-side handling days
    #[serde(default = "default_omd_handling_days")]
    pub omd_handling_days: i64,

    /// Supplier lead days used when no delivery window is given
    #[serde(default = "default_provider_handling_days")]
    pub provider_handling_days: i64,

    /// Value written to `updated_flag` by this store
    #[serde(default = "default_update_flag_value")]
    pub update_flag_value: i64,

    /// Zero out failed SKUs instead of keeping their previous quantity.
    /// Unset means the provider's own default applies.
    #[serde(default)]
    pub skip_problematic: Option<bool>,

    /// Only publish SKUs starting with this prefix
    #[serde(default)]
    pub sku_prefix: Option<String>,

    /// SKUs never published; their rows stay flagged
    #[serde(default)]
    pub skip_skus: BTreeSet<String>,

    /// Daemon interval in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Rounding for the delivery window midpoint
    #[serde(default)]
    pub lead_time_rounding: LeadTimeRounding,

    /// Abort phase 1 once this many writes failed with no success
    #[serde(default = "default_persistence_abort_threshold")]
    pub persistence_abort_threshold: usize,

    /// Retry configuration for supplier calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Provider-specific options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: None,
            enabled: default_enabled(),
            base_url: None,
            stock_level_threshold: default_stock_level_threshold(),
            stock_level: default_stock_level(),
            batch_size: default_batch_size(),
            requests_per_second: default_requests_per_second(),
            max_concurrent: default_max_concurrent(),
            omd_handling_days: default_omd_handling_days(),
            provider_handling_days: default_provider_handling_days(),
            update_flag_value: default_update_flag_value(),
            skip_problematic: None,
            sku_prefix: None,
            skip_skus: BTreeSet::new(),
            sync_interval_secs: default_sync_interval(),
            lead_time_rounding: LeadTimeRounding::default(),
            persistence_abort_threshold: default_persistence_abort_threshold(),
            retry: RetryConfig::default(),
            options: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Provider id for a store, falling back to the store id itself
    pub fn provider_id<'a>(&'a self, store_id: &'a str) -> &'a str {
        self.provider.as_deref().unwrap_or(store_id)
    }

    /// Batch size after applying the marketplace hard cap
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MARKETPLACE_MAX_BATCH)
    }

    /// Rate used by the recheck pass
    pub fn recheck_requests_per_second(&self) -> u32 {
        self.requests_per_second.min(3)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_stock_level_threshold() -> i64 {
    3
}

fn default_stock_level() -> i64 {
    20
}

fn default_batch_size() -> usize {
    MARKETPLACE_MAX_BATCH
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_max_concurrent() -> usize {
    5
}

fn default_omd_handling_days() -> i64 {
    1
}

fn default_provider_handling_days() -> i64 {
    3
}

fn default_update_flag_value() -> i64 {
    1
}

fn default_sync_interval() -> u64 {
    86400 // 24 hours
}

fn default_persistence_abort_threshold() -> usize {
    10
}

/// Retry configuration for external API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to apply full jitter to backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("feed-sync/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Marketplace feed API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceConfig {
    /// Feed API base URL
    #[serde(default = "default_marketplace_endpoint")]
    pub endpoint: String,

    /// OAuth token endpoint
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,

    /// OAuth client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Long-lived refresh token
    #[serde(default)]
    pub refresh_token: String,

    /// Seller account id placed in the feed header
    #[serde(default)]
    pub seller_id: String,

    /// Target marketplace id
    #[serde(default = "default_marketplace_id")]
    pub marketplace_id: String,

    /// Feed type submitted
    #[serde(default = "default_feed_type")]
    pub feed_type: String,

    /// Fulfillment channel code on every message
    #[serde(default = "default_fulfillment_channel")]
    pub fulfillment_channel: String,

    /// Seconds between status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wall-clock budget for one feed to reach a terminal state
    #[serde(default = "default_max_poll_duration")]
    pub max_poll_duration_secs: u64,

    /// Whether to publish price alongside availability
    #[serde(default = "default_publish_price")]
    pub publish_price: bool,

    /// Currency for published prices
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Directory receiving a copy of every submitted feed
    #[serde(default)]
    pub feeds_dir: Option<String>,

    /// Retry configuration for marketplace calls
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_marketplace_endpoint(),
            token_endpoint: default_token_endpoint(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            seller_id: String::new(),
            marketplace_id: default_marketplace_id(),
            feed_type: default_feed_type(),
            fulfillment_channel: default_fulfillment_channel(),
            poll_interval_secs: default_poll_interval(),
            max_poll_duration_secs: default_max_poll_duration(),
            publish_price: default_publish_price(),
            currency: default_currency(),
            feeds_dir: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_marketplace_endpoint() -> String {
    "https://sellingpartnerapi-na.amazon.com".to_string()
}

fn default_token_endpoint() -> String {
    "https://api.amazon.com/auth/o2/token".to_string()
}

fn default_marketplace_id() -> String {
    "ATVPDKIKX0DER".to_string()
}

fn default_feed_type() -> String {
    "JSON_LISTINGS_FEED".to_string()
}

fn default_fulfillment_channel() -> String {
    "DEFAULT".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_poll_duration() -> u64 {
    600 // 20 polls at the default interval
}

fn default_publish_price() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "data/feed-sync.db".to_string()
}

/// Failure snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureLogConfig {
    /// Directory holding one CSV snapshot per run
    #[serde(default = "default_failure_log_dir")]
    pub dir: String,
}

impl Default for FailureLogConfig {
    fn default() -> Self {
        Self {
            dir: default_failure_log_dir(),
        }
    }
}

fn default_failure_log_dir() -> String {
    "data/failures".to_string()
}

/// Configuration for the sync scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Initial delay before first sync (seconds) - for startup load distribution
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Jitter range (seconds) - randomization added to sync intervals
    #[serde(default = "default_scheduler_jitter")]
    pub jitter_secs: u64,

    /// Sync operation timeout (seconds)
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            jitter_secs: default_scheduler_jitter(),
            sync_timeout_secs: default_sync_timeout(),
        }
    }
}

fn default_initial_delay() -> u64 {
    5
}

fn default_scheduler_jitter() -> u64 {
    60
}

fn default_sync_timeout() -> u64 {
    6 * 3600
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax; unknown variables are left untouched.
fn expand_env_vars(input: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
