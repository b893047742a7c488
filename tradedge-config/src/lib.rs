//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tradedge_core::UntaggedTradePolicy;

mod deserializer;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub bulk: BulkFetchConfig,
    #[serde(default)]
    pub entitlements: EntitlementConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub trades: TradeDefaultsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub live: LiveRuntimeConfig,
}

/// REST endpoints of the research gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Base URL of the service exposing the user's transaction history.
    #[serde(default = "default_transactions_url")]
    pub transactions_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Offset applied to naive timestamps emitted by the gateway (minutes east of UTC).
    #[serde(default = "default_source_utc_offset_minutes")]
    pub source_utc_offset_minutes: i32,
}

/// Broadcast channel subscription settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Retry policy of the initial REST pull.
#[derive(Debug, Deserialize, Clone)]
pub struct BulkFetchConfig {
    #[serde(default = "default_bulk_attempts")]
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * retry_delay_ms` before retrying.
    #[serde(default = "default_bulk_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EntitlementConfig {
    #[serde(default = "default_entitlement_refresh_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub untagged_policy: UntaggedTradePolicy,
}

/// Outbound templated-message provider.
#[derive(Debug, Deserialize, Clone)]
pub struct MessagingConfig {
    #[serde(default = "default_messaging_url")]
    pub url: String,
    #[serde(default, with = "deserializer::empty_as_none")]
    pub api_key: Option<String>,
    #[serde(default, with = "deserializer::empty_as_none")]
    pub template_id: Option<String>,
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationConfig {
    #[serde(default, with = "deserializer::empty_as_none")]
    pub webhook_url: Option<String>,
}

/// Credentials of the signed-in user, normally injected through the environment.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default, with = "deserializer::empty_as_none")]
    pub phone_number: Option<String>,
}

/// Values substituted for fields a trade payload omits.
#[derive(Debug, Deserialize, Clone)]
pub struct TradeDefaultsConfig {
    /// Helpline attached to alerts without their own. An empty value disables it.
    #[serde(
        default = "default_support_number",
        with = "deserializer::empty_as_none"
    )]
    pub support_number: Option<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

/// Last-known trades and entitlements kept on disk for restarts without network.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiveRuntimeConfig {
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_live_log_path")]
    pub log_path: PathBuf,
    /// Offset used to decide which trades belong to "Today". Defaults to the host offset.
    #[serde(default)]
    pub display_utc_offset_minutes: Option<i32>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            transactions_url: default_transactions_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            source_utc_offset_minutes: default_source_utc_offset_minutes(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            app_key: String::new(),
            channel_name: default_channel_name(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for BulkFetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_bulk_attempts(),
            retry_delay_ms: default_bulk_retry_delay_ms(),
        }
    }
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_entitlement_refresh_secs(),
            untagged_policy: UntaggedTradePolicy::default(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            url: default_messaging_url(),
            api_key: None,
            template_id: None,
            country_code: default_country_code(),
        }
    }
}

impl Default for TradeDefaultsConfig {
    fn default() -> Self {
        Self {
            support_number: default_support_number(),
            timeframe: default_timeframe(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for LiveRuntimeConfig {
    fn default() -> Self {
        Self {
            metrics_addr: default_metrics_addr(),
            log_path: default_live_log_path(),
            display_utc_offset_minutes: None,
        }
    }
}

impl MessagingConfig {
    /// Messaging is only attempted when both the key and the template are configured.
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some() && self.template_id.is_some()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rest_url() -> String {
    "https://gateway.twmresearchalert.com".into()
}

fn default_transactions_url() -> String {
    "https://tradedge-server.onrender.com".into()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_source_utc_offset_minutes() -> i32 {
    330 // IST
}

fn default_ws_url() -> String {
    "wss://ws-ap2.pusher.com".into()
}

fn default_channel_name() -> String {
    "trades".into()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    1_024
}

fn default_bulk_attempts() -> u32 {
    3
}

fn default_bulk_retry_delay_ms() -> u64 {
    1_000
}

fn default_entitlement_refresh_secs() -> u64 {
    300
}

fn default_messaging_url() -> String {
    "https://app2.cunnekt.com/v1/sendnotification".into()
}

fn default_country_code() -> String {
    "91".into()
}

fn default_support_number() -> Option<String> {
    Some("9876543210".into())
}

fn default_timeframe() -> String {
    "1 Week".into()
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9100".into()
}

fn default_live_log_path() -> PathBuf {
    PathBuf::from("./logs/alerts.json")
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `TRADEDGE__`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    load_config_from(Path::new("config"), env)
}

/// Same as [`load_config`] but rooted at an arbitrary directory.
pub fn load_config_from(base_path: &Path, env: Option<&str>) -> Result<AppConfig> {
    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("TRADEDGE")
            .prefix_separator("__")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "log_level = \"debug\"\n").unwrap();
        let config = load_config_from(dir.path(), None).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.bulk.max_attempts, 3);
        assert_eq!(config.bulk.retry_delay_ms, 1_000);
        assert_eq!(config.entitlements.refresh_interval_secs, 300);
        assert_eq!(
            config.entitlements.untagged_policy,
            UntaggedTradePolicy::AnyActivePackage
        );
        assert_eq!(config.gateway.request_timeout_secs, 10);
        assert!(!config.messaging.is_enabled());
        assert_eq!(config.trades.support_number.as_deref(), Some("9876543210"));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 86_400);
    }

    #[test]
    fn environment_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[channel]\nchannel_name = \"trades\"\nmax_reconnect_attempts = 5\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "[channel]\nchannel_name = \"trades-staging\"\n\n[entitlements]\nuntagged_policy = \"deny\"\n",
        )
        .unwrap();
        let config = load_config_from(dir.path(), Some("staging")).unwrap();
        assert_eq!(config.channel.channel_name, "trades-staging");
        assert_eq!(config.channel.max_reconnect_attempts, 5);
        assert_eq!(config.entitlements.untagged_policy, UntaggedTradePolicy::Deny);
    }

    #[test]
    fn blank_secrets_are_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[messaging]\napi_key = \"  \"\ntemplate_id = \"tpl-1\"\n\n[notifications]\nwebhook_url = \"\"\n\n[trades]\nsupport_number = \"\"\n",
        )
        .unwrap();
        let config = load_config_from(dir.path(), None).unwrap();
        assert_eq!(config.messaging.api_key, None);
        assert_eq!(config.messaging.template_id.as_deref(), Some("tpl-1"));
        assert_eq!(config.notifications.webhook_url, None);
        assert_eq!(config.trades.support_number, None);
    }

    #[test]
    fn missing_default_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from(dir.path(), None).is_err());
    }
}
