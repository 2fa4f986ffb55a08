use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Rolling quota window length upstream accounts against.
pub const FIVE_HOUR_WINDOW_SECS: i64 = 18_000;

/// Top-level config (ccrelay.toml + CCRELAY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub conversations: ConversationConfig,
    #[serde(default)]
    pub txlog: TxLogConfig,
    /// Path to the externally managed credentials JSON file.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            breaker: BreakerConfig::default(),
            upstream: UpstreamConfig::default(),
            conversations: ConversationConfig::default(),
            txlog: TxLogConfig::default(),
            credentials_path: default_credentials_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Circuit breaker tuning. All cooldowns are wall-clock durations; the
/// quota-exhausted case prefers the upstream `resets_at` instant when known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Consecutive generic failures before a credential trips.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_generic_cooldown_secs")]
    pub generic_cooldown_secs: u64,
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// Usage snapshots older than this are refreshed before selection.
    #[serde(default = "default_usage_staleness_secs")]
    pub usage_staleness_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            generic_cooldown_secs: default_generic_cooldown_secs(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            usage_staleness_secs: default_usage_staleness_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn generic_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.generic_cooldown_secs as i64)
    }

    pub fn rate_limit_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rate_limit_cooldown_secs as i64)
    }

    pub fn usage_staleness(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.usage_staleness_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Timeout for control-plane calls (usage, conversation create/list).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for the completion stream.
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversationConfig {
    /// When false, conversations are created as temporary so individual
    /// messages never show up in the upstream account's history.
    #[serde(default)]
    pub individual_messages_visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TxLogConfig {
    /// When true, every transaction is dumped to numbered files under the
    /// per-run conversations-logs directory.
    #[serde(default)]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_generic_cooldown_secs() -> u64 {
    300
}
fn default_rate_limit_cooldown_secs() -> u64 {
    600
}
fn default_usage_staleness_secs() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_stream_timeout_secs() -> u64 {
    300
}
fn default_credentials_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ccrelay/credentials.json", home)
}

impl RelayConfig {
    /// Load config from a TOML file with CCRELAY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument (--settings)
    ///   2. CCRELAY_CONFIG env var
    ///   3. ~/.ccrelay/ccrelay.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CCRELAY_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CCRELAY_").split("_"))
            .extract()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ccrelay/ccrelay.toml", home)
}
