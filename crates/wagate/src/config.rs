use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub whatsapp: ConnectorConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// ConnectorConfig
// ============================================================================

/// Raw configuration bag for one connector.
///
/// Holds the fields of both transports; [`crate::select_transport`] resolves
/// it into exactly one of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorConfig {
    /// Explicit transport override: `device-linked` or `business-api`.
    #[serde(default)]
    pub method: Option<String>,

    // Device-linked
    #[serde(default, alias = "auth_dir")]
    pub session_directory: Option<PathBuf>,
    #[serde(default)]
    pub print_pairing_in_terminal: Option<bool>,
    #[serde(default)]
    pub bridge_url: Option<String>,

    // Business API
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default)]
    pub webhook_verify_token: Option<String>,
    #[serde(default)]
    pub business_account_id: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl ConnectorConfig {
    /// Overlay `WHATSAPP_*` environment variables on top of file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`. Blank values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WHATSAPP_CONNECTION_METHOD") {
            self.method = Some(v);
        }
        if let Some(v) = get("WHATSAPP_AUTH_DIR") {
            self.session_directory = Some(PathBuf::from(v));
        }
        if let Some(v) = get("WHATSAPP_BRIDGE_URL") {
            self.bridge_url = Some(v);
        }
        if let Some(v) = get("WHATSAPP_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = get("WHATSAPP_PHONE_NUMBER_ID") {
            self.phone_number_id = Some(v);
        }
        if let Some(v) = get("WHATSAPP_WEBHOOK_TOKEN") {
            self.webhook_verify_token = Some(v);
        }
        if let Some(v) = get("WHATSAPP_BUSINESS_ID") {
            self.business_account_id = Some(v);
        }
        if let Some(v) = get("WHATSAPP_API_VERSION") {
            self.api_version = Some(v);
        }
        self
    }
}

// ============================================================================
// ReconnectConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_pairing_timeout_base_ms")]
    pub pairing_timeout_base_ms: u64,
    #[serde(default = "default_transient_base_ms")]
    pub transient_base_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            pairing_timeout_base_ms: default_pairing_timeout_base_ms(),
            transient_base_ms: default_transient_base_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn pairing_timeout_base(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_base_ms)
    }

    pub fn transient_base(&self) -> Duration {
        Duration::from_millis(self.transient_base_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_pairing_timeout_base_ms() -> u64 {
    1_000
}

fn default_transient_base_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("unknown connection method '{0}' (expected 'device-linked' or 'business-api')")]
    UnknownMethod(String),

    #[error(
        "no transport configured: set `session_directory` for device-linked, \
         or both `access_token` and `phone_number_id` for business-api"
    )]
    NoTransport,

    #[error("missing required field `{field}` for the {transport} transport")]
    MissingField {
        transport: &'static str,
        field: &'static str,
    },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

// ============================================================================
// Tests
// ============================================================================
