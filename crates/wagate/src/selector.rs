//! Transport selection.
//!
//! Resolves the raw [`ConnectorConfig`] bag into exactly one concrete
//! transport configuration. First match wins:
//!
//! 1. explicit `method` (must be `device-linked` or `business-api`)
//! 2. `session_directory` present → device-linked
//! 3. `access_token` and `phone_number_id` present → business-api
//! 4. otherwise a configuration error

use std::path::PathBuf;

use url::Url;
use wagate_protocol::TransportKind;

use crate::config::{ConfigError, ConnectorConfig, ReconnectConfig};

/// Default address of the device protocol bridge.
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:3001";
/// Default Business API host.
pub const DEFAULT_API_BASE_URL: &str = "https://graph.facebook.com";
/// Default Business API version.
pub const DEFAULT_API_VERSION: &str = "v17.0";

/// Resolved configuration for exactly one transport.
#[derive(Debug, Clone)]
pub enum TransportSettings {
    DeviceLinked(DeviceLinkedSettings),
    BusinessApi(BusinessApiSettings),
}

impl TransportSettings {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSettings::DeviceLinked(_) => TransportKind::DeviceLinked,
            TransportSettings::BusinessApi(_) => TransportKind::BusinessApi,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceLinkedSettings {
    pub session_directory: PathBuf,
    pub print_pairing_in_terminal: bool,
    pub bridge_url: Url,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone)]
pub struct BusinessApiSettings {
    pub access_token: String,
    pub phone_number_id: String,
    pub webhook_verify_token: Option<String>,
    pub business_account_id: Option<String>,
    pub api_version: String,
    pub api_base_url: String,
}

impl BusinessApiSettings {
    /// Base URL including the API version, e.g. `https://graph.facebook.com/v17.0`.
    pub fn versioned_base_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// Choose the transport for `config`. Pure; no I/O.
pub fn select_transport(config: &ConnectorConfig) -> Result<TransportSettings, ConfigError> {
    let kind = if let Some(method) = present(&config.method) {
        method
            .parse::<TransportKind>()
            .map_err(ConfigError::UnknownMethod)?
    } else if config
        .session_directory
        .as_ref()
        .is_some_and(|p| !p.as_os_str().is_empty())
    {
        TransportKind::DeviceLinked
    } else if present(&config.access_token).is_some() && present(&config.phone_number_id).is_some()
    {
        TransportKind::BusinessApi
    } else {
        return Err(ConfigError::NoTransport);
    };

    match kind {
        TransportKind::DeviceLinked => device_linked(config).map(TransportSettings::DeviceLinked),
        TransportKind::BusinessApi => business_api(config).map(TransportSettings::BusinessApi),
    }
}

fn device_linked(config: &ConnectorConfig) -> Result<DeviceLinkedSettings, ConfigError> {
    let session_directory = config
        .session_directory
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(ConfigError::MissingField {
            transport: TransportKind::DeviceLinked.as_str(),
            field: "session_directory",
        })?;

    let raw_url = present(&config.bridge_url).unwrap_or(DEFAULT_BRIDGE_URL);
    let bridge_url = Url::parse(raw_url).map_err(|e| ConfigError::InvalidField {
        field: "bridge_url",
        reason: e.to_string(),
    })?;
    if !matches!(bridge_url.scheme(), "ws" | "wss") {
        return Err(ConfigError::InvalidField {
            field: "bridge_url",
            reason: format!("expected a ws:// or wss:// URL, got '{}'", raw_url),
        });
    }

    Ok(DeviceLinkedSettings {
        session_directory,
        print_pairing_in_terminal: config.print_pairing_in_terminal.unwrap_or(false),
        bridge_url,
        reconnect: config.reconnect.clone(),
    })
}

fn business_api(config: &ConnectorConfig) -> Result<BusinessApiSettings, ConfigError> {
    let missing = |field| ConfigError::MissingField {
        transport: TransportKind::BusinessApi.as_str(),
        field,
    };
    let access_token = present(&config.access_token).ok_or_else(|| missing("access_token"))?;
    let phone_number_id =
        present(&config.phone_number_id).ok_or_else(|| missing("phone_number_id"))?;

    if !phone_number_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidField {
            field: "phone_number_id",
            reason: format!("'{}' is not numeric", phone_number_id),
        });
    }

    Ok(BusinessApiSettings {
        access_token: access_token.to_string(),
        phone_number_id: phone_number_id.to_string(),
        webhook_verify_token: present(&config.webhook_verify_token).map(str::to_string),
        business_account_id: present(&config.business_account_id).map(str::to_string),
        api_version: present(&config.api_version)
            .unwrap_or(DEFAULT_API_VERSION)
            .to_string(),
        api_base_url: present(&config.api_base_url)
            .unwrap_or(DEFAULT_API_BASE_URL)
            .to_string(),
    })
}

/// Trimmed value, `None` when absent or blank.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
