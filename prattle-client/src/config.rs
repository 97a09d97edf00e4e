use std::{fs, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{profiles::SelectionFormat, session::ConnectorOptions};

pub const DEFAULT_CONTROL_ADDRESS: &str = "ws://127.0.0.1:42055";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 12_000;

/// Config files are a handful of fields; anything larger is rejected unread.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub control_address: String,
    /// Fixed session endpoint. Unset means "use the selected profile's server".
    pub session_address: Option<String>,
    pub connect_timeout_ms: u64,
    pub send_join: bool,
    pub selection_format: SelectionFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            control_address: DEFAULT_CONTROL_ADDRESS.to_owned(),
            session_address: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            send_join: true,
            selection_format: SelectionFormat::FullProfile,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connector_options(&self) -> ConnectorOptions {
        ConnectorOptions {
            session_address: self.session_address.clone(),
            send_join: self.send_join,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ws_url("controlAddress", &self.control_address)?;
        if let Some(session_address) = &self.session_address {
            validate_ws_url("sessionAddress", session_address)?;
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

fn validate_ws_url(field: &'static str, raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::InvalidAddress {
        field,
        value: raw.to_owned(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::InvalidAddress {
            field,
            value: raw.to_owned(),
            reason: format!("scheme must be ws or wss, got {}", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidAddress {
            field,
            value: raw.to_owned(),
            reason: "missing host".to_owned(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidAddress {
        field: &'static str,
        value: String,
        reason: String,
    },
    ZeroTimeout,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidAddress {
                field,
                value,
                reason,
            } => write!(f, "invalid {field} {value:?}: {reason}"),
            ConfigError::ZeroTimeout => write!(f, "connectTimeoutMs must be greater than 0"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum ConfigLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            ConfigLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            ConfigLoadError::Read(e) => write!(f, "read failed: {e}"),
            ConfigLoadError::Parse(e) => write!(f, "parse failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigLoadError::Metadata(e) => Some(e),
            ConfigLoadError::Read(e) => Some(e),
            ConfigLoadError::Parse(e) => Some(e),
            ConfigLoadError::TooLarge { .. } => None,
        }
    }
}

pub fn parse_config_json(data: &str) -> Result<ClientConfig, serde_json::Error> {
    serde_json::from_str::<ClientConfig>(data)
}

pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, ConfigLoadError> {
    let meta = fs::metadata(path).map_err(ConfigLoadError::Metadata)?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    parse_config_json(&data).map_err(ConfigLoadError::Parse)
}
