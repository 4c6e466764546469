//! Manager configuration.
//!
//! Every field is optional; an empty JSON object is a valid configuration.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Relative request URLs are joined onto this.
    pub base_url: Option<String>,
    /// Seed for the all-hosts header map.
    pub headers: HashMap<String, String>,
    /// Seed for the per-host header maps, keyed by host.
    pub host_headers: HashMap<String, HashMap<String, String>>,
}

impl ManagerConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(ManagerConfig::from_json("{}").unwrap(), ManagerConfig::default());
    }

    #[test]
    fn parses_headers_and_host_headers() {
        let config = ManagerConfig::from_json(
            r#"{
                "base_url": "https://api.example.com/v1/",
                "headers": {"Accept": "application/json"},
                "host_headers": {"api.example.com": {"X-Api-Key": "k"}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com/v1/"));
        assert_eq!(config.headers["Accept"], "application/json");
        assert_eq!(config.host_headers["api.example.com"]["X-Api-Key"], "k");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = ManagerConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ManagerConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
