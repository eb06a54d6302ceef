use std::path::Path;

use ini::Ini;
use serde::Serialize;

use crate::error::NodeError;
use crate::utils::constants::{
    CONNECTION_RETRY_UPON_FAILURE_MILLIS, MAX_CONNECTION_RETRIES, REQUEST_TIMEOUT_MILLIS,
};

/// Tunables for outbound peer traffic, read from the `[network]` section of
/// an optional ini file. Missing file or keys fall back to the defaults.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub request_timeout_millis: u64,
    pub connection_retry_millis: u64,
    pub max_connection_retries: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            request_timeout_millis: REQUEST_TIMEOUT_MILLIS,
            connection_retry_millis: CONNECTION_RETRY_UPON_FAILURE_MILLIS,
            max_connection_retries: MAX_CONNECTION_RETRIES,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Config, NodeError> {
        let ini = Ini::load_from_file(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Config::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Config, NodeError> {
        let mut config = Config::default();
        if let Some(section) = ini.section(Some("network")) {
            if let Some(raw) = section.get("request_timeout_millis") {
                config.request_timeout_millis = parse_number("request_timeout_millis", raw)?;
            }
            if let Some(raw) = section.get("connection_retry_millis") {
                config.connection_retry_millis = parse_number("connection_retry_millis", raw)?;
            }
            if let Some(raw) = section.get("max_connection_retries") {
                config.max_connection_retries = parse_number("max_connection_retries", raw)?;
            }
        }
        Ok(config)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, NodeError> {
    raw.parse()
        .map_err(|_| NodeError::Config(format!("invalid {}: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ini_overrides_the_defaults() {
        let ini = Ini::load_from_str(
            "[network]\nrequest_timeout_millis = 500\nmax_connection_retries = 2\n",
        )
        .unwrap();
        let config = Config::from_ini(&ini).unwrap();
        assert_eq!(config.request_timeout_millis, 500);
        assert_eq!(config.max_connection_retries, 2);
        assert_eq!(
            config.connection_retry_millis,
            CONNECTION_RETRY_UPON_FAILURE_MILLIS
        );
    }

    #[test]
    fn garbage_values_are_rejected() {
        let ini = Ini::load_from_str("[network]\nrequest_timeout_millis = soon\n").unwrap();
        assert!(Config::from_ini(&ini).is_err());
    }
}
