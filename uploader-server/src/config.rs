//! Server configuration read from environment variables

use axum_sql_uploader::UploaderConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8050;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}={value:?} is not valid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the server needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub uploader: UploaderConfig,
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value
    ///
    /// Unset or blank variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (name, value))
        };

        let mut uploader = UploaderConfig::default();

        if let Some(value) = read("UPLOADER_MAX_UPLOAD_MB") {
            let megabytes: usize = parse(value)?;
            uploader.max_upload_bytes = megabytes.saturating_mul(1024 * 1024);
        }
        if let Some(value) = read("UPLOADER_CONNECT_TIMEOUT_SECS") {
            uploader.connect_timeout = Duration::from_secs(parse(value)?);
        }
        if let Some(value) = read("UPLOADER_QUERY_TIMEOUT_SECS") {
            uploader.query_timeout = Duration::from_secs(parse(value)?);
        }
        if let Some(value) = read("UPLOADER_INGEST_TIMEOUT_SECS") {
            uploader.ingest_timeout = Duration::from_secs(parse(value)?);
        }
        if let Some(value) = read("UPLOADER_INSERT_BATCH_ROWS") {
            let rows: NonZeroUsize = parse(value)?;
            uploader.insert_batch_rows = rows.get();
        }
        if let Some((_, service)) = read("UPLOADER_ORACLE_SERVICE") {
            uploader.oracle_service_name = service;
        }

        Ok(Self {
            bind_address: match read("BIND_ADDRESS") {
                Some(value) => parse(value)?,
                None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            },
            port: match read("PORT") {
                Some(value) => parse(value)?,
                None => DEFAULT_PORT,
            },
            uploader,
        })
    }

    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

fn parse<T>((name, value): (&'static str, String)) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|error: T::Err| ConfigError::Invalid {
        name,
        reason: error.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let variables: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| variables.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.socket_address().to_string(), "0.0.0.0:8050");
        assert_eq!(config.uploader.oracle_service_name, "orcl");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("BIND_ADDRESS", "127.0.0.1"),
            ("UPLOADER_MAX_UPLOAD_MB", "2"),
            ("UPLOADER_CONNECT_TIMEOUT_SECS", "3"),
            ("UPLOADER_QUERY_TIMEOUT_SECS", "4"),
            ("UPLOADER_INGEST_TIMEOUT_SECS", "600"),
            ("UPLOADER_INSERT_BATCH_ROWS", "250"),
            ("UPLOADER_ORACLE_SERVICE", "XEPDB1"),
        ])
        .unwrap();

        assert_eq!(config.socket_address().to_string(), "127.0.0.1:9000");
        assert_eq!(config.uploader.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(config.uploader.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.uploader.query_timeout, Duration::from_secs(4));
        assert_eq!(config.uploader.ingest_timeout, Duration::from_secs(600));
        assert_eq!(config.uploader.insert_batch_rows, 250);
        assert_eq!(config.uploader.oracle_service_name, "XEPDB1");
    }

    #[test]
    fn test_invalid_value_names_variable() {
        let error = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(error.to_string().starts_with("PORT=\"eighty\""));
    }

    #[test]
    fn test_zero_batch_rows_is_rejected() {
        let error = config_from(&[("UPLOADER_INSERT_BATCH_ROWS", "0")]).unwrap_err();
        assert!(error
            .to_string()
            .starts_with("UPLOADER_INSERT_BATCH_ROWS=\"0\""));
    }
}
