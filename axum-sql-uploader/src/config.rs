//! Runtime configuration for connect and upload operations

use crate::descriptor::DEFAULT_ORACLE_SERVICE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and defaults applied to every operation
///
/// Missing fields fall back to [`UploaderConfig::default`] when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Upper bound on opening a connection
    pub connect_timeout: Duration,

    /// Upper bound on catalog discovery
    pub query_timeout: Duration,

    /// Upper bound on loading a replacement table
    ///
    /// Providers enforce it themselves so they can clean up the partial
    /// load before reporting the timeout.
    pub ingest_timeout: Duration,

    /// Largest decoded upload accepted, in bytes
    pub max_upload_bytes: usize,

    /// Rows per `INSERT` statement (or per array bind on Oracle)
    pub insert_batch_rows: usize,

    /// Oracle service used when the request does not name one
    pub oracle_service_name: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            ingest_timeout: Duration::from_secs(300),
            max_upload_bytes: 64 * 1024 * 1024,
            insert_batch_rows: 500,
            oracle_service_name: DEFAULT_ORACLE_SERVICE.to_string(),
        }
    }
}

impl UploaderConfig {
    /// Request body limit for the upload endpoint
    ///
    /// Base64 inflates the file by 4/3; the rest is headroom for the JSON
    /// envelope and a data URL prefix.
    pub fn max_request_bytes(&self) -> usize {
        self.max_upload_bytes
            .saturating_mul(4)
            .div_ceil(3)
            .saturating_add(64 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UploaderConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.insert_batch_rows, 500);
        assert_eq!(config.oracle_service_name, "orcl");
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: UploaderConfig =
            serde_json::from_str(r#"{"insert_batch_rows": 50}"#).unwrap();
        assert_eq!(config.insert_batch_rows, 50);
        assert_eq!(config.max_upload_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_request_limit_covers_base64() {
        let config = UploaderConfig {
            max_upload_bytes: 3,
            ..UploaderConfig::default()
        };
        assert_eq!(config.max_request_bytes(), 4 + 64 * 1024);
    }
}
