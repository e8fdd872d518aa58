//! Request and response types for the connect and upload operations
//!
//! These are the JSON shapes exchanged with the presentation layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tag of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Success,
    Error,
}

/// Connect action: credentials for catalog discovery
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Backend identifier (`mysql`, `mssql` or `oracle`)
    pub backend: String,

    pub host: String,

    /// Port; the backend's default when absent
    #[serde(default)]
    pub port: Option<u16>,

    pub username: String,

    pub password: String,

    /// Oracle service name override
    #[serde(default)]
    pub service_name: Option<String>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectRequest")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("service_name", &self.service_name)
            .finish()
    }
}

/// Result of a connect action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    /// Selectable databases (schemas on Oracle); empty on failure
    pub databases: Vec<String>,

    pub status_text: String,

    pub status_kind: StatusKind,
}

/// Upload action: credentials, target database and the file itself
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub backend: String,

    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    pub username: String,

    pub password: String,

    /// Database (schema on Oracle) picked from the connect response
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub service_name: Option<String>,

    /// Name of the uploaded file; the table is named after it
    pub file_name: String,

    /// File bytes as base64, optionally wrapped in a data URL
    pub file_contents: String,
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("UploadRequest")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("service_name", &self.service_name)
            .field("file_name", &self.file_name)
            .field("file_contents_len", &self.file_contents.len())
            .finish()
    }
}

/// Result of an upload action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub status_text: String,

    pub status_kind: StatusKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_wire_names() {
        let request: ConnectRequest = serde_json::from_str(
            r#"{"backend":"oracle","host":"db","username":"u","password":"p","serviceName":"XE"}"#,
        )
        .unwrap();
        assert_eq!(request.port, None);
        assert_eq!(request.service_name.as_deref(), Some("XE"));
        assert!(!format!("{:?}", request).contains("\"p\""));
    }

    #[test]
    fn test_response_wire_names() {
        let response = UploadResponse {
            status_text: "done".to_string(),
            status_kind: StatusKind::Success,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"statusText": "done", "statusKind": "success"})
        );
    }
}
