//! UploaderLayer - Main Axum integration layer
//!
//! This module provides the main entry point for integrating axum-sql-uploader
//! into an Axum application.

use crate::api::create_api_router;
use crate::config::UploaderConfig;
use crate::orchestrator::{Connector, DriverConnector, Orchestrator};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Main layer for integrating the CSV uploader into an Axum application
///
/// # Example
///
/// ```rust,no_run
/// use axum::Router;
/// use axum_sql_uploader::UploaderLayer;
///
/// let uploader = UploaderLayer::new("/uploader");
/// let app: Router = Router::new().merge(uploader.into_router());
/// ```
pub struct UploaderLayer {
    base_path: String,
    config: UploaderConfig,
    connector: Arc<dyn Connector>,
}

impl UploaderLayer {
    /// Create a new uploader at the given base path
    ///
    /// # Arguments
    ///
    /// * `base_path` - The URL path where the endpoints will be mounted (e.g., "/uploader")
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            config: UploaderConfig::default(),
            connector: Arc::new(DriverConnector),
        }
    }

    /// Replace the default limits and timeouts
    pub fn with_config(mut self, config: UploaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Open connections through `connector` instead of the built-in drivers
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Convert into an Axum Router that can be merged
    ///
    /// The returned router includes:
    /// - `POST {base_path}/api/connect`
    /// - `POST {base_path}/api/upload`
    /// - A request body limit sized for base64 uploads of `max_upload_bytes`
    /// - Permissive CORS middleware for local tooling
    pub fn into_router(self) -> Router {
        let body_limit = self.config.max_request_bytes();
        let orchestrator = Arc::new(Orchestrator::with_connector(self.config, self.connector));
        let base_path = self.base_path.trim_end_matches('/');

        Router::new()
            .nest(&format!("{}/api", base_path), create_api_router(orchestrator))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(CorsLayer::permissive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn post(router: Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_connect_reports_unknown_backend() {
        let router = UploaderLayer::new("/uploader").into_router();
        let (status, body) = post(
            router,
            "/uploader/api/connect",
            json!({"backend": "db2", "host": "h", "username": "u", "password": "p"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["statusKind"], "error");
        assert_eq!(body["statusText"], "Invalid DB type: db2");
        assert_eq!(body["databases"], json!([]));
    }

    #[tokio::test]
    async fn test_connect_reports_missing_details() {
        let router = UploaderLayer::new("/uploader").into_router();
        let (status, body) = post(
            router,
            "/uploader/api/connect",
            json!({"backend": "mysql", "host": "", "username": "u", "password": "p"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["statusKind"], "error");
        assert_eq!(body["statusText"], "Missing connection details: missing host");
    }

    #[tokio::test]
    async fn test_upload_rejects_malformed_csv_before_connecting() {
        let router = UploaderLayer::new("/uploader/").into_router();
        let (status, body) = post(
            router,
            "/uploader/api/upload",
            json!({
                "backend": "mysql",
                "host": "unreachable.invalid",
                "username": "u",
                "password": "p",
                "database": "sales",
                "fileName": "orders.csv",
                // "id,amount\n1,2,3\n"
                "fileContents": "data:text/csv;base64,aWQsYW1vdW50CjEsMiwzCg=="
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["statusKind"], "error");
        assert!(body["statusText"]
            .as_str()
            .unwrap()
            .starts_with("Upload failed: Parse error"));
    }

    #[tokio::test]
    async fn test_upload_rejects_invalid_base64() {
        let router = UploaderLayer::new("/uploader").into_router();
        let (_, body) = post(
            router,
            "/uploader/api/upload",
            json!({
                "backend": "oracle",
                "host": "h",
                "username": "u",
                "password": "p",
                "database": "HR",
                "fileName": "staff.csv",
                "fileContents": "not base64!"
            }),
        )
        .await;

        assert_eq!(body["statusKind"], "error");
    }

    #[tokio::test]
    async fn test_body_limit() {
        let config = UploaderConfig {
            max_upload_bytes: 16,
            ..UploaderConfig::default()
        };
        let router = UploaderLayer::new("/uploader")
            .with_config(config)
            .into_router();
        let (status, _) = post(
            router,
            "/uploader/api/upload",
            json!({"fileContents": "A".repeat(128 * 1024)}),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let router = UploaderLayer::new("/uploader").into_router();
        let (status, _) = post(router, "/uploader/api/connect", json!({"backend": 1})).await;
        assert!(status.is_client_error());
    }
}
