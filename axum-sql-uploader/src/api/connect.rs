//! Connect endpoint: validate credentials and list databases

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::schema::ConnectRequest;

/// Handler for POST /api/connect
///
/// Opens a connection, enumerates the catalog and closes the connection again.
///
/// Request body:
/// ```json
/// {
///   "backend": "mssql",
///   "host": "db.internal",
///   "port": 1433,
///   "username": "loader",
///   "password": "..."
/// }
/// ```
///
/// Response:
/// ```json
/// {
///   "databases": ["reporting", "sales"],
///   "statusText": "Connected successfully!",
///   "statusKind": "success"
/// }
/// ```
///
/// Failures are reported in the body with `"statusKind": "error"`; the HTTP
/// status is always 200.
pub async fn connect_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    let response = orchestrator.connect(request).await;
    (StatusCode::OK, Json(response)).into_response()
}
