//! Upload endpoint: load a CSV file into a table named after it

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::schema::UploadRequest;

/// Handler for POST /api/upload
///
/// # Warning
///
/// Destructive: an existing table with the same name as the file (extension
/// stripped) is dropped and replaced.
///
/// Request body:
/// ```json
/// {
///   "backend": "mysql",
///   "host": "db.internal",
///   "username": "loader",
///   "password": "...",
///   "database": "sales",
///   "fileName": "orders.csv",
///   "fileContents": "data:text/csv;base64,aWQsYW1vdW50CjEsMTAuNQo="
/// }
/// ```
///
/// Response:
/// ```json
/// {
///   "statusText": "Uploaded orders.csv to table orders successfully!",
///   "statusKind": "success"
/// }
/// ```
pub async fn upload_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<UploadRequest>,
) -> Response {
    let response = orchestrator.upload(request).await;
    (StatusCode::OK, Json(response)).into_response()
}
