//! # axum-sql-uploader
//!
//! Load CSV files into MySQL, SQL Server or Oracle tables, easily integrable
//! as an Axum layer.
//!
//! ## Features
//!
//! - One connection model for three backends, with per-backend defaults
//! - Uniform database listing (schemas on Oracle, user databases only on SQL Server)
//! - Column type inference from CSV contents
//! - Replace-if-exists loading, swapped in atomically where the backend allows
//!
//! ## Security Warning
//!
//! **Uploads are destructive!**
//!
//! - A table named after the uploaded file is dropped and recreated
//! - No authentication/authorization built-in; credentials travel in each request
//! - Should never be exposed in production or public networks
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use axum_sql_uploader::{UploaderConfig, UploaderLayer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app: Router = Router::new()
//!         .route("/", get(|| async { "Hello, World!" }))
//!         .merge(
//!             UploaderLayer::new("/uploader")
//!                 .with_config(UploaderConfig::default())
//!                 .into_router(),
//!         );
//!
//!     // Serve the application...
//! }
//! ```

// Public modules
pub mod api;
pub mod catalog;
pub mod config;
pub mod database;
pub mod dataset;
pub mod descriptor;
pub mod dialect;
pub mod inference;
pub mod ingest;
pub mod layer;
pub mod orchestrator;
pub mod schema;

// Public exports
pub use config::UploaderConfig;
pub use descriptor::{BackendKind, ConnectionDescriptor, ConnectionParams};
pub use layer::UploaderLayer;
pub use orchestrator::{Connector, Orchestrator};
pub use schema::{ConnectRequest, ConnectResponse, StatusKind, UploadRequest, UploadResponse};

// Re-export database providers
pub use database::traits::{DatabaseError, DatabaseProvider};

#[cfg(feature = "mysql")]
pub use database::mysql::MysqlProvider;

#[cfg(feature = "mssql")]
pub use database::mssql::MssqlProvider;

#[cfg(feature = "oracle")]
pub use database::oracle::OracleProvider;

// Error type
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid connection parameters; no I/O was attempted
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// Uploaded bytes are not usable delimited text
    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl Error {
    /// Stable name of the error class, for logs and tests
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::UnsupportedBackend(_) => "UnsupportedBackendError",
            Error::Parse(_) => "ParseError",
            Error::Database(DatabaseError::Connection(_)) => "ConnectionError",
            Error::Database(DatabaseError::Query(_)) => "QueryError",
            Error::Database(DatabaseError::Schema(_)) => "SchemaError",
            Error::Database(DatabaseError::Data(_)) => "DataError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
