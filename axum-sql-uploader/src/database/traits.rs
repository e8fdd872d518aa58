//! Database provider trait
//!
//! This trait defines the interface that every backend driver must provide.
//! A provider wraps exactly one open connection for the duration of a single
//! connect or upload operation.

use crate::descriptor::BackendKind;
use crate::inference::InferredSchema;
use crate::ingest::{CellValue, IngestionTarget};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One row returned by a backend's catalog discovery query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    /// Database or schema name
    pub name: String,

    /// Backend-assigned identifier, where the backend exposes one
    pub database_id: Option<i64>,
}

impl CatalogRow {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database_id: None,
        }
    }
}

/// Database provider trait for catalog discovery and table loading
#[async_trait]
pub trait DatabaseProvider: Send {
    /// Backend this provider talks to
    fn backend(&self) -> BackendKind;

    /// Run the backend's catalog discovery query
    ///
    /// # Returns
    ///
    /// The raw rows, before any backend-specific filtering
    async fn discover_catalog(&mut self) -> Result<Vec<CatalogRow>, DatabaseError>;

    /// Create `target.table` from `schema` and load `rows` into it,
    /// replacing any existing table of the same name
    ///
    /// This is destructive: the previous table and its data are gone once
    /// the call succeeds.
    ///
    /// # Arguments
    ///
    /// * `target` - Database (or schema) and table to write
    /// * `schema` - Column names and types, in table order
    /// * `rows` - Converted cell values, one entry per schema column
    ///
    /// # Returns
    ///
    /// Number of rows written
    async fn replace_table(
        &mut self,
        target: &IngestionTarget,
        schema: &InferredSchema,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, DatabaseError>;

    /// Close the underlying connection
    async fn close(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Database error type
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Network or authentication failure while opening a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// A discovery, DDL or DML statement failed on a reachable server
    #[error("Query error: {0}")]
    Query(String),

    /// The destination table could not be created or replaced
    #[error("Schema error: {0}")]
    Schema(String),

    /// A row could not be converted or inserted
    #[error("Data error: {0}")]
    Data(String),
}

impl DatabaseError {
    /// A table load that ran past its deadline
    pub fn load_timed_out(limit: Duration) -> Self {
        DatabaseError::Query(format!(
            "table replacement timed out after {}s",
            limit.as_secs_f32()
        ))
    }
}

#[cfg(feature = "mysql")]
impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        DatabaseError::Query(error.to_string())
    }
}

#[cfg(feature = "mssql")]
impl From<tiberius::error::Error> for DatabaseError {
    fn from(error: tiberius::error::Error) -> Self {
        DatabaseError::Query(error.to_string())
    }
}

#[cfg(feature = "oracle")]
impl From<oracle::Error> for DatabaseError {
    fn from(error: oracle::Error) -> Self {
        DatabaseError::Query(error.to_string())
    }
}
