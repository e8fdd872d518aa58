//! Oracle database provider implementation
//!
//! The Oracle client is blocking, so every call runs on Tokio's blocking
//! pool. Oracle commits DDL implicitly and has no multi-table rename: a load
//! goes into a staging table first, and only once it is committed is the old
//! table dropped and the staging table renamed into place.
//!
//! A blocking call cannot be dropped like a future. When a load outlives its
//! deadline the in-flight statement is interrupted and the worker is awaited,
//! so the connection is never closed while the worker still uses it.

use crate::config::UploaderConfig;
use crate::database::traits::{CatalogRow, DatabaseError, DatabaseProvider};
use crate::descriptor::{BackendKind, ConnectionDescriptor};
use crate::dialect::{staging_table_name, Dialect, OracleDialect};
use crate::inference::InferredSchema;
use crate::ingest::{CellValue, IngestionTarget};
use async_trait::async_trait;
use oracle::sql_type::ToSql;
use oracle::Connection;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Oracle database provider
pub struct OracleProvider {
    connection: Arc<Connection>,
    insert_batch_rows: usize,
    ingest_timeout: Duration,
}

/// Run blocking Oracle work off the async runtime
async fn blocking<T, F>(work: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(worker_failed)?
}

fn worker_failed(error: JoinError) -> DatabaseError {
    DatabaseError::Query(format!("Oracle worker failed: {}", error))
}

const LOADING: u8 = 0;
const SWAPPING: u8 = 1;
const CANCELLED: u8 = 2;

/// Decides between a load reaching its swap and its deadline expiring
///
/// Exactly one side wins. Once the swap has begun the target table is being
/// replaced and the load runs to completion; once cancelled it never touches
/// the target table.
#[derive(Debug, Default)]
struct LoadState(AtomicU8);

impl LoadState {
    /// Claim the swap; false when the load was already cancelled
    fn begin_swap(&self) -> bool {
        self.0
            .compare_exchange(LOADING, SWAPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Cancel the load; false when the swap already started
    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(LOADING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }
}

impl OracleProvider {
    /// Open a connection described by `descriptor`
    ///
    /// When the descriptor names a schema, the session switches to it.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Resolved Oracle connection target
    /// * `config` - Rows per array-bound `INSERT` and the load deadline
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        config: &UploaderConfig,
    ) -> Result<Self, DatabaseError> {
        let connect_string = descriptor.easy_connect_string().ok_or_else(|| {
            DatabaseError::Connection("Oracle connections need a service name".to_string())
        })?;
        let username = descriptor.username.clone();
        let password = descriptor.password.clone();
        let schema = descriptor.schema.clone();

        let connection = blocking(move || {
            let connection = Connection::connect(&username, &password, &connect_string)
                .map_err(|error| DatabaseError::Connection(error.to_string()))?;

            if let Some(schema) = schema {
                let sql = format!(
                    "ALTER SESSION SET CURRENT_SCHEMA = {}",
                    OracleDialect.quote_ident(&schema)?
                );
                connection
                    .execute(&sql, &[])
                    .map_err(|error| DatabaseError::Connection(error.to_string()))?;
            }

            Ok(connection)
        })
        .await?;

        info!("Connected to Oracle: {}", descriptor.connection_target());

        Ok(Self {
            connection: Arc::new(connection),
            insert_batch_rows: config.insert_batch_rows.max(1),
            ingest_timeout: config.ingest_timeout,
        })
    }
}

fn execute_ddl(connection: &Connection, sql: &str) -> Result<(), DatabaseError> {
    debug!("Oracle: {}", sql);
    connection
        .execute(sql, &[])
        .map_err(|error| DatabaseError::Schema(error.to_string()))?;
    Ok(())
}

fn table_exists(connection: &Connection, owner: &str, table: &str) -> Result<bool, DatabaseError> {
    let owner = owner.to_string();
    let table = table.to_string();
    let row = connection.query_row(
        "SELECT COUNT(*) FROM all_tables WHERE owner = :1 AND table_name = :2",
        &[&owner, &table],
    )?;
    let count: i64 = row.get(0)?;
    Ok(count > 0)
}

fn bind_value(cell: &CellValue) -> Box<dyn ToSql> {
    match cell {
        CellValue::Integer(value) => Box::new(*value),
        CellValue::Float(value) => Box::new(*value),
        CellValue::Boolean(value) => Box::new(value.map(i64::from)),
        CellValue::Timestamp(value) => Box::new(*value),
        CellValue::Text(value) => Box::new(value.clone()),
    }
}

fn load_rows(
    connection: &Connection,
    qualified_table: &str,
    schema: &InferredSchema,
    rows: &[Vec<CellValue>],
    batch_rows: usize,
) -> Result<u64, DatabaseError> {
    let columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
    let sql = OracleDialect.insert_sql(qualified_table, &columns, 1)?;

    if !rows.is_empty() {
        let mut batch = connection.batch(&sql, batch_rows).build()?;
        for row in rows {
            let values: Vec<Box<dyn ToSql>> = row.iter().map(bind_value).collect();
            let parameters: Vec<&dyn ToSql> = values.iter().map(|value| value.as_ref()).collect();
            batch
                .append_row(&parameters)
                .map_err(|error| DatabaseError::Data(error.to_string()))?;
        }
        batch
            .execute()
            .map_err(|error| DatabaseError::Data(error.to_string()))?;
    }

    connection.commit()?;
    Ok(rows.len() as u64)
}

/// Statements that leave an empty staging table ready for the load
fn staging_statements(
    qualified_staging: &str,
    schema: &InferredSchema,
    staging_exists: bool,
) -> Result<Vec<String>, DatabaseError> {
    let mut statements = Vec::with_capacity(2);
    if staging_exists {
        statements.push(discard_statement(qualified_staging));
    }
    statements.push(OracleDialect.create_table_sql(qualified_staging, schema)?);
    Ok(statements)
}

/// Statements that put the committed staging table in place of the target
fn swap_statements(
    qualified_table: &str,
    qualified_staging: &str,
    table: &str,
    table_exists: bool,
) -> Result<Vec<String>, DatabaseError> {
    let mut statements = Vec::with_capacity(2);
    if table_exists {
        statements.push(format!("DROP TABLE {} PURGE", qualified_table));
    }
    statements.push(format!(
        "ALTER TABLE {} RENAME TO {}",
        qualified_staging,
        OracleDialect.quote_ident(table)?
    ));
    Ok(statements)
}

fn discard_statement(qualified_staging: &str) -> String {
    format!("DROP TABLE {} PURGE", qualified_staging)
}

/// Roll back and drop the staging table after a failed or cancelled load
fn discard_staging(connection: &Connection, qualified_staging: &str) {
    if let Err(error) = connection.rollback() {
        warn!("Failed to roll back load of {}: {}", qualified_staging, error);
    }
    if let Err(error) = execute_ddl(connection, &discard_statement(qualified_staging)) {
        warn!("Failed to drop {}: {}", qualified_staging, error);
    }
}

fn replace_table_blocking(
    connection: &Connection,
    target: &IngestionTarget,
    schema: &InferredSchema,
    rows: &[Vec<CellValue>],
    batch_rows: usize,
    state: &LoadState,
) -> Result<u64, DatabaseError> {
    let dialect = OracleDialect;
    let owner = target.database.as_str();
    let staging = staging_table_name(&target.table);
    let qualified_table = dialect.qualify(Some(owner), &target.table)?;
    let qualified_staging = dialect.qualify(Some(owner), &staging)?;

    let staging_exists = table_exists(connection, owner, &staging)?;
    for sql in staging_statements(&qualified_staging, schema, staging_exists)? {
        execute_ddl(connection, &sql)?;
    }

    let written = match load_rows(connection, &qualified_staging, schema, rows, batch_rows) {
        Ok(written) => written,
        Err(error) => {
            discard_staging(connection, &qualified_staging);
            return Err(error);
        }
    };

    if !state.begin_swap() {
        discard_staging(connection, &qualified_staging);
        return Err(DatabaseError::Query(format!(
            "load of {} was cancelled",
            qualified_table
        )));
    }

    let swap = table_exists(connection, owner, &target.table).and_then(|exists| {
        swap_statements(&qualified_table, &qualified_staging, &target.table, exists)
    });
    let swap = match swap {
        Ok(swap) => swap,
        Err(error) => {
            discard_staging(connection, &qualified_staging);
            return Err(error);
        }
    };
    for sql in swap {
        execute_ddl(connection, &sql)?;
    }

    Ok(written)
}

#[async_trait]
impl DatabaseProvider for OracleProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::Oracle
    }

    async fn discover_catalog(&mut self) -> Result<Vec<CatalogRow>, DatabaseError> {
        let connection = Arc::clone(&self.connection);

        blocking(move || {
            let rows = connection.query(OracleDialect.catalog_query(), &[])?;
            let mut catalog = Vec::new();
            for row in rows {
                let name: String = row?.get(0)?;
                catalog.push(CatalogRow::named(name));
            }
            Ok(catalog)
        })
        .await
    }

    async fn replace_table(
        &mut self,
        target: &IngestionTarget,
        schema: &InferredSchema,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, DatabaseError> {
        let connection = Arc::clone(&self.connection);
        let target = target.clone();
        let schema = schema.clone();
        let rows = rows.to_vec();
        let batch_rows = self.insert_batch_rows;
        let state = Arc::new(LoadState::default());
        let job_state = Arc::clone(&state);

        let mut job = tokio::task::spawn_blocking(move || {
            replace_table_blocking(&connection, &target, &schema, &rows, batch_rows, &job_state)
        });

        let finished = match timeout(self.ingest_timeout, &mut job).await {
            Ok(finished) => finished,
            Err(_) => {
                if state.cancel() {
                    warn!(
                        "Oracle load passed its {}s deadline, interrupting",
                        self.ingest_timeout.as_secs_f32()
                    );
                    let connection = Arc::clone(&self.connection);
                    let interrupted =
                        blocking(move || Ok(connection.break_execution()?)).await;
                    if let Err(error) = interrupted {
                        warn!("Failed to interrupt Oracle load: {}", error);
                    }
                }
                job.await
            }
        };

        let result = finished.map_err(worker_failed)?;
        if state.is_cancelled() {
            return Err(DatabaseError::load_timed_out(self.ingest_timeout));
        }
        result
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        let connection = self.connection;
        blocking(move || {
            connection.close()?;
            Ok(())
        })
        .await
    }
}
