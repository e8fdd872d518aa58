//! MySQL database provider implementation
//!
//! MySQL commits DDL implicitly, so a load goes into a staging table inside
//! a transaction and is then swapped in with a single `RENAME TABLE`, which
//! MySQL applies atomically.

use crate::config::UploaderConfig;
use crate::database::traits::{CatalogRow, DatabaseError, DatabaseProvider};
use crate::descriptor::{BackendKind, ConnectionDescriptor};
use crate::dialect::{retired_table_name, staging_table_name, Dialect, MysqlDialect};
use crate::inference::InferredSchema;
use crate::ingest::{CellValue, IngestionTarget};
use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Connection, Executor, MySql, Row};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// MySQL database provider
pub struct MysqlProvider {
    connection: MySqlConnection,
    insert_batch_rows: usize,
    ingest_timeout: Duration,
}

impl MysqlProvider {
    /// Open a connection described by `descriptor`
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Resolved MySQL connection target
    /// * `config` - Batch size and load deadline
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        config: &UploaderConfig,
    ) -> Result<Self, DatabaseError> {
        let mut options = MySqlConnectOptions::new()
            .host(&descriptor.host)
            .port(descriptor.port)
            .username(&descriptor.username)
            .password(&descriptor.password)
            .ssl_mode(MySqlSslMode::Preferred);

        if let Some(database) = descriptor.database() {
            options = options.database(database);
        }

        let connection = MySqlConnection::connect_with(&options)
            .await
            .map_err(|error| DatabaseError::Connection(error.to_string()))?;

        info!("Connected to MySQL: {}", descriptor.connection_target());

        Ok(Self {
            connection,
            insert_batch_rows: config.insert_batch_rows,
            ingest_timeout: config.ingest_timeout,
        })
    }

    /// Run a statement over the text protocol
    async fn execute_statement(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        debug!("MySQL: {}", sql);
        let result = self.connection.execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn table_exists(&mut self, database: &str, table: &str) -> Result<bool, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
        )
        .bind(database)
        .bind(table)
        .fetch_one(&mut self.connection)
        .await?;

        Ok(count > 0)
    }

    /// Insert every row into `qualified_table` in one transaction
    async fn load_rows(
        &mut self,
        qualified_table: &str,
        schema: &InferredSchema,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, DatabaseError> {
        let dialect = MysqlDialect;
        let columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
        let rows_per_statement = dialect.rows_per_statement(columns.len(), self.insert_batch_rows);

        let mut transaction = self.connection.begin().await?;
        let mut written = 0;

        for chunk in rows.chunks(rows_per_statement) {
            let sql = dialect.insert_sql(qualified_table, &columns, chunk.len())?;
            let mut query = sqlx::query(&sql);
            for cell in chunk.iter().flatten() {
                query = bind_cell(query, cell);
            }

            let result = query
                .execute(&mut *transaction)
                .await
                .map_err(|error| DatabaseError::Data(error.to_string()))?;
            written += result.rows_affected();
        }

        transaction.commit().await?;
        Ok(written)
    }

    /// Move the loaded staging table into place
    async fn swap_in(
        &mut self,
        target: &IngestionTarget,
        qualified_table: &str,
        staging_table: &str,
        retired_table: &str,
    ) -> Result<(), DatabaseError> {
        let table_exists = self.table_exists(&target.database, &target.table).await?;

        for sql in swap_statements(qualified_table, staging_table, retired_table, table_exists) {
            self.execute_statement(&sql).await.map_err(schema_error)?;
        }
        Ok(())
    }

    async fn drop_quietly(&mut self, qualified_table: &str) {
        let sql = format!("DROP TABLE IF EXISTS {}", qualified_table);
        if let Err(error) = self.execute_statement(&sql).await {
            warn!("Failed to drop {}: {}", qualified_table, error);
        }
    }
}

fn bind_cell<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    cell: &'q CellValue,
) -> Query<'q, MySql, MySqlArguments> {
    match cell {
        CellValue::Integer(value) => query.bind(*value),
        CellValue::Float(value) => query.bind(*value),
        CellValue::Boolean(value) => query.bind(*value),
        CellValue::Timestamp(value) => query.bind(*value),
        CellValue::Text(value) => query.bind(value.as_deref()),
    }
}

/// Statements that replace `table` with `staging`
///
/// An existing table is renamed away in the same `RENAME TABLE` that renames
/// the staging table into place, so readers never see the name missing.
fn swap_statements(table: &str, staging: &str, retired: &str, table_exists: bool) -> Vec<String> {
    if table_exists {
        vec![
            format!("DROP TABLE IF EXISTS {}", retired),
            format!(
                "RENAME TABLE {} TO {}, {} TO {}",
                table, retired, staging, table
            ),
        ]
    } else {
        vec![format!("RENAME TABLE {} TO {}", staging, table)]
    }
}

fn schema_error(error: sqlx::Error) -> DatabaseError {
    DatabaseError::Schema(error.to_string())
}

#[async_trait]
impl DatabaseProvider for MysqlProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::Mysql
    }

    async fn discover_catalog(&mut self) -> Result<Vec<CatalogRow>, DatabaseError> {
        let rows = sqlx::query(MysqlDialect.catalog_query())
            .fetch_all(&mut self.connection)
            .await?;

        rows.iter()
            .map(|row| -> Result<CatalogRow, DatabaseError> {
                // Older servers report the column as binary
                let name: Vec<u8> = row.try_get(0)?;
                Ok(CatalogRow::named(String::from_utf8_lossy(&name)))
            })
            .collect()
    }

    async fn replace_table(
        &mut self,
        target: &IngestionTarget,
        schema: &InferredSchema,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, DatabaseError> {
        let dialect = MysqlDialect;
        let database = Some(target.database.as_str());
        let qualified_table = dialect.qualify(database, &target.table)?;
        let staging_table = dialect.qualify(database, &staging_table_name(&target.table))?;
        let retired_table = dialect.qualify(database, &retired_table_name(&target.table))?;

        self.execute_statement(&format!("DROP TABLE IF EXISTS {}", staging_table))
            .await
            .map_err(schema_error)?;
        self.execute_statement(&dialect.create_table_sql(&staging_table, schema)?)
            .await
            .map_err(schema_error)?;

        let load = timeout(
            self.ingest_timeout,
            self.load_rows(&staging_table, schema, rows),
        )
        .await;
        let written = match load {
            Ok(Ok(written)) => written,
            Ok(Err(error)) => {
                self.drop_quietly(&staging_table).await;
                return Err(error);
            }
            Err(_) => {
                self.drop_quietly(&staging_table).await;
                return Err(DatabaseError::load_timed_out(self.ingest_timeout));
            }
        };

        if let Err(error) = self
            .swap_in(target, &qualified_table, &staging_table, &retired_table)
            .await
        {
            self.drop_quietly(&staging_table).await;
            return Err(error);
        }
        self.drop_quietly(&retired_table).await;

        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.connection.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_statements_replace_existing_table() {
        let statements = swap_statements("`s`.`t`", "`s`.`t$staging`", "`s`.`t$old`", true);
        assert_eq!(
            statements,
            [
                "DROP TABLE IF EXISTS `s`.`t$old`",
                "RENAME TABLE `s`.`t` TO `s`.`t$old`, `s`.`t$staging` TO `s`.`t`",
            ]
        );
    }

    #[test]
    fn test_swap_statements_for_new_table() {
        let statements = swap_statements("`s`.`t`", "`s`.`t$staging`", "`s`.`t$old`", false);
        assert_eq!(statements, ["RENAME TABLE `s`.`t$staging` TO `s`.`t`"]);
    }
}
