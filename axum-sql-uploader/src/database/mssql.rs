//! SQL Server database provider implementation
//!
//! SQL Server supports transactional DDL, so the drop, create and load of a
//! replacement table all happen in one transaction.

use crate::config::UploaderConfig;
use crate::database::traits::{CatalogRow, DatabaseError, DatabaseProvider};
use crate::descriptor::{BackendKind, ConnectionDescriptor};
use crate::dialect::{Dialect, MssqlDialect};
use crate::inference::InferredSchema;
use crate::ingest::{CellValue, IngestionTarget};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::borrow::Cow;
use std::time::Duration;
use tiberius::time::{Date, DateTime2, Time};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

type TiberiusClient = Client<Compat<TcpStream>>;

const BEGIN_TRANSACTION: &str = "BEGIN TRANSACTION";
const COMMIT_TRANSACTION: &str = "COMMIT TRANSACTION";
const ROLLBACK_TRANSACTION: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

/// SQL Server database provider
pub struct MssqlProvider {
    client: TiberiusClient,
    insert_batch_rows: usize,
    ingest_timeout: Duration,
}

impl MssqlProvider {
    /// Open a connection described by `descriptor`
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Resolved SQL Server connection target
    /// * `uploader` - Batch size and load deadline
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        uploader: &UploaderConfig,
    ) -> Result<Self, DatabaseError> {
        let mut config = Config::new();
        config.host(&descriptor.host);
        config.port(descriptor.port);
        if let Some(database) = descriptor.database() {
            config.database(database);
        }
        config.authentication(AuthMethod::sql_server(
            &descriptor.username,
            &descriptor.password,
        ));
        config.trust_cert();
        config.encryption(EncryptionLevel::Required);

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|error| DatabaseError::Connection(error.to_string()))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|error| DatabaseError::Connection(error.to_string()))?;

        info!("Connected to SQL Server: {}", descriptor.connection_target());

        Ok(Self {
            client,
            insert_batch_rows: uploader.insert_batch_rows,
            ingest_timeout: uploader.ingest_timeout,
        })
    }

    /// Send `sql` as a plain batch so transaction control stays on the session
    async fn execute_batch(&mut self, sql: &str) -> Result<(), tiberius::error::Error> {
        debug!("SQL Server: {}", sql);
        self.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    /// Drop, create and load `target.table` inside the open transaction
    async fn replace_in_transaction(
        &mut self,
        target: &IngestionTarget,
        schema: &InferredSchema,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, DatabaseError> {
        let dialect = MssqlDialect;
        let qualified_table = dialect.qualify(None, &target.table)?;

        for sql in recreate_statements(&qualified_table, schema)? {
            self.execute_batch(&sql)
                .await
                .map_err(|error| DatabaseError::Schema(error.to_string()))?;
        }

        let columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
        let rows_per_statement = dialect.rows_per_statement(columns.len(), self.insert_batch_rows);
        let mut written = 0;

        for chunk in rows.chunks(rows_per_statement) {
            let sql = dialect.insert_sql(&qualified_table, &columns, chunk.len())?;
            let parameters: Vec<&dyn ToSql> =
                chunk.iter().flatten().map(|cell| cell as &dyn ToSql).collect();

            let result = self
                .client
                .execute(sql, &parameters)
                .await
                .map_err(|error| DatabaseError::Data(error.to_string()))?;
            written += result.total();
        }

        Ok(written)
    }
}

/// Statements that recreate `qualified_table` inside the open transaction
fn recreate_statements(
    qualified_table: &str,
    schema: &InferredSchema,
) -> Result<Vec<String>, DatabaseError> {
    Ok(vec![
        format!("DROP TABLE IF EXISTS {}", qualified_table),
        MssqlDialect.create_table_sql(qualified_table, schema)?,
    ])
}

/// Reject timestamps `datetime2` cannot hold before anything is sent
fn check_timestamps(rows: &[Vec<CellValue>]) -> Result<(), DatabaseError> {
    for (row_index, row) in rows.iter().enumerate() {
        for (column_index, cell) in row.iter().enumerate() {
            if let CellValue::Timestamp(Some(value)) = cell {
                if to_datetime2(value).is_none() {
                    return Err(DatabaseError::Data(format!(
                        "row {} column {}: {} is outside the SQL Server datetime2 range",
                        row_index + 1,
                        column_index + 1,
                        value
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Days since 0001-01-01 plus 100ns ticks since midnight
fn to_datetime2(value: &NaiveDateTime) -> Option<DateTime2> {
    let epoch = NaiveDate::from_ymd_opt(1, 1, 1)?;
    if value.year() > 9999 {
        return None;
    }
    let days = u32::try_from((value.date() - epoch).num_days()).ok()?;
    let time = value.time();
    let nanoseconds =
        time.num_seconds_from_midnight() as u64 * 1_000_000_000 + time.nanosecond() as u64;

    Some(DateTime2::new(Date::new(days), Time::new(nanoseconds / 100, 7)))
}

impl ToSql for CellValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            CellValue::Integer(value) => ColumnData::I64(*value),
            CellValue::Float(value) => ColumnData::F64(*value),
            CellValue::Boolean(value) => ColumnData::Bit(*value),
            CellValue::Timestamp(value) => {
                ColumnData::DateTime2(value.as_ref().and_then(to_datetime2))
            }
            CellValue::Text(value) => ColumnData::String(value.as_deref().map(Cow::Borrowed)),
        }
    }
}

#[async_trait]
impl DatabaseProvider for MssqlProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::Mssql
    }

    async fn discover_catalog(&mut self) -> Result<Vec<CatalogRow>, DatabaseError> {
        let rows = self
            .client
            .simple_query(MssqlDialect.catalog_query())
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| -> Result<CatalogRow, DatabaseError> {
                let name: Option<&str> = row.try_get(0)?;
                let database_id: Option<i64> = row.try_get(1)?;
                Ok(CatalogRow {
                    name: name.unwrap_or_default().to_string(),
                    database_id,
                })
            })
            .collect()
    }

    async fn replace_table(
        &mut self,
        target: &IngestionTarget,
        schema: &InferredSchema,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, DatabaseError> {
        check_timestamps(rows)?;
        self.execute_batch(BEGIN_TRANSACTION).await?;

        let replaced = timeout(
            self.ingest_timeout,
            self.replace_in_transaction(target, schema, rows),
        )
        .await
        .unwrap_or_else(|_| Err(DatabaseError::load_timed_out(self.ingest_timeout)));

        match replaced {
            Ok(written) => {
                self.execute_batch(COMMIT_TRANSACTION).await?;
                Ok(written)
            }
            Err(error) => {
                if let Err(rollback_error) = self.execute_batch(ROLLBACK_TRANSACTION).await {
                    warn!(
                        "Failed to roll back replacement of {}: {}",
                        target.table, rollback_error
                    );
                }
                Err(error)
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.client.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ColumnType, InferredColumn};

    #[test]
    fn test_cell_value_to_sql() {
        assert!(matches!(CellValue::Integer(Some(7)).to_sql(), ColumnData::I64(Some(7))));
        assert!(matches!(CellValue::Boolean(None).to_sql(), ColumnData::Bit(None)));
        assert!(matches!(
            CellValue::Text(Some("x".to_string())).to_sql(),
            ColumnData::String(Some(ref text)) if text == "x"
        ));
    }

    #[test]
    fn test_to_datetime2() {
        let value = NaiveDate::from_ymd_opt(1, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        let converted = to_datetime2(&value).unwrap();
        assert_eq!(converted.date().days(), 1);
        assert_eq!(converted.time().increments(), 10_000_000);
    }

    #[test]
    fn test_out_of_range_timestamps_are_rejected() {
        let year_zero = NaiveDate::from_ymd_opt(0, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let far_future = NaiveDate::from_ymd_opt(10_000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(to_datetime2(&year_zero).is_none());
        assert!(to_datetime2(&far_future).is_none());

        let rows = vec![
            vec![CellValue::Integer(Some(1)), CellValue::Timestamp(None)],
            vec![CellValue::Integer(Some(2)), CellValue::Timestamp(Some(year_zero))],
        ];
        let error = check_timestamps(&rows).unwrap_err();
        assert!(matches!(
            error,
            DatabaseError::Data(ref message) if message.starts_with("row 2 column 2")
        ));

        assert!(check_timestamps(&rows[..1]).is_ok());
    }

    #[test]
    fn test_recreate_statements_leave_transaction_control_to_caller() {
        let schema = InferredSchema {
            columns: vec![InferredColumn {
                name: "id".to_string(),
                column_type: ColumnType::Integer,
            }],
        };
        let statements = recreate_statements("[orders]", &schema).unwrap();

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "DROP TABLE IF EXISTS [orders]");
        assert!(statements[1].starts_with("CREATE TABLE [orders]"));
        assert!(statements.iter().all(|sql| !sql.contains("TRANSACTION")));
        assert!(ROLLBACK_TRANSACTION.starts_with("IF @@TRANCOUNT > 0"));
    }
}
