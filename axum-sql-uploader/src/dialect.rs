//! SQL dialects
//!
//! Each backend supplies its own identifier quoting, DDL types, catalog
//! discovery query and bind-parameter limits through the [`Dialect`] trait,
//! so the ingestion and catalog code never branches on the backend itself.

use crate::database::traits::DatabaseError;
use crate::descriptor::BackendKind;
use crate::inference::{ColumnType, InferredSchema};

/// SQL syntax and limits of one backend
pub trait Dialect: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Opening and closing identifier quote characters
    fn quote_chars(&self) -> (char, char);

    /// Longest identifier the backend accepts, in characters
    fn max_identifier_length(&self) -> usize;

    /// DDL type used for an inferred column type
    fn column_type(&self, column_type: ColumnType) -> &'static str;

    /// Query listing databases (or schemas) visible to the session
    fn catalog_query(&self) -> &'static str;

    /// Bind parameter placeholder for the given 1-based index
    fn param_placeholder(&self, index: usize) -> String;

    /// Most bind parameters a single statement may carry
    fn max_bind_parameters(&self) -> usize;

    /// Most rows a single `INSERT ... VALUES` may carry
    fn max_rows_per_insert(&self) -> usize;

    /// Quote an identifier, escaping the closing quote character
    ///
    /// # Errors
    ///
    /// * `DatabaseError::Schema` for empty identifiers, identifiers with NUL
    ///   bytes, or identifiers longer than the backend allows
    fn quote_ident(&self, name: &str) -> Result<String, DatabaseError> {
        if name.is_empty() {
            return Err(DatabaseError::Schema("identifier cannot be empty".to_string()));
        }
        if name.contains('\0') {
            return Err(DatabaseError::Schema(format!(
                "identifier contains a null byte: {:?}",
                name
            )));
        }
        if name.chars().count() > self.max_identifier_length() {
            return Err(DatabaseError::Schema(format!(
                "identifier exceeds {} characters: {:?}",
                self.max_identifier_length(),
                name
            )));
        }

        let (open, close) = self.quote_chars();
        let escaped = name.replace(close, &format!("{}{}", close, close));
        Ok(format!("{}{}{}", open, escaped, close))
    }

    /// Quote `table`, qualified by `schema` when given
    fn qualify(&self, schema: Option<&str>, table: &str) -> Result<String, DatabaseError> {
        match schema {
            Some(schema) => Ok(format!(
                "{}.{}",
                self.quote_ident(schema)?,
                self.quote_ident(table)?
            )),
            None => self.quote_ident(table),
        }
    }

    /// `CREATE TABLE` statement with one column per inferred column
    fn create_table_sql(
        &self,
        qualified_table: &str,
        schema: &InferredSchema,
    ) -> Result<String, DatabaseError> {
        let definitions = schema
            .columns
            .iter()
            .map(|column| {
                Ok(format!(
                    "{} {} NULL",
                    self.quote_ident(&column.name)?,
                    self.column_type(column.column_type)
                ))
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        Ok(format!(
            "CREATE TABLE {} ({})",
            qualified_table,
            definitions.join(", ")
        ))
    }

    /// Multi-row `INSERT` with placeholders for `row_count` rows
    fn insert_sql(
        &self,
        qualified_table: &str,
        columns: &[String],
        row_count: usize,
    ) -> Result<String, DatabaseError> {
        let column_list = columns
            .iter()
            .map(|column| self.quote_ident(column))
            .collect::<Result<Vec<_>, DatabaseError>>()?
            .join(", ");

        let mut index = 0;
        let tuples: Vec<String> = (0..row_count)
            .map(|_| {
                let placeholders: Vec<String> = columns
                    .iter()
                    .map(|_| {
                        index += 1;
                        self.param_placeholder(index)
                    })
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            qualified_table,
            column_list,
            tuples.join(", ")
        ))
    }

    /// Rows per `INSERT` statement for a table with `column_count` columns
    fn rows_per_statement(&self, column_count: usize, configured: usize) -> usize {
        let by_parameters = self.max_bind_parameters() / column_count.max(1);
        configured
            .min(self.max_rows_per_insert())
            .min(by_parameters)
            .max(1)
    }
}

/// MySQL and MariaDB
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn backend(&self) -> BackendKind {
        BackendKind::Mysql
    }

    fn quote_chars(&self) -> (char, char) {
        ('`', '`')
    }

    fn max_identifier_length(&self) -> usize {
        64
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "DATETIME(6)",
            ColumnType::Text => "TEXT",
        }
    }

    fn catalog_query(&self) -> &'static str {
        "SHOW DATABASES"
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn max_bind_parameters(&self) -> usize {
        65_535
    }

    fn max_rows_per_insert(&self) -> usize {
        usize::MAX
    }
}

/// Microsoft SQL Server
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

/// Highest `database_id` used by the built-in system databases
/// (master, tempdb, model, msdb)
pub const MSSQL_LAST_SYSTEM_DATABASE_ID: i64 = 4;

impl Dialect for MssqlDialect {
    fn backend(&self) -> BackendKind {
        BackendKind::Mssql
    }

    fn quote_chars(&self) -> (char, char) {
        ('[', ']')
    }

    fn max_identifier_length(&self) -> usize {
        128
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BIT",
            ColumnType::Timestamp => "DATETIME2",
            ColumnType::Text => "NVARCHAR(MAX)",
        }
    }

    fn catalog_query(&self) -> &'static str {
        "SELECT name, CAST(database_id AS BIGINT) AS database_id FROM sys.databases ORDER BY name"
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    // The protocol caps a request at 2100 parameters
    fn max_bind_parameters(&self) -> usize {
        2_000
    }

    fn max_rows_per_insert(&self) -> usize {
        1_000
    }
}

/// Oracle Database
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn backend(&self) -> BackendKind {
        BackendKind::Oracle
    }

    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    fn max_identifier_length(&self) -> usize {
        128
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Integer => "NUMBER(19)",
            ColumnType::Float => "BINARY_DOUBLE",
            ColumnType::Boolean => "NUMBER(1)",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Text => "CLOB",
        }
    }

    fn catalog_query(&self) -> &'static str {
        "SELECT DISTINCT username FROM all_users ORDER BY username"
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn max_bind_parameters(&self) -> usize {
        65_535
    }

    // Throughput comes from array binding, not multi-row VALUES
    fn max_rows_per_insert(&self) -> usize {
        1
    }
}

/// Dialect for a backend
pub fn dialect_for(backend: BackendKind) -> &'static dyn Dialect {
    match backend {
        BackendKind::Mysql => &MysqlDialect,
        BackendKind::Mssql => &MssqlDialect,
        BackendKind::Oracle => &OracleDialect,
    }
}

/// Separates a table name from a helper suffix
///
/// Table names derived from file names never contain it, so helper tables
/// cannot collide with uploaded ones.
pub const HELPER_TABLE_SEPARATOR: char = '$';

/// Name of the table a load is written into before it replaces `table`
pub fn staging_table_name(table: &str) -> String {
    format!("{}{}staging", table, HELPER_TABLE_SEPARATOR)
}

/// Name the previous table is moved to while it is being replaced
pub fn retired_table_name(table: &str) -> String {
    format!("{}{}old", table, HELPER_TABLE_SEPARATOR)
}
