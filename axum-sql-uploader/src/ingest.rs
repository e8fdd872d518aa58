//! Ingestion engine
//!
//! Converts a parsed dataset into typed rows and hands them to a provider,
//! which replaces the destination table with the new data.

use crate::database::traits::{DatabaseError, DatabaseProvider};
use crate::dataset::TabularDataset;
use crate::inference::{parse_boolean, parse_float, parse_integer, parse_timestamp};
use crate::inference::{ColumnType, InferredSchema};
use crate::{Error, Result};
use chrono::NaiveDateTime;
use tracing::info;

/// Longest table name derived from a file name
///
/// Leaves room for the `$staging` and `$old` helper suffixes within MySQL's
/// 64 character limit.
pub const MAX_TABLE_NAME_LENGTH: usize = 48;

/// Where an upload is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionTarget {
    /// Database, or schema for Oracle
    pub database: String,
    pub table: String,
}

impl IngestionTarget {
    /// Target table named after the uploaded file
    ///
    /// # Errors
    ///
    /// * `Error::Config` when no usable table name remains after sanitizing
    pub fn from_file_name(database: impl Into<String>, file_name: &str) -> Result<Self> {
        Ok(Self {
            database: database.into(),
            table: table_name_from_file_name(file_name)?,
        })
    }
}

/// Derive a safe table name from an uploaded file name
///
/// Drops any directory prefix, cuts at the first `.`, replaces everything
/// outside `[A-Za-z0-9_]` with `_` and prefixes names starting with a digit.
pub fn table_name_from_file_name(file_name: &str) -> Result<String> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    let stem = base.split('.').next().unwrap_or_default().trim();

    let mut name: String = stem
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '_' {
                character
            } else {
                '_'
            }
        })
        .collect();

    if name.chars().all(|character| character == '_') {
        return Err(Error::Config(format!(
            "cannot derive a table name from file name {:?}",
            file_name
        )));
    }

    if name.starts_with(|character: char| character.is_ascii_digit()) {
        name.insert_str(0, "t_");
    }

    name.truncate(MAX_TABLE_NAME_LENGTH);
    Ok(name)
}

/// A typed cell ready to be bound to an `INSERT`
///
/// Nulls keep their column type so drivers can bind typed NULLs.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Integer(Option<i64>),
    Float(Option<f64>),
    Boolean(Option<bool>),
    Timestamp(Option<NaiveDateTime>),
    Text(Option<String>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        match self {
            CellValue::Integer(value) => value.is_none(),
            CellValue::Float(value) => value.is_none(),
            CellValue::Boolean(value) => value.is_none(),
            CellValue::Timestamp(value) => value.is_none(),
            CellValue::Text(value) => value.is_none(),
        }
    }
}

fn convert_cell(raw: Option<&str>, column_type: ColumnType) -> Option<CellValue> {
    let Some(raw) = raw else {
        return Some(match column_type {
            ColumnType::Integer => CellValue::Integer(None),
            ColumnType::Float => CellValue::Float(None),
            ColumnType::Boolean => CellValue::Boolean(None),
            ColumnType::Timestamp => CellValue::Timestamp(None),
            ColumnType::Text => CellValue::Text(None),
        });
    };

    match column_type {
        ColumnType::Integer => parse_integer(raw).map(|value| CellValue::Integer(Some(value))),
        ColumnType::Float => parse_float(raw).map(|value| CellValue::Float(Some(value))),
        ColumnType::Boolean => parse_boolean(raw).map(|value| CellValue::Boolean(Some(value))),
        ColumnType::Timestamp => {
            parse_timestamp(raw).map(|value| CellValue::Timestamp(Some(value)))
        }
        ColumnType::Text => Some(CellValue::Text(Some(raw.to_string()))),
    }
}

/// Convert every row of `dataset` to the types in `schema`
///
/// # Errors
///
/// * `DatabaseError::Schema` when the schema does not describe the dataset
/// * `DatabaseError::Data` for the first cell that does not fit its column
pub fn convert_rows(
    dataset: &TabularDataset,
    schema: &InferredSchema,
) -> std::result::Result<Vec<Vec<CellValue>>, DatabaseError> {
    let schema_columns: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    if schema_columns != dataset.columns {
        return Err(DatabaseError::Schema(format!(
            "schema columns {:?} do not match file columns {:?}",
            schema_columns, dataset.columns
        )));
    }

    dataset
        .rows
        .iter()
        .enumerate()
        .map(|(row_index, row)| {
            row.iter()
                .zip(&schema.columns)
                .map(|(cell, column)| {
                    convert_cell(cell.as_deref(), column.column_type).ok_or_else(|| {
                        DatabaseError::Data(format!(
                            "row {} column {:?}: {:?} is not a valid {}",
                            row_index + 1,
                            column.name,
                            cell.as_deref().unwrap_or_default(),
                            column.column_type
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// Replace `target.table` with the contents of `dataset`
///
/// Destructive: an existing table with the same name is dropped and
/// recreated with the inferred schema.
///
/// # Returns
///
/// Number of rows written
pub async fn ingest(
    provider: &mut dyn DatabaseProvider,
    target: &IngestionTarget,
    dataset: &TabularDataset,
    schema: &InferredSchema,
) -> Result<u64> {
    let rows = convert_rows(dataset, schema)?;
    let written = provider.replace_table(target, schema, &rows).await?;

    info!(
        backend = %provider.backend(),
        database = %target.database,
        table = %target.table,
        rows = written,
        "Replaced table"
    );

    Ok(written)
}
