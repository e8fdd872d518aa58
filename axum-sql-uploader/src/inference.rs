//! Column type inference
//!
//! Derives one semantic type per column from the raw cell text of a
//! [`TabularDataset`]. Every column starts with all candidate types and each
//! non-null value removes the candidates it cannot be parsed as; the most
//! specific survivor wins. Since the survivors only depend on the set of
//! values, row order never changes the result.

use crate::dataset::TabularDataset;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic column type, ordered from most to least specific
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
        };
        formatter.write_str(name)
    }
}

/// Inferred column types, in dataset column order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredSchema {
    pub columns: Vec<InferredColumn>,
}

/// One inferred column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl InferredSchema {
    /// Type inferred for `column`, if it exists
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|inferred| inferred.name == column)
            .map(|inferred| inferred.column_type)
    }

    /// Column types in column order
    pub fn types(&self) -> impl Iterator<Item = ColumnType> + '_ {
        self.columns.iter().map(|inferred| inferred.column_type)
    }
}

const TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

pub(crate) fn parse_integer(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

pub(crate) fn parse_float(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

pub(crate) fn parse_boolean(value: &str) -> Option<bool> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Some(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(with_offset.naive_utc());
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Candidate types still possible for one column
#[derive(Debug, Clone, Copy)]
struct Candidates {
    integer: bool,
    float: bool,
    boolean: bool,
    timestamp: bool,
    seen_value: bool,
}

impl Candidates {
    fn new() -> Self {
        Self {
            integer: true,
            float: true,
            boolean: true,
            timestamp: true,
            seen_value: false,
        }
    }

    fn observe(&mut self, value: &str) {
        self.seen_value = true;
        self.integer = self.integer && parse_integer(value).is_some();
        self.float = self.float && parse_float(value).is_some();
        self.boolean = self.boolean && parse_boolean(value).is_some();
        self.timestamp = self.timestamp && parse_timestamp(value).is_some();
    }

    fn exhausted(&self) -> bool {
        self.seen_value && !(self.integer || self.float || self.boolean || self.timestamp)
    }

    fn resolve(&self) -> ColumnType {
        if !self.seen_value {
            ColumnType::Text
        } else if self.integer {
            ColumnType::Integer
        } else if self.float {
            ColumnType::Float
        } else if self.boolean {
            ColumnType::Boolean
        } else if self.timestamp {
            ColumnType::Timestamp
        } else {
            ColumnType::Text
        }
    }
}

/// Infer the type of a single column from its raw values
///
/// `None` entries are nulls and do not constrain the type. A column with no
/// values at all is text.
pub fn infer_column<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut candidates = Candidates::new();
    for value in values.into_iter().flatten() {
        candidates.observe(value);
        if candidates.exhausted() {
            break;
        }
    }
    candidates.resolve()
}

/// Infer a type for every column of the dataset
pub fn infer(dataset: &TabularDataset) -> InferredSchema {
    let columns = dataset
        .columns
        .iter()
        .enumerate()
        .map(|(index, name)| InferredColumn {
            name: name.clone(),
            column_type: infer_column(dataset.column_values(index)),
        })
        .collect();

    InferredSchema { columns }
}
