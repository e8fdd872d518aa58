//! Parsing uploaded files into an in-memory table

use crate::{Error, Result};
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashSet;

/// Cell texts treated as SQL NULL, the usual spreadsheet and dataframe set
const NULL_MARKERS: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const UTF8_BOM: &str = "\u{feff}";

/// Tabular data parsed from one uploaded file
///
/// `rows[r][c]` is the raw text of column `c` in row `r`, or `None` for a
/// null cell. Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularDataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TabularDataset {
    /// Parse UTF-8 comma-separated text whose first row holds the headers
    ///
    /// # Errors
    ///
    /// * `Error::Parse` for non UTF-8 input, a missing header row, or rows
    ///   whose field count differs from the header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|error| Error::Parse(format!("file is not valid UTF-8: {}", error)))?;
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|error| Error::Parse(error.to_string()))?
            .clone();

        if headers.is_empty() {
            return Err(Error::Parse("no columns to parse from file".to_string()));
        }

        let columns = normalize_headers(headers.iter());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|error| Error::Parse(error.to_string()))?;
            let row = record
                .iter()
                .map(|cell| {
                    if is_null(cell) {
                        None
                    } else {
                        Some(cell.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Values of one column, top to bottom
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(index).and_then(|cell| cell.as_deref()))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

fn is_null(cell: &str) -> bool {
    NULL_MARKERS.contains(&cell.trim())
}

/// Make header names non-empty and unique
///
/// Blank headers become `Unnamed: {index}`; repeats get `.1`, `.2`, ...
fn normalize_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let raw: Vec<String> = headers
        .enumerate()
        .map(|(index, header)| {
            let header = header.trim();
            if header.is_empty() {
                format!("Unnamed: {}", index)
            } else {
                header.to_string()
            }
        })
        .collect();

    let mut taken: HashSet<String> = HashSet::new();
    let mut columns = Vec::with_capacity(raw.len());
    for name in raw {
        let mut candidate = name.clone();
        let mut suffix = 1;
        while taken.contains(&candidate) {
            candidate = format!("{}.{}", name, suffix);
            suffix += 1;
        }
        taken.insert(candidate.clone());
        columns.push(candidate);
    }
    columns
}

/// Decode file contents sent as base64, with or without a data URL prefix
///
/// Browser upload widgets deliver `data:text/csv;base64,<payload>`.
///
/// # Errors
///
/// * `Error::Parse` when the payload is not valid base64
pub fn decode_upload(contents: &str) -> Result<Vec<u8>> {
    let payload = match contents.split_once(',') {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => contents,
    };

    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|error| Error::Parse(format!("file contents are not valid base64: {}", error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let dataset = TabularDataset::parse(b"id,amount\n1,10.5\n2,\n").unwrap();
        assert_eq!(dataset.columns, ["id", "amount"]);
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.rows[0], [Some("1".to_string()), Some("10.5".to_string())]);
        assert_eq!(dataset.rows[1], [Some("2".to_string()), None]);
    }

    #[test]
    fn test_quoted_fields() {
        let dataset =
            TabularDataset::parse(b"name,note\n\"Smith, Jane\",\"said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(dataset.rows[0][0].as_deref(), Some("Smith, Jane"));
        assert_eq!(dataset.rows[0][1].as_deref(), Some("said \"hi\""));
    }

    #[test]
    fn test_mismatched_column_count_is_parse_error() {
        let error = TabularDataset::parse(b"a,b\n1,2\n3\n").unwrap_err();
        assert!(matches!(error, Error::Parse(_)));

        let error = TabularDataset::parse(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(error, Error::Parse(_)));
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let error = TabularDataset::parse(&[b'a', b'\n', 0xff, 0xfe]).unwrap_err();
        assert!(matches!(error, Error::Parse(_)));
    }

    #[test]
    fn test_empty_file_is_parse_error() {
        assert!(matches!(TabularDataset::parse(b""), Err(Error::Parse(_))));
    }

    #[test]
    fn test_header_only_file_has_no_rows() {
        let dataset = TabularDataset::parse(b"a,b\n").unwrap();
        assert_eq!(dataset.columns, ["a", "b"]);
        assert!(dataset.rows.is_empty());
    }

    #[test]
    fn test_bom_is_stripped() {
        let dataset = TabularDataset::parse("\u{feff}id\n1\n".as_bytes()).unwrap();
        assert_eq!(dataset.columns, ["id"]);
    }

    #[test]
    fn test_headers_are_made_unique() {
        let dataset = TabularDataset::parse(b"a,,a,a.1,a\n1,2,3,4,5\n").unwrap();
        assert_eq!(dataset.columns, ["a", "Unnamed: 1", "a.1", "a.1.1", "a.2"]);
    }

    #[test]
    fn test_null_markers() {
        let dataset = TabularDataset::parse(b"v\nNA\nNULL\nnan\n x \n").unwrap();
        let values: Vec<Option<&str>> = dataset.column_values(0).collect();
        assert_eq!(values, [None, None, None, Some(" x ")]);
    }

    #[test]
    fn test_spreadsheet_null_markers() {
        let dataset =
            TabularDataset::parse(b"v
#N/A
n/a
None
<NA>
-NaN
-nan
#NA
1.#QNAN
none
")
                .unwrap();
        let values: Vec<Option<&str>> = dataset.column_values(0).collect();
        assert_eq!(values[..8], [None; 8]);
        assert_eq!(values[8], Some("none"));
    }

    #[test]
    fn test_decode_upload() {
        let encoded = general_purpose::STANDARD.encode("a,b\n1,2\n");
        assert_eq!(decode_upload(&encoded).unwrap(), b"a,b\n1,2\n");

        let data_url = format!("data:text/csv;base64,{}", encoded);
        assert_eq!(decode_upload(&data_url).unwrap(), b"a,b\n1,2\n");

        assert!(matches!(decode_upload("not base64!"), Err(Error::Parse(_))));
    }
}
