use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Column definition returned by a management command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularColumn {
    /// Column name as declared in the result set.
    #[serde(rename = "ColumnName")]
    pub name: String,
    /// Service data type (e.g. "String", "DateTime", "Int64").
    #[serde(rename = "DataType", default)]
    pub data_type: String,
}

/// Primary result table of a command execution.
///
/// Cells are kept as raw JSON values; column ordering in each row matches
/// the `columns` vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    #[serde(rename = "Columns")]
    pub columns: Vec<TabularColumn>,
    #[serde(rename = "Rows")]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct V1Response {
    #[serde(rename = "Tables")]
    tables: Vec<TabularResult>,
}

impl TabularResult {
    /// Build a result from column names and rows (mostly for tests and fakes).
    pub fn new(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|name| TabularColumn {
                    name: (*name).to_string(),
                    data_type: "String".to_string(),
                })
                .collect(),
            rows,
        }
    }

    /// Parse a v1 REST response body and return its first table.
    pub fn from_v1_response(body: &str) -> Result<Self, CoreError> {
        let resp: V1Response = serde_json::from_str(body)?;
        resp.tables
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::MalformedResult("response contains no tables".into()))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Finds the zero-based index of a column by name (case-sensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// String cell at the given row and column name.
    ///
    /// Returns `None` when the row or column does not exist or the cell is
    /// not a string.
    pub fn get_str(&self, row: usize, col: &str) -> Option<&str> {
        let col_idx = self.column_index(col)?;
        self.rows.get(row)?.get(col_idx)?.as_str()
    }

    /// All string values of one column, in row order. Non-string cells are skipped.
    pub fn column_strings(&self, col: &str) -> Result<Vec<&str>, CoreError> {
        let idx = self
            .column_index(col)
            .ok_or_else(|| CoreError::ColumnNotFound(col.to_string()))?;
        Ok(self
            .rows
            .iter()
            .filter_map(|row| row.get(idx).and_then(Value::as_str))
            .collect())
    }
}

impl fmt::Display for TabularResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return write!(f, "(empty result set)");
        }
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        writeln!(f, "{}", names.join(" | "))?;
        write!(f, "({} rows)", self.rows.len())
    }
}
