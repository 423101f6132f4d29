//! In-memory tabular exchange format.
//!
//! The host platform hands series data over as a [`Table`] of named, typed
//! columns and receives forecasts and metrics back in the same shape.

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed column of equal-length values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Text(Vec<String>),
    Real(Vec<f64>),
    Timestamp(Vec<DateTime<Utc>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Text(v) => v.len(),
            Column::Real(v) => v.len(),
            Column::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            Column::Text(_) => "text",
            Column::Real(_) => "real",
            Column::Timestamp(_) => "timestamp",
        }
    }

    /// Value at `row` rendered as text, used for grouping keys and vocabularies.
    pub fn display_value(&self, row: usize) -> Option<String> {
        match self {
            Column::Text(v) => v.get(row).cloned(),
            Column::Real(v) => v.get(row).map(|x| x.to_string()),
            Column::Timestamp(v) => v.get(row).map(|t| t.to_rfc3339()),
        }
    }
}

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Table::push_column`].
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self> {
        self.push_column(name, column)?;
        Ok(self)
    }

    /// Append a column. Its length must match the existing columns.
    pub fn push_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(ForecastError::InvalidParameter(format!(
                "duplicate column '{name}'"
            )));
        }
        if let Some(first) = self.columns.first() {
            if first.len() != column.len() {
                return Err(ForecastError::DimensionMismatch {
                    expected: first.len(),
                    got: column.len(),
                });
            }
        }
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| ForecastError::InvalidParameter(format!("missing column '{name}'")))
    }

    pub fn text(&self, name: &str) -> Result<&[String]> {
        match self.column(name)? {
            Column::Text(v) => Ok(v),
            other => Err(wrong_kind(name, "text", other)),
        }
    }

    pub fn real(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Real(v) => Ok(v),
            other => Err(wrong_kind(name, "real", other)),
        }
    }

    pub fn timestamps(&self, name: &str) -> Result<&[DateTime<Utc>]> {
        match self.column(name)? {
            Column::Timestamp(v) => Ok(v),
            other => Err(wrong_kind(name, "timestamp", other)),
        }
    }
}

fn wrong_kind(name: &str, expected: &str, found: &Column) -> ForecastError {
    ForecastError::InvalidParameter(format!(
        "column '{name}' should be {expected}, found {}",
        found.kind()
    ))
}

/// Which table columns play which role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub time: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub static_categorical: Vec<String>,
    #[serde(default)]
    pub static_real: Vec<String>,
    #[serde(default)]
    pub dynamic_real: Vec<String>,
}

impl ColumnRoles {
    pub fn new(time: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, name: impl Into<String>) -> Self {
        self.targets.push(name.into());
        self
    }

    pub fn with_identifier(mut self, name: impl Into<String>) -> Self {
        self.identifiers.push(name.into());
        self
    }

    pub fn with_static_categorical(mut self, name: impl Into<String>) -> Self {
        self.static_categorical.push(name.into());
        self
    }

    pub fn with_static_real(mut self, name: impl Into<String>) -> Self {
        self.static_real.push(name.into());
        self
    }

    pub fn with_dynamic_real(mut self, name: impl Into<String>) -> Self {
        self.dynamic_real.push(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn columns_must_share_length() {
        let table = Table::new()
            .with_column("a", Column::Real(vec![1.0, 2.0]))
            .unwrap();
        let err = table
            .clone()
            .with_column("b", Column::Real(vec![1.0]))
            .unwrap_err();
        assert_eq!(
            err,
            ForecastError::DimensionMismatch {
                expected: 2,
                got: 1
            }
        );
        assert!(table.with_column("a", Column::Real(vec![0.0, 0.0])).is_err());
    }

    #[test]
    fn typed_accessors_check_kind() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let table = Table::new()
            .with_column("ts", Column::Timestamp(vec![t0]))
            .unwrap()
            .with_column("id", Column::Text(vec!["x".into()]))
            .unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.timestamps("ts").unwrap(), &[t0]);
        assert!(table.real("id").is_err());
        assert!(table.text("missing").is_err());
        assert_eq!(table.column("id").unwrap().display_value(0).as_deref(), Some("x"));
    }
}
