use crate::error::SchemaError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// Row/column access to materialized table data.
///
/// Storage and ingestion live outside the engine; the engine only needs to:
/// - resolve column indices by name
/// - read scalar values by row/column
///
/// Implementations must be immutable once handed to a [`crate::ModelBuilder`]: the model
/// snapshot is shared by concurrent queries without locking.
pub trait TableBackend: fmt::Debug + Send + Sync {
    fn columns(&self) -> &[String];
    fn row_count(&self) -> usize;
    fn column_index(&self, column: &str) -> Option<usize>;
    fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value>;

    fn value(&self, row: usize, column: &str) -> Option<Value> {
        let idx = self.column_index(column)?;
        self.value_by_idx(row, idx)
    }
}

/// Row-oriented in-memory table.
#[derive(Clone, Debug)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<impl Into<String>>) -> Self {
        let name = name.into();
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.clone(), idx))
            .collect();

        Self {
            name,
            columns,
            column_index,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), SchemaError> {
        if row.len() != self.columns.len() {
            return Err(SchemaError::SchemaMismatch {
                table: self.name.clone(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }

        self.rows.push(row);
        Ok(())
    }

    /// Build a table from pre-validated rows.
    pub fn with_rows(
        name: impl Into<String>,
        columns: Vec<impl Into<String>>,
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> Result<Self, SchemaError> {
        let mut table = Self::new(name, columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }
}

impl TableBackend for Table {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value> {
        self.rows.get(row)?.get(idx).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_row_checks_width() {
        let mut table = Table::new("Fact", vec!["A", "B"]);
        table.push_row(vec![1.into(), 2.into()]).unwrap();
        let err = table.push_row(vec![1.into()]).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::SchemaMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, "B"), Some(Value::from(2)));
        assert_eq!(table.value(0, "C"), None);
    }
}
