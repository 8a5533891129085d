use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Minimal tabular data carrier handed to trainer and analyzer units.
///
/// The orchestrator itself only inspects column names; cell-level access is
/// for the units. Rows are positional against `columns`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(CoreError::Validation(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of a named column, row order preserved.
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| CoreError::NotFound(format!("column not found: {name}")))?;
        Ok(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Numeric view of a column; non-numeric cells are skipped.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self
            .column_values(name)?
            .into_iter()
            .filter_map(|v| v.as_f64())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DataTable {
        let mut table = DataTable::new(vec!["grade".to_string(), "score".to_string()]);
        table.push_row(vec![json!("A"), json!(4.0)]).unwrap();
        table.push_row(vec![json!("B"), json!(3.5)]).unwrap();
        table.push_row(vec![json!("B"), json!("n/a")]).unwrap();
        table
    }

    #[test]
    fn test_has_column() {
        let table = sample();
        assert!(table.has_column("grade"));
        assert!(!table.has_column("overall_satisfaction"));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let mut table = DataTable::new(vec!["a".to_string(), "b".to_string()]);
        assert!(table.push_row(vec![json!(1)]).is_err());
    }

    #[test]
    fn test_numeric_column_skips_non_numeric() {
        let table = sample();
        let scores = table.numeric_column("score").unwrap();
        assert_eq!(scores, vec![4.0, 3.5]);
    }

    #[test]
    fn test_missing_column_is_not_found() {
        let table = sample();
        let err = table.column_values("missing").unwrap_err();
        assert!(err.is_not_found());
    }
}
