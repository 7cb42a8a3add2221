//! Result rows.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// A single result row.
///
/// Column names are shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value at a column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of a named column.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Decode the value at `index` into `T`.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            Error::Decode(format!(
                "column index {index} out of range ({} columns)",
                self.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Decode the value of the named column into `T`.
    pub fn get_named_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_named(name)
            .ok_or_else(|| Error::Decode(format!("no column named {name:?}")))?;
        T::from_value(value)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        Row::new(columns, vec![Value::BigInt(1), Value::Text("Alice".into())])
    }

    #[test]
    fn test_get_by_index_and_name() {
        let row = sample();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get_as::<i64>(0).unwrap(), 1);
        assert_eq!(row.get_named_as::<String>("name").unwrap(), "Alice");
    }

    #[test]
    fn test_missing_column_is_decode_error() {
        let row = sample();
        assert!(matches!(row.get_as::<i64>(5), Err(Error::Decode(_))));
        assert!(matches!(
            row.get_named_as::<i64>("email"),
            Err(Error::Decode(_))
        ));
    }
}
