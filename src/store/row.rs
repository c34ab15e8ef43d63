use serde::{Deserialize, Serialize};
use std::fmt;

/// A single column value. `None` is SQL NULL.
pub type Value = Option<String>;

/// A table row, with values ordered as the table schema's columns.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    /// Convenience for rows without NULLs.
    pub fn from_strs(values: &[&str]) -> Self {
        Row(values.iter().map(|v| Some(v.to_string())).collect())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Primary-key value(s) of a row, joined with `,`. Inside a component `\` and `,` are escaped
/// with a backslash and NULL is written `\N`. Distinct key tuples never share an encoding.
/// A single non-NULL component without either character encodes as itself.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    pub fn new(key: impl Into<String>) -> Self {
        RowKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn from_values(values: &[Value]) -> Self {
        let mut key = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            match value {
                None => key.push_str("\\N"),
                Some(value) => {
                    for c in value.chars() {
                        if c == '\\' || c == ',' {
                            key.push('\\');
                        }
                        key.push(c);
                    }
                }
            }
        }
        RowKey(key)
    }

    /// Decodes the key back into its component values.
    pub fn components(&self) -> Vec<Value> {
        let mut components = vec![];
        let mut current = String::new();
        let mut null = false;
        let mut chars = self.0.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('N') => null = true,
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                },
                ',' => {
                    components.push(Self::component(&mut current, &mut null));
                }
                c => current.push(c),
            }
        }
        components.push(Self::component(&mut current, &mut null));
        components
    }

    fn component(current: &mut String, null: &mut bool) -> Value {
        let value = if *null { None } else { Some(std::mem::take(current)) };
        current.clear();
        *null = false;
        value
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RowKey {
    fn from(key: &str) -> Self {
        RowKey::new(key)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Column {
    pub name: String,
    pub primary_key: bool,
}

impl Column {
    pub fn key(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            primary_key: true,
        }
    }

    pub fn value(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            primary_key: false,
        }
    }
}

/// Ordered column list of a table with primary-key designation.
///
/// A table that designates no primary-key column is keyed by its first column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableSchema {
    table: String,
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<Column>) -> Self {
        TableSchema {
            table: table.into(),
            columns,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn check_row(&self, row: &Row) -> Result<(), ColumnCountMismatch> {
        if row.len() != self.columns.len() {
            return Err(ColumnCountMismatch {
                table: self.table.clone(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }

        Ok(())
    }

    pub fn row_key(&self, row: &Row) -> Result<RowKey, ColumnCountMismatch> {
        self.check_row(row)?;

        let mut key_positions: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        if key_positions.is_empty() && !self.columns.is_empty() {
            key_positions.push(0);
        }

        let parts: Vec<Value> = key_positions.into_iter().map(|i| row.values()[i].clone()).collect();
        Ok(RowKey::from_values(&parts))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Row for table {table} has {actual} columns, schema has {expected}")]
pub struct ColumnCountMismatch {
    pub table: String,
    pub expected: usize,
    pub actual: usize,
}
