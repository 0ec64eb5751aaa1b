//! Data ingestion formats
//!
//! Updates arrive either row oriented (a list of `{column: value}` maps) or
//! column oriented (`{column: [values...]}`), as Rust values or as JSON text.
//! Both shapes normalise to rows before they reach the store. Deltas produced
//! by views use the same row shape, so a delta can be fed straight back into
//! `Table::update` or `Table::from_data`.

use crate::column::{parse_date, parse_datetime, ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use crate::table::Schema;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet};

/// A single row: column name to value, in the order the columns were given.
/// Missing columns are untouched on update and null on insert.
pub type Row = IndexMap<String, ColumnValue>;

/// Update payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TableData {
    Rows(Vec<Row>),
    Columns(Vec<(String, Vec<ColumnValue>)>),
}

impl TableData {
    /// Parse JSON: an array of objects (rows) or an object of arrays
    /// (columns).
    ///
    /// ```
    /// use livepivot::TableData;
    ///
    /// let data = TableData::from_json(r#"{"w": [1.5, 2.5], "x": [1, 2]}"#).unwrap();
    /// assert_eq!(data.len(), 2);
    /// assert_eq!(data.column_names(), vec!["w", "x"]);
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json_value(&value)
    }

    pub fn from_json_value(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Array(items) => {
                let mut rows = Vec::with_capacity(items.len());
                for item in items {
                    let obj = item.as_object().ok_or_else(|| {
                        EngineError::Parse(format!("expected a row object, got {}", item))
                    })?;
                    let mut row = Row::with_capacity(obj.len());
                    for (name, v) in obj {
                        row.insert(name.clone(), json_cell(name, v)?);
                    }
                    rows.push(row);
                }
                Ok(TableData::Rows(rows))
            }
            serde_json::Value::Object(obj) => {
                let mut columns = Vec::with_capacity(obj.len());
                for (name, v) in obj {
                    let items = v.as_array().ok_or_else(|| {
                        EngineError::Parse(format!("column '{}' is not an array", name))
                    })?;
                    let values = items
                        .iter()
                        .map(|v| json_cell(name, v))
                        .collect::<Result<Vec<_>>>()?;
                    columns.push((name.clone(), values));
                }
                Ok(TableData::Columns(columns))
            }
            other => Err(EngineError::Parse(format!(
                "expected an array of rows or an object of columns, got {}",
                other
            ))),
        }
    }

    /// Number of rows carried.
    pub fn len(&self) -> usize {
        match self {
            TableData::Rows(rows) => rows.len(),
            TableData::Columns(cols) => cols.iter().map(|(_, v)| v.len()).max().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names in payload order. For row payloads that is the order
    /// in which each name first appears.
    pub fn column_names(&self) -> Vec<&str> {
        match self {
            TableData::Rows(rows) => {
                let mut seen = HashSet::new();
                rows.iter()
                    .flat_map(|r| r.keys().map(String::as_str))
                    .filter(|name| seen.insert(*name))
                    .collect()
            }
            TableData::Columns(cols) => cols.iter().map(|(n, _)| n.as_str()).collect(),
        }
    }

    /// Normalise into rows. Column payloads must have equal lengths.
    pub fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            TableData::Rows(rows) => Ok(rows),
            TableData::Columns(cols) => {
                let len = cols.first().map(|(_, v)| v.len()).unwrap_or(0);
                if let Some((name, values)) = cols.iter().find(|(_, v)| v.len() != len) {
                    return Err(EngineError::InvalidSchema(format!(
                        "column '{}' has {} values, expected {}",
                        name,
                        values.len(),
                        len
                    )));
                }
                let mut rows: Vec<Row> = (0..len).map(|_| Row::with_capacity(cols.len())).collect();
                for (name, values) in cols {
                    for (row, value) in rows.iter_mut().zip(values) {
                        row.insert(name.clone(), value);
                    }
                }
                Ok(rows)
            }
        }
    }

    /// Infer a schema from the values present.
    ///
    /// Integers mixed with floats widen to float; string columns whose every
    /// value is an ISO date (or datetime) become date (datetime) columns; an
    /// all-null column is a string column.
    pub fn infer_schema(&self) -> Result<Schema> {
        let mut columns = Vec::new();
        for name in self.column_names() {
            let values: Vec<&ColumnValue> = match self {
                TableData::Rows(rows) => rows.iter().filter_map(|r| r.get(name)).collect(),
                TableData::Columns(cols) => cols
                    .iter()
                    .filter(|(n, _)| n == name)
                    .flat_map(|(_, v)| v.iter())
                    .collect(),
            };
            columns.push((name.to_string(), infer_type(name, &values)?));
        }
        Ok(Schema::new(columns))
    }

    /// JSON rows, the inverse of `from_json` for row payloads.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let rows = self.clone().into_rows()?;
        Ok(serde_json::Value::Array(
            rows.iter()
                .map(|row| {
                    serde_json::Value::Object(
                        row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
                    )
                })
                .collect(),
        ))
    }
}

impl From<Vec<Row>> for TableData {
    fn from(rows: Vec<Row>) -> Self {
        TableData::Rows(rows)
    }
}

impl From<Vec<(String, Vec<ColumnValue>)>> for TableData {
    fn from(columns: Vec<(String, Vec<ColumnValue>)>) -> Self {
        TableData::Columns(columns)
    }
}

fn json_cell(column: &str, value: &serde_json::Value) -> Result<ColumnValue> {
    ColumnValue::from_json(value)
        .map_err(|e| EngineError::Parse(format!("column '{}': {}", column, e)))
}

fn infer_type(column: &str, values: &[&ColumnValue]) -> Result<ColumnType> {
    let seen: BTreeSet<ColumnType> = values.iter().filter_map(|v| v.column_type()).collect();
    let mut kinds = seen.iter().copied();
    let ty = match (kinds.next(), kinds.next(), kinds.next()) {
        (None, _, _) => ColumnType::String,
        (Some(ColumnType::String), None, _) => infer_string_type(values),
        (Some(ty), None, _) => ty,
        (Some(a), Some(b), None) if a.is_numeric() && b.is_numeric() => ColumnType::Float,
        (Some(a), Some(b), None) if a.is_temporal() && b.is_temporal() => ColumnType::DateTime,
        _ => {
            return Err(EngineError::InvalidSchema(format!(
                "column '{}' mixes types {:?}",
                column, seen
            )))
        }
    };
    Ok(ty)
}

fn infer_string_type(values: &[&ColumnValue]) -> ColumnType {
    let strings: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
    if strings.iter().all(|s| parse_date(s).is_some()) {
        ColumnType::Date
    } else if strings.iter().all(|s| parse_datetime(s).is_some()) {
        ColumnType::DateTime
    } else {
        ColumnType::String
    }
}

/// Validate rows against a schema and coerce every value to its column type.
///
/// Runs before any state is touched, so a failing batch leaves the table
/// unchanged.
pub(crate) fn conform_rows(schema: &Schema, index: Option<&str>, rows: Vec<Row>) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut conformed = Row::with_capacity(row.len());
        for (name, value) in row {
            let ty = schema.get_column_type(&name).ok_or_else(|| {
                EngineError::InvalidSchema(format!("column '{}' is not in the table schema", name))
            })?;
            let value = value
                .coerce(ty)
                .map_err(|e| EngineError::InvalidSchema(format!("column '{}': {}", name, e)))?;
            conformed.insert(name, value);
        }
        if let Some(index) = index {
            if conformed.get(index).map_or(true, ColumnValue::is_null) {
                return Err(EngineError::InvalidSchema(format!(
                    "row is missing a value for index column '{}'",
                    index
                )));
            }
        }
        out.push(conformed);
    }
    Ok(out)
}
