//! Sort engine
//!
//! Sort keys are `(column, direction)` pairs applied in priority order.
//! Nulls come first in ascending order and last in descending order, for
//! every column type. Ties fall back to row id, which is insertion order,
//! so every ordering is stable.
//!
//! `FlatIndex` keeps the visible rows of a flat view sorted and is
//! maintained with binary-search inserts and removals as rows change.

use crate::changeset::RowId;
use crate::column::ColumnValue;
use crate::error::{EngineError, Result};
use crate::store::RowSource;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
    ColAsc,
    ColDesc,
    AscAbs,
    DescAbs,
    ColAscAbs,
    ColDescAbs,
    /// Listed but inactive.
    None,
}

impl SortDirection {
    /// Orders column-pivot groups instead of rows.
    pub fn is_column(&self) -> bool {
        matches!(
            self,
            SortDirection::ColAsc
                | SortDirection::ColDesc
                | SortDirection::ColAscAbs
                | SortDirection::ColDescAbs
        )
    }

    pub fn is_abs(&self) -> bool {
        matches!(
            self,
            SortDirection::AscAbs
                | SortDirection::DescAbs
                | SortDirection::ColAscAbs
                | SortDirection::ColDescAbs
        )
    }

    pub fn is_descending(&self) -> bool {
        matches!(
            self,
            SortDirection::Desc
                | SortDirection::ColDesc
                | SortDirection::DescAbs
                | SortDirection::ColDescAbs
        )
    }

    pub fn is_active(&self) -> bool {
        *self != SortDirection::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
            SortDirection::ColAsc => "col asc",
            SortDirection::ColDesc => "col desc",
            SortDirection::AscAbs => "asc abs",
            SortDirection::DescAbs => "desc abs",
            SortDirection::ColAscAbs => "col asc abs",
            SortDirection::ColDescAbs => "col desc abs",
            SortDirection::None => "none",
        }
    }

    /// Compare two values under this direction.
    pub fn compare(&self, a: &ColumnValue, b: &ColumnValue) -> Ordering {
        let ord = if self.is_abs() {
            a.abs().cmp(&b.abs())
        } else {
            a.cmp(b)
        };
        // Null is the smallest value, so reversing puts nulls last.
        if self.is_descending() {
            ord.reverse()
        } else {
            ord
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<String> = s.split_whitespace().map(str::to_lowercase).collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        let dir = match words.as_slice() {
            ["asc"] => SortDirection::Asc,
            ["desc"] => SortDirection::Desc,
            ["col", "asc"] => SortDirection::ColAsc,
            ["col", "desc"] => SortDirection::ColDesc,
            ["asc", "abs"] => SortDirection::AscAbs,
            ["desc", "abs"] => SortDirection::DescAbs,
            ["col", "asc", "abs"] => SortDirection::ColAscAbs,
            ["col", "desc", "abs"] => SortDirection::ColDescAbs,
            ["none"] => SortDirection::None,
            _ => return Err(EngineError::Config(format!("unknown sort direction '{}'", s))),
        };
        Ok(dir)
    }
}

impl Serialize for SortDirection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SortDirection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One sort key. Serialised as `["column", "direction"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, SortDirection)", into = "(String, SortDirection)")]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        SortSpec {
            column: column.into(),
            direction,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Desc)
    }
}

impl From<(String, SortDirection)> for SortSpec {
    fn from((column, direction): (String, SortDirection)) -> Self {
        SortSpec { column, direction }
    }
}

impl From<SortSpec> for (String, SortDirection) {
    fn from(spec: SortSpec) -> Self {
        (spec.column, spec.direction)
    }
}

/// Stable permutation that orders `values` under `direction`.
pub fn order_values(values: &[ColumnValue], direction: SortDirection) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| direction.compare(&values[a], &values[b]));
    idx
}

/// Sorted visible rows of a flat view.
///
/// Each row keeps the sort values it was placed with, so it can be found by
/// binary search even after the table moved on to new values.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    keys: Vec<SortSpec>,
    order: Vec<RowId>,
    placed: HashMap<RowId, Vec<ColumnValue>>,
}

impl FlatIndex {
    /// Row-level keys only; column and inactive directions are dropped.
    pub fn new(keys: &[SortSpec]) -> Self {
        FlatIndex {
            keys: keys
                .iter()
                .filter(|k| k.direction.is_active() && !k.direction.is_column())
                .cloned()
                .collect(),
            order: Vec::new(),
            placed: HashMap::new(),
        }
    }

    pub fn rebuild(&mut self, rows: &[RowId], source: &dyn RowSource) {
        let placed = rows
            .iter()
            .map(|&r| (r, self.sort_values(r, source)))
            .collect();
        self.placed = placed;
        let mut order = rows.to_vec();
        order.sort_by(|&a, &b| self.compare(a, self.values_of(a), b, self.values_of(b)));
        self.order = order;
    }

    pub fn rows(&self) -> &[RowId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn keys(&self) -> &[SortSpec] {
        &self.keys
    }

    /// Insert `row` at its sorted position.
    pub fn insert(&mut self, row: RowId, source: &dyn RowSource) {
        let values = self.sort_values(row, source);
        let pos = self
            .order
            .binary_search_by(|&existing| self.compare(existing, self.values_of(existing), row, &values))
            .unwrap_or_else(|pos| pos);
        self.order.insert(pos, row);
        self.placed.insert(row, values);
    }

    /// Take `row` out, locating it by the values it was inserted with.
    pub fn remove(&mut self, row: RowId) -> bool {
        let Some(values) = self.placed.remove(&row) else {
            return false;
        };
        match self
            .order
            .binary_search_by(|&existing| self.compare(existing, self.values_of(existing), row, &values))
        {
            Ok(pos) => {
                self.order.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    fn sort_values(&self, row: RowId, source: &dyn RowSource) -> Vec<ColumnValue> {
        self.keys.iter().map(|k| source.value(row, &k.column)).collect()
    }

    fn values_of(&self, row: RowId) -> &[ColumnValue] {
        self.placed.get(&row).map(Vec::as_slice).unwrap_or(&[])
    }

    fn compare(&self, a: RowId, a_values: &[ColumnValue], b: RowId, b_values: &[ColumnValue]) -> Ordering {
        for (key, (va, vb)) in self.keys.iter().zip(a_values.iter().zip(b_values)) {
            let ord = key.direction.compare(va, vb);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.cmp(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::data::Row;
    use crate::store::ColumnStore;
    use crate::table::{Schema, StorageHint};

    fn values() -> Vec<ColumnValue> {
        vec![
            3.5.into(),
            4.5.into(),
            ColumnValue::Null,
            ColumnValue::Null,
            1.5.into(),
            2.5.into(),
        ]
    }

    #[test]
    fn test_nulls_first_ascending_last_descending() {
        let vals = values();
        let asc: Vec<ColumnValue> = order_values(&vals, SortDirection::Asc)
            .into_iter()
            .map(|i| vals[i].clone())
            .collect();
        assert_eq!(
            asc,
            vec![ColumnValue::Null, ColumnValue::Null, 1.5.into(), 2.5.into(), 3.5.into(), 4.5.into()]
        );

        let desc: Vec<ColumnValue> = order_values(&vals, SortDirection::Desc)
            .into_iter()
            .map(|i| vals[i].clone())
            .collect();
        assert_eq!(
            desc,
            vec![4.5.into(), 3.5.into(), 2.5.into(), 1.5.into(), ColumnValue::Null, ColumnValue::Null]
        );
    }

    #[test]
    fn test_null_ordering_for_strings_and_datetimes() {
        let strings = vec![ColumnValue::from("b"), ColumnValue::Null, ColumnValue::from("a")];
        assert_eq!(order_values(&strings, SortDirection::Asc), vec![1, 2, 0]);
        assert_eq!(order_values(&strings, SortDirection::Desc), vec![0, 2, 1]);

        let times = vec![
            crate::column::parse_datetime("2024-01-02").unwrap(),
            ColumnValue::Null,
            crate::column::parse_datetime("2024-01-01").unwrap(),
        ];
        assert_eq!(order_values(&times, SortDirection::Asc), vec![1, 2, 0]);
        assert_eq!(order_values(&times, SortDirection::Desc), vec![0, 2, 1]);
    }

    #[test]
    fn test_abs_directions() {
        let vals: Vec<ColumnValue> = vec![(-3).into(), 1.into(), 2.into()];
        assert_eq!(order_values(&vals, SortDirection::AscAbs), vec![1, 2, 0]);
        assert_eq!(order_values(&vals, SortDirection::DescAbs), vec![0, 2, 1]);
    }

    #[test]
    fn test_direction_parsing() {
        let spec: SortSpec = serde_json::from_str(r#"["x", "col desc abs"]"#).unwrap();
        assert_eq!(spec.direction, SortDirection::ColDescAbs);
        assert!(spec.direction.is_column() && spec.direction.is_abs() && spec.direction.is_descending());
        assert_eq!(serde_json::to_string(&SortSpec::desc("y")).unwrap(), r#"["y","desc"]"#);
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_flat_index_incremental_matches_full_sort() {
        let schema = Schema::new(vec![("x", ColumnType::Integer)]);
        let mut store = ColumnStore::new(schema, None, StorageHint::FastReads).unwrap();
        let rows: Vec<Row> = [5, 1, 4, 1, 3]
            .iter()
            .map(|&x| [("x".to_string(), ColumnValue::from(x))].into_iter().collect())
            .collect();
        store.apply_rows(rows).unwrap();

        let keys = vec![SortSpec::desc("x")];
        let mut index = FlatIndex::new(&keys);
        for row in store.live_rows() {
            index.insert(row, &store);
        }
        assert_eq!(index.rows(), &[0, 2, 4, 1, 3]);

        let mut full = FlatIndex::new(&keys);
        full.rebuild(&store.live_rows(), &store);
        assert_eq!(full.rows(), index.rows());

        assert!(index.remove(2));
        assert!(!index.remove(2));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_flat_index_removes_rows_whose_values_moved() {
        let schema = Schema::new(vec![("id", ColumnType::Integer), ("x", ColumnType::Integer)]);
        let mut store = ColumnStore::new(schema, Some("id"), StorageHint::FastReads).unwrap();
        let row = |id: i64, x: i64| -> Row {
            [("id".to_string(), ColumnValue::from(id)), ("x".to_string(), ColumnValue::from(x))]
                .into_iter()
                .collect()
        };
        store.apply_rows((0..20).map(|i| row(i, i * 10)).collect()).unwrap();
        let keys = vec![SortSpec::asc("x")];
        let mut index = FlatIndex::new(&keys);
        index.rebuild(&store.live_rows(), &store);

        // Rows 3 and 15 swap ends before the index hears about it.
        let changes = store.apply_rows(vec![row(3, 1000), row(15, -5)]).unwrap();
        for change in &changes {
            assert!(index.remove(change.row));
        }
        for change in &changes {
            index.insert(change.row, &store);
        }

        let mut full = FlatIndex::new(&keys);
        full.rebuild(&store.live_rows(), &store);
        assert_eq!(index.rows(), full.rows());
        assert_eq!(index.rows().first(), Some(&15));
        assert_eq!(index.rows().last(), Some(&3));
    }
}
