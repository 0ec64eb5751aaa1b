//! Table, update and view configuration
//!
//! Everything here deserialises from JSON with the same field names the
//! builders use, so a configuration can come from a file, a client message
//! or Rust code.

use crate::aggregate::Aggregate;
use crate::computed::ComputedColumnSpec;
use crate::error::Result;
use crate::filter::{FilterCombinator, FilterTerm};
use crate::port::PortId;
use crate::sort::SortSpec;
use crate::table::StorageHint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options for creating a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Primary-key column. Unindexed tables append every row.
    pub index: Option<String>,
    pub name: Option<String>,
    #[serde(with = "storage_hint")]
    pub storage: StorageHint,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, column: impl Into<String>) -> Self {
        self.index = Some(column.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn storage(mut self, hint: StorageHint) -> Self {
        self.storage = hint;
        self
    }
}

mod storage_hint {
    use crate::table::StorageHint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hint: &StorageHint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(hint.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StorageHint, D::Error> {
        let s = String::deserialize(d)?;
        StorageHint::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Options for a single update call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    /// Port the batch is tagged with; port 0 when absent.
    pub port_id: Option<PortId>,
}

impl UpdateOptions {
    pub fn port(port_id: PortId) -> Self {
        UpdateOptions {
            port_id: Some(port_id),
        }
    }
}

/// Definition of a view.
///
/// ```
/// use livepivot::{Aggregate, SortSpec, ViewConfig};
///
/// let config = ViewConfig::from_json(r#"{
///     "group_by": ["region"],
///     "columns": ["sales"],
///     "aggregates": {"sales": "sum"},
///     "sort": [["sales", "desc"]]
/// }"#).unwrap();
///
/// assert_eq!(
///     config,
///     ViewConfig::new()
///         .group_by(["region"])
///         .columns(["sales"])
///         .aggregate("sales", Aggregate::Sum)
///         .sort(SortSpec::desc("sales")),
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    #[serde(alias = "row_pivots")]
    pub group_by: Vec<String>,
    #[serde(alias = "column_pivots")]
    pub split_by: Vec<String>,
    /// Output columns in order. `None` shows every table column followed by
    /// table and view computed columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub aggregates: BTreeMap<String, Aggregate>,
    pub sort: Vec<SortSpec>,
    pub filter: Vec<FilterTerm>,
    pub filter_op: FilterCombinator,
    #[serde(alias = "computed_columns")]
    pub expressions: Vec<ComputedColumnSpec>,
}

impl ViewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_pivoted(&self) -> bool {
        !self.group_by.is_empty() || !self.split_by.is_empty()
    }

    pub fn group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn split_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.split_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn aggregate(mut self, column: impl Into<String>, aggregate: Aggregate) -> Self {
        self.aggregates.insert(column.into(), aggregate);
        self
    }

    pub fn sort(mut self, key: SortSpec) -> Self {
        self.sort.push(key);
        self
    }

    pub fn filter(mut self, term: FilterTerm) -> Self {
        self.filter.push(term);
        self
    }

    pub fn filter_op(mut self, op: FilterCombinator) -> Self {
        self.filter_op = op;
        self
    }

    pub fn expression(mut self, spec: ComputedColumnSpec) -> Self {
        self.expressions.push(spec);
        self
    }
}

/// Row and column range of a query, plus the leaves-only switch.
///
/// Ranges are half open; `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Window {
    pub start_row: Option<usize>,
    pub end_row: Option<usize>,
    pub start_col: Option<usize>,
    pub end_col: Option<usize>,
    /// Only rows at full group-by depth.
    pub leaves_only: bool,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn rows(mut self, start: usize, end: usize) -> Self {
        self.start_row = Some(start);
        self.end_row = Some(end);
        self
    }

    pub fn cols(mut self, start: usize, end: usize) -> Self {
        self.start_col = Some(start);
        self.end_col = Some(end);
        self
    }

    pub fn leaves_only(mut self) -> Self {
        self.leaves_only = true;
        self
    }

    pub(crate) fn row_range(&self, len: usize) -> std::ops::Range<usize> {
        clamp(self.start_row, self.end_row, len)
    }

    pub(crate) fn col_range(&self, len: usize) -> std::ops::Range<usize> {
        clamp(self.start_col, self.end_col, len)
    }
}

fn clamp(start: Option<usize>, end: Option<usize>, len: usize) -> std::ops::Range<usize> {
    let end = end.map_or(len, |e| e.min(len));
    let start = start.unwrap_or(0).min(end);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;

    #[test]
    fn test_view_config_aliases_and_defaults() {
        let config = ViewConfig::from_json(
            r#"{
                "row_pivots": ["a"],
                "column_pivots": ["b"],
                "filter": [["x", ">", 3]],
                "filter_op": "or",
                "computed_columns": [{"name": "s", "function": "+", "inputs": ["x", "y"]}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.group_by, vec!["a"]);
        assert_eq!(config.split_by, vec!["b"]);
        assert_eq!(config.filter, vec![FilterTerm::new("x", FilterOp::Gt, 3)]);
        assert_eq!(config.filter_op, FilterCombinator::Or);
        assert_eq!(config.expressions[0].input_columns, vec!["x", "y"]);
        assert!(config.columns.is_none());
        assert!(config.is_pivoted());

        assert!(ViewConfig::from_json("{\"sort\": [[\"x\", \"sideways\"]]}").is_err());
    }

    #[test]
    fn test_table_options() {
        let opts: TableOptions = serde_json::from_str(r#"{"index": "id", "storage": "fast_updates"}"#).unwrap();
        assert_eq!(opts, TableOptions::new().index("id").storage(StorageHint::FastUpdates));
        let opts: TableOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.storage, StorageHint::FastReads);
    }

    #[test]
    fn test_window_clamps() {
        let window = Window::all().rows(2, 10).cols(5, 1);
        assert_eq!(window.row_range(4), 2..4);
        assert_eq!(window.col_range(3), 1..1);
        assert_eq!(Window::all().row_range(3), 0..3);
    }
}
