//! Columnar store with primary-key semantics
//!
//! Rows live in typed columns indexed by a stable slot (`RowId`). Indexed
//! tables keep a key -> slot map: an update whose key exists overwrites only
//! the supplied columns, a new key appends. Unindexed tables append every
//! row. Removed rows are tombstoned, never compacted, so slot order stays
//! insertion order and slot ids are never reused.

use crate::changeset::{RowChange, RowId};
use crate::column::{Column, ColumnType, ColumnValue};
use crate::computed::ComputedColumns;
use crate::data::Row;
use crate::error::{EngineError, Result};
use crate::table::{Schema, StorageHint};
use std::collections::{HashMap, HashSet};

/// Read access to row values by slot, shared by the store, computed-column
/// layers and views.
pub trait RowSource {
    /// Value of `column` at `row`; null for unknown columns or dead rows.
    fn value(&self, row: RowId, column: &str) -> ColumnValue;

    fn column_type(&self, column: &str) -> Option<ColumnType>;

    /// Every readable column, base columns first.
    fn column_names(&self) -> Vec<String>;

    /// Number of slots ever allocated.
    fn slots(&self) -> usize;

    fn is_live(&self, row: RowId) -> bool;

    /// Primary-key column, if the rows are keyed.
    fn key_column(&self) -> Option<&str> {
        None
    }

    /// Identity of `row` in deltas and removals.
    fn key_of(&self, row: RowId) -> ColumnValue {
        ColumnValue::Integer(row as i64)
    }

    /// Live slots in insertion order.
    fn live_rows(&self) -> Vec<RowId> {
        (0..self.slots()).filter(|&r| self.is_live(r)).collect()
    }
}

/// A computed-column layer stacked on another source.
pub struct Layered<'a> {
    pub base: &'a dyn RowSource,
    pub computed: &'a ComputedColumns,
}

impl RowSource for Layered<'_> {
    fn value(&self, row: RowId, column: &str) -> ColumnValue {
        if self.computed.contains(column) {
            self.computed.value(row, column)
        } else {
            self.base.value(row, column)
        }
    }

    fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.computed
            .column_type(column)
            .or_else(|| self.base.column_type(column))
    }

    fn column_names(&self) -> Vec<String> {
        let mut names = self.base.column_names();
        names.extend(self.computed.schema().into_iter().map(|(name, _)| name));
        names
    }

    fn slots(&self) -> usize {
        self.base.slots()
    }

    fn is_live(&self, row: RowId) -> bool {
        self.base.is_live(row)
    }

    fn key_column(&self) -> Option<&str> {
        self.base.key_column()
    }

    fn key_of(&self, row: RowId) -> ColumnValue {
        self.base.key_of(row)
    }
}

pub struct ColumnStore {
    schema: Schema,
    columns: Vec<Column>,
    index: Option<usize>,
    keys: HashMap<ColumnValue, RowId>,
    alive: Vec<bool>,
    live: usize,
}

impl ColumnStore {
    pub fn new(schema: Schema, index: Option<&str>, hint: StorageHint) -> Result<Self> {
        let mut seen = HashSet::new();
        for (name, _) in schema.iter() {
            if !seen.insert(name) {
                return Err(EngineError::InvalidSchema(format!(
                    "duplicate column '{}'",
                    name
                )));
            }
        }
        let index = match index {
            Some(name) => Some(schema.get_column_index(name).ok_or_else(|| {
                EngineError::Config(format!("index column '{}' is not in the schema", name))
            })?),
            None => None,
        };
        let columns = schema
            .iter()
            .map(|(name, ty)| Column::with_storage(name, ty, hint.use_chunked_storage()))
            .collect();

        Ok(ColumnStore {
            schema,
            columns,
            index,
            keys: HashMap::new(),
            alive: Vec::new(),
            live: 0,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn index_column(&self) -> Option<&str> {
        self.index.map(|i| self.columns[i].name())
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema
            .get_column_index(name)
            .and_then(|i| self.columns.get(i))
    }

    /// Slot holding primary key `key`.
    pub fn lookup(&self, key: &ColumnValue) -> Option<RowId> {
        self.keys.get(key).copied()
    }

    /// Identity of a row as exposed in deltas: the primary key on indexed
    /// tables, the slot number otherwise.
    pub fn row_key(&self, row: RowId) -> ColumnValue {
        match self.index {
            Some(i) => self.columns[i].get(row).unwrap_or(ColumnValue::Null),
            None => ColumnValue::Integer(row as i64),
        }
    }

    pub fn row(&self, row: RowId) -> Row {
        self.columns
            .iter()
            .map(|c| (c.name().to_string(), c.get(row).unwrap_or(ColumnValue::Null)))
            .collect()
    }

    /// Upsert conformed rows. Returns one change per touched row.
    pub fn apply_rows(&mut self, rows: Vec<Row>) -> Result<Vec<RowChange>> {
        let mut changes = Vec::with_capacity(rows.len());
        for mut row in rows {
            let existing = self
                .index
                .and_then(|i| row.get(self.columns[i].name()))
                .and_then(|key| self.keys.get(key).copied());

            match existing {
                Some(slot) => changes.push(self.update_slot(slot, row)?),
                None => {
                    let slot = self.alive.len();
                    for column in &mut self.columns {
                        let value = row.swap_remove(column.name()).unwrap_or(ColumnValue::Null);
                        column.append(value).map_err(EngineError::InvalidSchema)?;
                    }
                    if let Some(i) = self.index {
                        let key = self.columns[i].get(slot).map_err(EngineError::OutOfRange)?;
                        self.keys.insert(key, slot);
                    }
                    self.alive.push(true);
                    self.live += 1;
                    changes.push(RowChange::inserted(
                        slot,
                        self.schema.names().into_iter().map(String::from),
                    ));
                }
            }
        }
        Ok(changes)
    }

    fn update_slot(&mut self, slot: RowId, row: Row) -> Result<RowChange> {
        let mut change = RowChange::updated(slot);
        for (name, value) in row {
            let Some(i) = self.schema.get_column_index(&name) else {
                continue;
            };
            if Some(i) == self.index {
                continue;
            }
            let column = &mut self.columns[i];
            let old = column.get(slot).map_err(EngineError::OutOfRange)?;
            if old != value {
                column.set(slot, value).map_err(EngineError::InvalidSchema)?;
                change.record(&name, old);
            }
        }
        Ok(change)
    }

    /// Remove rows by primary key. Unknown keys are ignored.
    pub fn remove_keys(&mut self, keys: &[ColumnValue]) -> Result<Vec<RowChange>> {
        if self.index.is_none() {
            return Err(EngineError::Config(
                "remove requires a table with an index column".to_string(),
            ));
        }
        let mut changes = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = self.keys.get(key).copied() {
                changes.push(self.kill(slot)?);
            }
        }
        Ok(changes)
    }

    /// Remove every live row.
    pub fn clear(&mut self) -> Result<Vec<RowChange>> {
        let live: Vec<RowId> = self.live_rows();
        live.into_iter().map(|slot| self.kill(slot)).collect()
    }

    fn kill(&mut self, slot: RowId) -> Result<RowChange> {
        let old = self.row(slot);
        if let Some(i) = self.index {
            if let Some(key) = old.get(self.columns[i].name()) {
                self.keys.remove(key);
            }
        }
        // Drop the values so dictionary entries are released; the slot stays.
        for column in &mut self.columns {
            column
                .set(slot, ColumnValue::Null)
                .map_err(EngineError::OutOfRange)?;
        }
        self.alive[slot] = false;
        self.live -= 1;
        Ok(RowChange::removed(slot, old.into_iter().collect()))
    }
}

impl RowSource for ColumnStore {
    fn value(&self, row: RowId, column: &str) -> ColumnValue {
        self.column(column)
            .and_then(|c| c.get(row).ok())
            .unwrap_or(ColumnValue::Null)
    }

    fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.schema.get_column_type(column)
    }

    fn column_names(&self) -> Vec<String> {
        self.schema.names().into_iter().map(String::from).collect()
    }

    fn slots(&self) -> usize {
        self.alive.len()
    }

    fn is_live(&self, row: RowId) -> bool {
        self.alive.get(row).copied().unwrap_or(false)
    }

    fn key_column(&self) -> Option<&str> {
        self.index_column()
    }

    fn key_of(&self, row: RowId) -> ColumnValue {
        self.row_key(row)
    }
}

impl std::fmt::Debug for ColumnStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnStore")
            .field("columns", &self.columns)
            .field("index", &self.index_column())
            .field("live", &self.live)
            .field("slots", &self.alive.len())
            .finish()
    }
}
