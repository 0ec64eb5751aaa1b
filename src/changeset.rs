//! Changeset - incremental change propagation
//!
//! When a batch is applied to a table, the store records one `RowChange` per
//! touched row: which slot, what kind of change, which columns actually took
//! a new value, and what those columns held before. Views consume the
//! changeset instead of rescanning the table.
//!
//! # Folding
//!
//! Several batches queued on the same port are folded into a single
//! changeset, so a view sees one delta per (view, port). Folding keeps the
//! first recorded old value of a column and the union of changed columns:
//!
//! - `Inserted` then `Updated` stays `Inserted`
//! - anything then `Removed` becomes `Removed`

use crate::column::ColumnValue;
use crate::port::PortId;
use std::collections::{BTreeSet, HashMap};

/// Stable row slot. Slots are never reused, so slot order is insertion order.
pub type RowId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Removed,
}

/// Change to a single row slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub row: RowId,
    pub kind: ChangeKind,
    /// Columns whose value actually changed (base and computed).
    pub changed: BTreeSet<String>,
    /// Values of `changed` columns before the batch.
    pub old: HashMap<String, ColumnValue>,
}

impl RowChange {
    pub fn inserted(row: RowId, columns: impl IntoIterator<Item = String>) -> Self {
        RowChange {
            row,
            kind: ChangeKind::Inserted,
            changed: columns.into_iter().collect(),
            old: HashMap::new(),
        }
    }

    pub fn updated(row: RowId) -> Self {
        RowChange {
            row,
            kind: ChangeKind::Updated,
            changed: BTreeSet::new(),
            old: HashMap::new(),
        }
    }

    pub fn removed(row: RowId, old: HashMap<String, ColumnValue>) -> Self {
        RowChange {
            row,
            kind: ChangeKind::Removed,
            changed: old.keys().cloned().collect(),
            old,
        }
    }

    /// Record that `column` moved away from `old`.
    pub fn record(&mut self, column: &str, old: ColumnValue) {
        self.changed.insert(column.to_string());
        self.old.entry(column.to_string()).or_insert(old);
    }

    pub fn is_noop(&self) -> bool {
        self.kind == ChangeKind::Updated && self.changed.is_empty()
    }

    /// Old value of `column`, if it changed in this batch.
    pub fn old_value(&self, column: &str) -> Option<&ColumnValue> {
        self.old.get(column)
    }

    fn fold(&mut self, later: RowChange) {
        for (column, value) in later.old {
            self.old.entry(column).or_insert(value);
        }
        self.changed.extend(later.changed);
        self.kind = match (self.kind, later.kind) {
            (_, ChangeKind::Removed) => ChangeKind::Removed,
            (ChangeKind::Inserted, _) => ChangeKind::Inserted,
            (_, kind) => kind,
        };
    }
}

/// All row changes produced by the batches of one port in one drain cycle.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    port_id: PortId,
    changes: Vec<RowChange>,
    positions: HashMap<RowId, usize>,
    generation: u64,
}

impl Changeset {
    pub fn new(port_id: PortId) -> Self {
        Changeset {
            port_id,
            ..Default::default()
        }
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Add a change, folding it into an earlier change to the same row.
    pub fn push(&mut self, change: RowChange) {
        if change.is_noop() {
            return;
        }
        match self.positions.get(&change.row) {
            Some(&pos) => self.changes[pos].fold(change),
            None => {
                self.positions.insert(change.row, self.changes.len());
                self.changes.push(change);
            }
        }
    }

    pub fn changes(&self) -> &[RowChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Union of changed column names across all rows.
    pub fn changed_columns(&self) -> BTreeSet<&str> {
        self.changes
            .iter()
            .flat_map(|c| c.changed.iter().map(String::as_str))
            .collect()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }
}

/// Trait for derived structures that follow a table incrementally.
pub trait IncrementalView {
    /// Output produced when a changeset touches the view.
    type Delta;

    /// Apply a changeset. Returns `None` when nothing the view depends on
    /// changed.
    fn apply_changes(
        &mut self,
        source: &dyn crate::store::RowSource,
        changes: &Changeset,
    ) -> Option<Self::Delta>;

    /// Generation of the last changeset applied.
    fn last_synced_generation(&self) -> u64;

    /// Recompute everything from the current table contents.
    fn rebuild(&mut self, source: &dyn crate::store::RowSource);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_update_folds_into_insert() {
        let mut cs = Changeset::new(0);
        cs.push(RowChange::inserted(3, vec!["x".to_string()]));

        let mut upd = RowChange::updated(3);
        upd.record("y", ColumnValue::Null);
        cs.push(upd);

        assert_eq!(cs.len(), 1);
        let change = &cs.changes()[0];
        assert_eq!(change.kind, ChangeKind::Inserted);
        assert!(change.changed.contains("x"));
        assert!(change.changed.contains("y"));
    }

    #[test]
    fn test_fold_keeps_first_old_value() {
        let mut cs = Changeset::new(2);
        let mut first = RowChange::updated(0);
        first.record("x", ColumnValue::Integer(1));
        cs.push(first);
        let mut second = RowChange::updated(0);
        second.record("x", ColumnValue::Integer(5));
        cs.push(second);

        assert_eq!(cs.changes()[0].old_value("x"), Some(&ColumnValue::Integer(1)));
        assert_eq!(cs.port_id(), 2);
    }

    #[test]
    fn test_removal_wins_and_noops_are_dropped() {
        let mut cs = Changeset::new(0);
        cs.push(RowChange::updated(1));
        assert!(cs.is_empty());

        let mut upd = RowChange::updated(1);
        upd.record("x", ColumnValue::Integer(1));
        cs.push(upd);
        cs.push(RowChange::removed(1, HashMap::new()));
        assert_eq!(cs.changes()[0].kind, ChangeKind::Removed);
        assert_eq!(cs.changed_columns().into_iter().collect::<Vec<_>>(), vec!["x"]);
    }
}
