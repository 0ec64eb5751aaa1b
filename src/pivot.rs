//! Pivot tree
//!
//! Rows are grouped by the row-pivot columns into a tree: the root holds
//! every visible row, each level below splits by the next pivot column.
//! Column pivots do not add nodes; instead every node keeps one cell per
//! column-pivot key (`["east"]`, `["east", "2024"]`, ...), each with its
//! own member set and aggregate values.
//!
//! # Incremental maintenance
//!
//! `apply` takes the rows whose membership or values changed. Each row is
//! pulled out of every node and cell on its old path and pushed into every
//! node and cell on its new path (the two paths differ when a pivot value
//! changed). A row's aggregate inputs are read once when it is filed and
//! kept with its leaf, so pulling it out subtracts exactly what it added
//! and only the changed rows are read from the source. Aggregate states do
//! not depend on the order rows arrived in, so an incrementally maintained
//! tree always equals one rebuilt from scratch. Nodes left without members
//! are pruned, and touched siblings are re-sorted.

use crate::aggregate::{Aggregate, AggregateState, Contribution};
use crate::changeset::RowId;
use crate::column::ColumnValue;
use crate::sort::{SortDirection, SortSpec};
use crate::store::RowSource;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type NodeId = usize;

/// Values of the pivot columns along a path, outermost first.
pub type PivotKey = Vec<ColumnValue>;

pub const ROOT: NodeId = 0;

#[derive(Debug, Clone, Default)]
pub struct PivotSpec {
    pub row_pivots: Vec<String>,
    pub col_pivots: Vec<String>,
    /// Aggregated columns, including hidden sort columns.
    pub aggregates: Vec<(String, Aggregate)>,
    pub sort: Vec<SortSpec>,
}

impl PivotSpec {
    pub fn aggregate_index(&self, column: &str) -> Option<usize> {
        self.aggregates.iter().position(|(c, _)| c == column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotCell {
    pub members: BTreeSet<RowId>,
    pub values: Vec<ColumnValue>,
    states: Vec<AggregateState>,
}

impl PivotCell {
    fn new(states: Vec<AggregateState>) -> Self {
        PivotCell {
            members: BTreeSet::new(),
            values: Vec::new(),
            states,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PivotNode {
    pub path: PivotKey,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub members: BTreeSet<RowId>,
    pub totals: Vec<ColumnValue>,
    pub cells: BTreeMap<PivotKey, PivotCell>,
    states: Vec<AggregateState>,
}

impl PivotNode {
    fn new(path: PivotKey, parent: Option<NodeId>, states: Vec<AggregateState>) -> Self {
        PivotNode {
            path,
            parent,
            children: Vec::new(),
            members: BTreeSet::new(),
            totals: Vec::new(),
            cells: BTreeMap::new(),
            states,
        }
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    fn values(&self) -> NodeValues {
        NodeValues {
            totals: self.totals.clone(),
            cells: self
                .cells
                .iter()
                .map(|(k, c)| (k.clone(), c.values.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct NodeValues {
    totals: Vec<ColumnValue>,
    cells: BTreeMap<PivotKey, Vec<ColumnValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeDeltaKind {
    Added,
    Changed,
    Removed,
}

/// One aggregate value that moved. `column_key` is empty for node totals.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub column_key: PivotKey,
    pub aggregate: usize,
    pub old: ColumnValue,
    pub new: ColumnValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDelta {
    pub path: PivotKey,
    pub kind: NodeDeltaKind,
    pub values: Vec<ValueChange>,
}

#[derive(Debug, Clone)]
struct LeafPath {
    row: PivotKey,
    col: PivotKey,
    /// One per aggregate, as read when the row was filed.
    inputs: Vec<Contribution>,
}

/// Node path, totals and cell values in display order. Two trees with equal
/// snapshots render identically.
pub type TreeSnapshot = Vec<(PivotKey, Vec<ColumnValue>, BTreeMap<PivotKey, Vec<ColumnValue>>)>;

#[derive(Debug, Clone)]
pub struct PivotTree {
    spec: PivotSpec,
    nodes: Vec<Option<PivotNode>>,
    free: Vec<NodeId>,
    by_path: HashMap<PivotKey, NodeId>,
    leaves: HashMap<RowId, LeafPath>,
    column_keys: BTreeMap<PivotKey, usize>,
}

impl PivotTree {
    pub fn new(spec: PivotSpec) -> Self {
        let root = PivotNode::new(Vec::new(), None, fresh_states(&spec));
        PivotTree {
            spec,
            nodes: vec![Some(root)],
            free: Vec::new(),
            by_path: HashMap::from([(Vec::new(), ROOT)]),
            leaves: HashMap::new(),
            column_keys: BTreeMap::new(),
        }
    }

    /// Build a tree over `rows` from scratch.
    pub fn build(spec: PivotSpec, rows: &[RowId], source: &dyn RowSource) -> Self {
        let mut tree = Self::new(spec);
        let updates: Vec<(RowId, bool)> = rows.iter().map(|&r| (r, true)).collect();
        tree.apply(&updates, source);
        tree
    }

    pub fn spec(&self) -> &PivotSpec {
        &self.spec
    }

    pub fn node(&self, id: NodeId) -> Option<&PivotNode> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn root(&self) -> Option<&PivotNode> {
        self.node(ROOT)
    }

    pub fn find(&self, path: &[ColumnValue]) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Column-pivot key a row is filed under.
    pub fn column_key_of(&self, row: RowId) -> Option<&PivotKey> {
        self.leaves.get(&row).map(|l| &l.col)
    }

    /// Aggregate `aggregate` of `node`, from the cell at `column_key` or from
    /// the node totals.
    pub fn value(&self, node: NodeId, column_key: Option<&PivotKey>, aggregate: usize) -> ColumnValue {
        let Some(node) = self.node(node) else {
            return ColumnValue::Null;
        };
        let values = match column_key {
            Some(key) => node.cells.get(key).map(|c| &c.values),
            None => Some(&node.totals),
        };
        values
            .and_then(|v| v.get(aggregate))
            .cloned()
            .unwrap_or(ColumnValue::Null)
    }

    /// Move `rows` to their current paths. `(row, true)` files the row under
    /// its current pivot values, `(row, false)` removes it.
    pub fn apply(&mut self, updates: &[(RowId, bool)], source: &dyn RowSource) -> Vec<NodeDelta> {
        let mut before: HashMap<NodeId, Option<NodeValues>> = HashMap::new();
        let mut dirty: BTreeSet<NodeId> = BTreeSet::new();
        let mut dirty_cells: BTreeSet<(NodeId, PivotKey)> = BTreeSet::new();
        let split = !self.spec.col_pivots.is_empty();

        for &(row, visible) in updates {
            if let Some(old) = self.leaves.remove(&row) {
                for id in self.path_ids(&old.row) {
                    self.capture(id, &mut before);
                    if let Some(node) = self.nodes[id].as_mut() {
                        node.members.remove(&row);
                        retract(&mut node.states, row, &old.inputs);
                        if let Some(cell) = node.cells.get_mut(&old.col) {
                            cell.members.remove(&row);
                            retract(&mut cell.states, row, &old.inputs);
                        }
                    }
                    dirty.insert(id);
                    if split {
                        dirty_cells.insert((id, old.col.clone()));
                    }
                }
                if let Some(count) = self.column_keys.get_mut(&old.col) {
                    *count -= 1;
                    if *count == 0 {
                        self.column_keys.remove(&old.col);
                    }
                }
            }

            if visible {
                let leaf = self.leaf_path(row, source);
                let empty = fresh_states(&self.spec);
                for id in self.ensure_path(&leaf.row, &mut before) {
                    self.capture(id, &mut before);
                    if let Some(node) = self.nodes[id].as_mut() {
                        node.members.insert(row);
                        include(&mut node.states, row, &leaf.inputs);
                        if split {
                            let cell = node
                                .cells
                                .entry(leaf.col.clone())
                                .or_insert_with(|| PivotCell::new(empty.clone()));
                            cell.members.insert(row);
                            include(&mut cell.states, row, &leaf.inputs);
                        }
                    }
                    dirty.insert(id);
                    if split {
                        dirty_cells.insert((id, leaf.col.clone()));
                    }
                }
                *self.column_keys.entry(leaf.col.clone()).or_default() += 1;
                self.leaves.insert(row, leaf);
            }
        }

        self.recompute(&dirty, &dirty_cells, source);
        let removed = self.prune(&dirty);
        self.resort(&dirty);
        self.deltas(&dirty, removed, before)
    }

    /// Node ids from the root down to `path`, for nodes that exist.
    fn path_ids(&self, path: &[ColumnValue]) -> Vec<NodeId> {
        (0..=path.len())
            .filter_map(|depth| self.by_path.get(&path[..depth]).copied())
            .collect()
    }

    fn leaf_path(&self, row: RowId, source: &dyn RowSource) -> LeafPath {
        LeafPath {
            row: self.spec.row_pivots.iter().map(|c| source.value(row, c)).collect(),
            col: self.spec.col_pivots.iter().map(|c| source.value(row, c)).collect(),
            inputs: self
                .spec
                .aggregates
                .iter()
                .map(|(column, agg)| agg.contribution(row, column, source))
                .collect(),
        }
    }

    fn ensure_path(
        &mut self,
        path: &[ColumnValue],
        before: &mut HashMap<NodeId, Option<NodeValues>>,
    ) -> Vec<NodeId> {
        let mut ids = vec![ROOT];
        for depth in 1..=path.len() {
            let prefix = &path[..depth];
            let id = match self.by_path.get(prefix) {
                Some(&id) => id,
                None => {
                    let parent = ids[depth - 1];
                    let node = PivotNode::new(prefix.to_vec(), Some(parent), fresh_states(&self.spec));
                    let id = match self.free.pop() {
                        Some(id) => {
                            self.nodes[id] = Some(node);
                            id
                        }
                        None => {
                            self.nodes.push(Some(node));
                            self.nodes.len() - 1
                        }
                    };
                    if let Some(p) = self.nodes[parent].as_mut() {
                        p.children.push(id);
                    }
                    self.by_path.insert(prefix.to_vec(), id);
                    before.insert(id, None);
                    id
                }
            };
            ids.push(id);
        }
        ids
    }

    fn capture(&self, id: NodeId, before: &mut HashMap<NodeId, Option<NodeValues>>) {
        if !before.contains_key(&id) {
            before.insert(id, self.node(id).map(PivotNode::values));
        }
    }

    fn recompute(
        &mut self,
        dirty: &BTreeSet<NodeId>,
        dirty_cells: &BTreeSet<(NodeId, PivotKey)>,
        source: &dyn RowSource,
    ) {
        let PivotTree {
            spec, nodes, leaves, ..
        } = self;
        let evaluate = |members: &BTreeSet<RowId>, states: &mut [AggregateState]| -> Vec<ColumnValue> {
            spec.aggregates
                .iter()
                .zip(states.iter_mut())
                .enumerate()
                .map(|(i, ((column, agg), state))| {
                    state.value(agg, members, column, source).unwrap_or_else(|| {
                        let inputs: Vec<(RowId, &Contribution)> = members
                            .iter()
                            .filter_map(|r| leaves.get(r).and_then(|l| l.inputs.get(i)).map(|c| (*r, c)))
                            .collect();
                        agg.refold(state, &inputs, members, column, source)
                    })
                })
                .collect()
        };
        for &id in dirty {
            if let Some(node) = nodes[id].as_mut() {
                node.totals = evaluate(&node.members, node.states.as_mut_slice());
            }
        }
        for (id, key) in dirty_cells {
            let Some(node) = nodes[*id].as_mut() else {
                continue;
            };
            let empty = match node.cells.get_mut(key) {
                Some(cell) if !cell.members.is_empty() => {
                    cell.values = evaluate(&cell.members, cell.states.as_mut_slice());
                    false
                }
                Some(_) => true,
                None => false,
            };
            if empty {
                node.cells.remove(key);
            }
        }
    }

    /// Drop non-root nodes without members, deepest first.
    fn prune(&mut self, dirty: &BTreeSet<NodeId>) -> Vec<(NodeId, PivotKey)> {
        let mut empty: Vec<NodeId> = dirty
            .iter()
            .copied()
            .filter(|&id| id != ROOT && self.node(id).is_some_and(|n| n.members.is_empty()))
            .collect();
        empty.sort_by_key(|&id| std::cmp::Reverse(self.node(id).map_or(0, PivotNode::depth)));

        let mut removed = Vec::with_capacity(empty.len());
        for id in empty {
            let Some(node) = self.nodes[id].take() else {
                continue;
            };
            if let Some(parent) = node.parent.and_then(|p| self.nodes[p].as_mut()) {
                parent.children.retain(|&c| c != id);
            }
            self.by_path.remove(&node.path);
            self.free.push(id);
            removed.push((id, node.path));
        }
        removed
    }

    fn resort(&mut self, dirty: &BTreeSet<NodeId>) {
        let parents: BTreeSet<NodeId> = dirty
            .iter()
            .filter_map(|&id| self.node(id).and_then(|n| n.parent))
            .collect();
        for parent in parents {
            let Some(mut children) = self.node(parent).map(|n| n.children.clone()) else {
                continue;
            };
            children.sort_by(|&a, &b| self.compare_siblings(a, b));
            if let Some(node) = self.nodes[parent].as_mut() {
                node.children = children;
            }
        }
    }

    /// Sibling order: row sort keys, then the node's own pivot value.
    fn compare_siblings(&self, a: NodeId, b: NodeId) -> Ordering {
        let (Some(na), Some(nb)) = (self.node(a), self.node(b)) else {
            return a.cmp(&b);
        };
        let depth = na.depth();
        let level_column = self.spec.row_pivots.get(depth.wrapping_sub(1));
        for key in &self.spec.sort {
            if !key.direction.is_active()
                || key.direction.is_column()
                || self.spec.col_pivots.contains(&key.column)
            {
                continue;
            }
            let (va, vb) = if Some(&key.column) == level_column {
                (na.path.last(), nb.path.last())
            } else if self.spec.row_pivots.contains(&key.column) {
                continue;
            } else {
                let Some(idx) = self.spec.aggregate_index(&key.column) else {
                    continue;
                };
                (na.totals.get(idx), nb.totals.get(idx))
            };
            let null = ColumnValue::Null;
            let ord = key
                .direction
                .compare(va.unwrap_or(&null), vb.unwrap_or(&null));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        na.path.last().cmp(&nb.path.last())
    }

    fn deltas(
        &self,
        dirty: &BTreeSet<NodeId>,
        removed: Vec<(NodeId, PivotKey)>,
        mut before: HashMap<NodeId, Option<NodeValues>>,
    ) -> Vec<NodeDelta> {
        let empty = NodeValues {
            totals: Vec::new(),
            cells: BTreeMap::new(),
        };
        let mut out = Vec::new();
        for (id, path) in removed {
            // Created and emptied within this batch: never observed.
            if let Some(Some(old)) = before.remove(&id) {
                out.push(NodeDelta {
                    path,
                    kind: NodeDeltaKind::Removed,
                    values: self.diff(&old, &empty),
                });
            }
        }

        for &id in dirty {
            let Some(node) = self.node(id) else {
                continue;
            };
            let Some(old) = before.remove(&id) else {
                continue;
            };
            let kind = if old.is_some() {
                NodeDeltaKind::Changed
            } else {
                NodeDeltaKind::Added
            };
            let values = self.diff(old.as_ref().unwrap_or(&empty), &node.values());
            if kind == NodeDeltaKind::Added || !values.is_empty() {
                out.push(NodeDelta {
                    path: node.path.clone(),
                    kind,
                    values,
                });
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    fn diff(&self, old: &NodeValues, new: &NodeValues) -> Vec<ValueChange> {
        let len = self.spec.aggregates.len();
        let mut values = Vec::new();
        if self.spec.col_pivots.is_empty() {
            diff_values(&Vec::new(), &old.totals, &new.totals, len, &mut values);
        } else {
            let keys: BTreeSet<&PivotKey> = old.cells.keys().chain(new.cells.keys()).collect();
            for key in keys {
                diff_values(
                    key,
                    old.cells.get(key).map(Vec::as_slice).unwrap_or(&[]),
                    new.cells.get(key).map(Vec::as_slice).unwrap_or(&[]),
                    len,
                    &mut values,
                );
            }
        }
        values
    }

    /// Column-pivot keys in display order.
    ///
    /// `col` sort keys order groups by the root cell's aggregate; a sort key
    /// on a split column sets that level's direction. Remaining ties go to
    /// ascending key order.
    pub fn column_keys(&self) -> Vec<PivotKey> {
        let mut keys: Vec<PivotKey> = self.column_keys.keys().cloned().collect();
        let root = self.root();
        let col_sorts: Vec<(usize, SortDirection)> = self
            .spec
            .sort
            .iter()
            .filter(|k| k.direction.is_column() && !self.spec.col_pivots.contains(&k.column))
            .filter_map(|k| self.spec.aggregate_index(&k.column).map(|i| (i, k.direction)))
            .collect();
        let level_dirs: Vec<SortDirection> = self
            .spec
            .col_pivots
            .iter()
            .map(|c| {
                self.spec
                    .sort
                    .iter()
                    .find(|k| &k.column == c && k.direction.is_active())
                    .map(|k| {
                        if k.direction.is_descending() {
                            SortDirection::Desc
                        } else {
                            SortDirection::Asc
                        }
                    })
                    .unwrap_or(SortDirection::Asc)
            })
            .collect();

        keys.sort_by(|a, b| {
            for &(idx, dir) in &col_sorts {
                let value = |k: &PivotKey| {
                    root.and_then(|r| r.cells.get(k))
                        .and_then(|c| c.values.get(idx))
                        .cloned()
                        .unwrap_or(ColumnValue::Null)
                };
                let ord = dir.compare(&value(a), &value(b));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            for (level, dir) in level_dirs.iter().enumerate() {
                let ord = dir.compare(&a[level], &b[level]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        keys
    }

    /// Nodes in display order: depth-first, root first. `leaves_only` keeps
    /// just the nodes at full pivot depth.
    pub fn rows(&self, leaves_only: bool) -> Vec<NodeId> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        if root.members.is_empty() {
            return Vec::new();
        }
        let leaf_depth = self.spec.row_pivots.len();
        let mut out = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if !leaves_only || node.depth() == leaf_depth {
                out.push(id);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.rows(false)
            .into_iter()
            .filter_map(|id| self.node(id))
            .map(|n| {
                let v = n.values();
                (n.path.clone(), v.totals, v.cells)
            })
            .collect()
    }
}

fn fresh_states(spec: &PivotSpec) -> Vec<AggregateState> {
    spec.aggregates.iter().map(|(_, agg)| agg.state()).collect()
}

fn include(states: &mut [AggregateState], row: RowId, inputs: &[Contribution]) {
    for (state, input) in states.iter_mut().zip(inputs) {
        state.add(row, input);
    }
}

fn retract(states: &mut [AggregateState], row: RowId, inputs: &[Contribution]) {
    for (state, input) in states.iter_mut().zip(inputs) {
        state.remove(row, input);
    }
}

fn diff_values(
    key: &PivotKey,
    old: &[ColumnValue],
    new: &[ColumnValue],
    len: usize,
    out: &mut Vec<ValueChange>,
) {
    let null = ColumnValue::Null;
    for i in 0..len {
        let (o, n) = (old.get(i).unwrap_or(&null), new.get(i).unwrap_or(&null));
        // Bitwise comparison so that 0.0 -> -0.0 and NaN transitions surface.
        let same = match (o, n) {
            (ColumnValue::Float(a), ColumnValue::Float(b)) => a.to_bits() == b.to_bits(),
            _ => o == n && o.column_type() == n.column_type(),
        };
        if !same {
            out.push(ValueChange {
                column_key: key.clone(),
                aggregate: i,
                old: o.clone(),
                new: n.clone(),
            });
        }
    }
}
