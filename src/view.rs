//! Views
//!
//! A view binds one table to a `ViewConfig`. It keeps its own expression
//! columns, the set of rows passing its filter, a sorted row index for
//! ungrouped output and a pivot tree for grouped or split output, and follows
//! the table incrementally through `IncrementalView`.
//!
//! Output shapes:
//!
//! - flat: one row per visible table row, in sort order
//! - `group_by`: the root total row, then a depth-first walk of the groups
//! - `split_by` only: one row per table row, each value placed in its own
//!   `"key|column"` cell
//!
//! The `View` handle only holds a weak reference to its table; every call
//! fails with `UseAfterFree` once the table or the view is deleted.

use crate::aggregate::{default_aggregate, Aggregate};
use crate::changeset::{ChangeKind, Changeset, IncrementalView, RowId};
use crate::column::{ColumnType, ColumnValue};
use crate::computed::ComputedColumns;
use crate::config::{ViewConfig, Window};
use crate::data::{Row, TableData};
use crate::error::{EngineError, Result};
use crate::filter::Filter;
use crate::functions::FunctionRegistry;
use crate::notify::{
    CellChange, Delta, NotifierPhase, PendingDispatch, Subscription, SubscriptionId, UpdateCallback,
    UpdateEvent, UpdateMode,
};
use crate::pivot::{NodeDeltaKind, NodeDelta, NodeId, PivotKey, PivotSpec, PivotTree};
use crate::port::PortId;
use crate::sort::FlatIndex;
use crate::store::{Layered, RowSource};
use crate::table::{Schema, TableInner};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};

pub type ViewId = u64;

/// Name of the group path column in pivoted output and deltas.
pub const ROW_PATH: &str = "__ROW_PATH__";

const SEPARATOR: &str = "|";

fn join_key(key: &[ColumnValue]) -> String {
    key.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// `"k1|k2|column"`, or just the column for an empty key.
fn column_path(key: &[ColumnValue], column: &str) -> String {
    if key.is_empty() {
        column.to_string()
    } else {
        format!("{}{}{}", join_key(key), SEPARATOR, column)
    }
}

/// Materialised view data, column-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnsOutput {
    /// Group path of every row, for views with `group_by`.
    pub row_paths: Option<Vec<PivotKey>>,
    pub columns: Vec<(String, Vec<ColumnValue>)>,
}

impl ColumnsOutput {
    pub fn get(&self, column: &str) -> Option<&[ColumnValue]> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, values)| values.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn num_rows(&self) -> usize {
        match (&self.row_paths, self.columns.first()) {
            (Some(paths), _) => paths.len(),
            (None, Some((_, values))) => values.len(),
            (None, None) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Row-major JSON: one object per row, the group path as an array.
    pub fn to_json(&self) -> serde_json::Value {
        let rows = (0..self.num_rows())
            .map(|i| {
                let mut obj = serde_json::Map::new();
                if let Some(paths) = &self.row_paths {
                    let path = paths[i].iter().map(ColumnValue::to_json).collect();
                    obj.insert(ROW_PATH.to_string(), serde_json::Value::Array(path));
                }
                for (name, values) in &self.columns {
                    obj.insert(name.clone(), values[i].to_json());
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::Value::Array(rows)
    }

    pub fn to_csv(&self) -> String {
        let mut header: Vec<String> = Vec::new();
        if self.row_paths.is_some() {
            header.push(ROW_PATH.to_string());
        }
        header.extend(self.columns.iter().map(|(name, _)| csv_field(name)));

        let mut result = header.join(",");
        result.push('\n');
        for i in 0..self.num_rows() {
            let mut values: Vec<String> = Vec::new();
            if let Some(paths) = &self.row_paths {
                values.push(csv_field(&join_key(&paths[i])));
            }
            for (_, column) in &self.columns {
                values.push(match &column[i] {
                    ColumnValue::Null => String::new(),
                    ColumnValue::String(s) => csv_field(s),
                    other => other.to_string(),
                });
            }
            result.push_str(&values.join(","));
            result.push('\n');
        }
        result
    }

    /// The output as loadable table data. Group paths become a joined
    /// string column.
    pub fn into_data(self) -> TableData {
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        if let Some(paths) = self.row_paths {
            let joined = paths.iter().map(|p| ColumnValue::String(join_key(p))).collect();
            columns.push((ROW_PATH.to_string(), joined));
        }
        columns.extend(self.columns);
        TableData::Columns(columns)
    }
}

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Payloads computed for one (view, port) batch, one per update mode that
/// has a subscriber.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewDelta {
    pub rows: Option<(Vec<Row>, Vec<ColumnValue>)>,
    pub cells: Option<Vec<CellChange>>,
}

/// A table row whose membership or values changed for this view.
struct RowEvent {
    row: RowId,
    was: bool,
    is: bool,
    old: HashMap<String, ColumnValue>,
}

pub(crate) struct ViewState {
    id: ViewId,
    config: ViewConfig,
    expressions: ComputedColumns,
    columns: Vec<String>,
    /// Output type per column: aggregated when grouped.
    types: Vec<ColumnType>,
    /// Output columns first, then hidden sort columns.
    aggregates: Vec<(String, Aggregate)>,
    filter: Filter,
    deps: HashSet<String>,
    visible: HashSet<RowId>,
    flat: Option<FlatIndex>,
    tree: Option<PivotTree>,
    subscriptions: Vec<Subscription>,
    next_subscription: SubscriptionId,
    phase: NotifierPhase,
    generation: u64,
}

impl ViewState {
    /// Validate `config` against `source` and build the view.
    pub fn new(
        id: ViewId,
        config: ViewConfig,
        registry: &FunctionRegistry,
        source: &dyn RowSource,
        generation: u64,
    ) -> Result<Self> {
        let mut expressions = ComputedColumns::new();
        expressions
            .add(&config.expressions, registry, source)
            .map_err(|e| match e {
                EngineError::NameCollision(name) => EngineError::Config(format!(
                    "expression '{}' collides with an existing column",
                    name
                )),
                other => other,
            })?;

        let layered = Layered {
            base: source,
            computed: &expressions,
        };
        let known = |column: &str, role: &str| -> Result<ColumnType> {
            layered.column_type(column).ok_or_else(|| {
                EngineError::Config(format!("{} references unknown column '{}'", role, column))
            })
        };

        let columns = match &config.columns {
            Some(columns) => columns.clone(),
            None => layered.column_names(),
        };
        let mut seen = HashSet::new();
        let mut input_types = Vec::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(EngineError::Config(format!("column '{}' listed twice", column)));
            }
            input_types.push(known(column, "columns")?);
        }
        for column in &config.group_by {
            known(column, "group_by")?;
        }
        for column in &config.split_by {
            known(column, "split_by")?;
        }
        for key in &config.sort {
            known(&key.column, "sort")?;
        }
        for (column, aggregate) in &config.aggregates {
            known(column, "aggregates")?;
            if let Some(weight) = aggregate.weight_column() {
                let ty = known(weight, "weighted mean")?;
                if !ty.is_numeric() {
                    return Err(EngineError::Type(format!(
                        "weighted mean of '{}' needs a numeric weight column, '{}' is {}",
                        column, weight, ty
                    )));
                }
            }
        }
        let filter = Filter::resolve(&config.filter, config.filter_op, &layered)?;

        let mut types = input_types.clone();
        let mut aggregates = Vec::new();
        if config.is_pivoted() {
            let pick = |column: &str, ty: ColumnType| {
                config
                    .aggregates
                    .get(column)
                    .cloned()
                    .unwrap_or_else(|| default_aggregate(ty))
            };
            for (i, column) in columns.iter().enumerate() {
                let aggregate = pick(column, input_types[i]);
                let output = aggregate.output_type(column, input_types[i])?;
                if !config.group_by.is_empty() {
                    types[i] = output;
                }
                aggregates.push((column.clone(), aggregate));
            }
            for key in &config.sort {
                let hidden = !columns.contains(&key.column)
                    && !config.group_by.contains(&key.column)
                    && !config.split_by.contains(&key.column)
                    && !aggregates.iter().any(|(c, _)| c == &key.column);
                if hidden {
                    let ty = known(&key.column, "sort")?;
                    let aggregate = pick(&key.column, ty);
                    aggregate.output_type(&key.column, ty)?;
                    aggregates.push((key.column.clone(), aggregate));
                }
            }
        }

        let mut deps: HashSet<String> = columns.iter().cloned().collect();
        deps.extend(config.group_by.iter().cloned());
        deps.extend(config.split_by.iter().cloned());
        deps.extend(config.sort.iter().map(|k| k.column.clone()));
        deps.extend(filter.columns().map(String::from));
        deps.extend(
            aggregates
                .iter()
                .filter_map(|(_, a)| a.weight_column().map(String::from)),
        );

        log::debug!(
            "view {} created: group_by={:?} split_by={:?} columns={:?}",
            id,
            config.group_by,
            config.split_by,
            columns
        );

        let mut view = ViewState {
            id,
            config,
            expressions,
            columns,
            types,
            aggregates,
            filter,
            deps,
            visible: HashSet::new(),
            flat: None,
            tree: None,
            subscriptions: Vec::new(),
            next_subscription: 0,
            phase: NotifierPhase::Idle,
            generation,
        };
        view.build(source);
        Ok(view)
    }

    fn pivot_spec(&self) -> PivotSpec {
        PivotSpec {
            row_pivots: self.config.group_by.clone(),
            col_pivots: self.config.split_by.clone(),
            aggregates: self.aggregates.clone(),
            sort: self.config.sort.clone(),
        }
    }

    fn is_grouped(&self) -> bool {
        !self.config.group_by.is_empty()
    }

    /// Rebuild membership, row order and the pivot tree from scratch.
    fn build(&mut self, source: &dyn RowSource) {
        let layered = Layered {
            base: source,
            computed: &self.expressions,
        };
        let rows: Vec<RowId> = layered
            .live_rows()
            .into_iter()
            .filter(|&row| self.filter.matches(row, &layered))
            .collect();

        self.visible = rows.iter().copied().collect();
        self.flat = if self.is_grouped() {
            None
        } else {
            let mut index = FlatIndex::new(&self.config.sort);
            index.rebuild(&rows, &layered);
            Some(index)
        };
        self.tree = if self.config.is_pivoted() {
            Some(PivotTree::build(self.pivot_spec(), &rows, &layered))
        } else {
            None
        };
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn phase(&self) -> NotifierPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: NotifierPhase) {
        if self.phase != phase {
            log::trace!("view {}: {:?} -> {:?}", self.id, self.phase, phase);
            self.phase = phase;
        }
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.iter().cloned().zip(self.types.iter().copied()))
    }

    pub fn subscribe(&mut self, callback: UpdateCallback, mode: UpdateMode) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscriptions.push(Subscription { id, mode, callback });
        log::debug!("view {}: subscription {} ({:?})", self.id, id, mode);
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn column_paths(&self) -> Vec<String> {
        match &self.tree {
            Some(tree) if !self.config.split_by.is_empty() => tree
                .column_keys()
                .iter()
                .flat_map(|key| self.columns.iter().map(move |c| column_path(key, c)))
                .collect(),
            _ => self.columns.clone(),
        }
    }

    pub fn num_rows(&self) -> usize {
        match (&self.flat, &self.tree) {
            (Some(flat), _) => flat.len(),
            (None, Some(tree)) => tree.rows(false).len(),
            (None, None) => 0,
        }
    }

    /// `(path, column index, column key)` for every output column.
    fn column_slots(&self) -> Vec<(String, usize, Option<PivotKey>)> {
        match &self.tree {
            Some(tree) if !self.config.split_by.is_empty() => tree
                .column_keys()
                .into_iter()
                .flat_map(|key| {
                    self.columns
                        .iter()
                        .enumerate()
                        .map(move |(i, c)| (column_path(&key, c), i, Some(key.clone())))
                        .collect::<Vec<_>>()
                })
                .collect(),
            _ => self
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.clone(), i, None))
                .collect(),
        }
    }

    pub fn to_columns(&self, window: &Window, source: &dyn RowSource) -> ColumnsOutput {
        if self.visible.is_empty() {
            return ColumnsOutput::default();
        }
        let layered = Layered {
            base: source,
            computed: &self.expressions,
        };
        let slots = self.column_slots();
        let slots = &slots[window.col_range(slots.len())];

        if let (true, Some(tree)) = (self.is_grouped(), &self.tree) {
            let nodes = tree.rows(window.leaves_only);
            let nodes = &nodes[window.row_range(nodes.len())];
            let row_paths = nodes
                .iter()
                .filter_map(|&id| tree.node(id).map(|n| n.path.clone()))
                .collect();
            let columns = slots
                .iter()
                .map(|(path, i, key)| {
                    let values = nodes.iter().map(|&id| tree.value(id, key.as_ref(), *i)).collect();
                    (path.clone(), values)
                })
                .collect();
            return ColumnsOutput {
                row_paths: Some(row_paths),
                columns,
            };
        }

        let Some(flat) = &self.flat else {
            return ColumnsOutput::default();
        };
        let rows = &flat.rows()[window.row_range(flat.len())];
        let columns = slots
            .iter()
            .map(|(path, i, key)| {
                let column = &self.columns[*i];
                let values = rows
                    .iter()
                    .map(|&row| match key {
                        None => layered.value(row, column),
                        Some(key) => {
                            let own = self.tree.as_ref().and_then(|t| t.column_key_of(row));
                            if own == Some(key) {
                                layered.value(row, column)
                            } else {
                                ColumnValue::Null
                            }
                        }
                    })
                    .collect();
                (path.clone(), values)
            })
            .collect();
        ColumnsOutput {
            row_paths: None,
            columns,
        }
    }

    /// Queue one event per subscription for a computed delta.
    pub fn dispatches(&self, port_id: PortId, delta: &ViewDelta) -> Vec<PendingDispatch> {
        self.subscriptions
            .iter()
            .map(|s| {
                let payload = match s.mode {
                    UpdateMode::None => None,
                    UpdateMode::Row => delta
                        .rows
                        .clone()
                        .map(|(rows, removed)| Delta::Rows { rows, removed }),
                    UpdateMode::Cell => delta.cells.clone().map(Delta::Cells),
                };
                PendingDispatch {
                    view: self.id,
                    subscription: s.id,
                    callback: Arc::clone(&s.callback),
                    event: UpdateEvent {
                        port_id,
                        delta: payload,
                    },
                }
            })
            .collect()
    }

    fn removed_key(event: &RowEvent, source: &dyn RowSource) -> ColumnValue {
        source
            .key_column()
            .and_then(|k| event.old.get(k).cloned())
            .unwrap_or_else(|| source.key_of(event.row))
    }

    fn old_value(event: &RowEvent, column: &str, source: &dyn RowSource) -> ColumnValue {
        event
            .old
            .get(column)
            .cloned()
            .unwrap_or_else(|| source.value(event.row, column))
    }

    fn split_key(&self, row: RowId, source: &dyn RowSource) -> PivotKey {
        self.config
            .split_by
            .iter()
            .map(|c| source.value(row, c))
            .collect()
    }

    fn flat_row(&self, row: RowId, source: &dyn RowSource) -> Row {
        let mut out = Row::new();
        if let Some(key) = source.key_column() {
            out.insert(key.to_string(), source.value(row, key));
        }
        let split = self.split_key(row, source);
        for column in &self.columns {
            out.insert(column_path(&split, column), source.value(row, column));
        }
        out
    }

    fn flat_deltas(
        &self,
        events: &[RowEvent],
        source: &dyn RowSource,
        want_rows: bool,
        want_cells: bool,
    ) -> ViewDelta {
        let rows = want_rows.then(|| {
            let rows = events
                .iter()
                .filter(|e| e.is)
                .map(|e| self.flat_row(e.row, source))
                .collect();
            let removed = events
                .iter()
                .filter(|e| e.was && !e.is)
                .map(|e| Self::removed_key(e, source))
                .collect();
            (rows, removed)
        });

        let cells = want_cells.then(|| {
            let mut cells = Vec::new();
            for event in events {
                let key = if event.is {
                    source.key_of(event.row)
                } else {
                    Self::removed_key(event, source)
                };
                let mut pairs: BTreeMap<String, (ColumnValue, ColumnValue)> = BTreeMap::new();
                if event.was {
                    let split: PivotKey = self
                        .config
                        .split_by
                        .iter()
                        .map(|c| Self::old_value(event, c, source))
                        .collect();
                    for column in &self.columns {
                        pairs.entry(column_path(&split, column)).or_insert((ColumnValue::Null, ColumnValue::Null)).0 =
                            Self::old_value(event, column, source);
                    }
                }
                if event.is {
                    let split = self.split_key(event.row, source);
                    for column in &self.columns {
                        pairs.entry(column_path(&split, column)).or_insert((ColumnValue::Null, ColumnValue::Null)).1 =
                            source.value(event.row, column);
                    }
                }
                for (column, (old, new)) in pairs {
                    if old != new || old.column_type() != new.column_type() {
                        cells.push(CellChange {
                            row_key: key.clone(),
                            column,
                            old,
                            new,
                        });
                    }
                }
            }
            cells
        });
        ViewDelta { rows, cells }
    }

    fn node_row(&self, tree: &PivotTree, id: NodeId) -> Row {
        let mut out = Row::new();
        if let Some(node) = tree.node(id) {
            out.insert(ROW_PATH.to_string(), ColumnValue::String(join_key(&node.path)));
        }
        for (path, i, key) in self.column_slots() {
            out.insert(path, tree.value(id, key.as_ref(), i));
        }
        out
    }

    fn grouped_deltas(&self, deltas: &[NodeDelta], want_rows: bool, want_cells: bool) -> ViewDelta {
        let Some(tree) = &self.tree else {
            return ViewDelta::default();
        };
        let rows = want_rows.then(|| {
            let mut rows = Vec::new();
            let mut removed = Vec::new();
            for delta in deltas {
                match (delta.kind, tree.find(&delta.path)) {
                    (NodeDeltaKind::Removed, _) | (_, None) => {
                        removed.push(ColumnValue::String(join_key(&delta.path)))
                    }
                    (_, Some(id)) => rows.push(self.node_row(tree, id)),
                }
            }
            (rows, removed)
        });
        let cells = want_cells.then(|| {
            let mut cells = Vec::new();
            for delta in deltas {
                let key = ColumnValue::String(join_key(&delta.path));
                for value in &delta.values {
                    // Hidden sort aggregates are not output.
                    let Some(column) = self.columns.get(value.aggregate) else {
                        continue;
                    };
                    cells.push(CellChange {
                        row_key: key.clone(),
                        column: column_path(&value.column_key, column),
                        old: value.old.clone(),
                        new: value.new.clone(),
                    });
                }
            }
            cells
        });
        ViewDelta { rows, cells }
    }
}

impl IncrementalView for ViewState {
    type Delta = ViewDelta;

    fn apply_changes(&mut self, source: &dyn RowSource, changes: &Changeset) -> Option<ViewDelta> {
        self.set_phase(NotifierPhase::ComputingDelta);
        self.generation = changes.generation();

        let mut events = Vec::new();
        for change in changes.changes() {
            let mut changed = change.changed.clone();
            let mut old = change.old.clone();
            match change.kind {
                ChangeKind::Removed => self.expressions.clear_row(change.row, &mut changed, &mut old),
                kind => self.expressions.recompute_row(
                    change.row,
                    kind == ChangeKind::Inserted,
                    &mut changed,
                    &mut old,
                    source,
                ),
            }

            let layered = Layered {
                base: source,
                computed: &self.expressions,
            };
            let was = self.visible.contains(&change.row);
            let is = change.kind != ChangeKind::Removed
                && source.is_live(change.row)
                && self.filter.matches(change.row, &layered);
            let relevant = match change.kind {
                ChangeKind::Inserted => is,
                ChangeKind::Removed => was,
                ChangeKind::Updated => (was || is) && changed.iter().any(|c| self.deps.contains(c)),
            };
            if !relevant {
                continue;
            }
            if is {
                self.visible.insert(change.row);
            } else {
                self.visible.remove(&change.row);
            }
            events.push(RowEvent {
                row: change.row,
                was,
                is,
                old,
            });
        }

        if events.is_empty() {
            log::trace!("view {}: port {} touches nothing it depends on", self.id, changes.port_id());
            self.set_phase(NotifierPhase::Idle);
            return None;
        }

        let layered = Layered {
            base: source,
            computed: &self.expressions,
        };
        if let Some(flat) = self.flat.as_mut() {
            for event in events.iter().filter(|e| e.was) {
                flat.remove(event.row);
            }
            for event in events.iter().filter(|e| e.is) {
                flat.insert(event.row, &layered);
            }
        }
        let mut node_deltas = Vec::new();
        if let Some(tree) = self.tree.as_mut() {
            let updates: Vec<(RowId, bool)> = events.iter().map(|e| (e.row, e.is)).collect();
            node_deltas = tree.apply(&updates, &layered);
        }

        let want_rows = self.subscriptions.iter().any(|s| s.mode == UpdateMode::Row);
        let want_cells = self.subscriptions.iter().any(|s| s.mode == UpdateMode::Cell);
        let delta = if self.is_grouped() {
            if node_deltas.is_empty() {
                self.set_phase(NotifierPhase::Idle);
                return None;
            }
            self.grouped_deltas(&node_deltas, want_rows, want_cells)
        } else {
            self.flat_deltas(&events, &layered, want_rows, want_cells)
        };
        log::trace!(
            "view {}: {} row events, {} node deltas on port {}",
            self.id,
            events.len(),
            node_deltas.len(),
            changes.port_id()
        );
        Some(delta)
    }

    fn last_synced_generation(&self) -> u64 {
        self.generation
    }

    fn rebuild(&mut self, source: &dyn RowSource) {
        let mut changed = BTreeSet::new();
        let mut old = HashMap::new();
        for row in source.live_rows() {
            self.expressions
                .recompute_row(row, true, &mut changed, &mut old, source);
        }
        self.build(source);
    }
}

/// Handle to a view.
///
/// ```
/// use livepivot::{ColumnType, ColumnValue, Schema, Table, TableOptions, ViewConfig, Window};
///
/// let table = Table::new(
///     Schema::new([("region", ColumnType::String), ("sales", ColumnType::Float)]),
///     TableOptions::new(),
/// ).unwrap();
/// table.update_json(r#"[{"region": "east", "sales": 2.5}, {"region": "east", "sales": 1.0}]"#).unwrap();
///
/// let view = table.view(ViewConfig::new().group_by(["region"]).columns(["sales"])).unwrap();
/// let out = view.to_columns(Window::all()).unwrap();
/// assert_eq!(out.get("sales").unwrap(), &[ColumnValue::Float(3.5), ColumnValue::Float(3.5)]);
/// ```
pub struct View {
    table: Weak<TableInner>,
    id: ViewId,
}

impl View {
    pub(crate) fn new(table: Weak<TableInner>, id: ViewId) -> Self {
        View { table, id }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ViewState, &dyn RowSource) -> R) -> Result<R> {
        let table = self
            .table
            .upgrade()
            .ok_or(EngineError::UseAfterFree("table"))?;
        table.with_view(self.id, f)
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn config(&self) -> Result<ViewConfig> {
        self.with(|view, _| view.config().clone())
    }

    /// Output column names and types; computed columns included, aggregated
    /// types for grouped views.
    pub fn schema(&self) -> Result<Schema> {
        self.with(|view, _| view.schema())
    }

    pub fn column_paths(&self) -> Result<Vec<String>> {
        self.with(|view, _| view.column_paths())
    }

    pub fn num_rows(&self) -> Result<usize> {
        self.with(|view, _| view.num_rows())
    }

    pub fn num_columns(&self) -> Result<usize> {
        self.with(|view, _| view.column_paths().len())
    }

    pub fn to_columns(&self, window: Window) -> Result<ColumnsOutput> {
        self.with(|view, source| view.to_columns(&window, source))
    }

    pub fn to_json(&self, window: Window) -> Result<serde_json::Value> {
        Ok(self.to_columns(window)?.to_json())
    }

    pub fn to_csv(&self, window: Window) -> Result<String> {
        Ok(self.to_columns(window)?.to_csv())
    }

    /// Register `callback` for every update batch that changes this view.
    pub fn on_update<F>(&self, callback: F, mode: UpdateMode) -> Result<SubscriptionId>
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        let callback: UpdateCallback = Arc::new(callback);
        self.with(move |view, _| view.subscribe(callback, mode))
    }

    /// Returns false if the subscription was already gone.
    pub fn remove_update(&self, subscription: SubscriptionId) -> Result<bool> {
        self.with(|view, _| view.unsubscribe(subscription))
    }

    /// Release the view. The table and its other views are unaffected.
    pub fn delete(&self) -> Result<()> {
        let table = self
            .table
            .upgrade()
            .ok_or(EngineError::UseAfterFree("table"))?;
        table.drop_view(self.id)
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").field("id", &self.id).finish()
    }
}
