//! Tables
//!
//! A `Table` is a cheap, cloneable handle to a columnar store, its computed
//! columns, its ports and the views derived from it. All of that lives behind
//! one lock, so a batch is applied to the store, the computed columns and
//! every view before anyone else can look at the table.
//!
//! # Update pipeline
//!
//! `update` = `enqueue` + `process`. `enqueue` validates a batch against the
//! schema and parks it under its port; `process` drains the queue lowest port
//! first. Each drained port produces one changeset, every view turns it into
//! at most one delta, and callbacks run after the lock is released.
//!
//! A callback may update the table again. The nested call queues its batch
//! and returns; the outer drain loop picks it up after the current dispatch.
//!
//! # Examples
//!
//! ```
//! use livepivot::{ColumnType, Schema, Table, TableOptions, UpdateOptions};
//!
//! let table = Table::new(
//!     Schema::new([("w", ColumnType::Float), ("x", ColumnType::Integer)]),
//!     TableOptions::new().index("w"),
//! ).unwrap();
//!
//! table.update_json(r#"{"w": [1.5, 2.5], "x": [1, 2]}"#).unwrap();
//! let port = table.make_port().unwrap();
//! table.update_json_on(r#"[{"w": 1.5, "x": 99}]"#, UpdateOptions::port(port)).unwrap();
//!
//! assert_eq!(table.size().unwrap(), 2);
//! ```

use crate::changeset::{ChangeKind, Changeset, IncrementalView};
use crate::column::{ColumnType, ColumnValue};
use crate::computed::{ComputedColumnSpec, ComputedColumns};
use crate::config::{TableOptions, UpdateOptions, ViewConfig};
use crate::data::{conform_rows, TableData};
use crate::error::{EngineError, Result};
use crate::functions::FunctionRegistry;
use crate::notify::{self, NotifierPhase, PendingDispatch};
use crate::port::{Batch, PendingBatches, PortId, PortManager, DEFAULT_PORT};
use crate::store::{ColumnStore, Layered, RowSource};
use crate::view::{View, ViewId, ViewState};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Hint for selecting the underlying storage strategy.
///
/// This allows users to optimize for their workload without needing to
/// understand the implementation details of the underlying data structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageHint {
    /// Contiguous columns (default).
    ///
    /// Best for: append-mostly feeds, analytics, streaming data.
    #[default]
    FastReads,

    /// Columns split into fixed-size blocks.
    ///
    /// Best for: very large tables with heavy in-place updates, where
    /// growing one contiguous buffer per column gets expensive.
    FastUpdates,
}

impl StorageHint {
    /// Parse a storage hint from a string.
    ///
    /// Accepts: "fast_reads", "fast_updates"
    pub fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_lowercase().as_str() {
            "fast_reads" | "fastreads" => Ok(StorageHint::FastReads),
            "fast_updates" | "fastupdates" => Ok(StorageHint::FastUpdates),
            _ => Err(format!(
                "Unknown storage hint: '{}'. Use 'fast_reads' or 'fast_updates'",
                s
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageHint::FastReads => "fast_reads",
            StorageHint::FastUpdates => "fast_updates",
        }
    }

    /// Returns true if this hint uses chunked column storage.
    pub(crate) fn use_chunked_storage(&self) -> bool {
        matches!(self, StorageHint::FastUpdates)
    }
}

/// Ordered column names and types.
///
/// Serialises as a JSON object that keeps the column order.
///
/// ```
/// use livepivot::{Schema, ColumnType};
///
/// let schema = Schema::from_json(r#"{"id": "integer", "email": "string"}"#).unwrap();
///
/// assert_eq!(schema.len(), 2);
/// assert_eq!(schema.get_column_index("email"), Some(1));
/// assert_eq!(schema.get_column_type("id"), Some(ColumnType::Integer));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = (S, ColumnType)>) -> Self {
        Schema {
            columns: columns.into_iter().map(|(n, t)| (n.into(), t)).collect(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the number of columns in the schema.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> + '_ {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// Returns the index of a column by name, or None if not found.
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name)
    }

    /// Returns the type of a column by name, or None if not found.
    pub fn get_column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_column_index(name).is_some()
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, ty) in &self.columns {
            map.serialize_entry(name, ty)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Schema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to type")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Schema, A::Error> {
                let mut columns = Vec::new();
                while let Some((name, ty)) = access.next_entry::<String, ColumnType>()? {
                    columns.push((name, ty));
                }
                Ok(Schema { columns })
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct TableState {
    store: ColumnStore,
    computed: ComputedColumns,
    ports: PortManager,
    views: BTreeMap<ViewId, ViewState>,
    next_view: ViewId,
    generation: u64,
}

impl TableState {
    fn source(&self) -> Layered<'_> {
        Layered {
            base: &self.store,
            computed: &self.computed,
        }
    }

    /// Apply every batch queued on `port` as one changeset and collect the
    /// callbacks to run.
    fn apply_port(&mut self, port: PortId, batches: Vec<Batch>) -> Result<Vec<PendingDispatch>> {
        let TableState {
            store,
            computed,
            views,
            generation,
            ..
        } = self;

        let mut changeset = Changeset::new(port);
        for batch in batches {
            let changes = match batch {
                Batch::Rows(rows) => store.apply_rows(rows)?,
                Batch::Remove(keys) => store.remove_keys(&keys)?,
                Batch::Clear => store.clear()?,
            };
            for mut change in changes {
                match change.kind {
                    ChangeKind::Removed => {
                        computed.clear_row(change.row, &mut change.changed, &mut change.old)
                    }
                    kind => computed.recompute_row(
                        change.row,
                        kind == ChangeKind::Inserted,
                        &mut change.changed,
                        &mut change.old,
                        &*store,
                    ),
                }
                changeset.push(change);
            }
        }

        if changeset.is_empty() {
            log::trace!("port {}: batch changed nothing", port);
            return Ok(Vec::new());
        }
        *generation += 1;
        changeset.set_generation(*generation);
        log::trace!(
            "port {}: {} rows changed, generation {}",
            port,
            changeset.len(),
            generation
        );

        let source = Layered {
            base: &*store,
            computed: &*computed,
        };
        let mut pending = Vec::new();
        for view in views.values_mut() {
            match view.apply_changes(&source, &changeset) {
                Some(delta) => {
                    view.set_phase(NotifierPhase::Dispatching);
                    pending.extend(view.dispatches(port, &delta));
                }
                None => view.set_phase(NotifierPhase::Idle),
            }
        }
        Ok(pending)
    }

    fn finish_dispatch(&mut self) {
        for view in self.views.values_mut() {
            view.set_phase(NotifierPhase::Idle);
        }
    }
}

pub(crate) struct TableInner {
    name: String,
    registry: Arc<FunctionRegistry>,
    /// `None` once deleted.
    state: Mutex<Option<TableState>>,
    pending: Mutex<PendingBatches>,
    /// Held for a whole drain cycle.
    drain: Mutex<()>,
    drainer: Mutex<Option<ThreadId>>,
}

impl TableInner {
    fn with_state<R>(&self, f: impl FnOnce(&mut TableState) -> Result<R>) -> Result<R> {
        let mut guard = lock(&self.state);
        let state = guard.as_mut().ok_or(EngineError::UseAfterFree("table"))?;
        f(state)
    }

    pub(crate) fn with_view<R>(
        &self,
        id: ViewId,
        f: impl FnOnce(&mut ViewState, &dyn RowSource) -> R,
    ) -> Result<R> {
        self.with_state(|state| {
            let TableState {
                store,
                computed,
                views,
                ..
            } = state;
            let view = views.get_mut(&id).ok_or(EngineError::UseAfterFree("view"))?;
            let source = Layered {
                base: &*store,
                computed: &*computed,
            };
            Ok(f(view, &source))
        })
    }

    pub(crate) fn drop_view(&self, id: ViewId) -> Result<()> {
        self.with_state(|state| match state.views.remove(&id) {
            Some(_) => {
                log::debug!("table '{}': view {} deleted", self.name, id);
                Ok(())
            }
            None => Err(EngineError::UseAfterFree("view")),
        })
    }
}

/// Clears the drainer mark when a drain cycle ends, even by panic.
struct DrainGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

/// Handle to a table. Clones share the same table.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    /// Create an empty table.
    pub fn new(schema: Schema, options: TableOptions) -> Result<Self> {
        Self::with_registry(schema, options, Arc::new(FunctionRegistry::new()))
    }

    /// Create a table from data, inferring the schema, and load the data on
    /// port 0.
    pub fn from_data(data: impl Into<TableData>, options: TableOptions) -> Result<Self> {
        Self::from_data_with_registry(data.into(), options, Arc::new(FunctionRegistry::new()))
    }

    pub(crate) fn from_data_with_registry(
        data: TableData,
        options: TableOptions,
        registry: Arc<FunctionRegistry>,
    ) -> Result<Self> {
        let schema = data.infer_schema()?;
        let table = Self::with_registry(schema, options, registry)?;
        if !data.is_empty() {
            table.update(data, UpdateOptions::default())?;
        }
        Ok(table)
    }

    pub(crate) fn with_registry(
        schema: Schema,
        options: TableOptions,
        registry: Arc<FunctionRegistry>,
    ) -> Result<Self> {
        let store = ColumnStore::new(schema, options.index.as_deref(), options.storage)?;
        let name = options.name.unwrap_or_else(|| "table".to_string());
        log::debug!(
            "table '{}' created: {} columns, index {:?}, {}",
            name,
            store.schema().len(),
            options.index,
            options.storage.as_str()
        );
        let state = TableState {
            store,
            computed: ComputedColumns::new(),
            ports: PortManager::new(),
            views: BTreeMap::new(),
            next_view: 0,
            generation: 0,
        };
        Ok(Table {
            inner: Arc::new(TableInner {
                name,
                registry,
                state: Mutex::new(Some(state)),
                pending: Mutex::new(PendingBatches::default()),
                drain: Mutex::new(()),
                drainer: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Base schema. Computed columns are never part of it.
    pub fn schema(&self) -> Result<Schema> {
        self.inner.with_state(|state| Ok(state.store.schema().clone()))
    }

    /// Table-level computed columns, in evaluation order.
    pub fn computed_schema(&self) -> Result<Schema> {
        self.inner
            .with_state(|state| Ok(Schema::new(state.computed.schema())))
    }

    pub fn get_index(&self) -> Result<Option<String>> {
        self.inner
            .with_state(|state| Ok(state.store.index_column().map(String::from)))
    }

    /// Base and computed column names.
    pub fn columns(&self) -> Result<Vec<String>> {
        self.inner.with_state(|state| Ok(state.source().column_names()))
    }

    /// Number of live rows.
    pub fn size(&self) -> Result<usize> {
        self.inner.with_state(|state| Ok(state.store.len()))
    }

    pub fn make_port(&self) -> Result<PortId> {
        self.inner.with_state(|state| Ok(state.ports.make_port()))
    }

    pub fn ports(&self) -> Result<Vec<PortId>> {
        self.inner.with_state(|state| Ok(state.ports.ports()))
    }

    pub fn num_views(&self) -> Result<usize> {
        self.inner.with_state(|state| Ok(state.views.len()))
    }

    /// Upsert (indexed) or append (unindexed) rows and notify views.
    pub fn update(&self, data: impl Into<TableData>, options: UpdateOptions) -> Result<()> {
        self.enqueue(data, options)?;
        self.process()
    }

    /// `update` with a JSON payload on port 0.
    pub fn update_json(&self, text: &str) -> Result<()> {
        self.update(TableData::from_json(text)?, UpdateOptions::default())
    }

    pub fn update_json_on(&self, text: &str, options: UpdateOptions) -> Result<()> {
        self.update(TableData::from_json(text)?, options)
    }

    /// Validate a batch and queue it without applying it.
    pub fn enqueue(&self, data: impl Into<TableData>, options: UpdateOptions) -> Result<()> {
        let rows = data.into().into_rows()?;
        let port = self.checked_port(options)?;
        let rows = self.inner.with_state(|state| {
            conform_rows(state.store.schema(), state.store.index_column(), rows)
        })?;
        lock(&self.inner.pending).push(port, [Batch::Rows(rows)]);
        Ok(())
    }

    /// Delete rows by primary key. Unknown keys are ignored.
    pub fn remove(&self, keys: Vec<ColumnValue>, options: UpdateOptions) -> Result<()> {
        let port = self.checked_port(options)?;
        let keys = self.inner.with_state(|state| {
            let index = state.store.index_column().ok_or_else(|| {
                EngineError::Config("remove requires a table with an index column".to_string())
            })?;
            let ty = state.store.schema().get_column_type(index).ok_or_else(|| {
                EngineError::Config(format!("index column '{}' is missing", index))
            })?;
            keys.into_iter()
                .map(|key| {
                    key.coerce(ty)
                        .map_err(|e| EngineError::InvalidSchema(format!("key: {}", e)))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        lock(&self.inner.pending).push(port, [Batch::Remove(keys)]);
        self.process()
    }

    /// Remove every row, on port 0.
    pub fn clear(&self) -> Result<()> {
        self.inner.with_state(|_| Ok(()))?;
        lock(&self.inner.pending).push(DEFAULT_PORT, [Batch::Clear]);
        self.process()
    }

    /// Clear and reload in a single batch, so views see one delta.
    pub fn replace(&self, data: impl Into<TableData>) -> Result<()> {
        let rows = data.into().into_rows()?;
        let rows = self.inner.with_state(|state| {
            conform_rows(state.store.schema(), state.store.index_column(), rows)
        })?;
        lock(&self.inner.pending).push(DEFAULT_PORT, [Batch::Clear, Batch::Rows(rows)]);
        self.process()
    }

    fn checked_port(&self, options: UpdateOptions) -> Result<PortId> {
        let port = options.port_id.unwrap_or(DEFAULT_PORT);
        self.inner.with_state(|state| {
            if state.ports.contains(port) {
                Ok(port)
            } else {
                Err(EngineError::Config(format!(
                    "table '{}' has no port {}",
                    self.inner.name, port
                )))
            }
        })
    }

    /// Apply every queued batch, lowest port first, and dispatch the
    /// resulting deltas. Called from inside an update callback it returns
    /// at once; the running drain picks up the new work.
    ///
    /// Callbacks of two tables that update each other from different
    /// threads can deadlock on each other's drain lock.
    pub fn process(&self) -> Result<()> {
        let me = thread::current().id();
        if *lock(&self.inner.drainer) == Some(me) {
            log::trace!("table '{}': nested update queued", self.inner.name);
            return Ok(());
        }

        let _serial = lock(&self.inner.drain);
        *lock(&self.inner.drainer) = Some(me);
        let _guard = DrainGuard(&self.inner.drainer);

        loop {
            let next = lock(&self.inner.pending).take_next();
            let Some((port, batches)) = next else {
                return Ok(());
            };
            let pending = self
                .inner
                .with_state(|state| state.apply_port(port, batches))?;
            if pending.is_empty() {
                continue;
            }
            notify::dispatch(pending);
            if self
                .inner
                .with_state(|state| {
                    state.finish_dispatch();
                    Ok(())
                })
                .is_err()
            {
                // Deleted from inside a callback.
                return Ok(());
            }
        }
    }

    /// Register table-level computed columns, visible to every view.
    pub fn add_computed_columns(&self, specs: &[ComputedColumnSpec]) -> Result<()> {
        self.inner.with_state(|state| {
            let TableState { store, computed, .. } = state;
            computed.add(specs, &self.inner.registry, &*store)
        })
    }

    /// Create a view. The configuration is fully validated here.
    pub fn view(&self, config: ViewConfig) -> Result<View> {
        let id = self.inner.with_state(|state| {
            let id = state.next_view;
            let view = ViewState::new(
                id,
                config,
                &self.inner.registry,
                &state.source(),
                state.generation,
            )?;
            state.next_view += 1;
            state.views.insert(id, view);
            Ok(id)
        })?;
        Ok(View::new(Arc::downgrade(&self.inner), id))
    }

    /// Live rows of the base columns, in insertion order.
    pub fn to_data(&self) -> Result<TableData> {
        self.inner.with_state(|state| {
            let rows = state.store.live_rows();
            let columns = state
                .store
                .schema()
                .names()
                .into_iter()
                .map(|name| {
                    let values = rows.iter().map(|&r| state.store.value(r, name)).collect();
                    (name.to_string(), values)
                })
                .collect();
            Ok(TableData::Columns(columns))
        })
    }

    /// Drop the data, views and queued batches. Every later call on this
    /// table or its views fails with `UseAfterFree`.
    pub fn delete(&self) -> Result<()> {
        let state = lock(&self.inner.state).take();
        if state.is_none() {
            return Err(EngineError::UseAfterFree("table"));
        }
        lock(&self.inner.pending).clear();
        log::debug!("table '{}' deleted", self.inner.name);
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        lock(&self.inner.state).is_none()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*lock(&self.inner.state) {
            Some(state) => write!(
                f,
                "Table {{ name: '{}', columns: {}, rows: {}, views: {} }}",
                self.inner.name,
                state.store.schema().len(),
                state.store.len(),
                state.views.len()
            ),
            None => write!(f, "Table {{ name: '{}', deleted }}", self.inner.name),
        }
    }
}
