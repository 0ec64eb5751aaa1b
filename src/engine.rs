//! Engine context
//!
//! An `Engine` owns the computed-function registry and a catalogue of live
//! tables by name. Tables created through it share its registry. There is
//! no process-wide state: two engines are fully independent.

use crate::config::TableOptions;
use crate::data::TableData;
use crate::error::{EngineError, Result};
use crate::functions::FunctionRegistry;
use crate::table::{Schema, Table};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Registry of functions and named tables.
///
/// ```
/// use livepivot::{ColumnType, Engine, Schema, TableOptions};
///
/// let engine = Engine::new();
/// let schema = Schema::new([("id", ColumnType::Integer)]);
/// engine.table("orders", schema, TableOptions::new().index("id")).unwrap();
///
/// assert_eq!(engine.table_names(), vec!["orders"]);
/// assert!(engine.get_table("orders").is_some());
/// ```
#[derive(Default)]
pub struct Engine {
    registry: Arc<FunctionRegistry>,
    tables: Mutex<BTreeMap<String, Table>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    fn tables(&self) -> MutexGuard<'_, BTreeMap<String, Table>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty table under `name`.
    pub fn table(&self, name: &str, schema: Schema, options: TableOptions) -> Result<Table> {
        let options = options.name(name);
        self.register(name, |registry| Table::with_registry(schema, options, registry))
    }

    /// Create a table under `name` from data, inferring its schema.
    pub fn table_from_data(
        &self,
        name: &str,
        data: impl Into<TableData>,
        options: TableOptions,
    ) -> Result<Table> {
        let options = options.name(name);
        let data = data.into();
        self.register(name, |registry| {
            Table::from_data_with_registry(data, options, registry)
        })
    }

    fn register(
        &self,
        name: &str,
        create: impl FnOnce(Arc<FunctionRegistry>) -> Result<Table>,
    ) -> Result<Table> {
        let mut tables = self.tables();
        if tables.get(name).is_some_and(|t| !t.is_deleted()) {
            return Err(EngineError::Config(format!("table '{}' already exists", name)));
        }
        let table = create(self.registry.clone())?;
        tables.insert(name.to_string(), table.clone());
        log::debug!("engine: registered table '{}'", name);
        Ok(table)
    }

    /// Live table by name. Tables deleted through their own handle are
    /// dropped from the catalogue here.
    pub fn get_table(&self, name: &str) -> Option<Table> {
        let mut tables = self.tables();
        match tables.get(name) {
            Some(table) if table.is_deleted() => {
                tables.remove(name);
                None
            }
            other => other.cloned(),
        }
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables()
            .iter()
            .filter(|(_, t)| !t.is_deleted())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Delete a table and drop it from the catalogue. Outstanding handles and
    /// views fail with `UseAfterFree` afterwards.
    pub fn delete_table(&self, name: &str) -> Result<()> {
        let table = self
            .tables()
            .remove(name)
            .ok_or_else(|| EngineError::Config(format!("no table named '{}'", name)))?;
        table.delete()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("functions", &self.registry.len())
            .field("tables", &self.table_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnType, ColumnValue};
    use crate::computed::ComputedColumnSpec;
    use crate::config::ViewConfig;

    #[test]
    fn test_duplicate_names_rejected() {
        let engine = Engine::new();
        let schema = Schema::new([("a", ColumnType::Integer)]);
        engine.table("t", schema.clone(), TableOptions::new()).unwrap();
        assert!(matches!(
            engine.table("t", schema, TableOptions::new()),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_tables_share_registry_and_name() {
        let engine = Engine::new();
        let table = engine
            .table_from_data("prices", TableData::from_json(r#"{"p": [4.0, 9.0]}"#).unwrap(), TableOptions::new())
            .unwrap();
        assert_eq!(table.name(), "prices");
        assert_eq!(table.size().unwrap(), 2);

        let view = table
            .view(ViewConfig::new().expression(ComputedColumnSpec::new("root", "sqrt", ["p"])))
            .unwrap();
        let out = view.to_columns(crate::config::Window::all()).unwrap();
        assert_eq!(out.get("root").unwrap(), &[ColumnValue::Float(2.0), ColumnValue::Float(3.0)]);
    }

    #[test]
    fn test_delete_table() {
        let engine = Engine::new();
        let table = engine
            .table("t", Schema::new([("a", ColumnType::Integer)]), TableOptions::new())
            .unwrap();
        engine.delete_table("t").unwrap();
        assert!(table.is_deleted());
        assert!(engine.get_table("t").is_none());
        assert!(matches!(engine.delete_table("t"), Err(EngineError::Config(_))));

        let other = engine
            .table("u", Schema::new([("a", ColumnType::Integer)]), TableOptions::new())
            .unwrap();
        other.delete().unwrap();
        assert!(engine.table_names().is_empty());
        // The name is free again once its table is gone.
        engine
            .table("u", Schema::new([("a", ColumnType::Integer)]), TableOptions::new())
            .unwrap();
    }
}
