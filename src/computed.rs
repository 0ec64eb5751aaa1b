//! Computed columns
//!
//! A computed column is a pure function of other columns of the same row.
//! Columns are registered in batches; a batch is validated as a whole
//! (name collisions, unknown inputs, cycles, signatures) before anything is
//! stored, then laid out in topological order so chained columns always see
//! freshly computed inputs.
//!
//! On every update only the computed columns whose declared inputs
//! intersect the row's changed columns are re-evaluated.

use crate::changeset::RowId;
use crate::column::{Column, ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use crate::functions::{ComputedFunction, FunctionRegistry};
use crate::store::RowSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Declaration of a computed column.
///
/// ```
/// use livepivot::{ColumnType, ComputedColumnSpec};
///
/// let spec: ComputedColumnSpec = serde_json::from_str(
///     r#"{"name": "sum", "function_id": "+", "input_columns": ["w", "x"]}"#,
/// ).unwrap();
/// assert_eq!(spec, ComputedColumnSpec::new("sum", "+", ["w", "x"]));
/// assert_eq!(spec.clone().with_output_type(ColumnType::Float).output_type, Some(ColumnType::Float));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedColumnSpec {
    pub name: String,
    #[serde(alias = "function", alias = "computed_function_name")]
    pub function_id: String,
    #[serde(alias = "inputs")]
    pub input_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<ColumnType>,
}

impl ComputedColumnSpec {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        function_id: impl Into<String>,
        inputs: impl IntoIterator<Item = S>,
    ) -> Self {
        ComputedColumnSpec {
            name: name.into(),
            function_id: function_id.into(),
            input_columns: inputs.into_iter().map(Into::into).collect(),
            output_type: None,
        }
    }

    pub fn with_output_type(mut self, ty: ColumnType) -> Self {
        self.output_type = Some(ty);
        self
    }
}

#[derive(Debug, Clone)]
struct ComputedDef {
    name: String,
    function: ComputedFunction,
    inputs: Vec<String>,
    output: ColumnType,
}

/// A namespace of computed columns layered over a row source.
#[derive(Default)]
pub struct ComputedColumns {
    /// Topological order.
    defs: Vec<ComputedDef>,
    columns: HashMap<String, Column>,
}

impl ComputedColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).map(Column::column_type)
    }

    pub fn value(&self, row: RowId, name: &str) -> ColumnValue {
        self.columns
            .get(name)
            .and_then(|c| c.get(row).ok())
            .unwrap_or(ColumnValue::Null)
    }

    /// Name and type of every computed column, in evaluation order.
    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.defs.iter().map(|d| (d.name.clone(), d.output)).collect()
    }

    /// Declared inputs of `name`.
    pub fn inputs_of(&self, name: &str) -> Option<&[String]> {
        self.defs
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.inputs.as_slice())
    }

    /// Validate and register `specs`, then evaluate them for every live row
    /// of `base`. Nothing is registered if any spec is rejected.
    pub fn add(
        &mut self,
        specs: &[ComputedColumnSpec],
        registry: &FunctionRegistry,
        base: &dyn RowSource,
    ) -> Result<()> {
        let defs = self.resolve(specs, registry, base)?;
        let slots = base.slots();
        for def in defs {
            log::debug!(
                "computed column '{}' = {}({}) -> {}",
                def.name,
                def.function.name(),
                def.inputs.join(", "),
                def.output
            );
            let mut column = Column::new(def.name.clone(), def.output);
            for row in 0..slots {
                let value = if base.is_live(row) {
                    evaluate(&def, &self.columns, row, base)
                } else {
                    ColumnValue::Null
                };
                store(&mut column, row, value, true);
            }
            self.columns.insert(def.name.clone(), column);
            self.defs.push(def);
        }
        Ok(())
    }

    fn resolve(
        &self,
        specs: &[ComputedColumnSpec],
        registry: &FunctionRegistry,
        base: &dyn RowSource,
    ) -> Result<Vec<ComputedDef>> {
        let mut batch: HashMap<&str, &ComputedColumnSpec> = HashMap::new();
        for spec in specs {
            let name = spec.name.as_str();
            if base.column_type(name).is_some() || self.contains(name) || batch.contains_key(name) {
                return Err(EngineError::NameCollision(spec.name.clone()));
            }
            batch.insert(name, spec);
        }

        for spec in specs {
            for input in &spec.input_columns {
                let known = base.column_type(input).is_some()
                    || self.contains(input)
                    || batch.contains_key(input.as_str());
                if !known {
                    return Err(EngineError::Config(format!(
                        "computed column '{}' references unknown column '{}'",
                        spec.name, input
                    )));
                }
            }
        }

        let order = topological_order(specs, &batch)?;

        let mut types: HashMap<&str, ColumnType> = HashMap::new();
        let mut defs = Vec::with_capacity(specs.len());
        for spec in order {
            let function = registry.lookup(&spec.function_id).ok_or_else(|| {
                EngineError::Config(format!(
                    "computed column '{}' uses unknown function '{}'",
                    spec.name, spec.function_id
                ))
            })?;
            let input_types: Vec<ColumnType> = spec
                .input_columns
                .iter()
                .filter_map(|c| {
                    types
                        .get(c.as_str())
                        .copied()
                        .or_else(|| self.column_type(c))
                        .or_else(|| base.column_type(c))
                })
                .collect();
            let output = function
                .check(&input_types, spec.output_type)
                .map_err(|e| match e {
                    EngineError::Type(msg) => {
                        EngineError::Type(format!("computed column '{}': {}", spec.name, msg))
                    }
                    other => other,
                })?;
            types.insert(spec.name.as_str(), output);
            defs.push(ComputedDef {
                name: spec.name.clone(),
                function,
                inputs: spec.input_columns.clone(),
                output,
            });
        }
        Ok(defs)
    }

    /// Grow every column to cover `slots` rows.
    pub fn ensure_slots(&mut self, slots: usize) {
        for column in self.columns.values_mut() {
            while column.len() < slots {
                store(column, column.len(), ColumnValue::Null, true);
            }
        }
    }

    /// Re-evaluate one row. With `full` every column is evaluated (new rows);
    /// otherwise only columns with an input in `changed`. Columns whose value
    /// moves are added to `changed`, their previous value to `old`.
    pub fn recompute_row(
        &mut self,
        row: RowId,
        full: bool,
        changed: &mut BTreeSet<String>,
        old: &mut HashMap<String, ColumnValue>,
        base: &dyn RowSource,
    ) {
        if self.defs.is_empty() {
            return;
        }
        self.ensure_slots(base.slots());
        let ComputedColumns { defs, columns } = self;
        for def in defs.iter() {
            if !full && !def.inputs.iter().any(|c| changed.contains(c)) {
                continue;
            }
            let new = evaluate(def, columns, row, base);
            let Some(column) = columns.get_mut(&def.name) else {
                continue;
            };
            let prev = column.get(row).unwrap_or(ColumnValue::Null);
            if prev != new {
                store(column, row, new, false);
                old.entry(def.name.clone()).or_insert(prev);
                changed.insert(def.name.clone());
            }
        }
    }

    /// Null out a removed row, reporting the values it held.
    pub fn clear_row(
        &mut self,
        row: RowId,
        changed: &mut BTreeSet<String>,
        old: &mut HashMap<String, ColumnValue>,
    ) {
        for (name, column) in self.columns.iter_mut() {
            let prev = column.get(row).unwrap_or(ColumnValue::Null);
            if !prev.is_null() {
                store(column, row, ColumnValue::Null, false);
                old.entry(name.clone()).or_insert(prev);
                changed.insert(name.clone());
            }
        }
    }
}

impl std::fmt::Debug for ComputedColumns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.defs.iter().map(|d| (&d.name, d.function.name(), &d.inputs)))
            .finish()
    }
}

fn evaluate(
    def: &ComputedDef,
    columns: &HashMap<String, Column>,
    row: RowId,
    base: &dyn RowSource,
) -> ColumnValue {
    let args: Vec<ColumnValue> = def
        .inputs
        .iter()
        .map(|c| match columns.get(c) {
            Some(col) => col.get(row).unwrap_or(ColumnValue::Null),
            None => base.value(row, c),
        })
        .collect();
    match def.function.eval(&args, def.output) {
        Some(v) => v,
        None => {
            if args.iter().all(|a| !a.is_null()) {
                log::trace!("'{}' evaluated to null at row {}", def.name, row);
            }
            ColumnValue::Null
        }
    }
}

fn store(column: &mut Column, row: RowId, value: ColumnValue, append: bool) {
    let result = if append && row == column.len() {
        column.append(value)
    } else {
        column.set(row, value)
    };
    if let Err(e) = result {
        log::warn!("computed column '{}' row {}: {}", column.name(), row, e);
    }
}

/// Order a batch so every spec comes after the batch members it reads.
/// Fails with the cycle path if there is one.
fn topological_order<'a>(
    specs: &'a [ComputedColumnSpec],
    batch: &HashMap<&str, &'a ComputedColumnSpec>,
) -> Result<Vec<&'a ComputedColumnSpec>> {
    let mut indegree: HashMap<&str, usize> = specs.iter().map(|s| (s.name.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for spec in specs {
        let inputs: HashSet<&str> = spec.input_columns.iter().map(String::as_str).collect();
        for input in inputs {
            if batch.contains_key(input) {
                *indegree.entry(spec.name.as_str()).or_default() += 1;
                dependents.entry(input).or_default().push(spec.name.as_str());
            }
        }
    }

    let mut ready: VecDeque<&str> = specs
        .iter()
        .map(|s| s.name.as_str())
        .filter(|n| indegree.get(n) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(specs.len());
    while let Some(name) = ready.pop_front() {
        if let Some(spec) = batch.get(name) {
            order.push(*spec);
        }
        for dep in dependents.get(name).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(dep) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(*dep);
                }
            }
        }
    }

    if order.len() < specs.len() {
        let stuck: HashSet<&str> = indegree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| *n)
            .collect();
        return Err(EngineError::Cycle(find_cycle(specs, batch, &stuck)));
    }
    Ok(order)
}

/// Walk input edges among `stuck` nodes until a node repeats.
fn find_cycle(
    specs: &[ComputedColumnSpec],
    batch: &HashMap<&str, &ComputedColumnSpec>,
    stuck: &HashSet<&str>,
) -> Vec<String> {
    let Some(start) = specs.iter().map(|s| s.name.as_str()).find(|n| stuck.contains(n)) else {
        return Vec::new();
    };
    let mut path: Vec<&str> = vec![start];
    let mut current = start;
    loop {
        let next = batch
            .get(current)
            .and_then(|s| s.input_columns.iter().map(String::as_str).find(|i| stuck.contains(i)));
        let Some(next) = next else {
            break;
        };
        if let Some(pos) = path.iter().position(|n| *n == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Row;
    use crate::store::ColumnStore;
    use crate::table::{Schema, StorageHint};

    fn store_with_rows() -> ColumnStore {
        let schema = Schema::new(vec![
            ("w", ColumnType::Float),
            ("x", ColumnType::Integer),
            ("s", ColumnType::String),
        ]);
        let mut store = ColumnStore::new(schema, Some("x"), StorageHint::FastReads).unwrap();
        let row = |w: f64, x: i64, s: &str| -> Row {
            [
                ("w".to_string(), ColumnValue::from(w)),
                ("x".to_string(), ColumnValue::from(x)),
                ("s".to_string(), ColumnValue::from(s)),
            ]
            .into_iter()
            .collect()
        };
        let rows = vec![row(1.5, 1, "a"), row(2.5, 2, "b")];
        store.apply_rows(rows).unwrap();
        store
    }

    #[test]
    fn test_add_evaluates_existing_rows() {
        let store = store_with_rows();
        let mut computed = ComputedColumns::new();
        computed
            .add(&[ComputedColumnSpec::new("sum", "+", ["w", "x"])], &FunctionRegistry::new(), &store)
            .unwrap();

        assert_eq!(computed.column_type("sum"), Some(ColumnType::Float));
        assert_eq!(computed.value(0, "sum"), ColumnValue::Float(2.5));
        assert_eq!(computed.value(1, "sum"), ColumnValue::Float(4.5));
    }

    #[test]
    fn test_chained_columns_resolve_in_dependency_order() {
        let store = store_with_rows();
        let mut computed = ComputedColumns::new();
        let specs = [
            ComputedColumnSpec::new("doubled", "+", ["sum", "sum"]),
            ComputedColumnSpec::new("sum", "+", ["w", "x"]),
        ];
        computed.add(&specs, &FunctionRegistry::new(), &store).unwrap();
        assert_eq!(computed.schema()[0].0, "sum");
        assert_eq!(computed.value(1, "doubled"), ColumnValue::Float(9.0));
    }

    #[test]
    fn test_rejections() {
        let store = store_with_rows();
        let registry = FunctionRegistry::new();
        let mut computed = ComputedColumns::new();

        let shadow = [ComputedColumnSpec::new("w", "abs", ["x"])];
        assert!(matches!(
            computed.add(&shadow, &registry, &store),
            Err(EngineError::NameCollision(n)) if n == "w"
        ));

        let cycle = [
            ComputedColumnSpec::new("a", "+", ["b", "x"]),
            ComputedColumnSpec::new("b", "+", ["a", "x"]),
        ];
        match computed.add(&cycle, &registry, &store) {
            Err(EngineError::Cycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"a".to_string()) && path.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }

        let arity = [ComputedColumnSpec::new("bad", "+", ["x"])];
        assert!(matches!(computed.add(&arity, &registry, &store), Err(EngineError::Type(_))));

        let types = [ComputedColumnSpec::new("bad", "uppercase", ["x"])];
        assert!(matches!(computed.add(&types, &registry, &store), Err(EngineError::Type(_))));

        let unknown = [ComputedColumnSpec::new("bad", "+", ["x", "nope"])];
        assert!(matches!(computed.add(&unknown, &registry, &store), Err(EngineError::Config(_))));

        assert!(computed.is_empty());
    }

    #[test]
    fn test_recompute_only_touches_dependent_columns() {
        let store = store_with_rows();
        let mut computed = ComputedColumns::new();
        let specs = [
            ComputedColumnSpec::new("sum", "+", ["w", "x"]),
            ComputedColumnSpec::new("upper", "uppercase", ["s"]),
        ];
        computed.add(&specs, &FunctionRegistry::new(), &store).unwrap();

        let mut changed: BTreeSet<String> = ["s".to_string()].into();
        let mut old = HashMap::new();
        computed.recompute_row(0, false, &mut changed, &mut old, &store);
        // "s" did not actually move in the store, so "upper" is unchanged.
        assert!(!changed.contains("sum"));
        assert!(!changed.contains("upper"));
        assert!(old.is_empty());

        computed.clear_row(0, &mut changed, &mut old);
        assert_eq!(old.get("sum"), Some(&ColumnValue::Float(2.5)));
        assert!(computed.value(0, "upper").is_null());
    }
}
