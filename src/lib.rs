//! LivePivot - incremental analytical tables
//!
//! Columnar tables with primary keys, update ports and computed columns, and
//! views that group, split, aggregate, sort and filter them. Views are kept
//! up to date incrementally and publish one delta per (view, port) batch to
//! their subscribers.
//!
//! ```
//! use livepivot::{ColumnValue, Engine, TableOptions, UpdateMode, ViewConfig, Window};
//!
//! let engine = Engine::new();
//! let table = engine
//!     .table_from_data(
//!         "trades",
//!         livepivot::TableData::from_json(r#"[{"sym": "A", "qty": 5}, {"sym": "B", "qty": 2}]"#).unwrap(),
//!         TableOptions::new(),
//!     )
//!     .unwrap();
//!
//! let view = table.view(ViewConfig::new().group_by(["sym"]).columns(["qty"])).unwrap();
//! view.on_update(|event| println!("port {} changed", event.port_id), UpdateMode::None).unwrap();
//!
//! table.update_json(r#"[{"sym": "A", "qty": 1}]"#).unwrap();
//! let out = view.to_columns(Window::all().leaves_only()).unwrap();
//! assert_eq!(out.get("qty").unwrap(), &[ColumnValue::Integer(6), ColumnValue::Integer(2)]);
//! ```

pub mod aggregate;
pub mod changeset;
pub mod column;
pub mod computed;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod filter;
pub mod functions;
pub mod interner;
pub mod notify;
pub mod pivot;
pub mod port;
pub mod sequence;
pub mod sort;
pub mod store;
pub mod table;
pub mod view;

pub use aggregate::{default_aggregate, Aggregate};
pub use changeset::{ChangeKind, Changeset, IncrementalView, RowChange, RowId};
pub use column::{Column, ColumnType, ColumnValue};
pub use computed::ComputedColumnSpec;
pub use config::{TableOptions, UpdateOptions, ViewConfig, Window};
pub use data::{Row, TableData};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use filter::{FilterCombinator, FilterOp, FilterTerm};
pub use functions::{ComputedFunction, FunctionRegistry};
pub use interner::{DictionaryStats, StringDictionary};
pub use notify::{CellChange, Delta, SubscriptionId, UpdateEvent, UpdateMode};
pub use port::{PortId, DEFAULT_PORT};
pub use sequence::{ArraySequence, ChunkedSequence, Sequence};
pub use sort::{SortDirection, SortSpec};
pub use table::{Schema, StorageHint, Table};
pub use view::{ColumnsOutput, View, ROW_PATH};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn w_x_table(engine: &Engine, name: &str) -> Table {
        let schema = Schema::new([("w", ColumnType::Float), ("x", ColumnType::Integer)]);
        engine.table(name, schema, TableOptions::new().index("w")).unwrap()
    }

    #[test]
    fn test_incremental_pivot_matches_fresh_view() {
        let engine = Engine::new();
        let schema = Schema::new([
            ("id", ColumnType::Integer),
            ("desk", ColumnType::String),
            ("book", ColumnType::String),
            ("pnl", ColumnType::Float),
            ("qty", ColumnType::Integer),
        ]);
        let table = engine.table("pnl", schema, TableOptions::new().index("id")).unwrap();
        let config = ViewConfig::new()
            .group_by(["desk", "book"])
            .split_by(["book"])
            .columns(["pnl", "qty", "desk"])
            .aggregate("pnl", Aggregate::Avg)
            .aggregate("qty", Aggregate::WeightedMean("pnl".into()))
            .aggregate("desk", Aggregate::Dominant)
            .sort(SortSpec::desc("pnl"));
        let live = table.view(config.clone()).unwrap();

        let mut seed = 7u64;
        for step in 0..40 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let id = (seed >> 33) % 12;
            let desk = ["fx", "rates", "credit"][(seed >> 20) as usize % 3];
            let book = ["b1", "b2"][(seed >> 10) as usize % 2];
            let pnl = ((seed >> 40) % 1000) as f64 / 7.0 - 50.0;
            if step % 9 == 8 {
                table.remove(vec![(id as i64).into()], UpdateOptions::default()).unwrap();
            } else if step % 4 == 3 {
                let row: Row = [
                    ("id".to_string(), ColumnValue::Integer(id as i64)),
                    ("pnl".to_string(), ColumnValue::Float(pnl)),
                ]
                .into_iter()
                .collect();
                table.update(vec![row], UpdateOptions::default()).unwrap();
            } else {
                let row: Row = [
                    ("id".to_string(), ColumnValue::Integer(id as i64)),
                    ("desk".to_string(), desk.into()),
                    ("book".to_string(), book.into()),
                    ("pnl".to_string(), ColumnValue::Float(pnl)),
                    ("qty".to_string(), ColumnValue::Integer(step)),
                ]
                .into_iter()
                .collect();
                table.update(vec![row], UpdateOptions::default()).unwrap();
            }

            let fresh = table.view(config.clone()).unwrap();
            assert_eq!(
                live.to_columns(Window::all()).unwrap(),
                fresh.to_columns(Window::all()).unwrap(),
                "diverged at step {}",
                step
            );
            assert_eq!(live.column_paths().unwrap(), fresh.column_paths().unwrap());
            fresh.delete().unwrap();
        }
    }

    #[test]
    fn test_ports_count_up_from_one_per_table() {
        let engine = Engine::new();
        let a = w_x_table(&engine, "a");
        let b = w_x_table(&engine, "b");
        let mut from_a = Vec::new();
        for i in 0..10 {
            from_a.push(a.make_port().unwrap());
            if i % 3 == 0 {
                b.make_port().unwrap();
            }
        }
        assert_eq!(from_a, (1..=10).collect::<Vec<PortId>>());
        assert_eq!(b.ports().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_partial_update_by_primary_key() {
        let engine = Engine::new();
        let table = w_x_table(&engine, "t");
        table.update_json(r#"{"w": [1.5, 2.5], "x": [1, 2]}"#).unwrap();
        table.update_json(r#"{"w": [1.5], "x": [99]}"#).unwrap();

        let view = table.view(ViewConfig::new()).unwrap();
        let out = view.to_columns(Window::all()).unwrap();
        assert_eq!(out.get("x").unwrap(), &[ColumnValue::Integer(99), ColumnValue::Integer(2)]);
        assert_eq!(out.get("w").unwrap(), &[ColumnValue::Float(1.5), ColumnValue::Float(2.5)]);
    }

    #[test]
    fn test_computed_column_propagation() {
        let engine = Engine::new();
        let table = w_x_table(&engine, "t");
        table
            .add_computed_columns(&[ComputedColumnSpec::new("sum", "+", ["w", "x"])])
            .unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        let empty = view.to_columns(Window::all()).unwrap();
        assert!(empty.columns.is_empty());
        assert_eq!(empty.to_json(), serde_json::json!([]));

        table.update_json(r#"{"w": [1.5], "x": [1]}"#).unwrap();
        let out = view.to_columns(Window::all()).unwrap();
        assert_eq!(out.get("sum").unwrap(), &[ColumnValue::Float(2.5)]);

        table.update_json(r#"{"w": [1.5], "x": [3]}"#).unwrap();
        let out = view.to_columns(Window::all()).unwrap();
        assert_eq!(out.get("sum").unwrap(), &[ColumnValue::Float(4.5)]);
        assert_eq!(table.schema().unwrap().len(), 2);
    }

    #[test]
    fn test_sort_null_ordering() {
        let table = Table::new(
            Schema::new([("v", ColumnType::Float)]),
            TableOptions::new(),
        )
        .unwrap();
        table
            .update_json(r#"{"v": [3.5, 4.5, null, null, 1.5, 2.5]}"#)
            .unwrap();
        let asc = table.view(ViewConfig::new().sort(SortSpec::asc("v"))).unwrap();
        let desc = table.view(ViewConfig::new().sort(SortSpec::desc("v"))).unwrap();

        let null = ColumnValue::Null;
        let f = ColumnValue::Float;
        assert_eq!(
            asc.to_columns(Window::all()).unwrap().get("v").unwrap(),
            &[null.clone(), null.clone(), f(1.5), f(2.5), f(3.5), f(4.5)]
        );
        assert_eq!(
            desc.to_columns(Window::all()).unwrap().get("v").unwrap(),
            &[f(4.5), f(3.5), f(2.5), f(1.5), null.clone(), null]
        );
    }

    #[test]
    fn test_echo_prevention_between_client_and_server() {
        let engine = Engine::new();
        let client = w_x_table(&engine, "client");
        let server = w_x_table(&engine, "server");
        // Port on each side reserved for what the other side sends.
        let client_from_server = client.make_port().unwrap();
        let server_from_client = server.make_port().unwrap();

        let forwarded = Arc::new(AtomicUsize::new(0));
        let client_view = client.view(ViewConfig::new()).unwrap();
        let server_view = server.view(ViewConfig::new()).unwrap();

        {
            let server = server.clone();
            let forwarded = forwarded.clone();
            client_view
                .on_update(
                    move |event| {
                        if event.port_id == client_from_server {
                            return;
                        }
                        if let Some(Delta::Rows { rows, .. }) = &event.delta {
                            forwarded.fetch_add(1, Ordering::SeqCst);
                            server
                                .update(rows.clone(), UpdateOptions::port(server_from_client))
                                .unwrap();
                        }
                    },
                    UpdateMode::Row,
                )
                .unwrap();
        }
        {
            let client = client.clone();
            let forwarded = forwarded.clone();
            server_view
                .on_update(
                    move |event| {
                        if event.port_id == server_from_client {
                            return;
                        }
                        if let Some(Delta::Rows { rows, .. }) = &event.delta {
                            forwarded.fetch_add(1, Ordering::SeqCst);
                            client
                                .update(rows.clone(), UpdateOptions::port(client_from_server))
                                .unwrap();
                        }
                    },
                    UpdateMode::Row,
                )
                .unwrap();
        }

        for i in 0..3 {
            client
                .update_json(&format!(r#"[{{"w": {}.5, "x": {}}}]"#, i, i))
                .unwrap();
        }
        assert_eq!(forwarded.load(Ordering::SeqCst), 3);
        assert_eq!(server.size().unwrap(), 3);

        server.update_json(r#"[{"w": 9.5, "x": 9}]"#).unwrap();
        assert_eq!(forwarded.load(Ordering::SeqCst), 4);
        assert_eq!(client.size().unwrap(), 4);
        assert_eq!(
            client_view.to_columns(Window::all()).unwrap(),
            server_view.to_columns(Window::all()).unwrap()
        );
    }

    #[test]
    fn test_no_notification_for_unrelated_columns() {
        let schema = Schema::new([
            ("id", ColumnType::Integer),
            ("x", ColumnType::Integer),
            ("y", ColumnType::Integer),
        ]);
        let table = Table::new(schema, TableOptions::new().index("id")).unwrap();
        table.update_json(r#"[{"id": 1, "x": 1, "y": 1}]"#).unwrap();

        let view = table.view(ViewConfig::new().columns(["x"])).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        view.on_update(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            UpdateMode::Cell,
        )
        .unwrap();

        table.update_json(r#"[{"id": 1, "y": 2}]"#).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        table.update_json(r#"[{"id": 1, "x": 1}]"#).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        table.update_json(r#"[{"id": 1, "x": 5}]"#).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_group_aggregates_over_string_column() {
        let table = Table::from_data(
            TableData::from_json(r#"{"x": ["a", "a", "c", "a"]}"#).unwrap(),
            TableOptions::new(),
        )
        .unwrap();
        let view = table
            .view(
                ViewConfig::new()
                    .group_by(["x"])
                    .columns(["x", "upper"])
                    .aggregate("x", Aggregate::Count)
                    .aggregate("upper", Aggregate::DistinctCount)
                    .expression(ComputedColumnSpec::new("upper", "uppercase", ["x"])),
            )
            .unwrap();
        let out = view.to_columns(Window::all().leaves_only()).unwrap();
        let groups: Vec<(String, ColumnValue)> = out
            .row_paths
            .clone()
            .unwrap()
            .iter()
            .map(|p| p[0].to_string())
            .zip(out.get("x").unwrap().iter().cloned())
            .collect();
        assert_eq!(groups, vec![("a".to_string(), ColumnValue::Integer(3)), ("c".to_string(), ColumnValue::Integer(1))]);
        assert_eq!(out.get("upper").unwrap(), &[ColumnValue::Integer(1), ColumnValue::Integer(1)]);

        let dominant = table
            .view(
                ViewConfig::new()
                    .group_by(["x"])
                    .columns(["x"])
                    .aggregate("x", Aggregate::Dominant),
            )
            .unwrap();
        let root = dominant.to_columns(Window::all().rows(0, 1)).unwrap();
        assert_eq!(root.get("x").unwrap(), &[ColumnValue::from("a")]);
    }

    #[test]
    fn test_error_categories() {
        let engine = Engine::new();
        let table = w_x_table(&engine, "t");

        assert!(matches!(
            table.update_json(r#"[{"w": 1.0, "z": 1}]"#),
            Err(EngineError::InvalidSchema(_))
        ));
        assert!(matches!(
            table.view(ViewConfig::new().columns(["z"])),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            table.add_computed_columns(&[
                ComputedColumnSpec::new("a", "abs", ["b"]),
                ComputedColumnSpec::new("b", "abs", ["a"]),
            ]),
            Err(EngineError::Cycle(_))
        ));
        assert!(matches!(
            table.add_computed_columns(&[ComputedColumnSpec::new("w", "abs", ["x"])]),
            Err(EngineError::NameCollision(_))
        ));
        assert!(matches!(
            table.add_computed_columns(&[ComputedColumnSpec::new("u", "uppercase", ["x"])]),
            Err(EngineError::Type(_))
        ));
        assert!(matches!(
            table.add_computed_columns(&[ComputedColumnSpec::new("p", "pow", ["x"])]),
            Err(EngineError::Type(_))
        ));
        assert!(table.computed_schema().unwrap().is_empty());

        // Division by zero nulls the cell, the row still lands.
        table
            .add_computed_columns(&[ComputedColumnSpec::new("q", "/", ["w", "x"])])
            .unwrap();
        table.update_json(r#"[{"w": 1.0, "x": 0}]"#).unwrap();
        let out = table.view(ViewConfig::new()).unwrap().to_columns(Window::all()).unwrap();
        assert_eq!(out.get("q").unwrap(), &[ColumnValue::Null]);

        let view = table.view(ViewConfig::new()).unwrap();
        engine.delete_table("t").unwrap();
        assert!(matches!(table.size(), Err(EngineError::UseAfterFree(_))));
        assert!(matches!(view.to_columns(Window::all()), Err(EngineError::UseAfterFree(_))));
    }

    #[test]
    fn test_queued_ports_dispatch_in_creation_order() {
        let engine = Engine::new();
        let table = w_x_table(&engine, "t");
        let ports: Vec<PortId> = (0..3).map(|_| table.make_port().unwrap()).collect();
        let views = [
            table.view(ViewConfig::new()).unwrap(),
            table.view(ViewConfig::new().columns(["x"])).unwrap(),
        ];
        let seen = Arc::new(Mutex::new(Vec::new()));
        for (i, view) in views.iter().enumerate() {
            let seen = seen.clone();
            view.on_update(move |e| seen.lock().unwrap().push((e.port_id, i)), UpdateMode::None)
                .unwrap();
        }

        for (i, &port) in ports.iter().rev().enumerate() {
            let row = format!(r#"[{{"w": {}.0, "x": {}}}]"#, i, i);
            table
                .enqueue(TableData::from_json(&row).unwrap(), UpdateOptions::port(port))
                .unwrap();
        }
        // Same port twice: folded into one notification per view.
        table
            .enqueue(
                TableData::from_json(r#"[{"w": 7.0, "x": 7}]"#).unwrap(),
                UpdateOptions::port(ports[1]),
            )
            .unwrap();
        table.process().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (ports[0], 0),
                (ports[0], 1),
                (ports[1], 0),
                (ports[1], 1),
                (ports[2], 0),
                (ports[2], 1),
            ]
        );
    }

    #[test]
    fn test_panicking_callback_does_not_block_others() {
        let engine = Engine::new();
        let table = w_x_table(&engine, "t");
        let first = table.view(ViewConfig::new()).unwrap();
        let second = table.view(ViewConfig::new()).unwrap();
        first.on_update(|_| panic!("subscriber bug"), UpdateMode::Row).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        for view in [&first, &second] {
            let calls = calls.clone();
            view.on_update(
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                },
                UpdateMode::None,
            )
            .unwrap();
        }
        table.update_json(r#"[{"w": 1.0, "x": 1}]"#).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        table.update_json(r#"[{"w": 2.0, "x": 2}]"#).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_row_delta_is_reingestible() {
        let engine = Engine::new();
        let table = w_x_table(&engine, "t");
        let view = table.view(ViewConfig::new()).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        view.on_update(
            move |e| {
                if let Some(Delta::Rows { rows, .. }) = &e.delta {
                    sink.lock().unwrap().extend(rows.iter().cloned());
                }
            },
            UpdateMode::Row,
        )
        .unwrap();

        table.update_json(r#"{"w": [1.5, 2.5], "x": [1, 2]}"#).unwrap();
        let rows = received.lock().unwrap().clone();
        let copy = Table::from_data(rows, TableOptions::new().index("w")).unwrap();
        assert_eq!(copy.size().unwrap(), 2);
        assert_eq!(
            copy.view(ViewConfig::new().columns(["w", "x"])).unwrap().to_columns(Window::all()).unwrap(),
            view.to_columns(Window::all()).unwrap()
        );
    }
}
