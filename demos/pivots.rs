/// Pivot Views Example
///
/// This example demonstrates:
/// - Grouping, splitting, aggregating and sorting a table
/// - Computed columns on the table and on a single view
/// - Cell-level update notifications

use livepivot::{
    Aggregate, ComputedColumnSpec, Delta, Engine, SortSpec, TableData, TableOptions, UpdateMode,
    ViewConfig, Window,
};

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    println!("=== LivePivot Pivot Example ===\n");

    let engine = Engine::new();
    let sales = engine
        .table_from_data(
            "sales",
            TableData::from_json(
                r#"{
                    "id": [1, 2, 3, 4, 5, 6],
                    "region": ["east", "west", "east", "north", "west", "east"],
                    "product": ["apples", "pears", "pears", "apples", "apples", "apples"],
                    "units": [10, 4, 7, 3, 12, 1],
                    "price": [1.25, 2.0, 2.1, 1.3, 1.2, 1.4],
                    "sold_at": ["2024-05-01T09:15:00", "2024-05-01T10:40:00", "2024-05-02T11:05:00",
                                "2024-05-02T16:30:00", "2024-05-03T08:00:00", "2024-05-03T12:45:00"]
                }"#,
            )
            .unwrap(),
            TableOptions::new().index("id"),
        )
        .unwrap();

    // 1. Table-level computed column, visible to every view
    println!("1. Adding revenue = units * price...");
    sales
        .add_computed_columns(&[ComputedColumnSpec::new("revenue", "*", ["units", "price"])])
        .unwrap();
    println!("   Columns: {:?}\n", sales.columns().unwrap());

    // 2. Group by region, split by product
    println!("2. Revenue by region and product:");
    let pivot = sales
        .view(
            ViewConfig::new()
                .group_by(["region"])
                .split_by(["product"])
                .columns(["revenue", "units"])
                .aggregate("units", Aggregate::Avg)
                .sort(SortSpec::desc("revenue")),
        )
        .unwrap();
    println!("   Column paths: {:?}", pivot.column_paths().unwrap());
    print!("{}", indent(&pivot.to_csv(Window::all()).unwrap()));

    // 3. A view-only expression bucketing sales by day
    println!("\n3. Units per day:");
    let daily = sales
        .view(
            ViewConfig::new()
                .group_by(["day"])
                .columns(["units"])
                .expression(ComputedColumnSpec::new("day", "day_bucket", ["sold_at"])),
        )
        .unwrap();
    print!("{}", indent(&daily.to_csv(Window::all().leaves_only()).unwrap()));

    // 4. Subscribe to cell changes and update the table
    println!("\n4. Watching cell changes...");
    pivot
        .on_update(
            |event| {
                if let Some(Delta::Cells(cells)) = &event.delta {
                    for cell in cells {
                        println!(
                            "   [{}] {} / {}: {} -> {}",
                            event.port_id, cell.row_key, cell.column, cell.old, cell.new
                        );
                    }
                }
            },
            UpdateMode::Cell,
        )
        .unwrap();
    sales.update_json(r#"[{"id": 4, "units": 30}]"#).unwrap();

    println!("\n=== Example Complete ===");
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("   {}\n", line)).collect()
}
