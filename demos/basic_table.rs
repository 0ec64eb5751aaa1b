/// Basic Table Operations Example
///
/// This example demonstrates:
/// - Creating an indexed table from a schema
/// - Upserting rows and partial updates by primary key
/// - Removing rows and reading the table back

use livepivot::{ColumnType, ColumnValue, Schema, Table, TableData, TableOptions, UpdateOptions};

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    println!("=== LivePivot Basic Table Example ===\n");

    // 1. Create a schema
    println!("1. Creating schema...");
    let schema = Schema::new([
        ("id", ColumnType::Integer),
        ("name", ColumnType::String),
        ("email", ColumnType::String),
        ("age", ColumnType::Integer),
        ("joined", ColumnType::Date),
    ]);
    println!("   Schema: {}\n", schema.to_json().unwrap());

    // 2. Create a table keyed on "id"
    println!("2. Creating table...");
    let users = Table::new(schema, TableOptions::new().name("users").index("id")).unwrap();
    println!("   {:?}\n", users);

    // 3. Load rows
    println!("3. Adding rows...");
    users
        .update_json(
            r#"[
                {"id": 1, "name": "Alice", "email": "alice@example.com", "age": 30, "joined": "2024-01-15"},
                {"id": 2, "name": "Bob", "email": "bob@example.com", "age": null, "joined": "2024-03-02"},
                {"id": 3, "name": "Charlie", "email": "charlie@example.com", "age": 25, "joined": "2024-06-30"}
            ]"#,
        )
        .unwrap();
    println!("   Table now has {} rows\n", users.size().unwrap());

    // 4. Partial update: only the supplied columns change
    println!("4. Updating Bob's age...");
    users.update_json(r#"[{"id": 2, "age": 28}]"#).unwrap();
    println!("   Updated Bob's age to 28\n");

    // 5. Existing key overwrites, new key appends
    println!("5. Upserting...");
    users
        .update_json(r#"[{"id": 3, "email": "c@example.com"}, {"id": 4, "name": "Diana", "age": 35}]"#)
        .unwrap();
    println!("   Table now has {} rows\n", users.size().unwrap());

    // 6. Remove by primary key
    println!("6. Removing id 1...");
    users
        .remove(vec![ColumnValue::Integer(1)], UpdateOptions::default())
        .unwrap();
    println!("   Table now has {} rows\n", users.size().unwrap());

    // 7. Read everything back
    println!("7. Final table contents:");
    if let TableData::Columns(columns) = users.to_data().unwrap() {
        for (name, values) in &columns {
            let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
            println!("   {:<7} {}", name, rendered.join(", "));
        }
    }

    // 8. Schema violations are rejected and leave the table untouched
    println!("\n8. Rejecting a bad batch...");
    let err = users
        .update_json(r#"[{"id": 9, "name": "Eve"}, {"id": 10, "nickname": "Mallory"}]"#)
        .unwrap_err();
    println!("   {}", err);
    println!("   Table still has {} rows", users.size().unwrap());

    println!("\n=== Example Complete ===");
}
