/// Client/Server Replication Example
///
/// Two tables mirror each other through row deltas. Each side owns a port
/// reserved for what the other side sends, and its subscriber skips
/// notifications on that port, so nothing echoes back.

use livepivot::{Delta, Engine, PortId, Table, TableOptions, UpdateMode, UpdateOptions, ViewConfig, Window};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Forward row deltas of `from` to `to` on `outbound`, skipping anything
/// that arrived on `inbound` (the port `to` sends on).
fn forward(from: &Table, inbound: PortId, to: &Table, outbound: PortId, forwarded: Arc<AtomicUsize>) {
    let view = from.view(ViewConfig::new()).unwrap();
    let to = to.clone();
    let name = from.name().to_string();
    view.on_update(
        move |event| {
            if event.port_id == inbound {
                return;
            }
            let Some(Delta::Rows { rows, removed }) = &event.delta else {
                return;
            };
            forwarded.fetch_add(1, Ordering::SeqCst);
            log::info!("{} -> {}: {} rows, {} removed", name, to.name(), rows.len(), removed.len());
            to.update(rows.clone(), UpdateOptions::port(outbound)).unwrap();
            if !removed.is_empty() {
                to.remove(removed.clone(), UpdateOptions::port(outbound)).unwrap();
            }
        },
        UpdateMode::Row,
    )
    .unwrap();
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    println!("=== LivePivot Replication Example ===\n");

    let engine = Engine::new();
    let schema = livepivot::Schema::from_json(r#"{"sym": "string", "bid": "float", "ask": "float"}"#).unwrap();
    let client = engine.table("client", schema.clone(), TableOptions::new().index("sym")).unwrap();
    let server = engine.table("server", schema, TableOptions::new().index("sym")).unwrap();

    let forwarded = Arc::new(AtomicUsize::new(0));
    let client_inbound = client.make_port().unwrap();
    let server_inbound = server.make_port().unwrap();
    forward(&client, client_inbound, &server, server_inbound, forwarded.clone());
    forward(&server, server_inbound, &client, client_inbound, forwarded.clone());

    client.update_json(r#"[{"sym": "AAPL", "bid": 189.1, "ask": 189.3}]"#).unwrap();
    server.update_json(r#"[{"sym": "MSFT", "bid": 411.0, "ask": 411.4}]"#).unwrap();
    client.update_json(r#"[{"sym": "MSFT", "ask": 411.2}]"#).unwrap();

    println!("Forwarded batches: {}", forwarded.load(Ordering::SeqCst));
    for table in [&client, &server] {
        let view = table.view(ViewConfig::new()).unwrap();
        println!("\n{}:", table.name());
        print!("{}", view.to_csv(Window::all()).unwrap());
        view.delete().unwrap();
    }

    println!("\n=== Example Complete ===");
}
