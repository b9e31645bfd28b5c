use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use seatwise::engine::Engine;
use seatwise::model::TableRequest;
use seatwise::wire;

// ── Test infrastructure ──────────────────────────────────────

/// Serve a fresh engine with a main hall (2/4/6 tops) and a VIP room.
async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("seatwise_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("seatwise.wal")).unwrap());
    engine.create_area("main", "Main Hall", 10).await.unwrap();
    for (id, capacity) in [("m2", 2), ("m4", 4), ("m6", 6)] {
        engine
            .add_table(TableRequest {
                id: Some(id.into()),
                area_id: "main".into(),
                kind: "standard".into(),
                capacity: Some(capacity),
            })
            .await
            .unwrap();
    }
    engine.create_area("vip", "VIP Room", 5).await.unwrap();

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "seatwise".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("seatwise")
        .user("host")
        .password("seatwise");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// Engine failures arrive as P0001 with the error kind leading the message.
async fn engine_error(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION), "{err:?}");
    err.as_db_error().unwrap().message().to_string()
}

fn tomorrow() -> String {
    chrono::Local::now()
        .date_naive()
        .succ_opt()
        .unwrap()
        .format("%Y-%m-%d")
        .to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn list_areas_and_tables() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let areas = rows(&client, "SELECT * FROM areas").await;
    assert_eq!(areas.len(), 2);
    assert_eq!(areas[0].get("id"), Some("main"));
    assert_eq!(areas[1].get("max_tables"), Some("5"));

    let big = rows(&client, "SELECT * FROM tables WHERE area_id = 'main' AND capacity >= 4").await;
    let ids: Vec<_> = big.iter().map(|r| r.get("id").unwrap().to_string()).collect();
    assert_eq!(ids, ["m4", "m6"]);
}

#[tokio::test]
async fn reservation_lifecycle_over_sql() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let date = tomorrow();

    let created = rows(
        &client,
        &format!(
            "INSERT INTO reservations (id, name, date, start_time, party_size, notes) \
             VALUES ('r-ada', 'Ada', '{date}', '19:00', 3, 'anniversary') RETURNING *"
        ),
    )
    .await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get("status"), Some("pending"));
    assert_eq!(created[0].get("table_id"), None);
    assert_eq!(created[0].get("duration"), Some("90"));

    let confirmed = rows(
        &client,
        "UPDATE reservations SET status = 'confirmed' WHERE id = 'r-ada' RETURNING *",
    )
    .await;
    assert_eq!(confirmed[0].get("status"), Some("confirmed"));
    assert_eq!(confirmed[0].get("table_id"), Some("m4"));

    let on_m4 = rows(&client, "SELECT * FROM reservations WHERE table_id = 'm4'").await;
    assert_eq!(on_m4.len(), 1);
    assert_eq!(on_m4[0].get("notes"), Some("anniversary"));

    client
        .batch_execute("UPDATE reservations SET status = 'cancelled' WHERE id = 'r-ada'")
        .await
        .unwrap();
    let fetched = rows(&client, "SELECT * FROM reservations WHERE id = 'r-ada'").await;
    assert_eq!(fetched[0].get("status"), Some("cancelled"));
    assert_eq!(fetched[0].get("table_id"), None);

    let msg = engine_error(&client, "UPDATE reservations SET status = 'confirmed' WHERE id = 'r-ada'").await;
    assert!(msg.starts_with("AlreadyCancelled:"), "{msg}");
}

#[tokio::test]
async fn availability_over_sql() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let date = tomorrow();

    let found = rows(
        &client,
        &format!("SELECT * FROM availability WHERE date = '{date}' AND party_size = 5 AND start_time = '20:00'"),
    )
    .await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("area_name"), Some("Main Hall"));
    assert_eq!(found[0].get("table_id"), Some("m6"));
    assert_eq!(found[0].get("capacity"), Some("6"));

    let msg = engine_error(
        &client,
        &format!("SELECT * FROM availability WHERE date = '{date}' AND party_size = 9 AND start_time = '20:00'"),
    )
    .await;
    assert!(msg.starts_with("NoSuitableTable:"), "{msg}");

    let msg = engine_error(&client, "SELECT * FROM availability WHERE start_time = '20:00'").await;
    assert!(msg.starts_with("MissingFields:"), "{msg}");
    assert!(msg.contains("date") && msg.contains("partySize"), "{msg}");
}

#[tokio::test]
async fn table_provisioning_errors_surface_by_kind() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    for i in 0..3 {
        client
            .batch_execute(&format!(
                "INSERT INTO tables (id, area_id, type, capacity) VALUES ('v{i}', 'vip', 'booth', 4)"
            ))
            .await
            .unwrap();
    }
    let msg = engine_error(
        &client,
        "INSERT INTO tables (area_id, type, capacity) VALUES ('vip', 'booth', 4)",
    )
    .await;
    assert!(msg.starts_with("AreaTableLimitReached:"), "{msg}");

    let msg = engine_error(
        &client,
        "INSERT INTO tables (area_id, type, capacity) VALUES ('main', 'booth', 'lots')",
    )
    .await;
    assert!(msg.starts_with("InvalidInput:"), "{msg}");

    let msg = engine_error(
        &client,
        "INSERT INTO tables (area_id, type, capacity) VALUES ('cellar', 'booth', 4)",
    )
    .await;
    assert!(msg.starts_with("AreaNotFound:"), "{msg}");
}

#[tokio::test]
async fn bad_status_and_bad_sql() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let date = tomorrow();

    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, name, date, start_time, party_size) \
             VALUES ('r-bo', 'Bo', '{date}', '12:00', 2)"
        ))
        .await
        .unwrap();

    let msg = engine_error(&client, "UPDATE reservations SET status = 'seated' WHERE id = 'r-bo'").await;
    assert!(msg.starts_with("InvalidStatus:"), "{msg}");

    for party in ["'lots'", "-3"] {
        let msg = engine_error(
            &client,
            &format!(
                "INSERT INTO reservations (name, date, start_time, party_size) \
                 VALUES ('Ada', '{date}', '19:00', {party})"
            ),
        )
        .await;
        assert!(msg.starts_with("InvalidInput:"), "{party}: {msg}");
    }

    let err = client.simple_query("SELEC * FROM areas").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));

    let err = client.simple_query("SELECT * FROM waitlist").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));
}

#[tokio::test]
async fn connections_share_one_engine() {
    let (addr, engine) = start_test_server().await;
    let writer = connect(addr).await;
    let reader = connect(addr).await;
    let date = tomorrow();

    writer
        .batch_execute(&format!(
            "INSERT INTO reservations (id, name, date, start_time, party_size, area) \
             VALUES ('r-shared', 'Cy', '{date}', '18:00', 2, 'MAIN')"
        ))
        .await
        .unwrap();

    let seen = rows(&reader, "SELECT * FROM reservations WHERE id = 'r-shared'").await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("area_id"), Some("main"));
    assert!(engine.get_reservation("r-shared").is_some());
}
