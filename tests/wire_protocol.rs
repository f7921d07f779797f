use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use timetable::engine::ConflictPolicy;
use timetable::tenant::TenantManager;
use timetable::wire;

const PASSWORD: &str = "timetable";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    start_server_with_policy(ConflictPolicy::PerDimension).await
}

async fn start_server_with_policy(policy: ConflictPolicy) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("timetable_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, policy));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect_to(addr: SocketAddr, dbname: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("registrar")
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn connect(addr: SocketAddr) -> Client {
    connect_to(addr, "test").await
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

fn insert_sql(staff: &str, dept: &str, subject: &str, room: &str, day: &str, time: &str) -> String {
    format!(
        r#"INSERT INTO bookings (staff_name, department, year, semester, subject, room, day, "time") VALUES ('{staff}', '{dept}', '2', '3', '{subject}', '{room}', '{day}', '{time}')"#
    )
}

// ── Bookings ─────────────────────────────────────────────────

#[tokio::test]
async fn insert_then_select_bookings() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    client
        .batch_execute(&insert_sql("Asha", "CS", "OS", "A101", "Monday", "8:30 - 9:20"))
        .await
        .unwrap();

    let found = rows(&client, "SELECT * FROM bookings WHERE staff_name = 'Asha'").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some("1"));
    assert_eq!(found[0].get("subject"), Some("OS"));
    assert_eq!(found[0].get("room"), Some("A101"));
    assert_eq!(found[0].get("day"), Some("Monday"));
    assert_eq!(found[0].get("time"), Some("8:30 - 9:20"));
}

#[tokio::test]
async fn conflicting_inserts_rejected() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    client
        .batch_execute(&insert_sql("Asha", "CS", "OS", "", "Monday", "8:30 - 9:20"))
        .await
        .unwrap();

    let staff = insert_sql("Asha", "CS", "DB", "", "Monday", "8:30 - 9:20");
    assert_eq!(sqlstate(&client, &staff).await, "23505");

    let class = insert_sql("Rahul", "CS", "DB", "", "Monday", "8:30 - 9:20");
    let err = client.simple_query(&class).await.unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "23505");
    assert!(db.message().contains("class"));

    assert_eq!(rows(&client, "SELECT * FROM bookings").await.len(), 1);
}

#[tokio::test]
async fn whole_slot_policy_over_wire() {
    let addr = start_server_with_policy(ConflictPolicy::WholeSlot).await;
    let client = connect(addr).await;

    client
        .batch_execute(&insert_sql("Asha", "CS", "OS", "", "Friday", "2:20 - 3:00"))
        .await
        .unwrap();
    let other = insert_sql("Meena", "ME", "Fluids", "", "Friday", "2:20 - 3:00");
    assert_eq!(sqlstate(&client, &other).await, "23505");
}

#[tokio::test]
async fn batch_insert_is_atomic() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let sql = r#"INSERT INTO bookings (staff_name, department, subject, day, "time") VALUES
        ('Asha', 'CS', 'OS', 'Monday', '8:30 - 9:20'),
        ('Asha', 'CS', 'DB', 'Monday', '8:30 - 9:20')"#;
    assert_eq!(sqlstate(&client, sql).await, "23505");
    assert!(rows(&client, "SELECT * FROM bookings").await.is_empty());

    let sql = r#"INSERT INTO bookings (staff_name, department, subject, day, "time") VALUES
        ('Asha', 'CS', 'OS', 'Monday', '8:30 - 9:20'),
        ('Asha', 'CS', 'DB', 'Tuesday', '8:30 - 9:20')"#;
    let inserted = client.execute(sql, &[]).await.unwrap();
    assert_eq!(inserted, 2);
}

#[tokio::test]
async fn update_and_delete_by_id() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    client
        .batch_execute(&insert_sql("Asha", "CS", "OS", "", "Monday", "8:30 - 9:20"))
        .await
        .unwrap();
    client
        .batch_execute(r#"UPDATE bookings SET day = 'Thursday', "time" = '1:30 - 2:20', room = 'Lab 2' WHERE id = 1"#)
        .await
        .unwrap();

    let found = rows(&client, "SELECT * FROM bookings WHERE id = 1").await;
    assert_eq!(found[0].get("day"), Some("Thursday"));
    assert_eq!(found[0].get("time"), Some("1:30 - 2:20"));
    assert_eq!(found[0].get("room"), Some("Lab 2"));

    client.batch_execute("DELETE FROM bookings WHERE id = 1").await.unwrap();
    assert!(rows(&client, "SELECT * FROM bookings").await.is_empty());

    assert_eq!(sqlstate(&client, "DELETE FROM bookings WHERE id = 1").await, "02000");
    assert_eq!(
        sqlstate(&client, "UPDATE bookings SET subject = 'X' WHERE id = 7").await,
        "02000"
    );
}

// ── Auto-assign ──────────────────────────────────────────────

#[tokio::test]
async fn auto_assign_returns_slot() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let sql = "INSERT INTO assignments (staff_name, department, year, semester, subject) VALUES ('Asha', 'CS', '2', '3', 'OS')";
    let first = rows(&client, sql).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].get("day"), Some("Monday"));
    assert_eq!(first[0].get("time"), Some("8:30 - 9:20"));

    let second = rows(&client, sql).await;
    assert_eq!(second[0].get("day"), Some("Tuesday"));
    assert_eq!(second[0].get("time"), Some("8:30 - 9:20"));
}

#[tokio::test]
async fn auto_assign_no_capacity() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let sql = "INSERT INTO assignments VALUES ('Asha', 'CS', '2', '3', 'OS')";
    for _ in 0..35 {
        assert_eq!(rows(&client, sql).await.len(), 1);
    }
    assert_eq!(sqlstate(&client, sql).await, "53000");
}

// ── Grid, slots and export ───────────────────────────────────

#[tokio::test]
async fn grid_with_extended_protocol_params() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    client
        .execute(
            r#"INSERT INTO bookings (staff_name, department, year, semester, subject, day, "time") VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            &[&"Asha", &"CS", &"2", &"3", &"OS", &"Wednesday", &"10:20 - 11:10"],
        )
        .await
        .unwrap();

    let grid = client
        .query(
            "SELECT * FROM grid WHERE staff_name = $1 AND department = $2",
            &[&"Asha", &"CS"],
        )
        .await
        .unwrap();
    assert_eq!(grid.len(), 7);
    let row: &str = grid[2].get("wednesday");
    assert_eq!(row, "OS (Y:2 S:3)");
    let free: &str = grid[2].get("monday");
    assert_eq!(free, "Free");
    let time: &str = grid[0].get("time");
    assert_eq!(time, "8:30 - 9:20");
}

#[tokio::test]
async fn bound_values_are_stored_verbatim() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    client
        .execute(
            r#"INSERT INTO bookings (staff_name, department, year, semester, subject, day, "time") VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            &[&"D'Souza", &"CS", &"2", &"3", &"Costs $1 each", &"Monday", &"8:30 - 9:20"],
        )
        .await
        .unwrap();

    let found = rows(&client, "SELECT * FROM bookings WHERE department = 'CS'").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("staff_name"), Some("D'Souza"));
    assert_eq!(found[0].get("subject"), Some("Costs $1 each"));

    // A bound value never turns into SQL.
    let matched = client
        .query(
            "SELECT * FROM bookings WHERE staff_name = $1",
            &[&"x' OR staff_name = 'D''Souza"],
        )
        .await
        .unwrap();
    assert!(matched.is_empty());
}

#[tokio::test]
async fn slots_listed_in_scan_order() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let slots = rows(&client, "SELECT * FROM slots").await;
    assert_eq!(slots.len(), 35);
    assert_eq!(slots[0].get("day"), Some("Monday"));
    assert_eq!(slots[1].get("day"), Some("Tuesday"));
    assert_eq!(slots[5].get("time"), Some("9:20 - 10:10"));
    assert_eq!(slots[34].get("position"), Some("34"));
}

#[tokio::test]
async fn export_grid_as_csv_and_json() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    client
        .batch_execute(&insert_sql("Asha", "CS", "OS", "", "Tuesday", "8:30 - 9:20"))
        .await
        .unwrap();

    let csv = rows(
        &client,
        "SELECT * FROM grid_export WHERE format = 'csv' AND staff_name = 'Asha' AND department = 'CS'",
    )
    .await;
    let document = csv[0].get("document").unwrap();
    let mut lines = document.lines();
    assert_eq!(lines.next(), Some("Time,Monday,Tuesday,Wednesday,Thursday,Friday"));
    assert_eq!(lines.next(), Some("8:30 - 9:20,Free,OS (Y:2 S:3),Free,Free,Free"));

    let json = rows(&client, "SELECT * FROM grid_export WHERE format = 'json'").await;
    let value: serde_json::Value = serde_json::from_str(json[0].get("document").unwrap()).unwrap();
    assert_eq!(value["rows"][0]["cells"][1]["subject"], "OS");

    assert_eq!(
        sqlstate(&client, "SELECT * FROM grid_export WHERE format = 'pdf'").await,
        "22023"
    );
}

// ── Tenants and errors ───────────────────────────────────────

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let addr = start_test_server().await;
    let a = connect_to(addr, "college_a").await;
    let b = connect_to(addr, "college_b").await;

    let sql = insert_sql("Asha", "CS", "OS", "", "Monday", "8:30 - 9:20");
    a.batch_execute(&sql).await.unwrap();
    b.batch_execute(&sql).await.unwrap();

    assert_eq!(rows(&a, "SELECT * FROM bookings").await.len(), 1);
    assert_eq!(rows(&b, "SELECT * FROM bookings").await.len(), 1);
}

#[tokio::test]
async fn bad_statements_map_to_sqlstates() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    assert_eq!(sqlstate(&client, "SELEC nonsense").await, "42601");
    assert_eq!(sqlstate(&client, "SELECT * FROM teachers").await, "42P01");
    assert_eq!(
        sqlstate(&client, "SELECT * FROM bookings WHERE colour = 'red'").await,
        "42703"
    );
    assert_eq!(
        sqlstate(&client, &insert_sql("Asha", "CS", "OS", "", "Sunday", "8:30 - 9:20")).await,
        "22023"
    );
    assert_eq!(
        sqlstate(&client, &insert_sql("", "CS", "OS", "", "Monday", "8:30 - 9:20")).await,
        "22023"
    );
}

#[tokio::test]
async fn wrong_password_rejected() {
    let addr = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("registrar")
        .password("wrong");
    assert!(config.connect(NoTls).await.is_err());
}
