// SQLite integration tests against real database files

use dbhandler::{
    CellValue, ColumnSpec, ConnectionConfig, Database, DatabaseError, DatabaseHandler,
    ForeignKeySpec, IndexType, TableOptions,
};
use tempfile::TempDir;

async fn open(dir: &TempDir) -> Database {
    let path = dir.path().join("test.db");
    let config = ConnectionConfig::sqlite(path.to_string_lossy().to_string());
    Database::new(config).await.unwrap()
}

fn columns(pairs: &[(&str, &str)]) -> ColumnSpec {
    pairs
        .iter()
        .map(|(name, ty)| (name.to_string(), ty.to_string()))
        .collect()
}

async fn count(db: &mut Database, table: &str) -> i64 {
    let rows = db
        .query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .await
        .unwrap();
    rows[0]["n"].as_i64().unwrap()
}

async fn column_names(db: &mut Database, table: &str) -> Vec<String> {
    db.query("SELECT name FROM pragma_table_info(?) ORDER BY cid", &[CellValue::from(table)])
        .await
        .unwrap()
        .iter()
        .filter_map(|row| row["name"].as_str().map(String::from))
        .collect()
}

async fn create_people(db: &mut Database) {
    db.create_table(
        "people",
        &columns(&[
            ("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            ("name", "TEXT NOT NULL"),
            ("age", "INTEGER"),
            ("city", "TEXT"),
        ]),
        &TableOptions::default(),
    )
    .await
    .unwrap();
}

async fn create_shop(db: &mut Database) {
    db.create_table(
        "customers",
        &columns(&[("id", "INTEGER PRIMARY KEY"), ("name", "TEXT")]),
        &TableOptions::default(),
    )
    .await
    .unwrap();
    db.create_table(
        "orders",
        &columns(&[
            ("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            ("customer_id", "INTEGER"),
            ("total", "REAL"),
        ]),
        &TableOptions::default(),
    )
    .await
    .unwrap();
    db.insert(
        "INSERT INTO customers (id, name) VALUES (?, ?)",
        &[CellValue::Int(1), CellValue::from("ada")],
    )
    .await
    .unwrap();
}

fn customer_key() -> ForeignKeySpec {
    ForeignKeySpec::new("fk_orders_customer", "customer_id", "customers", "id")
        .on_delete("CASCADE")
}

#[tokio::test]
async fn test_create_exists_drop() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;

    assert!(!db.table_exists("people").await.unwrap());
    create_people(&mut db).await;
    assert!(db.table_exists("people").await.unwrap());

    // IF NOT EXISTS makes a second create harmless
    create_people(&mut db).await;

    db.drop_table("people").await.unwrap();
    assert!(!db.table_exists("people").await.unwrap());
    db.drop_table("people").await.unwrap();
}

#[tokio::test]
async fn test_insert_returns_sequential_ids() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;

    let insert = "INSERT INTO people (name, age) VALUES (?, ?)";
    let first = db
        .insert(insert, &[CellValue::from("ada"), CellValue::Int(36)])
        .await
        .unwrap();
    let second = db
        .insert(insert, &[CellValue::from("alan"), CellValue::Int(41)])
        .await
        .unwrap();
    assert_eq!((first, second), (1, 2));

    let rows = db
        .query("SELECT id, name, age, city FROM people WHERE name = ?", &[CellValue::from("alan")])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["id", "name", "age", "city"]);
    assert_eq!(rows[0]["age"], CellValue::Int(41));
    assert!(rows[0]["city"].is_null());
}

#[tokio::test]
async fn test_execute_reports_affected_rows() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;
    for name in ["a", "b", "c"] {
        db.insert("INSERT INTO people (name, age) VALUES (?, 20)", &[CellValue::from(name)])
            .await
            .unwrap();
    }

    let affected = db
        .execute("UPDATE people SET age = age + 1 WHERE name <> ?", &[CellValue::from("a")])
        .await
        .unwrap();
    assert_eq!(affected, 2);
}

#[tokio::test]
async fn test_truncate_keeps_table_and_resets_ids() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;
    db.insert("INSERT INTO people (name) VALUES ('a')", &[]).await.unwrap();
    db.insert("INSERT INTO people (name) VALUES ('b')", &[]).await.unwrap();

    db.truncate_table("people").await.unwrap();
    assert!(db.table_exists("people").await.unwrap());
    assert_eq!(count(&mut db, "people").await, 0);

    let id = db.insert("INSERT INTO people (name) VALUES ('c')", &[]).await.unwrap();
    assert_eq!(id, 1);
}

#[tokio::test]
async fn test_commit_and_rollback() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;

    db.start_transaction().await.unwrap();
    db.insert("INSERT INTO people (name) VALUES ('kept')", &[]).await.unwrap();
    db.commit_transaction().await.unwrap();
    assert_eq!(count(&mut db, "people").await, 1);

    db.start_transaction().await.unwrap();
    db.insert("INSERT INTO people (name) VALUES ('discarded')", &[]).await.unwrap();
    assert_eq!(count(&mut db, "people").await, 2);
    db.rollback_transaction().await.unwrap();
    assert_eq!(count(&mut db, "people").await, 1);
}

#[tokio::test]
async fn test_changes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut db = open(&dir).await;
        create_people(&mut db).await;
        db.insert("INSERT INTO people (name) VALUES ('ada')", &[]).await.unwrap();
        db.close().await.unwrap();
        db.close().await.unwrap();
    }

    let mut db = open(&dir).await;
    assert_eq!(count(&mut db, "people").await, 1);
}

#[tokio::test]
async fn test_indexes() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;

    assert!(!db.index_exists("people", &["name", "age"]).await.unwrap());
    db.add_index("people", &["name", "age"], None, IndexType::Index)
        .await
        .unwrap();
    assert!(db.index_exists("people", &["name", "age"]).await.unwrap());

    db.add_index("people", &["city"], Some("uq_city"), IndexType::Unique)
        .await
        .unwrap();

    let indexes = db.get_table_indexes("people").await.unwrap();
    let derived = indexes.iter().find(|i| i.name == "index_name_age").unwrap();
    assert_eq!(derived.columns, vec!["name".to_string(), "age".to_string()]);
    assert!(!derived.unique);
    let unique = indexes.iter().find(|i| i.name == "uq_city").unwrap();
    assert!(unique.unique);

    db.drop_index("people", "index_name_age").await.unwrap();
    assert!(!db.index_exists("people", &["name", "age"]).await.unwrap());
}

#[tokio::test]
async fn test_add_column() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;

    db.add_column("people", "email", "TEXT").await.unwrap();
    assert_eq!(
        column_names(&mut db, "people").await,
        vec!["id", "name", "age", "city", "email"]
    );
}

#[tokio::test]
async fn test_drop_column_keeps_rows_and_indexes() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;
    db.insert("INSERT INTO people (name, age, city) VALUES ('ada', 36, 'london')", &[])
        .await
        .unwrap();
    db.insert("INSERT INTO people (name, age, city) VALUES ('alan', 41, 'wilmslow')", &[])
        .await
        .unwrap();
    db.add_index("people", &["name"], None, IndexType::Index).await.unwrap();
    db.add_index("people", &["city"], None, IndexType::Index).await.unwrap();

    db.drop_column("people", "city").await.unwrap();

    assert_eq!(column_names(&mut db, "people").await, vec!["id", "name", "age"]);
    assert!(!db.table_exists("people_old").await.unwrap());

    let rows = db.query("SELECT id, name, age FROM people ORDER BY id", &[]).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["name"], CellValue::from("alan"));
    assert_eq!(rows[1]["age"], CellValue::Int(41));

    assert!(db.index_exists("people", &["name"]).await.unwrap());
    assert!(!db.index_exists("people", &["city"]).await.unwrap());

    // The AUTOINCREMENT sequence carries over
    let id = db.insert("INSERT INTO people (name) VALUES ('grace')", &[]).await.unwrap();
    assert_eq!(id, 3);
}

#[tokio::test]
async fn test_failed_drop_column_leaves_table_unchanged() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;
    db.insert("INSERT INTO people (name, city) VALUES ('ada', 'london')", &[])
        .await
        .unwrap();
    db.add_index("people", &["city"], None, IndexType::Index).await.unwrap();

    // The rename target is taken, so the rebuild fails part way in
    db.modify("CREATE TABLE people_old (x INTEGER)", &[]).await.unwrap();

    let result = db.drop_column("people", "city").await;
    assert!(matches!(result, Err(DatabaseError::Migration(_))));

    assert_eq!(column_names(&mut db, "people").await, vec!["id", "name", "age", "city"]);
    assert_eq!(count(&mut db, "people").await, 1);
    assert!(db.index_exists("people", &["city"]).await.unwrap());
}

#[tokio::test]
async fn test_drop_missing_column_is_a_migration_error() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;

    let result = db.drop_column("people", "nope").await;
    assert!(matches!(result, Err(DatabaseError::Migration(_))));
    assert_eq!(column_names(&mut db, "people").await, vec!["id", "name", "age", "city"]);
}

#[tokio::test]
async fn test_drop_column_keeps_collation_and_checks() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    db.modify(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT COLLATE NOCASE UNIQUE, \
         junk TEXT, CHECK (length(name) > 0))",
        &[],
    )
    .await
    .unwrap();
    db.insert("INSERT INTO t (name, junk) VALUES ('Ada', 'x')", &[])
        .await
        .unwrap();

    db.drop_column("t", "junk").await.unwrap();
    assert_eq!(column_names(&mut db, "t").await, vec!["id", "name"]);

    // NOCASE still applies to the UNIQUE column
    let result = db.insert("INSERT INTO t (name) VALUES ('ADA')", &[]).await;
    assert!(result.unwrap_err().is_statement());
    // and the table CHECK constraint is still enforced
    let result = db.insert("INSERT INTO t (name) VALUES ('')", &[]).await;
    assert!(result.unwrap_err().is_statement());
    assert_eq!(count(&mut db, "t").await, 1);
}

#[tokio::test]
async fn test_drop_column_keeps_generated_columns() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    db.modify(
        "CREATE TABLE sums (a INTEGER, b INTEGER, s INTEGER AS (a + b), junk TEXT)",
        &[],
    )
    .await
    .unwrap();
    db.insert("INSERT INTO sums (a, b, junk) VALUES (2, 3, 'x')", &[])
        .await
        .unwrap();

    db.drop_column("sums", "junk").await.unwrap();
    db.insert("INSERT INTO sums (a, b) VALUES (4, 5)", &[]).await.unwrap();
    let rows = db.query("SELECT s FROM sums ORDER BY a", &[]).await.unwrap();
    let sums: Vec<CellValue> = rows.iter().map(|row| row["s"].clone()).collect();
    assert_eq!(sums, vec![CellValue::Int(5), CellValue::Int(9)]);

    // s is computed from a, so a cannot go
    let result = db.drop_column("sums", "a").await;
    assert!(matches!(result, Err(DatabaseError::Migration(_))));
    assert_eq!(count(&mut db, "sums").await, 2);
}

#[tokio::test]
async fn test_drop_column_keeps_triggers() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;
    db.modify("CREATE TABLE audit (person TEXT)", &[]).await.unwrap();
    db.modify(
        "CREATE TRIGGER people_audit AFTER INSERT ON people \
         BEGIN INSERT INTO audit (person) VALUES (new.name); END",
        &[],
    )
    .await
    .unwrap();

    db.drop_column("people", "city").await.unwrap();

    let triggers = db
        .query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?",
            &[CellValue::from("people")],
        )
        .await
        .unwrap();
    assert_eq!(triggers[0]["n"], CellValue::Int(1));

    db.insert("INSERT INTO people (name) VALUES ('ada')", &[]).await.unwrap();
    assert_eq!(count(&mut db, "audit").await, 1);
}

#[tokio::test]
async fn test_drop_column_used_by_trigger_fails() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_people(&mut db).await;
    db.modify(
        "CREATE TRIGGER people_city AFTER UPDATE OF city ON people \
         BEGIN UPDATE people SET age = 0 WHERE id = new.id; END",
        &[],
    )
    .await
    .unwrap();

    let result = db.drop_column("people", "city").await;
    assert!(matches!(result, Err(DatabaseError::Migration(_))));
    assert_eq!(
        column_names(&mut db, "people").await,
        vec!["id", "name", "age", "city"]
    );
}

#[tokio::test]
async fn test_drop_column_with_keyword_names() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    db.create_table(
        "ledger",
        &columns(&[
            ("id", "INTEGER PRIMARY KEY"),
            ("order", "INTEGER"),
            ("group", "TEXT"),
        ]),
        &TableOptions::default(),
    )
    .await
    .unwrap();
    db.insert("INSERT INTO ledger (\"order\", \"group\") VALUES (1, 'a')", &[])
        .await
        .unwrap();
    db.add_index("ledger", &["order"], None, IndexType::Index).await.unwrap();

    db.drop_column("ledger", "group").await.unwrap();

    assert_eq!(column_names(&mut db, "ledger").await, vec!["id", "order"]);
    assert!(db.index_exists("ledger", &["order"]).await.unwrap());
    let rows = db.query("SELECT \"order\" FROM ledger", &[]).await.unwrap();
    assert_eq!(rows[0]["order"], CellValue::Int(1));
}

#[tokio::test]
async fn test_foreign_key_rejects_unknown_customer() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_shop(&mut db).await;

    db.add_foreign_key("orders", &customer_key()).await.unwrap();
    let keys = db
        .query("SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list('orders')", &[])
        .await
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["table"], CellValue::from("customers"));

    let insert = "INSERT INTO orders (customer_id, total) VALUES (?, ?)";
    db.insert(insert, &[CellValue::Int(1), CellValue::Float(9.5)])
        .await
        .unwrap();
    let result = db
        .insert(insert, &[CellValue::Int(99), CellValue::Float(1.0)])
        .await;
    assert!(result.unwrap_err().is_statement());
    assert_eq!(count(&mut db, "orders").await, 1);

    // ON DELETE CASCADE survived the rebuild
    db.execute("DELETE FROM customers WHERE id = 1", &[]).await.unwrap();
    assert_eq!(count(&mut db, "orders").await, 0);
}

#[tokio::test]
async fn test_drop_foreign_key() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_shop(&mut db).await;
    db.add_foreign_key("orders", &customer_key()).await.unwrap();

    db.drop_foreign_key("orders", "fk_orders_customer").await.unwrap();
    let keys = db
        .query("SELECT * FROM pragma_foreign_key_list('orders')", &[])
        .await
        .unwrap();
    assert!(keys.is_empty());

    db.insert(
        "INSERT INTO orders (customer_id, total) VALUES (?, ?)",
        &[CellValue::Int(99), CellValue::Float(1.0)],
    )
    .await
    .unwrap();

    let result = db.drop_foreign_key("orders", "fk_orders_customer").await;
    assert!(matches!(result, Err(DatabaseError::Migration(_))));
}

#[tokio::test]
async fn test_add_foreign_key_over_orphans_rolls_back() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;
    create_shop(&mut db).await;
    db.insert("INSERT INTO orders (customer_id, total) VALUES (42, 3.0)", &[])
        .await
        .unwrap();

    let result = db.add_foreign_key("orders", &customer_key()).await;
    assert!(matches!(result, Err(DatabaseError::Migration(_))));

    let keys = db
        .query("SELECT * FROM pragma_foreign_key_list('orders')", &[])
        .await
        .unwrap();
    assert!(keys.is_empty());
    assert_eq!(count(&mut db, "orders").await, 1);
}

#[tokio::test]
async fn test_invalid_identifiers_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir).await;

    let result = db.drop_table("people; DROP TABLE x").await;
    assert!(matches!(result, Err(DatabaseError::InvalidArgument(_))));
    let result = db.add_index("people", &[], None, IndexType::Index).await;
    assert!(matches!(result, Err(DatabaseError::InvalidArgument(_))));
}
