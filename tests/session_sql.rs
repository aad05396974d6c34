//! SQL statements through `Session`, including transactions between two
//! clients sharing one data directory.

use rust_flat_db::config::EngineConfig;
use rust_flat_db::engine::{snapshot_path, Engine};
use rust_flat_db::error::EngineError;
use rust_flat_db::sql::Session;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn session(dir: &Path) -> Session {
    let engine = Engine::open(EngineConfig::with_data_dir(dir)).unwrap();
    Session::new(Arc::new(engine))
}

fn exec(s: &mut Session, sql: &str) -> String {
    s.execute(sql)
        .unwrap_or_else(|e| panic!("{sql} failed: {e:#}"))
}

/// Runs each statement, panicking on the first failure.
fn run_all(s: &mut Session, stmts: &[&str]) {
    for sql in stmts {
        exec(s, sql);
    }
}

fn products(s: &mut Session) {
    run_all(
        s,
        &[
            "CREATE DATABASE db_2;",
            "USE db_2;",
            "CREATE TABLE Product (pid int, name varchar(20), price float);",
            "INSERT INTO Product VALUES (1, 'Gizmo', 19.99);",
            "INSERT INTO Product VALUES (2, 'PowerGizmo', 29.99);",
            "INSERT INTO Product VALUES (3, 'SingleTouch', 149.99);",
            "INSERT INTO Product VALUES (4, 'MultiTouch', 199.99);",
            "INSERT INTO Product VALUES (5, 'SuperGizmo', 49.99);",
        ],
    );
}

#[test]
fn status_messages() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path());

    assert_eq!(exec(&mut s, "CREATE DATABASE db_1;"), "Database db_1 created.");
    assert_eq!(exec(&mut s, "USE db_1;"), "Using database db_1.");
    assert_eq!(s.current_database(), Some("db_1"));
    assert_eq!(
        exec(&mut s, "CREATE TABLE tbl_1 (a1 int, a2 varchar(20));"),
        "Table tbl_1 created."
    );
    assert_eq!(exec(&mut s, "ALTER TABLE tbl_1 ADD a3 float;"), "Table tbl_1 modified.");
    assert_eq!(
        exec(&mut s, "INSERT INTO tbl_1 VALUES (1, 'x', 1.5), (2, 'y', 2.5);"),
        "2 new records inserted."
    );
    assert_eq!(exec(&mut s, "DROP TABLE tbl_1;"), "Table tbl_1 deleted.");
    assert_eq!(exec(&mut s, "DROP DATABASE db_1;"), "Database db_1 deleted.");
    assert_eq!(s.current_database(), None);
}

#[test]
fn select_update_delete_through_sql() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path());
    products(&mut s);

    assert_eq!(
        exec(&mut s, "UPDATE Product SET name = 'Gizmo' WHERE name = 'SuperGizmo';"),
        "1 record modified."
    );
    assert_eq!(
        exec(&mut s, "UPDATE Product SET price = 14.99 WHERE name = 'Gizmo';"),
        "2 records modified."
    );
    assert_eq!(
        exec(&mut s, "DELETE FROM Product WHERE name = 'Gizmo';"),
        "2 records deleted."
    );
    assert_eq!(
        exec(&mut s, "DELETE FROM Product WHERE price > 150;"),
        "1 record deleted."
    );
    assert_eq!(
        exec(&mut s, "SELECT name, price FROM Product WHERE pid != 2;"),
        "name varchar(20)|price float\nSingleTouch|149.99"
    );
    assert_eq!(
        exec(&mut s, "SELECT * FROM Product;"),
        "pid int|name varchar(20)|price float\n2|PowerGizmo|29.99\n3|SingleTouch|149.99"
    );
}

#[test]
fn insert_with_column_list_and_bad_values() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path());
    run_all(
        &mut s,
        &[
            "CREATE DATABASE d;",
            "USE d;",
            "CREATE TABLE t (a int, b varchar(10), c bool);",
        ],
    );

    assert_eq!(
        exec(&mut s, "INSERT INTO t (c, a) VALUES (true, -4);"),
        "1 new record inserted."
    );
    assert_eq!(exec(&mut s, "SELECT * FROM t;"), "a int|b varchar(10)|c bool\n-4|NULL|true");

    let err = s.execute("INSERT INTO t VALUES ('x', 'y', true);").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::TypeMismatch { .. })
    ));
    assert!(s.execute("INSERT INTO t VALUES (1, 'y');").is_err());
    assert!(matches!(
        s.execute("INSERT INTO t (nope) VALUES (1);")
            .unwrap_err()
            .downcast_ref::<EngineError>(),
        Some(EngineError::ColumnNotFound { .. })
    ));
}

#[test]
fn statements_need_a_database() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path());
    assert!(s.execute("CREATE TABLE t (a int);").is_err());
    assert!(matches!(
        s.execute("USE missing;").unwrap_err().downcast_ref::<EngineError>(),
        Some(EngineError::DatabaseNotFound { .. })
    ));
}

#[test]
fn joins_through_sql() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path());
    run_all(
        &mut s,
        &[
            "CREATE DATABASE db_3;",
            "USE db_3;",
            "CREATE TABLE Employee (id int, name varchar(10));",
            "CREATE TABLE Sales (employeeID int, productID int);",
            "INSERT INTO Employee VALUES (1, 'Joe'), (2, 'Jack'), (3, 'Gill');",
            "INSERT INTO Sales VALUES (1, 344), (1, 355), (2, 544);",
        ],
    );

    let header = "id int|name varchar(10)|employeeID int|productID int";
    let inner = format!("{header}\n1|Joe|1|344\n1|Joe|1|355\n2|Jack|2|544");

    assert_eq!(
        exec(&mut s, "SELECT * FROM Employee E, Sales S WHERE E.id = S.employeeID;"),
        inner
    );
    assert_eq!(
        exec(&mut s, "SELECT * FROM Employee E INNER JOIN Sales S ON E.id = S.employeeID;"),
        inner
    );
    assert_eq!(
        exec(&mut s, "SELECT * FROM Employee E LEFT OUTER JOIN Sales S ON E.id = S.employeeID;"),
        format!("{inner}\n3|Gill|NULL|NULL")
    );
}

#[test]
fn transaction_commit_is_invisible_until_commit() {
    let dir = tempdir().unwrap();
    let mut a = session(dir.path());
    products(&mut a);
    let mut b = session(dir.path());
    exec(&mut b, "USE db_2;");

    assert_eq!(exec(&mut a, "BEGIN TRANSACTION;"), "Transaction starts.");
    assert!(a.in_transaction());
    assert_eq!(
        exec(&mut a, "UPDATE Product SET price = 9.99 WHERE pid = 1;"),
        "1 record modified."
    );
    assert_eq!(
        exec(&mut b, "SELECT price FROM Product WHERE pid = 1;"),
        "price float\n19.99"
    );
    assert_eq!(exec(&mut a, "COMMIT;"), "Transaction committed.");
    assert_eq!(
        exec(&mut b, "SELECT price FROM Product WHERE pid = 1;"),
        "price float\n9.99"
    );
}

#[test]
fn locked_table_aborts_the_other_transaction() {
    let dir = tempdir().unwrap();
    let mut a = session(dir.path());
    products(&mut a);
    let mut b = session(dir.path());
    exec(&mut b, "USE db_2;");

    exec(&mut a, "BEGIN TRANSACTION;");
    exec(&mut a, "UPDATE Product SET price = 9.99 WHERE pid = 1;");

    exec(&mut b, "BEGIN TRANSACTION;");
    let err = b
        .execute("UPDATE Product SET price = 1.99 WHERE pid = 2;")
        .unwrap_err();
    assert_eq!(err.to_string(), "table Product is locked");
    assert_eq!(exec(&mut b, "COMMIT;"), "Transaction abort.");

    // outside a transaction the lock still blocks writes
    assert!(matches!(
        b.execute("DELETE FROM Product;").unwrap_err().downcast_ref::<EngineError>(),
        Some(EngineError::LockHeld { .. })
    ));

    exec(&mut a, "COMMIT;");
    assert_eq!(
        exec(&mut b, "SELECT price FROM Product WHERE pid = 2;"),
        "price float\n29.99"
    );
    assert_eq!(
        exec(&mut b, "DELETE FROM Product WHERE pid = 2;"),
        "1 record deleted."
    );
}

#[test]
fn rollback_and_session_end_restore_snapshot() {
    let dir = tempdir().unwrap();
    let canonical = dir.path().join("db_2").join("Product.tbl");
    {
        let mut a = session(dir.path());
        products(&mut a);

        exec(&mut a, "BEGIN TRANSACTION;");
        exec(&mut a, "DELETE FROM Product;");
        assert_eq!(exec(&mut a, "ROLLBACK;"), "Transaction rolled back.");
        assert!(!snapshot_path(&canonical).exists());

        exec(&mut a, "BEGIN TRANSACTION;");
        exec(&mut a, "DELETE FROM Product WHERE pid > 1;");
        assert!(snapshot_path(&canonical).exists());
        // dropped with the transaction open
    }
    assert!(!snapshot_path(&canonical).exists());

    let mut b = session(dir.path());
    exec(&mut b, "USE db_2;");
    let out = exec(&mut b, "SELECT pid FROM Product;");
    assert_eq!(out.lines().count(), 6);
}

#[test]
fn transaction_statements_need_an_open_transaction() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path());
    assert!(s.execute("COMMIT;").is_err());
    assert!(s.execute("ROLLBACK;").is_err());
    exec(&mut s, "BEGIN TRANSACTION;");
    assert!(s.execute("BEGIN TRANSACTION;").is_err());
}

#[test]
fn string_with_line_break_round_trips() {
    let dir = tempdir().unwrap();
    let mut s = session(dir.path());
    run_all(
        &mut s,
        &[
            "CREATE DATABASE d;",
            "USE d;",
            "CREATE TABLE t (a int, b varchar(10));",
            "CREATE TABLE u (k int);",
        ],
    );

    assert_eq!(
        exec(&mut s, "INSERT INTO t VALUES (1, 'x\ny');"),
        "1 new record inserted."
    );
    assert_eq!(exec(&mut s, "SELECT * FROM t;"), "a int|b varchar(10)\n1|x\ny");
    assert_eq!(exec(&mut s, "INSERT INTO u VALUES (2);"), "1 new record inserted.");
    assert_eq!(exec(&mut s, "SELECT * FROM u WHERE k = 2;"), "k int\n2");
}
