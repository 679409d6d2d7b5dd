// src/db/test_support.rs
// Shared in-memory connection setup for repository unit tests.

use rusqlite::Connection;

pub fn memory_conn() -> Connection {
    crate::db::register_vec_extension();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    crate::db::schema::run_all(&conn).unwrap();
    conn
}
