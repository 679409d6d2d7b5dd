// src/db/migration_helpers.rs
// Idempotent schema migration helpers

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Check if a table exists in the database.
pub fn table_exists(conn: &Connection, table_name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
        [table_name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

/// Check if a column exists in a table.
pub fn column_exists(conn: &Connection, table_name: &str, column_name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM pragma_table_info(?) WHERE name=?",
        [table_name, column_name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

/// Add a column to a table if it doesn't already exist.
pub fn add_column_if_missing(
    conn: &Connection,
    table_name: &str,
    column_name: &str,
    column_def: &str,
) -> Result<()> {
    if column_exists(conn, table_name, column_name) {
        return Ok(());
    }
    info!("Migrating {} to add {} column", table_name, column_name);
    let sql = format!("ALTER TABLE {table_name} ADD COLUMN {column_name} {column_def}");
    conn.execute(&sql, [])?;
    Ok(())
}

/// Create a table (and any attendant indexes/triggers in `sql`) if missing.
pub fn create_table_if_missing(conn: &Connection, table_name: &str, sql: &str) -> Result<()> {
    if table_exists(conn, table_name) {
        return Ok(());
    }
    info!("Creating {} table", table_name);
    conn.execute_batch(sql)?;
    Ok(())
}

/// Record a migration as applied in the `schema_migrations` registry.
/// Versions are a single global, monotonically increasing sequence across
/// the repository's lifetime — never renumber a
/// retired version, only assign the next free integer.
pub fn record_migration(conn: &Connection, version: i64, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    Ok(())
}

/// Whether a migration version has already been applied.
pub fn migration_applied(conn: &Connection, version: i64) -> bool {
    conn.query_row(
        "SELECT 1 FROM schema_migrations WHERE version = ?1",
        [version],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_exists_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!table_exists(&conn, "t"));
        conn.execute("CREATE TABLE t (id INTEGER)", []).unwrap();
        assert!(table_exists(&conn, "t"));
    }

    #[test]
    fn add_column_if_missing_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)", []).unwrap();
        add_column_if_missing(&conn, "t", "name", "TEXT").unwrap();
        assert!(column_exists(&conn, "t", "name"));
        add_column_if_missing(&conn, "t", "name", "TEXT").unwrap();
    }
}
