#![allow(dead_code)]

use complaint_store::config::StoreConfig;
use complaint_store::storage::Storage;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Once;
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        complaint_store::logging::init_test_logging();
    });
}

/// A fresh, empty data directory and a `Storage` rooted in it.
pub fn test_storage() -> (Storage, TempDir) {
    init_test_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage = Storage::new(config_in(dir.path()));
    (storage, dir)
}

pub fn config_in(root: &Path) -> StoreConfig {
    StoreConfig::for_data_dir(root.join("database"))
}

pub fn table_names(conn: &Connection) -> HashSet<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
        .expect("prepare table list");
    stmt.query_map([], |row| row.get(0))
        .expect("query table list")
        .collect::<std::result::Result<HashSet<String>, _>>()
        .expect("collect table list")
}

pub fn column_info(conn: &Connection, table: &str) -> Vec<(String, bool)> {
    let mut stmt = conn
        .prepare("SELECT name, \"notnull\" FROM pragma_table_info(?1)")
        .expect("prepare table info");
    stmt.query_map([table], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)))
        .expect("query table info")
        .collect::<std::result::Result<Vec<_>, _>>()
        .expect("collect table info")
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).expect("count query")
}
