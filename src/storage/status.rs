//! Read-only inspection of the current schema shape.

use crate::storage::migrate::MIGRATIONS;
use crate::storage::schema::{TABLES, table_columns, table_exists};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaStatus {
    pub user_version: i32,
    pub journal_mode: String,
    /// Row count per expected table; `None` when the table is missing.
    pub tables: BTreeMap<String, Option<i64>>,
    /// `table.column` for every migrated column, and whether it exists.
    pub columns: BTreeMap<String, bool>,
}

impl SchemaStatus {
    /// Probe `conn` without modifying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the introspection queries fail.
    pub fn probe(conn: &Connection) -> rusqlite::Result<Self> {
        let user_version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        let journal_mode = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;

        let mut tables = BTreeMap::new();
        for table in TABLES {
            let rows = if table_exists(conn, table)? {
                // Table names come from the fixed TABLES list.
                Some(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
            } else {
                None
            };
            tables.insert((*table).to_string(), rows);
        }

        let mut columns = BTreeMap::new();
        for step in MIGRATIONS {
            let present = table_columns(conn, step.table)?
                .iter()
                .any(|name| name == step.column);
            columns.insert(format!("{}.{}", step.table, step.column), present);
        }

        Ok(Self {
            user_version,
            journal_mode,
            tables,
            columns,
        })
    }

    /// Every table exists and every migrated column is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tables.values().all(Option::is_some) && self.columns.values().all(|present| *present)
    }
}
