//! Connection lifecycle: one `Storage` per process, one `UnitOfWork` per request.
//!
//! A [`UnitOfWork`] acquires the host lock and opens the database lazily on
//! the first [`UnitOfWork::open`]. The lock is held until
//! [`UnitOfWork::close`] (or drop), so every database-touching unit of work
//! on the host is serialized.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::storage::lock::{LockHandle, ensure_dir};
use crate::storage::migrate::{MigrationReport, migrate};
use crate::storage::schema::{BootstrapReport, bootstrap};
use crate::storage::shutdown::{ShutdownReport, shutdown};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Statement};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, info_span};

/// Schema preparation results from the first unit of work of this process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub bootstrap: BootstrapReport,
    pub migrations: MigrationReport,
}

/// Process-wide storage owner.
///
/// Share it (e.g. behind an `Arc`) between request handlers; it carries no
/// connection itself, only the config and whether the schema was prepared.
#[derive(Debug)]
pub struct Storage {
    config: StoreConfig,
    schema: OnceLock<SchemaReport>,
}

impl Storage {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            schema: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Present once a unit of work has bootstrapped and migrated the schema.
    #[must_use]
    pub fn schema_report(&self) -> Option<&SchemaReport> {
        self.schema.get()
    }

    /// Start a unit of work. No lock is taken until [`UnitOfWork::open`].
    #[must_use]
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            storage: self,
            lock: None,
            conn: None,
            shutdown: None,
        }
    }

    /// Run `f` inside a unit of work that is always closed afterwards.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns; shutdown problems are only logged.
    pub fn with_unit_of_work<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    {
        let mut uow = self.begin();
        let result = f(&mut uow);
        uow.close();
        result
    }
}

/// One request's exclusive access to the database.
#[derive(Debug)]
pub struct UnitOfWork<'s> {
    storage: &'s Storage,
    lock: Option<LockHandle>,
    conn: Option<Connection>,
    shutdown: Option<ShutdownReport>,
}

impl UnitOfWork<'_> {
    /// Open (or return the already open) connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lock`], [`StoreError::StorageInit`] or
    /// [`StoreError::Bootstrap`]. The lock stays held until close, even on error.
    pub fn open(&mut self) -> Result<&Connection> {
        if self.conn.is_none() {
            let conn = self.open_new()?;
            self.conn = Some(conn);
        }
        self.connection()
    }

    fn open_new(&mut self) -> Result<Connection> {
        let storage = self.storage;
        let config = &storage.config;
        let _span = info_span!("open", db = %config.db_path().display()).entered();

        if self.lock.is_none() {
            self.lock = Some(LockHandle::acquire(&config.lock_path())?);
        }
        self.shutdown = None;

        ensure_dir(&config.data_dir).map_err(|err| {
            StoreError::storage_init(
                format!("cannot create data directory {}", config.data_dir.display()),
                err,
            )
        })?;
        ensure_dir(&config.upload_dir).map_err(|err| {
            StoreError::storage_init(
                format!("cannot create upload directory {}", config.upload_dir.display()),
                err,
            )
        })?;

        let db_path = config.db_path();
        let mut conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|err| {
            StoreError::storage_init(format!("cannot open database {}", db_path.display()), err)
        })?;

        apply_pragmas(&conn, config)
            .map_err(|err| StoreError::storage_init("failed to apply connection pragmas", err))?;

        if storage.schema.get().is_none() {
            let bootstrap = bootstrap(&mut conn, config)?;
            let migrations = migrate(&mut conn);
            // Another thread cannot race here: the host lock is held.
            let _ = storage.schema.set(SchemaReport {
                bootstrap,
                migrations,
            });
        }

        info!("Opened database");
        Ok(conn)
    }

    /// The open connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotOpen`] before [`UnitOfWork::open`] or after close.
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(StoreError::NotOpen)
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    #[must_use]
    pub fn holds_lock(&self) -> bool {
        self.lock.as_ref().is_some_and(LockHandle::is_held)
    }

    /// Run `sql` and collect every row as an ordered column/value record.
    ///
    /// # Errors
    ///
    /// Returns an error if not open or SQLite rejects the statement.
    pub fn query(&self, sql: &str) -> Result<Vec<Record>> {
        let mut stmt = self.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                columns.push((name.clone(), Value::from(row.get_ref(idx)?)));
            }
            records.push(Record { columns });
        }
        Ok(records)
    }

    /// Execute one or more statements, ignoring any rows.
    ///
    /// # Errors
    ///
    /// Returns an error if not open or a statement fails.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    /// Prepare a statement for binding parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if not open or the SQL does not compile.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        Ok(self.connection()?.prepare(sql)?)
    }

    /// Row id generated by the most recent insert on this connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotOpen`] if not open.
    pub fn last_insert_id(&self) -> Result<i64> {
        Ok(self.connection()?.last_insert_rowid())
    }

    /// Re-run the built-in migrations on the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotOpen`] if not open; step failures go in the report.
    pub fn migrate(&mut self) -> Result<MigrationReport> {
        let conn = self.conn.as_mut().ok_or(StoreError::NotOpen)?;
        Ok(migrate(conn))
    }

    /// Run the shutdown sequence. Later calls return the first run's report.
    pub fn close(&mut self) -> ShutdownReport {
        if let Some(report) = &self.shutdown {
            return report.clone();
        }
        let timeout = Duration::from_millis(u64::from(self.storage.config.busy_timeout_ms));
        let report = shutdown(&mut self.conn, &mut self.lock, timeout);
        self.shutdown = Some(report.clone());
        report
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.conn.is_some() || self.lock.is_some() {
            debug!("Unit of work dropped without close; shutting down");
            self.close();
        }
    }
}

/// Matches SQLite's default; a WAL database cannot change it afterwards.
const PAGE_SIZE: i64 = 4096;

fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> rusqlite::Result<()> {
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", config.cache_size)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "busy_timeout", i64::from(config.busy_timeout_ms))?;
    conn.pragma_update(None, "locking_mode", "NORMAL")?;
    conn.pragma_update(None, "page_size", PAGE_SIZE)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    debug!(journal_mode, busy_timeout_ms = config.busy_timeout_ms, "Applied pragmas");
    Ok(())
}

/// One result row: column names paired with owned values, in select order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    /// Value of the first column named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Text value of `name`, if present and textual.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column order preserved as a JSON array of `[name, value]` pairs.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.columns
                .iter()
                .map(|(name, value)| serde_json::json!([name, value_to_json(value)]))
                .collect(),
        )
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(n) => serde_json::Value::from(*n),
        Value::Real(f) => serde_json::Value::from(*f),
        Value::Text(text) => serde_json::Value::from(text.as_str()),
        Value::Blob(bytes) => serde_json::Value::from(bytes.len()),
    }
}
