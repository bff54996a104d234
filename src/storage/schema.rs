//! Database schema definitions and transactional bootstrap.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

/// Bumped whenever a migration step is added.
pub const SCHEMA_VERSION: i32 = 2;

/// Every table the bootstrap guarantees, in creation order.
pub const TABLES: &[&str] = &[
    "settings",
    "categories",
    "businesses",
    "complaints",
    "replies",
    "status_config",
];

/// Table DDL, one statement per table in [`TABLES`] order.
const TABLE_DDL: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        sort_order INTEGER DEFAULT 0,
        is_enabled BOOLEAN DEFAULT 1
    )",
    r"CREATE TABLE IF NOT EXISTS businesses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category_id INTEGER,
        name TEXT NOT NULL,
        description TEXT,
        fields_config TEXT,
        sort_order INTEGER DEFAULT 0,
        is_enabled BOOLEAN DEFAULT 1,
        contact_info TEXT,
        FOREIGN KEY(category_id) REFERENCES categories(id)
    )",
    r"CREATE TABLE IF NOT EXISTS complaints (
        id TEXT PRIMARY KEY,
        business_id INTEGER,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        contact TEXT,
        custom_fields TEXT,
        status TEXT DEFAULT 'pending',
        priority TEXT DEFAULT 'normal',
        attachments TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        resolved_at DATETIME,
        FOREIGN KEY(business_id) REFERENCES businesses(id)
    )",
    r"CREATE TABLE IF NOT EXISTS replies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        complaint_id TEXT NOT NULL,
        content TEXT NOT NULL,
        is_private BOOLEAN DEFAULT 0,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        created_by TEXT,
        attachments TEXT,
        FOREIGN KEY(complaint_id) REFERENCES complaints(id)
    )",
    r"CREATE TABLE IF NOT EXISTS status_config (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        color TEXT,
        sort_order INTEGER DEFAULT 0,
        is_enabled BOOLEAN DEFAULT 1
    )",
];

/// Default `settings` rows. Paths and credentials come from [`StoreConfig`].
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("max_file_size", "20971520"),
    ("allowed_extensions", "jpg,jpeg,png,pdf,doc,docx"),
    ("min_description_length", "30"),
    ("complaint_id_prefix", "TS"),
    ("websocket_enabled", "false"),
    ("websocket_port", "9502"),
    ("system_name", "投诉建议系统"),
    ("system_description", "欢迎使用投诉建议系统"),
    ("enable_attachments", "true"),
    ("enable_replies", "true"),
    ("enable_categories", "true"),
    ("enable_businesses", "true"),
    ("enable_contact_info", "true"),
    ("contact_info_required", "true"),
    ("max_title_length", "100"),
    ("max_description_length", "2000"),
    ("max_attachments", "5"),
    ("notification_email", ""),
    ("notification_enabled", "false"),
];

/// Default `status_config` rows: (name, description, color).
pub const DEFAULT_STATUSES: &[(&str, &str, &str)] = &[
    ("pending", "待处理", "warning"),
    ("processing", "处理中", "info"),
    ("resolved", "已解决", "success"),
    ("rejected", "已驳回", "danger"),
];

/// What a bootstrap run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub tables_created: Vec<String>,
    pub settings_seeded: usize,
    pub statuses_seeded: usize,
}

impl BootstrapReport {
    /// True when the database was already fully bootstrapped.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.tables_created.is_empty() && self.settings_seeded == 0 && self.statuses_seeded == 0
    }
}

/// Create all tables and seed rows inside one IMMEDIATE transaction.
///
/// # Errors
///
/// Returns [`StoreError::Bootstrap`] after rolling the transaction back if
/// any statement fails.
pub fn bootstrap(conn: &mut Connection, config: &StoreConfig) -> Result<BootstrapReport> {
    // Set before BEGIN so contention waits instead of failing immediately.
    conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))
        .map_err(StoreError::Bootstrap)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(StoreError::Bootstrap)?;

    match create_and_seed(&tx, config) {
        Ok(report) => {
            tx.commit().map_err(StoreError::Bootstrap)?;
            if report.is_noop() {
                debug!("Schema already bootstrapped");
            } else {
                info!(
                    tables = ?report.tables_created,
                    settings = report.settings_seeded,
                    statuses = report.statuses_seeded,
                    "Bootstrapped schema"
                );
            }
            Ok(report)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(error = %rollback_err, "Bootstrap rollback failed");
            }
            Err(StoreError::Bootstrap(err))
        }
    }
}

fn create_and_seed(tx: &Transaction<'_>, config: &StoreConfig) -> rusqlite::Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    for (table, ddl) in TABLES.iter().zip(TABLE_DDL) {
        if !table_exists(tx, table)? {
            report.tables_created.push((*table).to_string());
        }
        tx.execute(ddl, [])?;
    }

    let mut insert_setting =
        tx.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
    for (key, value) in seed_settings(config) {
        report.settings_seeded += insert_setting.execute(params![key, value])?;
    }

    // Keyed on name: older databases may lack the UNIQUE constraint.
    let mut insert_status = tx.prepare(
        "INSERT INTO status_config (name, description, color)
         SELECT ?1, ?2, ?3
         WHERE NOT EXISTS (SELECT 1 FROM status_config WHERE name = ?1)",
    )?;
    // sort_order is left at its column default.
    for (name, description, color) in DEFAULT_STATUSES {
        report.statuses_seeded += insert_status.execute(params![name, description, color])?;
    }

    Ok(report)
}

fn seed_settings(config: &StoreConfig) -> Vec<(String, String)> {
    let mut rows: Vec<(String, String)> = DEFAULT_SETTINGS
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();

    rows.push((
        "upload_path".to_string(),
        config.upload_dir.to_string_lossy().into_owned(),
    ));
    rows.push((
        "db_file".to_string(),
        config.db_path().to_string_lossy().into_owned(),
    ));

    // Credentials are only seeded when explicitly configured.
    if let Some(username) = &config.admin_username {
        rows.push(("admin_username".to_string(), username.clone()));
    }
    if let Some(password) = &config.admin_password {
        rows.push(("admin_password".to_string(), hash_password(password)));
    }
    if let Some(secret) = &config.jwt_secret {
        rows.push(("jwt_secret".to_string(), secret.clone()));
    }
    if config.admin_password.is_none() {
        debug!("No admin password configured; admin credentials left unseeded");
    }

    rows
}

/// `sha256:<hex>` digest stored in the `admin_password` setting.
///
/// Unsalted, so it only keeps the plaintext out of the table. The login
/// service that owns admin authentication is expected to rehash it with a
/// real password KDF on first successful sign-in.
#[must_use]
pub fn hash_password(password: &str) -> String {
    use std::fmt::Write as _;

    let digest = Sha256::digest(password.as_bytes());
    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256:");
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1")?
        .exists([table])
}

/// Column names of `table`, in declaration order. Empty if the table is absent.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    stmt.query_map([table], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()
}
