//! Additive, best-effort schema migrations.
//!
//! Each step adds one nullable column when it is missing. Steps run in their
//! own IMMEDIATE transaction, after the bootstrap transaction has committed.
//! A failed step is rolled back, logged, and recorded in the
//! [`MigrationReport`]; later steps still run.

use crate::error::{Result, StoreError};
use crate::storage::schema::{SCHEMA_VERSION, table_columns};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Add `column` to `table` with `definition` if it is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMigration {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

/// Columns introduced after the first release of the data model.
pub const MIGRATIONS: &[ColumnMigration] = &[
    ColumnMigration {
        name: "businesses_fields_config",
        table: "businesses",
        column: "fields_config",
        definition: "TEXT",
    },
    ColumnMigration {
        name: "complaints_custom_fields",
        table: "complaints",
        column: "custom_fields",
        definition: "TEXT",
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum MigrationOutcome {
    Applied,
    /// The column already existed.
    Skipped,
    /// Rolled back; the schema stays at the older shape until a later retry.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    pub name: String,
    pub table: String,
    pub column: String,
    #[serde(flatten)]
    pub outcome: MigrationOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub steps: Vec<MigrationResult>,
}

impl MigrationReport {
    #[must_use]
    pub fn applied(&self) -> usize {
        self.count(|outcome| matches!(outcome, MigrationOutcome::Applied))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, MigrationOutcome::Skipped))
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&MigrationResult> {
        self.steps
            .iter()
            .filter(|step| matches!(step.outcome, MigrationOutcome::Failed(_)))
            .collect()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures().is_empty()
    }

    fn count(&self, pred: impl Fn(&MigrationOutcome) -> bool) -> usize {
        self.steps.iter().filter(|step| pred(&step.outcome)).count()
    }
}

/// Run the built-in [`MIGRATIONS`].
///
/// When every step ends applied or skipped, `PRAGMA user_version` is raised
/// to [`SCHEMA_VERSION`] (never lowered).
pub fn migrate(conn: &mut Connection) -> MigrationReport {
    let report = run_migrations(conn, MIGRATIONS);

    if report.has_failures() {
        warn!(
            failed = report.failures().len(),
            "Schema migration incomplete; will retry on next start"
        );
    } else if let Err(err) = record_schema_version(conn) {
        warn!(error = %err, "Failed to record schema version");
    }

    report
}

/// Run `steps` in order, collecting one result per step. Never fails.
pub fn run_migrations(conn: &mut Connection, steps: &[ColumnMigration]) -> MigrationReport {
    let mut report = MigrationReport::default();

    for step in steps {
        let outcome = match apply_step(conn, step) {
            Ok(true) => {
                info!(migration = step.name, table = step.table, column = step.column, "Applied migration");
                MigrationOutcome::Applied
            }
            Ok(false) => {
                debug!(migration = step.name, "Migration already applied");
                MigrationOutcome::Skipped
            }
            Err(err) => {
                warn!(migration = step.name, error = %err, "Migration step failed");
                MigrationOutcome::Failed(err.to_string())
            }
        };
        report.steps.push(MigrationResult {
            name: step.name.to_string(),
            table: step.table.to_string(),
            column: step.column.to_string(),
            outcome,
        });
    }

    report
}

/// Returns `Ok(true)` if the column was added, `Ok(false)` if it already existed.
fn apply_step(conn: &mut Connection, step: &ColumnMigration) -> Result<bool> {
    validate_identifier(step.table)?;
    validate_identifier(step.column)?;

    if table_columns(conn, step.table)?
        .iter()
        .any(|name| name.eq_ignore_ascii_case(step.column))
    {
        return Ok(false);
    }

    // Dropping the transaction on the error path rolls it back.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        &format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            step.table, step.column, step.definition
        ),
        [],
    )?;
    tx.commit()?;
    Ok(true)
}

fn validate_identifier(ident: &str) -> Result<()> {
    if IDENTIFIER.is_match(ident) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(ident.to_string()))
    }
}

fn record_schema_version(conn: &Connection) -> rusqlite::Result<()> {
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(from = current, to = SCHEMA_VERSION, "Recorded schema version");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::storage::schema::bootstrap;

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE businesses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER,
                name TEXT NOT NULL
            );
            CREATE TABLE complaints (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL
            );
            INSERT INTO complaints (id, title, description) VALUES ('TS1', 't', 'd');",
        )
        .unwrap();
        conn
    }

    fn user_version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_migration_adds_missing_columns() {
        let mut conn = legacy_db();
        let report = migrate(&mut conn);

        assert_eq!(report.applied(), 2);
        assert!(!report.has_failures());
        assert!(
            table_columns(&conn, "businesses")
                .unwrap()
                .contains(&"fields_config".to_string())
        );
        let custom: Option<String> = conn
            .query_row("SELECT custom_fields FROM complaints WHERE id = 'TS1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(custom.is_none());
        assert_eq!(user_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let mut conn = legacy_db();
        migrate(&mut conn);
        let before = table_columns(&conn, "complaints").unwrap();

        let report = migrate(&mut conn);
        assert_eq!(report.skipped(), MIGRATIONS.len());
        assert_eq!(report.applied(), 0);
        assert_eq!(table_columns(&conn, "complaints").unwrap(), before);
    }

    #[test]
    fn test_fresh_schema_skips_all_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        bootstrap(&mut conn, &StoreConfig::default()).unwrap();
        let report = migrate(&mut conn);
        assert_eq!(report.skipped(), MIGRATIONS.len());
    }

    #[test]
    fn test_failed_step_does_not_block_later_steps() {
        let mut conn = legacy_db();
        let steps = [
            ColumnMigration {
                name: "missing_table",
                table: "no_such_table",
                column: "extra",
                definition: "TEXT",
            },
            ColumnMigration {
                name: "bad_identifier",
                table: "complaints",
                column: "x; DROP TABLE complaints",
                definition: "TEXT",
            },
            MIGRATIONS[1],
        ];

        let report = run_migrations(&mut conn, &steps);
        assert_eq!(report.failures().len(), 2);
        assert_eq!(report.steps[2].outcome, MigrationOutcome::Applied);
        assert!(matches!(
            &report.steps[1].outcome,
            MigrationOutcome::Failed(reason) if reason.contains("invalid SQL identifier")
        ));
        // No transaction left dangling after the failures.
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_failures_leave_user_version_untouched() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE complaints (id TEXT PRIMARY KEY)")
            .unwrap();
        // businesses is missing, so the first built-in step fails.
        let report = migrate(&mut conn);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.applied(), 1);
        assert_eq!(user_version(&conn), 0);
    }

    #[test]
    fn test_report_serializes_outcome_tag() {
        let report = MigrationReport {
            steps: vec![MigrationResult {
                name: "n".to_string(),
                table: "t".to_string(),
                column: "c".to_string(),
                outcome: MigrationOutcome::Failed("boom".to_string()),
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["outcome"], "failed");
        assert_eq!(json["steps"][0]["reason"], "boom");
    }
}
