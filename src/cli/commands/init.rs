//! Init command implementation.
//!
//! Runs one unit of work end to end: lock, open, bootstrap, migrate, shutdown.

use crate::cli::commands::print_json;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::storage::{SchemaReport, ShutdownReport, Storage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct InitOutput {
    database: String,
    upload_dir: String,
    schema: Option<SchemaReport>,
    shutdown: ShutdownReport,
    finished_at: DateTime<Utc>,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the lock, directories, or bootstrap fail.
pub fn execute(config: StoreConfig, json: bool) -> Result<()> {
    let storage = Storage::new(config);
    let mut uow = storage.begin();
    uow.open()?;
    let shutdown = uow.close();

    let config = storage.config().clone().canonicalized();
    let output = InitOutput {
        database: config.db_path().display().to_string(),
        upload_dir: config.upload_dir.display().to_string(),
        schema: storage.schema_report().cloned(),
        shutdown,
        finished_at: Utc::now(),
    };
    info!(database = %output.database, "Initialized store");

    if json {
        return print_json(&output);
    }

    println!("Database:   {}", output.database);
    println!("Uploads:    {}", output.upload_dir);
    if let Some(schema) = &output.schema {
        if schema.bootstrap.is_noop() {
            println!("Schema:     already up to date");
        } else {
            println!(
                "Schema:     created {} table(s), seeded {} setting(s), {} status(es)",
                schema.bootstrap.tables_created.len(),
                schema.bootstrap.settings_seeded,
                schema.bootstrap.statuses_seeded
            );
        }
        println!(
            "Migrations: {} applied, {} skipped, {} failed",
            schema.migrations.applied(),
            schema.migrations.skipped(),
            schema.migrations.failures().len()
        );
    }
    Ok(())
}
