//! Migrate command implementation.

use crate::cli::MigrateArgs;
use crate::cli::commands::print_json;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::storage::{MigrationOutcome, MigrationReport, Storage};

/// Execute the migrate command.
///
/// Opening the store already runs pending steps once; the migrator is then
/// run again explicitly so any step that failed at open is retried. Steps
/// applied at open are reported as applied.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, or with `--strict` when
/// any step failed on the explicit run.
pub fn execute(args: &MigrateArgs, config: StoreConfig, json: bool) -> Result<()> {
    let storage = Storage::new(config);
    let report = storage.with_unit_of_work(|uow| {
        uow.open()?;
        let rerun = uow.migrate()?;
        let at_open = storage
            .schema_report()
            .map(|schema| schema.migrations.clone())
            .unwrap_or_default();
        Ok(merge_reports(&at_open, rerun))
    })?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if args.strict && report.has_failures() {
        return Err(StoreError::MigrationIncomplete(report.failures().len()));
    }
    Ok(())
}

/// Explicit-run outcomes, except a skip after an open-time apply stays applied.
fn merge_reports(at_open: &MigrationReport, mut rerun: MigrationReport) -> MigrationReport {
    for step in &mut rerun.steps {
        let applied_at_open = at_open
            .steps
            .iter()
            .any(|earlier| earlier.name == step.name && earlier.outcome == MigrationOutcome::Applied);
        if applied_at_open && step.outcome == MigrationOutcome::Skipped {
            step.outcome = MigrationOutcome::Applied;
        }
    }
    rerun
}

fn print_report(report: &MigrationReport) {
    for step in &report.steps {
        let label = match &step.outcome {
            MigrationOutcome::Applied => "applied".to_string(),
            MigrationOutcome::Skipped => "up to date".to_string(),
            MigrationOutcome::Failed(reason) => format!("FAILED: {reason}"),
        };
        println!("{:<28} {}.{:<16} {label}", step.name, step.table, step.column);
    }
}
