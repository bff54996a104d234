//! Status command implementation.

use crate::cli::commands::print_json;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::storage::{SchemaStatus, Storage};

/// Execute the status command.
///
/// Opens the store like any other unit of work, so a missing schema is
/// bootstrapped before it is reported.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or probed.
pub fn execute(config: StoreConfig, json: bool) -> Result<()> {
    let storage = Storage::new(config);
    let status = storage.with_unit_of_work(|uow| Ok(SchemaStatus::probe(uow.open()?)?))?;

    if json {
        return print_json(&status);
    }

    println!("Schema version: {}", status.user_version);
    println!("Journal mode:   {}", status.journal_mode);
    println!("Tables:");
    for (table, rows) in &status.tables {
        match rows {
            Some(count) => println!("  {table:<14} {count} row(s)"),
            None => println!("  {table:<14} MISSING"),
        }
    }
    println!("Columns:");
    for (column, present) in &status.columns {
        println!("  {column:<26} {}", if *present { "present" } else { "MISSING" });
    }
    Ok(())
}
