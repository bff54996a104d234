//! Settings command implementation.

use crate::cli::commands::print_json;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::storage::Storage;
use std::collections::BTreeMap;

/// Execute the settings command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or queried.
pub fn execute(config: StoreConfig, json: bool) -> Result<()> {
    let storage = Storage::new(config);
    let rows = storage.with_unit_of_work(|uow| {
        uow.open()?;
        uow.query("SELECT key, value FROM settings ORDER BY key")
    })?;

    let settings: BTreeMap<String, String> = rows
        .iter()
        .filter_map(|row| Some((row.get_str("key")?.to_string(), row.get_str("value")?.to_string())))
        .collect();

    if json {
        return print_json(&settings);
    }

    for (key, value) in &settings {
        println!("{key} = {value}");
    }
    Ok(())
}
