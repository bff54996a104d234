//! Subcommand implementations.

pub mod init;
pub mod migrate;
pub mod settings;
pub mod status;

use crate::error::Result;
use serde::Serialize;

/// Print `value` as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
