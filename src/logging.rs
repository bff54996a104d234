//! Logging setup for the CLI and tests.
//!
//! Human-readable events go to stderr. `--log-file` adds a JSON event stream
//! appended to the given file. Migration and shutdown warnings are emitted at
//! `warn` so operators see them at the default filter.

use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbosity`/`quiet` when it is set and parses.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log file cannot be opened,
/// or a global subscriber is already installed.
pub fn init_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(verbosity, quiet)))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions))
        .with_ansi(std::io::stderr().is_terminal());

    // `Option<Layer>` is itself a layer; `None` records nothing.
    let json_layer = log_file
        .map(|path| {
            open_log_file(path)
                .with_context(|| format!("cannot open log file {}", path.display()))
        })
        .transpose()?
        .map(|file| fmt::layer().json().with_ansi(false).with_writer(Arc::new(file)));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(json_layer)
        .try_init()?;
    Ok(())
}

/// Open `path` for appending, creating it and its parent directory if needed.
fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn default_filter(verbosity: u8, quiet: bool) -> String {
    let level = match (quiet, verbosity) {
        (true, _) => return "error".to_string(),
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, 3) => return "complaint_store=debug,rusqlite=debug".to_string(),
        (false, _) => "trace",
    };
    format!("complaint_store={level}")
}

/// Route events to the test harness writer. Safe to call from every test.
pub fn init_test_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("complaint_store=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn quiet_overrides_verbosity() {
        assert_eq!(default_filter(3, true), "error");
    }

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(default_filter(0, false), "complaint_store=warn");
        assert_eq!(default_filter(2, false), "complaint_store=debug");
        assert_eq!(
            default_filter(3, false),
            "complaint_store=debug,rusqlite=debug"
        );
        assert_eq!(default_filter(9, false), "complaint_store=trace");
    }

    #[test]
    fn log_file_appends_and_creates_parent() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("logs").join("store.jsonl");

        open_log_file(&path).unwrap().write_all(b"first\n").unwrap();
        open_log_file(&path).unwrap().write_all(b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
