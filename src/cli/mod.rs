//! Command-line interface definitions.

use crate::config::CliOverrides;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser, Debug)]
#[command(name = "complaint-store", version, about = "Complaint store database lifecycle tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the database and lock file
    #[arg(long, global = true, env = "COMPLAINTS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory for attachment uploads
    #[arg(long, global = true)]
    pub upload_dir: Option<PathBuf>,

    /// Config file (default: ./complaints.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds
    #[arg(long, global = true)]
    pub busy_timeout: Option<u32>,

    /// Emit JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone(),
            data_dir: self.data_dir.clone(),
            upload_dir: self.upload_dir.clone(),
            busy_timeout: self.busy_timeout,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create (or verify) the database, schema and seed rows
    Init,
    /// Show tables, migrated columns and schema version
    Status,
    /// Run schema migrations and report each step
    Migrate(MigrateArgs),
    /// List the settings table
    Settings,
}

#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Exit non-zero if any migration step failed
    #[arg(long)]
    pub strict: bool,
}
