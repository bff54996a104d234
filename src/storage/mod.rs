//! `SQLite` storage layer for `complaint_store`.
//!
//! This module owns the database lifecycle:
//! - Host-level exclusive lock held for a whole unit of work
//! - WAL mode and durability pragmas
//! - Transactional schema bootstrap with seed rows
//! - Best-effort additive column migrations
//! - Fault-tolerant checkpoint/close sequence that always releases the lock
//!
//! # Submodules
//!
//! - [`connection`] - `Storage` and `UnitOfWork`
//! - [`lock`] - Exclusive lock file
//! - [`schema`] - Table definitions, seeds, bootstrap
//! - [`migrate`] - Column migrations and their report
//! - [`shutdown`] - Shutdown sequence
//! - [`status`] - Read-only schema inspection

pub mod connection;
pub mod lock;
pub mod migrate;
pub mod schema;
pub mod shutdown;
pub mod status;

pub use connection::{Record, SchemaReport, Storage, UnitOfWork};
pub use lock::LockHandle;
pub use migrate::{ColumnMigration, MigrationOutcome, MigrationReport};
pub use schema::BootstrapReport;
pub use shutdown::{ShutdownReport, StepOutcome};
pub use status::SchemaStatus;
