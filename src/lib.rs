//! `complaint_store` - storage lifecycle manager for a complaint-tracking backend
//!
//! Request handlers (complaints, businesses, categories, replies) sit on top
//! of this crate and issue their SQL through a [`storage::UnitOfWork`].
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`cli`] - Command-line interface using clap
//! - [`storage`] - `SQLite` lifecycle: lock, connection, schema, migrations, shutdown
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling
//! - [`logging`] - tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

pub use error::{ErrorCode, Result, StoreError, StructuredError};
pub use storage::{Storage, UnitOfWork};
