//! End-of-unit-of-work shutdown sequence.
//!
//! Order: busy timeout, WAL checkpoint, COMMIT, ROLLBACK, close, lock
//! release. Every step before the lock release is attempted independently
//! and its failure only recorded; the lock is always released last.

use crate::storage::lock::LockHandle;
use rusqlite::Connection;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection operations the shutdown sequence drives.
pub trait ShutdownTarget {
    fn set_busy_timeout(&self, timeout: Duration) -> rusqlite::Result<()>;
    /// Returns `(busy, log_frames, checkpointed_frames)`.
    fn checkpoint_truncate(&self) -> rusqlite::Result<(i64, i64, i64)>;
    fn commit(&self) -> rusqlite::Result<()>;
    fn rollback(&self) -> rusqlite::Result<()>;
    fn close(self) -> rusqlite::Result<()>;
}

impl ShutdownTarget for Connection {
    fn set_busy_timeout(&self, timeout: Duration) -> rusqlite::Result<()> {
        self.busy_timeout(timeout)
    }

    fn checkpoint_truncate(&self) -> rusqlite::Result<(i64, i64, i64)> {
        self.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
    }

    fn commit(&self) -> rusqlite::Result<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> rusqlite::Result<()> {
        self.execute_batch("ROLLBACK")
    }

    fn close(self) -> rusqlite::Result<()> {
        // On failure rusqlite hands the connection back; dropping it finalizes.
        Connection::close(self).map_err(|(_conn, err)| err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    /// Not attempted (no connection was open).
    #[default]
    Skipped,
    Failed(String),
}

impl StepOutcome {
    fn record(step: &'static str, result: rusqlite::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(err) => {
                warn!(step, error = %err, "Shutdown step failed");
                Self::Failed(err.to_string())
            }
        }
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Per-step record of one shutdown run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub busy_timeout: StepOutcome,
    pub checkpoint: StepOutcome,
    pub commit: StepOutcome,
    pub rollback: StepOutcome,
    pub close: StepOutcome,
    pub lock_released: bool,
}

impl ShutdownReport {
    /// Steps that failed. A COMMIT/ROLLBACK failing with no open transaction is expected.
    #[must_use]
    pub fn failed_steps(&self) -> Vec<&'static str> {
        [
            ("busy_timeout", &self.busy_timeout),
            ("checkpoint", &self.checkpoint),
            ("commit", &self.commit),
            ("rollback", &self.rollback),
            ("close", &self.close),
        ]
        .into_iter()
        .filter(|(_, outcome)| outcome.is_failed())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Run the shutdown sequence over `conn` (if any), then release `lock` (if any).
///
/// `conn` is taken out of its slot before closing so the caller's handle
/// reference is cleared even when close fails.
pub fn shutdown<C: ShutdownTarget>(
    conn: &mut Option<C>,
    lock: &mut Option<LockHandle>,
    busy_timeout: Duration,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    if let Some(handle) = conn.take() {
        report.busy_timeout =
            StepOutcome::record("busy_timeout", handle.set_busy_timeout(busy_timeout));

        report.checkpoint = StepOutcome::record(
            "checkpoint",
            handle.checkpoint_truncate().map(|(busy, log, done)| {
                debug!(busy, log_frames = log, checkpointed = done, "WAL checkpoint");
            }),
        );

        // Both of these normally fail with "no transaction is active".
        report.commit = match handle.commit() {
            Ok(()) => {
                warn!("Committed a transaction left open by the unit of work");
                StepOutcome::Ok
            }
            Err(err) => {
                debug!(error = %err, "No dangling transaction to commit");
                StepOutcome::Failed(err.to_string())
            }
        };
        report.rollback = match handle.rollback() {
            Ok(()) => StepOutcome::Ok,
            Err(err) => {
                debug!(error = %err, "No dangling transaction to roll back");
                StepOutcome::Failed(err.to_string())
            }
        };

        report.close = StepOutcome::record("close", handle.close());
    }

    if let Some(mut held) = lock.take() {
        held.release();
        report.lock_released = true;
    }

    info!(failed = ?report.failed_steps(), lock_released = report.lock_released, "Storage shut down");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Fails every step and records the call order.
    struct Broken {
        calls: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Broken {
        fn fail(&self, step: &'static str) -> rusqlite::Error {
            self.calls.borrow_mut().push(step);
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                Some(format!("{step} forced failure")),
            )
        }
    }

    impl ShutdownTarget for Broken {
        fn set_busy_timeout(&self, _timeout: Duration) -> rusqlite::Result<()> {
            Err(self.fail("busy_timeout"))
        }
        fn checkpoint_truncate(&self) -> rusqlite::Result<(i64, i64, i64)> {
            Err(self.fail("checkpoint"))
        }
        fn commit(&self) -> rusqlite::Result<()> {
            Err(self.fail("commit"))
        }
        fn rollback(&self) -> rusqlite::Result<()> {
            Err(self.fail("rollback"))
        }
        fn close(self) -> rusqlite::Result<()> {
            Err(self.fail("close"))
        }
    }

    #[test]
    fn lock_released_when_every_step_fails() {
        let temp = TempDir::new().expect("tempdir");
        let lock_path = temp.path().join("db.lock");
        let calls = Rc::new(RefCell::new(Vec::new()));

        let mut conn = Some(Broken {
            calls: Rc::clone(&calls),
        });
        let mut lock = Some(LockHandle::acquire(&lock_path).expect("acquire"));

        let report = shutdown(&mut conn, &mut lock, Duration::from_millis(10));

        assert_eq!(
            *calls.borrow(),
            ["busy_timeout", "checkpoint", "commit", "rollback", "close"]
        );
        assert_eq!(report.failed_steps().len(), 5);
        assert!(matches!(
            &report.close,
            StepOutcome::Failed(reason) if reason.contains("close forced failure")
        ));
        assert!(report.lock_released);
        assert!(conn.is_none());
        assert!(lock.is_none());

        let next = LockHandle::acquire(&lock_path).expect("lock is free again");
        assert!(next.is_held());
    }

    #[test]
    fn real_connection_commits_dangling_transaction() {
        let temp = TempDir::new().expect("tempdir");
        let db_path = temp.path().join("t.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE t (v INTEGER);
             BEGIN;
             INSERT INTO t VALUES (1);",
        )
        .unwrap();

        let mut slot = Some(conn);
        let report = shutdown(&mut slot, &mut None, Duration::from_millis(100));
        assert_eq!(report.commit, StepOutcome::Ok);
        assert!(report.rollback.is_failed());
        assert_eq!(report.close, StepOutcome::Ok);
        assert!(!report.lock_released);

        let reopened = Connection::open(&db_path).unwrap();
        let rows: i64 = reopened
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn nothing_open_is_all_skipped() {
        let report = shutdown::<Connection>(&mut None, &mut None, Duration::ZERO);
        assert_eq!(report, ShutdownReport::default());
        assert!(report.failed_steps().is_empty());
    }
}
