//! Database schema version management
//!
//! The schema version lives in the SQLite header (`PRAGMA user_version`). A fresh file
//! reports version 0. This module compares the persisted version with the target version
//! and drives the migration hooks inside a single transaction.

use rusqlite::Connection;
use tracing::info;

use super::connection::{read_user_version, write_user_version};
use crate::database::{HookKind, MigrationHooks};
use crate::error::{HelperError, HelperResult};

/// Status of the persisted schema relative to the target version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Persisted version equals the target version
    Current,

    /// Database is not initialized (fresh database, version 0)
    NotInitialized { target: u32 },

    /// Database is older than the target version
    NeedsUpgrade { from: u32, to: u32 },

    /// Database was written by a newer schema than the target version
    NeedsDowngrade { from: u32, to: u32 },
}

impl SchemaStatus {
    pub fn compare(persisted: u32, target: u32) -> Self {
        if persisted == target {
            SchemaStatus::Current
        } else if persisted == 0 {
            SchemaStatus::NotInitialized { target }
        } else if persisted > target {
            SchemaStatus::NeedsDowngrade {
                from: persisted,
                to: target,
            }
        } else {
            SchemaStatus::NeedsUpgrade {
                from: persisted,
                to: target,
            }
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, SchemaStatus::Current)
    }
}

/// Brings a freshly opened connection to the target schema version
pub struct SchemaMigrator<'a> {
    conn: &'a Connection,
    hooks: &'a dyn MigrationHooks,
    name: &'a str,
}

impl<'a> SchemaMigrator<'a> {
    pub fn new(conn: &'a Connection, hooks: &'a dyn MigrationHooks, name: &'a str) -> Self {
        Self { conn, hooks, name }
    }

    /// Check the current schema status
    pub fn check_status(&self, target: u32) -> HelperResult<SchemaStatus> {
        let persisted = read_user_version(self.conn)?;
        Ok(SchemaStatus::compare(persisted, target))
    }

    /// Reconcile the persisted version with `target`
    ///
    /// Create, upgrade and the version bump commit together. If anything fails the
    /// transaction rolls back and the persisted version is left untouched. Downgrades
    /// are always rejected.
    pub fn reconcile(&self, target: u32, read_only: bool) -> HelperResult<SchemaStatus> {
        let status = self.check_status(target)?;
        if status.is_current() {
            return Ok(status);
        }

        if read_only {
            let from = read_user_version(self.conn)?;
            return Err(HelperError::UpgradeOnReadOnly {
                name: self.name.to_string(),
                from,
                to: target,
            });
        }

        // dropping the transaction without commit rolls back
        let tx = self.conn.unchecked_transaction()?;

        match status {
            SchemaStatus::Current => {}
            SchemaStatus::NotInitialized { .. } => {
                self.hooks
                    .on_create(&tx)
                    .map_err(HelperError::hook(HookKind::Create))?;
            }
            SchemaStatus::NeedsDowngrade { from, to } => {
                return Err(HelperError::DowngradeUnsupported { from, to });
            }
            SchemaStatus::NeedsUpgrade { from, to } => {
                self.hooks
                    .on_upgrade(&tx, from, to)
                    .map_err(HelperError::hook(HookKind::Upgrade))?;
            }
        }

        write_user_version(&tx, target)?;
        tx.commit()?;

        info!("Database {} schema migrated: {:?}", self.name, status);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::HookSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn books_hooks() -> HookSet {
        HookSet::new()
            .create(|conn| {
                conn.execute_batch("CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT)")?;
                Ok(())
            })
            .upgrade(|conn, _, _| {
                conn.execute_batch("ALTER TABLE books ADD COLUMN author TEXT")?;
                Ok(())
            })
    }

    #[test]
    fn test_compare() {
        assert_eq!(SchemaStatus::compare(3, 3), SchemaStatus::Current);
        assert_eq!(
            SchemaStatus::compare(0, 3),
            SchemaStatus::NotInitialized { target: 3 }
        );
        assert_eq!(
            SchemaStatus::compare(2, 3),
            SchemaStatus::NeedsUpgrade { from: 2, to: 3 }
        );
        assert_eq!(
            SchemaStatus::compare(4, 3),
            SchemaStatus::NeedsDowngrade { from: 4, to: 3 }
        );
    }

    #[test]
    fn test_reconcile_creates_fresh_schema() {
        let conn = create_test_db();
        let hooks = books_hooks();
        let migrator = SchemaMigrator::new(&conn, &hooks, "test.db");

        let status = migrator.reconcile(1, false).unwrap();
        assert_eq!(status, SchemaStatus::NotInitialized { target: 1 });
        assert_eq!(read_user_version(&conn).unwrap(), 1);
        assert!(migrator.check_status(1).unwrap().is_current());
    }

    #[test]
    fn test_reconcile_current_is_noop() {
        let conn = create_test_db();
        write_user_version(&conn, 2).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let hooks = HookSet::new().upgrade(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let status = SchemaMigrator::new(&conn, &hooks, "test.db")
            .reconcile(2, true)
            .unwrap();
        assert_eq!(status, SchemaStatus::Current);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reconcile_upgrade_failure_rolls_back() {
        let conn = create_test_db();
        conn.execute_batch("CREATE TABLE books (id INTEGER PRIMARY KEY)")
            .unwrap();
        write_user_version(&conn, 1).unwrap();

        let hooks = HookSet::new().upgrade(|conn, _, _| {
            conn.execute_batch("CREATE TABLE authors (id INTEGER PRIMARY KEY)")?;
            anyhow::bail!("migration 2 is broken")
        });

        let err = SchemaMigrator::new(&conn, &hooks, "test.db")
            .reconcile(2, false)
            .unwrap_err();
        assert!(matches!(
            err,
            HelperError::Hook {
                hook: HookKind::Upgrade,
                ..
            }
        ));
        assert_eq!(read_user_version(&conn).unwrap(), 1);

        let authors: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'authors'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(authors, 0);
    }

    #[test]
    fn test_reconcile_rejects_downgrade() {
        let conn = create_test_db();
        write_user_version(&conn, 4).unwrap();
        let hooks = books_hooks();

        let err = SchemaMigrator::new(&conn, &hooks, "test.db")
            .reconcile(3, false)
            .unwrap_err();
        assert!(matches!(
            err,
            HelperError::DowngradeUnsupported { from: 4, to: 3 }
        ));
        assert_eq!(read_user_version(&conn).unwrap(), 4);
    }

    #[test]
    fn test_reconcile_read_only_mismatch() {
        let conn = create_test_db();
        write_user_version(&conn, 1).unwrap();
        let hooks = books_hooks();

        let err = SchemaMigrator::new(&conn, &hooks, "test.db")
            .reconcile(2, true)
            .unwrap_err();
        assert!(matches!(
            err,
            HelperError::UpgradeOnReadOnly { from: 1, to: 2, .. }
        ));
    }
}
