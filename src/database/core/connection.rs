//! Database connection management
//!
//! This module provides the handle type shared between the helper and its callers,
//! together with the seams used to open connections and react to corruption.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rusqlite::{Connection, ErrorCode, OpenFlags, MAIN_DB};
use tracing::{debug, error, warn};

use crate::error::{HelperError, HelperResult};

/// Mode used when opening the database file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open for reading and writing, creating the file if it does not exist
    ReadWrite,
    /// Open an existing file for reading only
    ReadOnly,
}

impl OpenMode {
    pub fn flags(&self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadWrite => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }
}

impl std::fmt::Display for OpenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenMode::ReadWrite => write!(f, "read-write"),
            OpenMode::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Opens raw SQLite connections for the helper
///
/// The default [`SqliteConnectionFactory`] maps [`OpenMode`] straight onto SQLite open
/// flags. Custom factories can register functions or collations on every new connection,
/// or inject failures in tests.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self, path: &Path, mode: OpenMode) -> rusqlite::Result<Connection>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnectionFactory;

impl ConnectionFactory for SqliteConnectionFactory {
    fn open(&self, path: &Path, mode: OpenMode) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(path, mode.flags())
    }
}

/// Called when SQLite reports that the database file is corrupt
///
/// After the handler returns, the helper makes exactly one more attempt to open the
/// file in the same mode.
pub trait CorruptionHandler: Send + Sync {
    fn on_corruption(&self, path: &Path);
}

/// Default corruption handler: deletes the database file and its journal siblings
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteDatabaseFiles;

impl CorruptionHandler for DeleteDatabaseFiles {
    fn on_corruption(&self, path: &Path) {
        error!("Corruption reported by sqlite on database: {}", path.display());

        if path.as_os_str() == ":memory:" {
            return;
        }

        let mut targets = vec![path.to_path_buf()];
        for suffix in ["-journal", "-wal", "-shm"] {
            let mut sibling = path.as_os_str().to_owned();
            sibling.push(suffix);
            targets.push(PathBuf::from(sibling));
        }

        for target in targets {
            match std::fs::remove_file(&target) {
                Ok(()) => warn!("deleted corrupt database file {}", target.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("delete failed for {}: {}", target.display(), e),
            }
        }
    }
}

/// Returns true if the error means the file is not a usable SQLite database
pub fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase)
    )
}

/// Read the schema version persisted in the database header
pub fn read_user_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Persist a schema version in the database header
pub fn write_user_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))
}

/// Quote `name` as an SQL identifier
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Shared handle to the single connection owned by an [`OpenHelper`](crate::OpenHelper)
///
/// Callers receive an `Arc<DatabaseHandle>`. The handle stays usable until the helper
/// closes it (explicit `close()`, or replacing a read-only handle with a read-write one)
/// or the caller closes it directly. After that every access returns
/// [`HelperError::HandleClosed`].
///
/// Do not call back into the helper while holding the guard returned by
/// [`DatabaseHandle::connection`]: replacing the handle needs the same lock.
pub struct DatabaseHandle {
    conn: Mutex<Option<Connection>>,
    open: AtomicBool,
    read_only: bool,
    path: PathBuf,
}

impl DatabaseHandle {
    /// Wrap an open connection
    ///
    /// The read-only flag comes from SQLite rather than the requested [`OpenMode`]: a
    /// read-write open of a write-protected file succeeds but yields a read-only database.
    pub(crate) fn new(conn: Connection, path: PathBuf) -> rusqlite::Result<Self> {
        let read_only = conn.is_readonly(MAIN_DB)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            open: AtomicBool::new(true),
            read_only,
            path,
        })
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether the handle still holds a live connection
    ///
    /// Never blocks, even while another thread is using the connection.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Lock the connection for exclusive use
    pub fn connection(&self) -> HelperResult<MappedMutexGuard<'_, Connection>> {
        MutexGuard::try_map(self.conn.lock(), |conn| conn.as_mut())
            .map_err(|_| HelperError::HandleClosed)
    }

    /// Run a closure against the connection
    pub fn with_connection<T, F>(&self, f: F) -> HelperResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.connection()?;
        Ok(f(&conn)?)
    }

    /// Schema version persisted in the file
    pub fn version(&self) -> HelperResult<u32> {
        self.with_connection(read_user_version)
    }

    /// Like [`version`](Self::version) but gives up instead of waiting for the connection
    pub(crate) fn try_version(&self) -> Option<u32> {
        let guard = self.conn.try_lock()?;
        guard.as_ref().and_then(|conn| read_user_version(conn).ok())
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> HelperResult<usize> {
        self.with_connection(|conn| conn.execute(sql, []))
    }

    /// Execute a SQL statement with parameters
    pub fn execute_with_params<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> HelperResult<usize> {
        self.with_connection(|conn| conn.execute(sql, params))
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> HelperResult<bool> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                [table_name],
                |row| row.get(0),
            )
        })
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> HelperResult<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name));
        self.with_connection(|conn| conn.query_row(&query, [], |row| row.get(0)))
    }

    /// Close the connection. Closing an already closed handle does nothing.
    pub fn close(&self) {
        let mut guard = self.conn.lock();
        if let Some(conn) = guard.take() {
            self.open.store(false, Ordering::Release);
            if let Err((_, e)) = conn.close() {
                warn!("error while closing {}: {}", self.path.display(), e);
            }
            debug!("closed database {}", self.path.display());
        }
    }
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("read_only", &self.read_only)
            .finish()
    }
}
