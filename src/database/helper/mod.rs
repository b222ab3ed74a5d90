//! Connection lifecycle management
//!
//! [`OpenHelper`] lazily opens a single SQLite file, brings its schema to the configured
//! version and caches the resulting handle until it is closed.

mod hooks;

pub use hooks::{HookKind, HookSet, MigrationHooks};

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::ReentrantMutex;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseInfo, HelperConfig, HelperStatus};
use crate::database::core::{
    is_corruption, read_user_version, ConnectionFactory, CorruptionHandler, DatabaseHandle,
    DeleteDatabaseFiles, OpenMode, SchemaMigrator, SqliteConnectionFactory,
};
use crate::error::{HelperError, HelperResult};

/// State of the helper's single cached connection
#[derive(Debug, Default)]
pub(crate) enum LifecycleState {
    /// No handle is cached
    #[default]
    Idle,
    /// An acquire is opening and migrating a handle
    Initializing,
    /// A handle is cached
    Ready(Arc<DatabaseHandle>),
}

impl LifecycleState {
    fn status(&self) -> HelperStatus {
        match self {
            LifecycleState::Idle => HelperStatus::Idle,
            LifecycleState::Initializing => HelperStatus::Initializing,
            LifecycleState::Ready(handle) if handle.is_open() => HelperStatus::Ready,
            LifecycleState::Ready(_) => HelperStatus::Idle,
        }
    }
}

/// Creates, opens, migrates and caches one SQLite database
///
/// Construction is cheap: nothing touches the disk until [`get_writable_database`] or
/// [`get_readable_database`] is called. Both may take a long time while a migration runs,
/// so avoid calling them from latency-sensitive threads.
///
/// All calls on one helper are serialized. Two helpers pointing at the same file are not
/// coordinated; SQLite's own file locking applies.
///
/// [`get_writable_database`]: OpenHelper::get_writable_database
/// [`get_readable_database`]: OpenHelper::get_readable_database
pub struct OpenHelper {
    config: HelperConfig,
    path: PathBuf,
    hooks: Box<dyn MigrationHooks>,
    factory: Box<dyn ConnectionFactory>,
    corruption_handler: Box<dyn CorruptionHandler>,
    // reentrant so a hook calling back in gets an error instead of a deadlock
    state: ReentrantMutex<RefCell<LifecycleState>>,
}

impl OpenHelper {
    /// Create a helper for `config` using `hooks` to build and migrate the schema
    ///
    /// Fails with [`HelperError::Configuration`] for an empty name or a version below 1.
    pub fn new<H>(config: HelperConfig, hooks: H) -> HelperResult<Self>
    where
        H: MigrationHooks + 'static,
    {
        config.validate()?;
        let path = config.database_path();

        Ok(OpenHelper {
            config,
            path,
            hooks: Box::new(hooks),
            factory: Box::new(SqliteConnectionFactory),
            corruption_handler: Box::new(DeleteDatabaseFiles),
            state: ReentrantMutex::new(RefCell::new(LifecycleState::Idle)),
        })
    }

    /// Replace the factory used to open connections
    pub fn with_connection_factory<F>(mut self, factory: F) -> Self
    where
        F: ConnectionFactory + 'static,
    {
        self.factory = Box::new(factory);
        self
    }

    /// Replace the handler invoked when SQLite reports corruption
    pub fn with_corruption_handler<C>(mut self, handler: C) -> Self
    where
        C: CorruptionHandler + 'static,
    {
        self.corruption_handler = Box::new(handler);
        self
    }

    pub fn database_name(&self) -> &str {
        &self.config.name
    }

    /// Absolute path used for every open attempt
    pub fn database_path(&self) -> &Path {
        &self.path
    }

    pub fn target_version(&self) -> u32 {
        self.config.version
    }

    pub fn config(&self) -> &HelperConfig {
        &self.config
    }

    /// Create and/or open a database for reading and writing
    ///
    /// Once opened the handle is cached, so call this every time you need to write.
    /// If the file cannot be opened for writing but can be opened read-only, a read-only
    /// handle is returned instead; a later call may succeed in upgrading it.
    pub fn get_writable_database(&self) -> HelperResult<Arc<DatabaseHandle>> {
        self.acquire(true)
    }

    /// Create and/or open a database
    ///
    /// Returns the same handle as [`get_writable_database`](Self::get_writable_database)
    /// unless only read-only access was possible. The handle is valid until the next
    /// writable request replaces it or [`close`](Self::close) is called.
    pub fn get_readable_database(&self) -> HelperResult<Arc<DatabaseHandle>> {
        self.acquire(false)
    }

    /// Close the cached handle, if any
    ///
    /// Calling `close` on an idle helper does nothing.
    pub fn close(&self) -> HelperResult<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        match std::mem::take(&mut *state) {
            LifecycleState::Initializing => {
                *state = LifecycleState::Initializing;
                Err(HelperError::Reentrancy("Closed during initialization"))
            }
            LifecycleState::Ready(handle) => {
                handle.close();
                debug!("closed cached database {}", self.config.name);
                Ok(())
            }
            LifecycleState::Idle => Ok(()),
        }
    }

    /// Whether an open handle is currently cached
    pub fn is_ready(&self) -> bool {
        self.status() == HelperStatus::Ready
    }

    pub fn status(&self) -> HelperStatus {
        let guard = self.state.lock();
        let status = guard.borrow().status();
        status
    }

    /// Describe the database file and the cached handle without opening anything
    pub fn database_info(&self) -> DatabaseInfo {
        let mut info =
            DatabaseInfo::from_path(&self.config.name, self.path.clone(), self.config.version);

        let guard = self.state.lock();
        let state = guard.borrow();
        info.status = state.status();
        if let LifecycleState::Ready(handle) = &*state {
            if handle.is_open() {
                info.read_only = Some(handle.is_read_only());
                info.schema_version = handle.try_version();
            }
        }

        info
    }

    fn acquire(&self, writable: bool) -> HelperResult<Arc<DatabaseHandle>> {
        let guard = self.state.lock();

        let previous = {
            let mut state = guard.borrow_mut();

            let mut stale = false;
            match &*state {
                LifecycleState::Ready(handle) if !handle.is_open() => stale = true,
                LifecycleState::Ready(handle) if !writable || !handle.is_read_only() => {
                    return Ok(Arc::clone(handle));
                }
                LifecycleState::Initializing => {
                    return Err(HelperError::Reentrancy("getDatabase called recursively"));
                }
                _ => {}
            }

            if stale {
                // closed by a caller, not by us
                debug!("cached database {} was closed, reopening", self.config.name);
                *state = LifecycleState::Idle;
            }

            std::mem::replace(&mut *state, LifecycleState::Initializing)
        };

        let _reset = ResetOnUnwind(&guard);
        let result = self.initialize(previous, writable);

        let mut state = guard.borrow_mut();
        match result {
            Ok(handle) => {
                *state = LifecycleState::Ready(Arc::clone(&handle));
                Ok(handle)
            }
            Err(e) => {
                *state = LifecycleState::Idle;
                Err(e)
            }
        }
    }

    fn initialize(
        &self,
        previous: LifecycleState,
        writable: bool,
    ) -> HelperResult<Arc<DatabaseHandle>> {
        if let LifecycleState::Ready(cached) = previous {
            // a read-only handle can hold a file lock that blocks opening read-write
            if writable && cached.is_read_only() {
                cached.close();
            }
        }

        let handle = match self.open_database(OpenMode::ReadWrite) {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "Couldn't open {} for writing (will try read-only): {}",
                    self.config.name, e
                );
                self.open_database(OpenMode::ReadOnly)?
            }
        };

        if let Err(e) = self.prepare(&handle) {
            handle.close();
            return Err(e);
        }

        if handle.is_read_only() {
            warn!("Opened {} in read-only mode", self.config.name);
        }

        Ok(Arc::new(handle))
    }

    /// Configure the connection, reconcile the schema version and run the open hook
    fn prepare(&self, handle: &DatabaseHandle) -> HelperResult<()> {
        let conn = handle.connection()?;
        let read_only = handle.is_read_only();

        self.configure(&conn, read_only)?;

        SchemaMigrator::new(&conn, self.hooks.as_ref(), &self.config.name)
            .reconcile(self.config.version, read_only)?;

        self.hooks
            .on_open(&conn)
            .map_err(HelperError::hook(HookKind::Open))
    }

    fn configure(&self, conn: &Connection, read_only: bool) -> HelperResult<()> {
        if let Some(ms) = self.config.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))?;
        }

        if self.config.write_ahead_logging && !read_only {
            let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            debug!("journal mode for {}: {}", self.config.name, mode);
        }

        self.hooks
            .on_configure(conn)
            .map_err(HelperError::hook(HookKind::Configure))
    }

    fn open_database(&self, mode: OpenMode) -> HelperResult<DatabaseHandle> {
        if mode == OpenMode::ReadWrite && self.config.storage_dir.is_none() {
            if let Some(dir) = self.path.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    warn!("Unable to create directory {}: {}", dir.display(), e);
                }
            }
        }

        let handle = match self.try_open(mode) {
            Err(e) if is_corruption(&e) => {
                self.corruption_handler.on_corruption(&self.path);
                self.try_open(mode)
            }
            result => result,
        }
        .map_err(|source| HelperError::Open {
            path: self.path.clone(),
            source,
        })?;

        info!("successfully opened database {} ({})", self.config.name, mode);
        Ok(handle)
    }

    fn try_open(&self, mode: OpenMode) -> rusqlite::Result<DatabaseHandle> {
        let conn = self.factory.open(&self.path, mode)?;
        // SQLite reads the header lazily; touch it so corruption shows up here
        read_user_version(&conn)?;
        DatabaseHandle::new(conn, self.path.clone())
    }
}

/// Puts an `Initializing` helper back to `Idle` when initialization unwinds
struct ResetOnUnwind<'a>(&'a RefCell<LifecycleState>);

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.try_borrow_mut() {
            if matches!(*state, LifecycleState::Initializing) {
                *state = LifecycleState::Idle;
            }
        }
    }
}

impl std::fmt::Debug for OpenHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHelper")
            .field("name", &self.config.name)
            .field("path", &self.path)
            .field("version", &self.config.version)
            .field("status", &self.status())
            .finish()
    }
}
