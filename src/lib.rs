#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! sqlhelper - Lazy open, versioning and caching for a single SQLite database
//!
//! An [`OpenHelper`] owns one database file. The first call to
//! [`OpenHelper::get_writable_database`] or [`OpenHelper::get_readable_database`]
//! opens the file, runs the caller's create or upgrade hook inside a transaction until
//! the persisted `user_version` matches the configured version, and caches the handle.
//! Later calls return the same handle until it is closed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`database`]**: All database functionality
//!   - `core`: Connection handles, open modes and schema versioning
//!   - `helper`: The lifecycle state machine and migration hooks
//!
//! - **[`config`]**: Configuration management and database path resolution
//!
//! - **[`error`]**: The crate's error type
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sqlhelper::{HelperConfig, HookSet, OpenHelper};
//!
//! let config = HelperConfig::load(None)?;
//! let helper = OpenHelper::new(config, HookSet::new().create(|conn| {
//!     conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")?;
//!     Ok(())
//! }))?;
//!
//! let db = helper.get_readable_database()?;
//! println!("{} rows", db.table_count("notes")?);
//! println!("{}", helper.database_info().summary());
//! ```
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `bundled` | Compile SQLite from source via `rusqlite/bundled` (default) |

pub mod config;
pub mod database;
pub mod error;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{
    default_storage_dir, format_size, resolve_database_path, DatabaseInfo, HelperConfig,
    HelperStatus,
};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    ConnectionFactory, CorruptionHandler, DatabaseHandle, DeleteDatabaseFiles, HookKind, HookSet,
    MigrationHooks, OpenHelper, OpenMode, SchemaStatus, SqliteConnectionFactory,
};

// =============================================================================
// Errors
// =============================================================================

pub use error::{ErrorKind, HelperError, HelperResult};
