//! Database module
//!
//! This module provides all database functionality for sqlhelper, organized into:
//!
//! - **core**: Core database infrastructure (connection handles, schema versioning)
//! - **helper**: The open helper that creates, migrates and caches one database
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # DatabaseHandle, open modes, factories, corruption handling
//! │   └── schema      # user_version comparison and migration transaction
//! │
//! └── helper/         # Lifecycle
//!     └── hooks       # MigrationHooks trait and closure-based HookSet
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlhelper::database::{HookSet, OpenHelper};
//! use sqlhelper::HelperConfig;
//!
//! let hooks = HookSet::new()
//!     .create(|conn| Ok(conn.execute_batch("CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT)")?))
//!     .upgrade(|conn, old, _new| {
//!         if old < 2 {
//!             conn.execute_batch("ALTER TABLE books ADD COLUMN author TEXT")?;
//!         }
//!         Ok(())
//!     });
//!
//! let helper = OpenHelper::new(HelperConfig::new("books.db", 2)?, hooks)?;
//!
//! let db = helper.get_writable_database()?;
//! db.execute_with_params("INSERT INTO books (title) VALUES (?1)", ["Dune"])?;
//!
//! helper.close()?;
//! ```

pub mod core;
pub mod helper;

// Connection handles and schema versioning
pub use core::{
    ConnectionFactory, CorruptionHandler, DatabaseHandle, DeleteDatabaseFiles, OpenMode,
    SchemaMigrator, SchemaStatus, SqliteConnectionFactory,
};

// Lifecycle management
pub use helper::{HookKind, HookSet, MigrationHooks, OpenHelper};
