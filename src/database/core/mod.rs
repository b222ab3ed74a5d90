//! Core database infrastructure
//!
//! This module provides the building blocks used by the open helper:
//! - `DatabaseHandle`: Shared SQLite connection handle with explicit invalidation
//! - `ConnectionFactory` / `CorruptionHandler`: Seams for opening files and recovering from corruption
//! - `SchemaMigrator`: Schema version reconciliation
//! - `SchemaStatus`: Schema state enumeration

mod connection;
mod schema;

pub use connection::{
    is_corruption, read_user_version, write_user_version, ConnectionFactory, CorruptionHandler,
    DatabaseHandle, DeleteDatabaseFiles, OpenMode, SqliteConnectionFactory,
};
pub use schema::{SchemaMigrator, SchemaStatus};
