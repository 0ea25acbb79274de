//! Database module for endpoint pool storage.
//!
//! This module provides SQLite-based persistent storage for:
//! - The active endpoint pool and channel display metadata
//! - The quarantine store for evicted endpoints
//! - Versioned snapshots with a single current pointer
//! - Cycle history

mod cycle_history;
mod endpoint;
mod models;
mod quarantine;
mod schema;
mod snapshot;

pub use models::*;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(i64),

    #[error("Invalid stored value: {0}")]
    InvalidValue(#[from] streampool_protocol::ProtocolError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Shared database handle.
pub type DatabaseHandle = Arc<tokio::sync::Mutex<Database>>;

/// Main database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable foreign keys
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        self.apply_migrations()?;
        Ok(())
    }

    /// Add a column to a table if it doesn't exist.
    fn add_column_if_not_exists(&self, table: &str, column: &str, column_type: &str) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let column_exists = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .any(|name| name == column);

        if !column_exists {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type);
            self.conn
                .execute(&sql, [])
                .map_err(|e| DatabaseError::MigrationFailed(format!("{}.{}: {}", table, column, e)))?;
            log::info!("Migration: Added column {} to table {}", column, table);
        }

        Ok(())
    }

    /// Apply pending migrations.
    fn apply_migrations(&self) -> Result<()> {
        // Migration 001: last_checked_at arrived after the first pool layout
        self.add_column_if_not_exists("endpoints", "last_checked_at", "INTEGER")?;
        // Migration 002: purge counter on cycle history
        self.add_column_if_not_exists("cycle_history", "purged", "INTEGER DEFAULT 0")?;
        Ok(())
    }

    /// Get the underlying connection (for advanced queries).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
