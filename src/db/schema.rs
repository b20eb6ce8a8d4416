// src/db/schema.rs

//! Database schema definitions and migrations for Libvault
//!
//! This module defines the SQLite schema for the library tables and provides
//! a migration system to evolve the schema over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    info!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        info!("Schema is up to date");
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {}", version))),
    }
}

/// Initial schema - Version 1
///
/// - libraries: one row per installed library, holding the metadata record
/// - library_files: payload files with content hashes
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Libraries: a row exists only once installation has completed
        CREATE TABLE libraries (
            library_key TEXT PRIMARY KEY,
            machine_name TEXT NOT NULL,
            major_version INTEGER NOT NULL CHECK(major_version >= 0),
            minor_version INTEGER NOT NULL CHECK(minor_version >= 0),
            patch_version INTEGER NOT NULL CHECK(patch_version >= 0),
            title TEXT NOT NULL,
            runnable INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(machine_name, major_version, minor_version)
        );

        CREATE INDEX idx_libraries_machine_name ON libraries(machine_name);

        -- Library files: written before the library row, removed with it
        CREATE TABLE library_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_key TEXT NOT NULL,
            path TEXT NOT NULL,
            sha256_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            content BLOB NOT NULL,
            stored_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(library_key, path)
        );

        CREATE INDEX idx_library_files_key ON library_files(library_key);
        CREATE INDEX idx_library_files_sha256 ON library_files(sha256_hash);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Track when a library was last upgraded in place
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        ALTER TABLE libraries ADD COLUMN updated_at TEXT;
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}
