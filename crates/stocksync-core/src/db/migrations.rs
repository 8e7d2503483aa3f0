//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

/// Migration to version 1: businesses and articles
fn migrate_v1(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS businesses (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            qty INTEGER NOT NULL,
            selling_price REAL NOT NULL,
            business_id TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_articles_business ON articles(business_id);
        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: sync bookkeeping
///
/// `pending_deletions` holds ids removed locally whose tombstone has not reached
/// the remote yet. `sync_state` keeps the field fingerprint of each document as
/// of its last successful exchange with the remote.
fn migrate_v2(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS pending_deletions (
            collection TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            queued_at INTEGER NOT NULL,
            PRIMARY KEY (collection, doc_id)
        );
        CREATE TABLE IF NOT EXISTS sync_state (
            collection TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (collection, doc_id)
        );
        INSERT INTO schema_version (version) VALUES (2);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version 2");
    Ok(())
}
