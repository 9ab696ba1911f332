//! Database schema migrations for lifeping.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!("failed to read schema_version: {e}");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: accounts, contacts, the check-in log and the kv table.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            user_id       TEXT PRIMARY KEY,
            email         TEXT NOT NULL UNIQUE,
            full_name     TEXT NOT NULL,
            bio           TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL,
            salt          TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contacts (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       TEXT NOT NULL,
            name          TEXT NOT NULL,
            relationship  TEXT NOT NULL DEFAULT '',
            email         TEXT NOT NULL DEFAULT '',
            phone_number  TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS checkins (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            status      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_user ON contacts(user_id);
        CREATE INDEX IF NOT EXISTS idx_checkins_user_timestamp ON checkins(user_id, timestamp);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: the alert ledger.
///
/// `deadline_alerts` holds one row per (user, deadline) that left `pending`;
/// `contact_deliveries` holds one row per contact attempted for that deadline.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS deadline_alerts (
            user_id      TEXT NOT NULL,
            deadline_at  TEXT NOT NULL,
            phase        TEXT NOT NULL,
            opened_at    TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            PRIMARY KEY (user_id, deadline_at)
        );

        CREATE TABLE IF NOT EXISTS contact_deliveries (
            user_id          TEXT NOT NULL,
            deadline_at      TEXT NOT NULL,
            contact_id       INTEGER NOT NULL,
            outcome          TEXT NOT NULL,
            attempts         INTEGER NOT NULL DEFAULT 0,
            last_attempt_at  TEXT NOT NULL,
            error            TEXT,
            PRIMARY KEY (user_id, deadline_at, contact_id)
        );

        CREATE INDEX IF NOT EXISTS idx_deadline_alerts_phase ON deadline_alerts(user_id, phase);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}
