//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::{GatewayError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| GatewayError::StoreUnavailable(format!("failed to create schema_version: {e}")))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| GatewayError::StoreUnavailable(format!("failed to clear schema_version: {e}")))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| GatewayError::StoreUnavailable(format!("failed to set schema_version: {e}")))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(SESSIONS_SCHEMA)
        .map_err(|e| GatewayError::StoreUnavailable(format!("failed to create session tables: {e}")))?;
    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, _from_version: i32) -> Result<()> {
    // Migration steps go here as the schema evolves
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Session and recording tables
const SESSIONS_SCHEMA: &str = r#"
-- One row per granted session. Status transitions:
--   active -> ended | destroyed (terminal, exactly once)
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    container_name TEXT NOT NULL,
    ssh_host TEXT,
    ssh_port INTEGER,
    ssh_user TEXT,
    profile TEXT,
    ttl INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    user_id TEXT,
    invited_by TEXT,
    allowed_actions TEXT
);

-- One recording per session (or none), written when the session ends
CREATE TABLE IF NOT EXISTS session_recordings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    recording_path TEXT NOT NULL,
    timing_path TEXT,
    recording_size INTEGER,
    duration_seconds INTEGER,
    created_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions (session_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions (status);
CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions (created_at);
CREATE INDEX IF NOT EXISTS idx_recordings_session ON session_recordings (session_id);
"#;
