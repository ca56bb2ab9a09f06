//! Connection settings and the version-0 catalog schema.
//!
//! Everything after V0 is created by the migrator; this file only describes
//! the tables a brand-new or pre-migration catalog starts with.

use crate::config::CatalogDefaults;
use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// Configure a writer connection: WAL so readers never block on a scan,
/// NORMAL sync which keeps committed batches across a process crash.
pub(crate) fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA busy_timeout={};
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        PRAGMA temp_store=MEMORY;
        ",
        CatalogDefaults::BUSY_TIMEOUT.as_millis()
    ))?;
    Ok(())
}

/// Configure a read-only connection.
pub(crate) fn configure_reader(conn: &Connection) -> Result<()> {
    conn.busy_timeout(CatalogDefaults::BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA query_only=ON;")?;
    Ok(())
}

/// Create the V0 tables if they do not exist yet.
pub(crate) fn ensure_base_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS lora (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            path TEXT UNIQUE NOT NULL,
            sha256 TEXT,
            base TEXT,
            kind TEXT,
            trigger TEXT,
            notes TEXT,
            preview_full TEXT,
            preview_thumb TEXT,
            info_json TEXT,
            meta_json TEXT,
            civitai_id TEXT,
            file_size INTEGER,
            mtime INTEGER,
            scanned_at INTEGER,
            title TEXT
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS lora_fts
        USING fts5(name, trigger, notes, tags_text, title);

        CREATE TABLE IF NOT EXISTS tag (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            title TEXT
        );

        CREATE TABLE IF NOT EXISTS lora_tag (
            lora_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            weight REAL DEFAULT 1.0,
            PRIMARY KEY(lora_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS schema_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_lora_sha ON lora(sha256);
        CREATE INDEX IF NOT EXISTS idx_lora_mtime ON lora(mtime);

        INSERT OR IGNORE INTO schema_meta(key, value) VALUES ('schema_version', '0');
        "#,
    )?;

    debug!("Ensured base catalog schema");
    Ok(())
}

/// Whether a table (or virtual table) exists.
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether `table` has a column called `column`.
pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
