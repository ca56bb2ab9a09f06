//! FTS5 search table maintenance.
//!
//! Every row of `lora_fts` is a pure projection of one `lora` row plus its
//! tags, keyed by the same rowid. [`sync_entry`] and [`rebuild`] share one
//! projection query, so a live row and a rebuilt row are always identical.

use crate::catalog::schema::table_exists;
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use tracing::{debug, info};

/// Name of the FTS5 virtual table.
pub const SEARCH_TABLE: &str = "lora_fts";

/// Catalog entry -> index row. Tag names are concatenated in name order.
const PROJECTION: &str = "
    SELECT
        l.id,
        COALESCE(l.name, ''),
        COALESCE(l.trigger, ''),
        COALESCE(l.notes, ''),
        COALESCE((
            SELECT group_concat(tag_name, ' ') FROM (
                SELECT t.name AS tag_name
                FROM lora_tag lt JOIN tag t ON t.id = lt.tag_id
                WHERE lt.lora_id = l.id
                ORDER BY t.name
            )
        ), ''),
        COALESCE(l.title, '')
    FROM lora l";

/// One row of the search table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub id: i64,
    pub name: String,
    pub trigger: String,
    pub notes: String,
    pub tags_text: String,
    pub title: String,
}

impl IndexRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            trigger: row.get(2)?,
            notes: row.get(3)?,
            tags_text: row.get(4)?,
            title: row.get(5)?,
        })
    }
}

/// Statistics about the search table.
#[derive(Debug, Clone)]
pub struct FtsStats {
    pub row_count: usize,
    /// Tokenizer named in the table definition, if any.
    pub tokenizer: Option<String>,
}

/// Replace the index row for `id` with a fresh projection.
///
/// Returns `false` when the catalog has no such entry; any stale index row is
/// still removed in that case.
pub fn sync_entry(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM lora_fts WHERE rowid = ?1", params![id])?;
    let inserted = conn.execute(
        &format!(
            "INSERT INTO lora_fts(rowid, name, trigger, notes, tags_text, title) {} WHERE l.id = ?1",
            PROJECTION
        ),
        params![id],
    )?;
    Ok(inserted > 0)
}

/// Remove the index row for `id`.
pub fn remove_entry(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM lora_fts WHERE rowid = ?1", params![id])?;
    Ok(())
}

/// Ids that currently have an index row.
pub fn existing_ids(conn: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT rowid FROM lora_fts")?;
    let rows = stmt.query_map([], |row| row.get(0))?;

    let mut ids = HashSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

/// Repopulate the whole table from the catalog. Returns the row count.
pub fn rebuild(conn: &Connection) -> Result<usize> {
    // execute_batch: DELETE on a virtual table can report rows
    conn.execute_batch("DELETE FROM lora_fts;")?;
    let count = conn.execute(
        &format!(
            "INSERT INTO lora_fts(rowid, name, trigger, notes, tags_text, title) {}",
            PROJECTION
        ),
        [],
    )?;

    info!("Rebuilt search index with {} rows", count);
    Ok(count)
}

/// The index row `id` should have, computed from the catalog.
pub fn derive_row(conn: &Connection, id: i64) -> Result<Option<IndexRow>> {
    let row = conn
        .query_row(
            &format!("{} WHERE l.id = ?1", PROJECTION),
            params![id],
            IndexRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// The index row `id` actually has.
pub fn stored_row(conn: &Connection, id: i64) -> Result<Option<IndexRow>> {
    let row = conn
        .query_row(
            "SELECT rowid, name, trigger, notes, tags_text, title FROM lora_fts WHERE rowid = ?1",
            params![id],
            IndexRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Merge FTS5 b-tree segments.
pub fn optimize(conn: &Connection) -> Result<()> {
    conn.execute("INSERT INTO lora_fts(lora_fts) VALUES('optimize')", [])?;
    debug!("Optimized search index");
    Ok(())
}

/// Row count and tokenizer of the search table.
pub fn stats(conn: &Connection) -> Result<FtsStats> {
    if !table_exists(conn, SEARCH_TABLE)? {
        return Ok(FtsStats {
            row_count: 0,
            tokenizer: None,
        });
    }

    let row_count: usize =
        conn.query_row("SELECT COUNT(*) FROM lora_fts", [], |row| row.get(0))?;
    let sql: String = conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
        [SEARCH_TABLE],
        |row| row.get(0),
    )?;

    let tokenizer = sql.split_once("tokenize").and_then(|(_, rest)| {
        rest.split(['\'', '"'])
            .nth(1)
            .map(|t| t.trim().to_string())
    });

    Ok(FtsStats {
        row_count,
        tokenizer,
    })
}
