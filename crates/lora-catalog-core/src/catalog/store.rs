//! Persistent catalog store.
//!
//! A [`CatalogStore`] owns two connections to one SQLite file: a writer used
//! by scans, migrations and title edits, and a read-only connection for
//! queries. Under WAL the reader sees the last committed batch while a scan
//! holds the write transaction.
//!
//! The free functions take a plain `&Connection` so the scanner can compose
//! them inside its own batch transaction.

use super::record::{CatalogEntry, EntryUpsert, Tag, ENTRY_COLUMNS, KIND_UNSORTED};
use super::schema::{configure_connection, configure_reader, ensure_base_schema};
use crate::config::CatalogDefaults;
use crate::error::{CatalogError, Result};
use crate::index::{self, SearchCache, SearchQuery};
use crate::migrate::{self, MigrationReport, Migrator};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, TransactionBehavior,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Maximum ids bound into one `IN (...)` list.
const ID_CHUNK: usize = 500;

/// The catalog database for one model root.
pub struct CatalogStore {
    db_path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    cache: SearchCache,
}

impl CatalogStore {
    /// Open or create the catalog at `db_path`.
    ///
    /// Only the V0 schema is ensured here; callers run [`CatalogStore::migrate`]
    /// before reading entries.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_cache_capacity(db_path, CatalogDefaults::SEARCH_CACHE_CAPACITY)
    }

    pub fn open_with_cache_capacity(db_path: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CatalogError::io_with_path(e, parent))?;
            }
        }

        let writer = Connection::open(&db_path)?;
        configure_connection(&writer)?;
        ensure_base_schema(&writer)?;

        let reader = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        configure_reader(&reader)?;

        info!("Opened catalog at {}", db_path.display());

        Ok(Self {
            db_path,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            cache: SearchCache::new(capacity),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| CatalogError::lock_poisoned())
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|_| CatalogError::lock_poisoned())
    }

    pub(crate) fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// Run `f` in an immediate transaction; commit on `Ok`, roll back on `Err`.
    pub(crate) fn write_tx<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        drop(conn);

        self.cache.invalidate();
        Ok(out)
    }

    /// Apply pending schema migrations.
    pub fn migrate(&self, migrator: &Migrator) -> Result<MigrationReport> {
        let mut conn = self.writer()?;
        let report = migrator.apply(&mut conn)?;
        drop(conn);

        if !report.applied.is_empty() {
            self.cache.invalidate();
        }
        Ok(report)
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.reader()?;
        migrate::current_version(&conn)
    }

    /// Insert or update an entry by path and refresh its index row.
    pub fn upsert_entry(&self, entry: &EntryUpsert) -> Result<i64> {
        self.write_tx(|conn| {
            let id = upsert_entry(conn, entry)?;
            index::sync_entry(conn, id)?;
            Ok(id)
        })
    }

    /// Replace the tag set of `id` and refresh its index row.
    pub fn replace_tags(&self, id: i64, tags: &[String]) -> Result<()> {
        self.write_tx(|conn| {
            replace_tags(conn, id, tags)?;
            index::sync_entry(conn, id)?;
            Ok(())
        })
    }

    pub fn add_tag(&self, id: i64, name: &str) -> Result<()> {
        self.write_tx(|conn| {
            add_tag(conn, id, name)?;
            index::sync_entry(conn, id)?;
            Ok(())
        })
    }

    pub fn delete_tags_for(&self, id: i64) -> Result<()> {
        self.write_tx(|conn| {
            delete_tags_for(conn, id)?;
            index::sync_entry(conn, id)?;
            Ok(())
        })
    }

    /// Change the display title of `id`; the index row follows in the same
    /// transaction.
    pub fn set_title(&self, id: i64, title: &str) -> Result<()> {
        self.write_tx(|conn| set_title(conn, id, title))?;
        debug!("Set title of entry {}", id);
        Ok(())
    }

    pub fn delete_entry(&self, id: i64) -> Result<bool> {
        self.write_tx(|conn| delete_entry(conn, id))
    }

    pub fn get_entry(&self, path: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.reader()?;
        get_entry(&conn, path)
    }

    pub fn get_entry_by_id(&self, id: i64) -> Result<Option<CatalogEntry>> {
        let conn = self.reader()?;
        get_entry_by_id(&conn, id)
    }

    /// Entries for `ids`; with `preserve_order` they come back in input order.
    pub fn list_entries(&self, ids: &[i64], preserve_order: bool) -> Result<Vec<CatalogEntry>> {
        let conn = self.reader()?;
        list_entries(&conn, ids, preserve_order)
    }

    pub fn tags_for(&self, id: i64) -> Result<Vec<Tag>> {
        let conn = self.reader()?;
        tags_for(&conn, id)
    }

    pub fn distinct_kinds(&self) -> Result<Vec<String>> {
        let conn = self.reader()?;
        distinct_kinds(&conn)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.reader()?;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM lora", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Matching ids, served from the result cache when possible.
    pub fn search(&self, query: &SearchQuery) -> Result<Arc<Vec<i64>>> {
        let (generation, hit) = self.cache.lookup(query);
        if let Some(ids) = hit {
            debug!("Search cache hit for {:?}", query.terms);
            return Ok(ids);
        }

        let ids = {
            let conn = self.reader()?;
            Arc::new(index::run_query(&conn, query)?)
        };
        self.cache.insert(generation, query.clone(), Arc::clone(&ids));
        Ok(ids)
    }

    /// Repopulate the search index from the catalog.
    pub fn rebuild_search_index(&self) -> Result<usize> {
        let count = self.write_tx(index::rebuild)?;
        let conn = self.writer()?;
        index::fts5::optimize(&conn)?;
        Ok(count)
    }

    pub fn index_row(&self, id: i64) -> Result<Option<index::IndexRow>> {
        let conn = self.reader()?;
        index::stored_row(&conn, id)
    }

    /// Index row `id` would get from a rebuild right now.
    pub fn derived_index_row(&self, id: i64) -> Result<Option<index::IndexRow>> {
        let conn = self.reader()?;
        index::derive_row(&conn, id)
    }
}

/// Insert or update by path. Returns the entry id.
///
/// `title` and `notes` are never touched on conflict; `kind` is only filled
/// when the stored value is blank.
pub fn upsert_entry(conn: &Connection, entry: &EntryUpsert) -> Result<i64> {
    let id = conn.query_row(
        "INSERT INTO lora (
            name, path, sha256, base, kind, trigger, preview_full, preview_thumb,
            info_json, meta_json, header_json, civitai_id, file_size, mtime, scanned_at, title
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?1)
        ON CONFLICT(path) DO UPDATE SET
            name = excluded.name,
            sha256 = excluded.sha256,
            base = excluded.base,
            kind = CASE
                WHEN lora.kind IS NULL OR TRIM(lora.kind) = '' THEN excluded.kind
                ELSE lora.kind
            END,
            trigger = excluded.trigger,
            preview_full = excluded.preview_full,
            preview_thumb = excluded.preview_thumb,
            info_json = excluded.info_json,
            meta_json = excluded.meta_json,
            header_json = excluded.header_json,
            civitai_id = excluded.civitai_id,
            file_size = excluded.file_size,
            mtime = excluded.mtime,
            scanned_at = excluded.scanned_at
        RETURNING id",
        params![
            entry.name,
            entry.path,
            entry.sha256,
            entry.base,
            entry.kind,
            entry.trigger,
            entry.preview_full,
            entry.preview_thumb,
            entry.info_json,
            entry.meta_json,
            entry.header_json,
            entry.civitai_id,
            entry.file_size,
            entry.mtime,
            entry.scanned_at,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn delete_tags_for(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM lora_tag WHERE lora_id = ?1", params![id])?;
    Ok(())
}

/// Attach tag `name` to `id`, creating the tag if needed. Blank names are
/// ignored.
pub fn add_tag(conn: &Connection, id: i64, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(());
    }

    conn.execute(
        "INSERT INTO tag(name, title) VALUES (?1, ?1) ON CONFLICT(name) DO NOTHING",
        params![name],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO lora_tag(lora_id, tag_id)
         SELECT ?1, id FROM tag WHERE name = ?2",
        params![id, name],
    )?;
    Ok(())
}

/// Delete-then-reinsert the full tag set of `id`.
pub fn replace_tags(conn: &Connection, id: i64, tags: &[String]) -> Result<()> {
    delete_tags_for(conn, id)?;
    for tag in tags {
        add_tag(conn, id, tag)?;
    }
    Ok(())
}

pub fn get_entry(conn: &Connection, path: &str) -> Result<Option<CatalogEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {} FROM lora WHERE path = ?1", ENTRY_COLUMNS),
            params![path],
            CatalogEntry::from_row,
        )
        .optional()?;
    Ok(entry)
}

pub fn get_entry_by_id(conn: &Connection, id: i64) -> Result<Option<CatalogEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {} FROM lora WHERE id = ?1", ENTRY_COLUMNS),
            params![id],
            CatalogEntry::from_row,
        )
        .optional()?;
    Ok(entry)
}

/// Batch lookup. Ids without a row are silently omitted.
///
/// With `preserve_order` the result follows `ids` (duplicates included);
/// otherwise it is ordered by id.
pub fn list_entries(
    conn: &Connection,
    ids: &[i64],
    preserve_order: bool,
) -> Result<Vec<CatalogEntry>> {
    let mut found: HashMap<i64, CatalogEntry> = HashMap::with_capacity(ids.len());

    for chunk in ids.chunks(ID_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM lora WHERE id IN ({})",
            ENTRY_COLUMNS, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(chunk.iter().map(|id| Value::Integer(*id))),
            CatalogEntry::from_row,
        )?;
        for row in rows {
            let entry = row?;
            found.insert(entry.id, entry);
        }
    }

    if preserve_order {
        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    } else {
        let mut entries: Vec<CatalogEntry> = found.into_values().collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }
}

/// Tags of `id`, ordered by name.
pub fn tags_for(conn: &Connection, id: i64) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.title FROM lora_tag lt
         JOIN tag t ON t.id = lt.tag_id
         WHERE lt.lora_id = ?1
         ORDER BY t.name",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            title: row.get(2)?,
        })
    })?;

    let mut tags = Vec::new();
    for row in rows {
        tags.push(row?);
    }
    Ok(tags)
}

pub(crate) fn set_title(conn: &Connection, id: i64, title: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE lora SET title = ?1 WHERE id = ?2",
        params![title, id],
    )?;
    if updated == 0 {
        return Err(CatalogError::EntryNotFound { id });
    }
    index::sync_entry(conn, id)?;
    Ok(())
}

/// Remove an entry with its tags and index row. Presets cascade.
pub fn delete_entry(conn: &Connection, id: i64) -> Result<bool> {
    delete_tags_for(conn, id)?;
    index::fts5::remove_entry(conn, id)?;
    let deleted = conn.execute("DELETE FROM lora WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Kinds in case-insensitive order, blanks reported as "Unsorted".
pub fn distinct_kinds(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT COALESCE(NULLIF(TRIM(kind), ''), '{}') AS k
         FROM lora
         ORDER BY k COLLATE NOCASE, k",
        KIND_UNSORTED
    ))?;
    let rows = stmt.query_map([], |row| row.get(0))?;

    let mut kinds = Vec::new();
    for row in rows {
        kinds.push(row?);
    }
    Ok(kinds)
}

/// `(id, path)` of every entry.
pub(crate) fn entry_paths(conn: &Connection) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT id, path FROM lora")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut paths = Vec::new();
    for row in rows {
        paths.push(row?);
    }
    Ok(paths)
}
