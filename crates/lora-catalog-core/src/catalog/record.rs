//! Catalog row types.

use crate::fingerprint::FileStats;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Display kind for entries whose `kind` is unset or blank.
pub const KIND_UNSORTED: &str = "Unsorted";

/// Columns selected for a [`CatalogEntry`], in `row_to_entry` order.
pub(crate) const ENTRY_COLUMNS: &str = "id, name, path, sha256, base, kind, trigger, notes, \
     preview_full, preview_thumb, info_json, meta_json, header_json, civitai_id, \
     file_size, mtime, scanned_at, title";

/// One indexed model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: i64,
    /// Name derived from sidecars or the file stem; refreshed on every scan.
    pub name: String,
    /// Absolute file path, unique across the catalog.
    pub path: String,
    pub sha256: Option<String>,
    /// Base-model family.
    pub base: Option<String>,
    pub kind: Option<String>,
    pub trigger: Option<String>,
    pub notes: Option<String>,
    pub preview_full: Option<String>,
    pub preview_thumb: Option<String>,
    pub info_json: Option<String>,
    pub meta_json: Option<String>,
    pub header_json: Option<String>,
    pub civitai_id: Option<String>,
    pub file_size: Option<i64>,
    pub mtime: Option<i64>,
    pub scanned_at: Option<i64>,
    /// User-editable title, preserved across scans.
    pub title: Option<String>,
}

impl CatalogEntry {
    pub(crate) fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            path: row.get(2)?,
            sha256: row.get(3)?,
            base: row.get(4)?,
            kind: row.get(5)?,
            trigger: row.get(6)?,
            notes: row.get(7)?,
            preview_full: row.get(8)?,
            preview_thumb: row.get(9)?,
            info_json: row.get(10)?,
            meta_json: row.get(11)?,
            header_json: row.get(12)?,
            civitai_id: row.get(13)?,
            file_size: row.get(14)?,
            mtime: row.get(15)?,
            scanned_at: row.get(16)?,
            title: row.get(17)?,
        })
    }

    /// Kind with blank values mapped to [`KIND_UNSORTED`].
    pub fn kind_label(&self) -> &str {
        kind_label(self.kind.as_deref())
    }

    /// Stored size and mtime still match the file.
    pub fn is_fresh(&self, stats: &FileStats) -> bool {
        self.file_size == Some(stats.size) && self.mtime == Some(stats.mtime)
    }
}

/// Values written by a scan for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryUpsert {
    pub name: String,
    pub path: String,
    pub sha256: Option<String>,
    pub base: Option<String>,
    /// Only applied when the stored kind is blank.
    pub kind: Option<String>,
    pub trigger: String,
    pub preview_full: Option<String>,
    pub preview_thumb: Option<String>,
    pub info_json: Option<String>,
    pub meta_json: Option<String>,
    pub header_json: Option<String>,
    pub civitai_id: String,
    pub file_size: i64,
    pub mtime: i64,
    pub scanned_at: i64,
}

/// A tag and its editable display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub title: Option<String>,
}

/// Map blank kinds to [`KIND_UNSORTED`].
pub fn kind_label(kind: Option<&str>) -> &str {
    match kind.map(str::trim) {
        Some(k) if !k.is_empty() => k,
        _ => KIND_UNSORTED,
    }
}

/// Kind taken from the name of the file's immediate parent directory.
pub fn kind_from_parent_dir(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| KIND_UNSORTED.to_string())
}
