//! Incremental catalog scan.
//!
//! A file whose stored size and mtime still match, that has an index row and
//! whose thumbnail is in place, is skipped without being opened. Everything
//! else is re-read; the content hash is only recomputed when size or mtime
//! changed.
//!
//! Work is committed every `batch_size` changed files, and each file is
//! applied inside its own savepoint, so a killed scan loses at most the
//! current batch and never leaves a half-written entry behind.

mod discover;

pub use discover::discover_model_files;

use crate::catalog::{self, CatalogEntry, CatalogStore, EntryUpsert};
use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::fingerprint::{compute_sha256, file_stats};
use crate::index;
use crate::sidecar::{find_preview, SidecarReader};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Settings for one scan run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    pub extensions: Vec<String>,
    /// Directories never descended into.
    pub exclude: Vec<PathBuf>,
    pub batch_size: usize,
    pub progress_interval: Duration,
    pub default_base: String,
    pub derive_kind: bool,
    pub prune_missing: bool,
}

impl ScanOptions {
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            root: config.root.clone(),
            extensions: config.extensions.clone(),
            exclude: vec![config.thumb_dir()],
            batch_size: config.batch_size.max(1),
            progress_interval: config.progress_interval(),
            default_base: config.default_base.clone(),
            derive_kind: config.derive_kind,
            prune_missing: config.prune_missing,
        }
    }
}

/// Rate-limited progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub done: usize,
    pub total: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Terminal counts of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Files discovered.
    pub total: usize,
    /// Files re-read and written.
    pub updated: usize,
    /// Files left untouched.
    pub skipped: usize,
    /// Files that failed and were left as they were.
    pub failed: usize,
    /// Content hashes computed.
    pub hashed: usize,
    /// Entries pruned because their file is gone.
    pub removed: usize,
    pub elapsed_ms: u64,
}

enum FileOutcome {
    Skipped,
    Updated { hashed: bool },
}

struct ProgressReporter<F> {
    callback: Option<F>,
    interval: Duration,
    last: Option<Instant>,
}

impl<F: FnMut(ScanProgress)> ProgressReporter<F> {
    fn new(callback: Option<F>, interval: Duration) -> Self {
        Self {
            callback,
            interval,
            last: None,
        }
    }

    /// Emit if the interval elapsed; the final item is always emitted.
    fn report(&mut self, progress: ScanProgress) {
        let Some(callback) = self.callback.as_mut() else {
            return;
        };

        let now = Instant::now();
        let due = progress.done == progress.total
            || self
                .last
                .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            callback(progress);
            self.last = Some(now);
        }
    }
}

/// Drives one scan of a model root into a [`CatalogStore`].
pub struct Scanner<'a> {
    store: &'a CatalogStore,
    sidecar: &'a SidecarReader,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a CatalogStore, sidecar: &'a SidecarReader, options: ScanOptions) -> Self {
        Self {
            store,
            sidecar,
            options,
        }
    }

    /// Scan the root and return the summary.
    ///
    /// Per-file failures are counted and logged. A database or schema error
    /// stops the scan; batches committed before it are kept. The writer is
    /// only held for one batch at a time, so other writes interleave between
    /// batches.
    pub fn run<F>(&self, progress: Option<F>) -> Result<ScanSummary>
    where
        F: FnMut(ScanProgress),
    {
        let started = Instant::now();
        let root = self
            .options
            .root
            .canonicalize()
            .map_err(|e| CatalogError::io_with_path(e, &self.options.root))?;
        if !root.is_dir() {
            return Err(CatalogError::NotADirectory(root));
        }

        let exclude: Vec<PathBuf> = self
            .options
            .exclude
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.sidecar.thumbnails().dir()))
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()))
            .collect();
        let files = discover_model_files(&root, &self.options.extensions, &exclude);
        let total = files.len();
        info!("Scanning {} model files under {}", total, root.display());

        let mut summary = ScanSummary {
            total,
            ..Default::default()
        };
        let mut reporter = ProgressReporter::new(progress, self.options.progress_interval);
        let snapshot = |summary: &ScanSummary, done: usize| ScanProgress {
            done,
            total,
            skipped: summary.skipped,
            failed: summary.failed,
        };

        let indexed = {
            let conn = self.store.writer()?;
            index::existing_ids(&conn)?
        };

        let mut next = 0usize;
        while next < total {
            let mut conn = self.store.writer()?;
            let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut pending = 0usize;

            loop {
                let path = &files[next];
                next += 1;

                let outcome = {
                    let sp = tx.savepoint()?;
                    let outcome = self.process_file(&sp, &root, path, &indexed);
                    if outcome.is_ok() {
                        sp.commit()?;
                    }
                    outcome
                };

                match outcome {
                    Ok(FileOutcome::Skipped) => {
                        debug!("Unchanged: {}", path.display());
                        summary.skipped += 1;
                    }
                    Ok(FileOutcome::Updated { hashed }) => {
                        debug!("Indexed: {} (hashed={})", path.display(), hashed);
                        summary.updated += 1;
                        if hashed {
                            summary.hashed += 1;
                        }
                        pending += 1;
                    }
                    Err(e) if e.is_fatal() => {
                        error!("Scan aborted at {}: {}", path.display(), e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("Failed to index {}: {}", path.display(), e);
                        summary.failed += 1;
                    }
                }

                if pending >= self.options.batch_size || next == total {
                    break;
                }
                reporter.report(snapshot(&summary, next));
            }

            tx.commit()?;
            drop(conn);
            self.store.cache().invalidate();
            if pending > 0 {
                debug!("Committed batch of {} entries", pending);
            }
            // The file that closed the batch is reported once it is visible
            reporter.report(snapshot(&summary, next));
        }

        if self.options.prune_missing {
            summary.removed = self.store.write_tx(|conn| prune_missing(conn, &root))?;
        }

        if total == 0 {
            reporter.report(snapshot(&summary, 0));
        }

        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Scan finished: {} files, {} updated, {} skipped, {} failed, {} hashed, {} removed in {}ms",
            summary.total,
            summary.updated,
            summary.skipped,
            summary.failed,
            summary.hashed,
            summary.removed,
            summary.elapsed_ms
        );
        Ok(summary)
    }

    fn process_file(
        &self,
        conn: &Connection,
        root: &Path,
        path: &Path,
        indexed: &HashSet<i64>,
    ) -> Result<FileOutcome> {
        let path_str = path
            .to_str()
            .ok_or_else(|| {
                CatalogError::Other(format!("Path is not valid UTF-8: {}", path.display()))
            })?
            .to_string();
        let stats = file_stats(path)?;
        let existing = catalog::get_entry(conn, &path_str)?;

        let fresh = existing.as_ref().is_some_and(|e| e.is_fresh(&stats));
        let in_index = existing.as_ref().is_some_and(|e| indexed.contains(&e.id));
        if let Some(entry) = existing.as_ref() {
            if fresh && in_index && thumbnail_current(entry, path) {
                return Ok(FileOutcome::Skipped);
            }
        }

        let reusable = existing
            .as_ref()
            .filter(|_| fresh)
            .and_then(|e| e.sha256.clone())
            .filter(|sha| !sha.is_empty());
        let (sha256, hashed) = match reusable {
            Some(sha) => (sha, false),
            None => (compute_sha256(path)?, true),
        };

        let record = self.sidecar.read(path, Some(&sha256));

        let kind = if existing.is_none() && self.options.derive_kind {
            derive_kind(root, path)
        } else {
            None
        };
        let base = record.base_model.clone().or_else(|| {
            Some(self.options.default_base.clone()).filter(|b| !b.trim().is_empty())
        });

        let upsert = EntryUpsert {
            name: record.name,
            path: path_str,
            sha256: Some(sha256),
            base,
            kind,
            trigger: record.trigger_text,
            preview_full: record.preview_full_path.map(display_path),
            preview_thumb: record.preview_thumb_path.map(display_path),
            info_json: record.info_json,
            meta_json: record.meta_json,
            header_json: record.header_json,
            civitai_id: record.external_id,
            file_size: stats.size,
            mtime: stats.mtime,
            scanned_at: Utc::now().timestamp(),
        };

        let id = catalog::upsert_entry(conn, &upsert)?;
        catalog::replace_tags(conn, id, &record.tags)?;
        index::sync_entry(conn, id)?;

        Ok(FileOutcome::Updated { hashed })
    }
}

/// A stored thumbnail must still exist; with none stored, there must be no
/// preview to make one from.
fn thumbnail_current(entry: &CatalogEntry, model_path: &Path) -> bool {
    match entry.preview_thumb.as_deref().filter(|t| !t.is_empty()) {
        Some(thumb) => Path::new(thumb).exists(),
        None => find_preview(model_path).is_none(),
    }
}

/// Parent directory name, or `None` for files directly under the root.
fn derive_kind(root: &Path, path: &Path) -> Option<String> {
    let parent = path.parent()?;
    if parent == root {
        return None;
    }
    Some(catalog::kind_from_parent_dir(path))
}

fn display_path(path: PathBuf) -> String {
    path.to_string_lossy().to_string()
}

/// Delete entries under `root` whose file no longer exists.
fn prune_missing(conn: &Connection, root: &Path) -> Result<usize> {
    let mut removed = 0;
    for (id, path) in catalog::entry_paths(conn)? {
        let path = Path::new(&path);
        if path.starts_with(root) && !path.exists() {
            catalog::delete_entry(conn, id)?;
            debug!("Pruned missing file: {}", path.display());
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Pruned {} missing entries", removed);
    }
    Ok(removed)
}
