//! Async consumer facade over the catalog.

use crate::catalog::{CatalogEntry, CatalogStore};
use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::index::{KindFilter, SearchQuery};
use crate::migrate::{MigrationReport, Migrator};
use crate::scan::{ScanOptions, ScanProgress, ScanSummary, Scanner};
use crate::sidecar::{SidecarReader, ThumbnailStore};
use std::sync::Arc;
use tracing::info;

/// Main entry point for catalog consumers.
///
/// Opening runs pending migrations, so every query method sees the current
/// schema. SQLite and file work runs on the blocking thread pool.
#[derive(Clone)]
pub struct CatalogApi {
    config: Arc<CatalogConfig>,
    store: Arc<CatalogStore>,
    sidecar: Arc<SidecarReader>,
    opened: Arc<MigrationReport>,
}

impl CatalogApi {
    /// Open the catalog for `config.root` and migrate it.
    pub async fn open(config: CatalogConfig) -> Result<Self> {
        let thumbnails =
            ThumbnailStore::new(config.thumb_dir(), config.thumb_size, config.thumb_quality);
        Self::open_with_sidecar(config, SidecarReader::new(thumbnails)).await
    }

    /// Like [`CatalogApi::open`] with a caller-supplied sidecar reader.
    pub async fn open_with_sidecar(config: CatalogConfig, sidecar: SidecarReader) -> Result<Self> {
        config.validate()?;
        if !config.root.is_dir() {
            return Err(CatalogError::NotADirectory(config.root.clone()));
        }

        let db_path = config.db_path();
        let capacity = config.search_cache_capacity;
        let (store, report) = blocking(move || {
            let store = CatalogStore::open_with_cache_capacity(db_path, capacity)?;
            let report = store.migrate(&Migrator::builtin())?;
            if !report.applied.is_empty() {
                info!("Catalog migrated from V{} to V{}", report.from, report.to);
            }
            Ok((store, report))
        })
        .await?;

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            sidecar: Arc::new(sidecar),
            opened: Arc::new(report),
        })
    }

    /// Migrations applied while this handle was opened.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.opened
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    /// Apply pending migrations. A no-op once the catalog is current.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let store = Arc::clone(&self.store);
        blocking(move || store.migrate(&Migrator::builtin())).await
    }

    /// Scan the root with the configured options.
    pub async fn scan<F>(&self, progress: Option<F>) -> Result<ScanSummary>
    where
        F: FnMut(ScanProgress) + Send + 'static,
    {
        self.scan_with(ScanOptions::from_config(&self.config), progress)
            .await
    }

    pub async fn scan_with<F>(&self, options: ScanOptions, progress: Option<F>) -> Result<ScanSummary>
    where
        F: FnMut(ScanProgress) + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let sidecar = Arc::clone(&self.sidecar);
        blocking(move || Scanner::new(&store, &sidecar, options).run(progress)).await
    }

    /// Ids matching whitespace-separated `query`, at most `max_hits`.
    pub async fn search(&self, query: &str, kinds: KindFilter, max_hits: usize) -> Result<Vec<i64>> {
        let query = SearchQuery::parse(query, kinds, max_hits);
        let store = Arc::clone(&self.store);
        let ids = blocking(move || store.search(&query)).await?;
        Ok(ids.as_ref().clone())
    }

    pub async fn distinct_kinds(&self) -> Result<Vec<String>> {
        let store = Arc::clone(&self.store);
        blocking(move || store.distinct_kinds()).await
    }

    /// Entries for `ids`. Unknown ids are omitted.
    pub async fn fetch_by_ids(&self, ids: Vec<i64>, preserve_order: bool) -> Result<Vec<CatalogEntry>> {
        let store = Arc::clone(&self.store);
        blocking(move || store.list_entries(&ids, preserve_order)).await
    }

    pub async fn get_entry(&self, id: i64) -> Result<Option<CatalogEntry>> {
        let store = Arc::clone(&self.store);
        blocking(move || store.get_entry_by_id(id)).await
    }

    pub async fn set_title(&self, id: i64, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        let store = Arc::clone(&self.store);
        blocking(move || store.set_title(id, &title)).await
    }

    /// Repopulate the search index from the catalog.
    pub async fn rebuild_search_index(&self) -> Result<usize> {
        let store = Arc::clone(&self.store);
        blocking(move || store.rebuild_search_index()).await
    }

    pub async fn entry_count(&self) -> Result<usize> {
        let store = Arc::clone(&self.store);
        blocking(move || store.count()).await
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let store = Arc::clone(&self.store);
        blocking(move || store.schema_version()).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CatalogError::Other(format!("Catalog task failed: {}", e)))?
}
