//! LoRA Catalog - incremental SQLite catalog for model-weight files.
//!
//! This crate walks a directory of model files, reads their sidecar metadata,
//! and keeps a catalog plus a trigram full-text index in one SQLite file.
//! Re-scans only touch files whose size or mtime changed.
//!
//! # Example
//!
//! ```rust,ignore
//! use lora_catalog::{CatalogApi, CatalogConfig, KindFilter};
//!
//! #[tokio::main]
//! async fn main() -> lora_catalog::Result<()> {
//!     let api = CatalogApi::open(CatalogConfig::for_root("/models/lora")).await?;
//!
//!     let summary = api.scan(None::<fn(_)>).await?;
//!     println!("{} updated, {} skipped", summary.updated, summary.skipped);
//!
//!     let ids = api.search("blue hair", KindFilter::Any, 50).await?;
//!     let entries = api.fetch_by_ids(ids, true).await?;
//!     println!("Found {} entries", entries.len());
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod migrate;
pub mod scan;
pub mod sidecar;

mod api;

// Re-export commonly used types
pub use api::CatalogApi;
pub use catalog::{CatalogEntry, CatalogStore, EntryUpsert, Tag, KIND_UNSORTED};
pub use config::CatalogConfig;
pub use error::{CatalogError, Result};
pub use index::{IndexRow, KindFilter, SearchQuery};
pub use migrate::{Migration, MigrationReport, Migrator};
pub use scan::{ScanOptions, ScanProgress, ScanSummary, Scanner};
pub use sidecar::{EmbeddedMetadataSource, SidecarReader, SidecarRecord, ThumbnailStore};
