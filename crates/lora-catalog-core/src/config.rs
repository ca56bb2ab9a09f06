//! Catalog configuration.
//!
//! Fixed names and tuning constants live in unit structs, the per-catalog
//! settings in [`CatalogConfig`], which can be loaded from a JSON file.

use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default tuning values for scanning and search.
pub struct CatalogDefaults;

impl CatalogDefaults {
    pub const DB_FILENAME: &'static str = "__lora_catalog.sqlite";
    pub const THUMB_DIR_NAME: &'static str = "__thumbs__";
    pub const EXTENSIONS: &'static [&'static str] = &["safetensors"];
    pub const BATCH_SIZE: usize = 100;
    pub const PROGRESS_INTERVAL_MS: u64 = 500;
    pub const THUMB_SIZE: u32 = 320;
    pub const THUMB_QUALITY: u8 = 70;
    pub const DEFAULT_BASE: &'static str = "SDXL";
    pub const SEARCH_CACHE_CAPACITY: u64 = 256;
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Companion file naming around a model file `stem.ext`.
pub struct SidecarNames;

impl SidecarNames {
    pub const PREVIEW_SUFFIXES: &'static [&'static str] = &[".preview.png", ".png"];
    pub const INFO_SUFFIX: &'static str = ".info";
    pub const METADATA_SUFFIX: &'static str = ".metadata.json";
    pub const THUMB_EXTENSION: &'static str = "jpg";
}

/// Settings for one catalog root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogConfig {
    /// Directory tree scanned for model files.
    pub root: PathBuf,
    /// Catalog database. Defaults to `<root>/__lora_catalog.sqlite`.
    pub db_path: Option<PathBuf>,
    /// Thumbnail directory. Defaults to `<root>/__thumbs__`.
    pub thumb_dir: Option<PathBuf>,
    /// Model file extensions, without the dot, matched case-insensitively.
    pub extensions: Vec<String>,
    /// Changed files per committed transaction.
    pub batch_size: usize,
    pub progress_interval_ms: u64,
    pub thumb_size: u32,
    pub thumb_quality: u8,
    /// Base-model family used when no sidecar names one.
    pub default_base: String,
    /// Fill `kind` of new entries from their parent directory.
    pub derive_kind: bool,
    /// Delete entries whose file disappeared from under the root.
    pub prune_missing: bool,
    pub search_cache_capacity: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            db_path: None,
            thumb_dir: None,
            extensions: CatalogDefaults::EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            batch_size: CatalogDefaults::BATCH_SIZE,
            progress_interval_ms: CatalogDefaults::PROGRESS_INTERVAL_MS,
            thumb_size: CatalogDefaults::THUMB_SIZE,
            thumb_quality: CatalogDefaults::THUMB_QUALITY,
            default_base: CatalogDefaults::DEFAULT_BASE.to_string(),
            derive_kind: true,
            prune_missing: false,
            search_cache_capacity: CatalogDefaults::SEARCH_CACHE_CAPACITY,
        }
    }
}

impl CatalogConfig {
    /// Default settings for a root directory.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| CatalogError::io_with_path(e, path))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| CatalogError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a scan meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CatalogError::Config {
                message: "batchSize must be at least 1".to_string(),
            });
        }
        if self.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(CatalogError::Config {
                message: "at least one model file extension is required".to_string(),
            });
        }
        if self.thumb_quality == 0 || self.thumb_quality > 100 {
            return Err(CatalogError::Config {
                message: format!("thumbQuality {} is outside 1..=100", self.thumb_quality),
            });
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.root.join(CatalogDefaults::DB_FILENAME))
    }

    pub fn thumb_dir(&self) -> PathBuf {
        self.thumb_dir
            .clone()
            .unwrap_or_else(|| self.root.join(CatalogDefaults::THUMB_DIR_NAME))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
