//! Error types for the LoRA catalog.
//!
//! Per-file problems (unreadable weights, malformed sidecars, broken previews)
//! are recovered inside the scanner. Everything that reaches a caller through
//! [`CatalogError`] has already escaped that local recovery.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the catalog library.
#[derive(Debug, Error)]
pub enum CatalogError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Image error: {message}")]
    Image {
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },

    // Schema migration errors
    #[error("Migration to V{version} ({name}) failed: {message}")]
    Migration {
        version: u32,
        name: &'static str,
        message: String,
    },

    #[error("Migration list is not strictly ascending at V{version}")]
    MigrationOrder { version: u32 },

    #[error("Catalog schema V{found} is newer than the supported V{supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    // Catalog errors
    #[error("Catalog entry not found: {id}")]
    EntryNotFound { id: i64 },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<image::ImageError> for CatalogError {
    fn from(err: image::ImageError) -> Self {
        CatalogError::Image {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CatalogError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CatalogError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Error for a poisoned connection mutex.
    pub(crate) fn lock_poisoned() -> Self {
        CatalogError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        }
    }

    /// Whether the process must stop rather than continue with the next item.
    ///
    /// IO, JSON and image errors are confined to the file that produced them.
    /// Database and schema errors mean the catalog itself is in trouble.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CatalogError::Database { .. }
                | CatalogError::Migration { .. }
                | CatalogError::MigrationOrder { .. }
                | CatalogError::SchemaTooNew { .. }
                | CatalogError::Config { .. }
        )
    }
}
