//! Streaming content fingerprints for model files.
//!
//! Provides:
//! - SHA256 over the full file content, read in fixed-size chunks
//! - Size and modification time, the catalog's change-detection key
//!
//! Nothing here caches; deciding when a hash can be reused is the scanner's job.

use crate::error::{CatalogError, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Chunk size for reading files (8MB, optimal for SSDs).
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Size and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    /// File size in bytes
    pub size: i64,
    /// Modification time in whole seconds since the Unix epoch
    pub mtime: i64,
}

/// Content hash plus the stats it was computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// SHA256 as lowercase hex string
    pub sha256: String,
    pub stats: FileStats,
}

/// Read size and modification time without touching the content.
pub fn file_stats(path: impl AsRef<Path>) -> Result<FileStats> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|e| CatalogError::io_with_path(e, path))?;
    let modified = metadata
        .modified()
        .map_err(|e| CatalogError::io_with_path(e, path))?;

    Ok(FileStats {
        size: metadata.len() as i64,
        mtime: DateTime::<Utc>::from(modified).timestamp(),
    })
}

/// Compute the SHA256 of a file's full content.
///
/// Memory use is bounded by [`CHUNK_SIZE`] regardless of file size.
pub fn compute_sha256(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| CatalogError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| CatalogError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file and capture its stats.
///
/// Stats are read before hashing, so a file rewritten mid-hash shows up as
/// changed on the next scan instead of being recorded as fresh.
pub fn fingerprint(path: impl AsRef<Path>) -> Result<Fingerprint> {
    let path = path.as_ref();
    let stats = file_stats(path)?;
    let sha256 = compute_sha256(path)?;
    Ok(Fingerprint { sha256, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let hash = compute_sha256(file.path()).unwrap();

        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_known_content() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        assert_eq!(
            compute_sha256(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_stats() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; 4096]).unwrap();
        file.flush().unwrap();

        let fp = fingerprint(file.path()).unwrap();
        assert_eq!(fp.stats.size, 4096);
        assert!(fp.stats.mtime > 0);
        assert_eq!(fp.sha256.len(), 64);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = compute_sha256("/nonexistent/lora.safetensors").unwrap_err();
        assert!(matches!(err, CatalogError::Io { path: Some(_), .. }));
        assert!(!err.is_fatal());
    }
}
