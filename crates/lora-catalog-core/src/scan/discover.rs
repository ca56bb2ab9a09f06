//! Model file discovery.

use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Recursively list model files under `root` in file-name order.
///
/// Extensions are compared case-insensitively, with or without a leading
/// dot. Directories in `exclude` are not descended into.
pub fn discover_model_files(root: &Path, extensions: &[String], exclude: &[PathBuf]) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e, exclude))
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable directory entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), extensions))
        .map(DirEntry::into_path)
        .collect()
}

fn is_excluded(entry: &DirEntry, exclude: &[PathBuf]) -> bool {
    entry.file_type().is_dir() && exclude.iter().any(|dir| entry.path() == dir)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let ext = ext.to_string_lossy();
    extensions
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed.trim_start_matches('.')))
}
