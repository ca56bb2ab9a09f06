//! Content-addressed preview thumbnails.
//!
//! A thumbnail is named after the content hash of the model it belongs to, so
//! differently-named copies of the same weights share one file. Rendering goes
//! through a temp file and an atomic rename; a crash never leaves a truncated
//! thumbnail under its final name.

use crate::config::SidecarNames;
use crate::error::{CatalogError, Result};
use image::codecs::jpeg::JpegEncoder;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, warn};

/// Thumbnail directory plus the fixed output format.
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    dir: PathBuf,
    size: u32,
    quality: u8,
}

impl ThumbnailStore {
    pub fn new(dir: impl Into<PathBuf>, size: u32, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            size,
            quality,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the thumbnail for a content hash lives.
    ///
    /// Returns `None` for anything that is not a hex digest, so a hash can
    /// never name a path outside the thumbnail directory.
    pub fn path_for(&self, sha256: &str) -> Option<PathBuf> {
        if sha256.is_empty() || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(
            self.dir
                .join(format!("{}.{}", sha256, SidecarNames::THUMB_EXTENSION)),
        )
    }

    /// Return the thumbnail for `sha256`, rendering it from `source` if needed.
    ///
    /// Failures are logged and yield `None`; a missing thumbnail never fails
    /// the file being scanned.
    pub fn ensure(&self, source: &Path, sha256: &str) -> Option<PathBuf> {
        let out = self.path_for(sha256)?;
        if out.exists() {
            return Some(out);
        }

        match self.render(source, &out) {
            Ok(()) => {
                debug!("Rendered thumbnail {}", out.display());
                Some(out)
            }
            Err(e) => {
                warn!("Thumbnail for {} failed: {}", source.display(), e);
                None
            }
        }
    }

    fn render(&self, source: &Path, out: &Path) -> Result<()> {
        let image = image::open(source)?;
        let thumb = image.thumbnail(self.size, self.size).to_rgb8();

        fs::create_dir_all(&self.dir).map_err(|e| CatalogError::io_with_path(e, &self.dir))?;

        let temp_path = out.with_extension(format!(
            "{}.{}.tmp",
            SidecarNames::THUMB_EXTENSION,
            process::id()
        ));

        let written = (|| -> Result<()> {
            let file =
                File::create(&temp_path).map_err(|e| CatalogError::io_with_path(e, &temp_path))?;
            let mut writer = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, self.quality).encode_image(&thumb)?;
            writer
                .flush()
                .map_err(|e| CatalogError::io_with_path(e, &temp_path))?;
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, out).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            CatalogError::io_with_path(e, out)
        })
    }
}

#[cfg(test)]
pub(crate) fn write_png(path: &Path, width: u32, height: u32) {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    img.save(path).unwrap();
}
