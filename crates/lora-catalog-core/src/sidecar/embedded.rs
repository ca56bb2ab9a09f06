//! Metadata embedded in the model file itself.
//!
//! The reader only ever talks to [`EmbeddedMetadataSource`]; which concrete
//! source backs it is decided once by [`default_source`].

use crate::error::{CatalogError, Result};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Upper bound on a safetensors JSON header.
const MAX_HEADER_SIZE: u64 = 100_000_000;

/// A source of key/value metadata stored inside a model file.
pub trait EmbeddedMetadataSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Read the embedded metadata. Unreadable or absent metadata is an empty map.
    fn read(&self, path: &Path) -> Map<String, Value>;
}

/// Reads the `__metadata__` block of a `.safetensors` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetensorsHeader;

impl SafetensorsHeader {
    /// Parse the header and return its `__metadata__` object.
    ///
    /// Safetensors layout:
    /// 0-7: header size (u64, little-endian)
    /// 8+: JSON header with tensor descriptors and an optional `__metadata__`
    pub fn read_metadata(path: &Path) -> Result<Map<String, Value>> {
        let mut file = File::open(path).map_err(|e| CatalogError::io_with_path(e, path))?;

        let mut size_buf = [0u8; 8];
        file.read_exact(&mut size_buf)
            .map_err(|e| CatalogError::io_with_path(e, path))?;
        let header_size = u64::from_le_bytes(size_buf);

        if header_size > MAX_HEADER_SIZE {
            return Err(CatalogError::Other(format!(
                "Safetensors header too large in {}",
                path.display()
            )));
        }

        let mut header_buf = vec![0u8; header_size as usize];
        file.read_exact(&mut header_buf)
            .map_err(|e| CatalogError::io_with_path(e, path))?;

        let header: Value = serde_json::from_slice(&header_buf)?;
        match header.get("__metadata__") {
            Some(Value::Object(metadata)) => Ok(metadata.clone()),
            _ => Ok(Map::new()),
        }
    }
}

impl EmbeddedMetadataSource for SafetensorsHeader {
    fn name(&self) -> &'static str {
        "safetensors-header"
    }

    fn read(&self, path: &Path) -> Map<String, Value> {
        let is_safetensors = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"));
        if !is_safetensors {
            return Map::new();
        }

        match Self::read_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("No embedded metadata for {}: {}", path.display(), e);
                Map::new()
            }
        }
    }
}

/// Stand-in used when no header reader is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEmbeddedMetadata;

impl EmbeddedMetadataSource for NoEmbeddedMetadata {
    fn name(&self) -> &'static str {
        "none"
    }

    fn read(&self, _path: &Path) -> Map<String, Value> {
        Map::new()
    }
}

/// The embedded source for this build.
pub fn default_source() -> Box<dyn EmbeddedMetadataSource> {
    #[cfg(feature = "safetensors-header")]
    {
        Box::new(SafetensorsHeader)
    }
    #[cfg(not(feature = "safetensors-header"))]
    {
        Box::new(NoEmbeddedMetadata)
    }
}

#[cfg(test)]
pub(crate) fn write_safetensors(path: &Path, metadata: &Value) {
    let header = serde_json::json!({
        "__metadata__": metadata,
        "lora_unet_down.weight": {"dtype": "F16", "shape": [1], "data_offsets": [0, 2]}
    });
    let json = serde_json::to_vec(&header).unwrap();
    let mut bytes = (json.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(&json);
    bytes.extend_from_slice(&[0u8, 0u8]);
    std::fs::write(path, bytes).unwrap();
}
