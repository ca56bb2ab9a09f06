//! Companion metadata for model files.
//!
//! This module provides:
//! - JSON sidecar and embedded-header reading, normalized into [`SidecarRecord`]
//! - Content-addressed preview thumbnails

mod embedded;
mod reader;
mod thumbnail;

pub use embedded::{default_source, EmbeddedMetadataSource, NoEmbeddedMetadata, SafetensorsHeader};
pub use reader::{find_preview, SidecarReader, SidecarRecord};
pub use thumbnail::ThumbnailStore;

#[cfg(test)]
pub(crate) use embedded::write_safetensors;
#[cfg(test)]
pub(crate) use thumbnail::write_png;
