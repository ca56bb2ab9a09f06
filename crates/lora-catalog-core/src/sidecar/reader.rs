//! Normalizes companion metadata into one record per model file.
//!
//! Sources, in trigger-text priority order:
//! 1. `stem.info` (civitai-style JSON)
//! 2. `stem.metadata.json`
//! 3. metadata embedded in the model file header
//!
//! Missing or malformed companions contribute nothing; reading never fails.

use super::embedded::{default_source, EmbeddedMetadataSource};
use super::thumbnail::ThumbnailStore;
use crate::config::SidecarNames;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Keys merged into the tag list, looked up in the info sidecar first.
const TAG_KEYS: &[&str] = &["tags", "trainedTags", "categories"];

/// Normalized metadata for one model file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarRecord {
    /// Display name: info sidecar `name`, else the file stem.
    pub name: String,
    /// Trigger phrase; list values are joined with ", ".
    pub trigger_text: String,
    /// Deduplicated tag names in first-seen order.
    pub tags: Vec<String>,
    /// External catalog identifier, empty when unknown.
    pub external_id: String,
    /// Base-model family if any source names one.
    pub base_model: Option<String>,
    pub preview_full_path: Option<PathBuf>,
    pub preview_thumb_path: Option<PathBuf>,
    /// Raw `.info` sidecar.
    pub info_json: Option<String>,
    /// Raw `.metadata.json` sidecar.
    pub meta_json: Option<String>,
    /// Raw embedded header metadata.
    pub header_json: Option<String>,
}

/// Reads sidecars and renders thumbnails for model files.
pub struct SidecarReader {
    embedded: Box<dyn EmbeddedMetadataSource>,
    thumbnails: ThumbnailStore,
}

impl SidecarReader {
    /// Reader backed by the embedded source compiled into this build.
    pub fn new(thumbnails: ThumbnailStore) -> Self {
        Self::with_source(default_source(), thumbnails)
    }

    pub fn with_source(
        embedded: Box<dyn EmbeddedMetadataSource>,
        thumbnails: ThumbnailStore,
    ) -> Self {
        debug!("Sidecar reader using embedded source '{}'", embedded.name());
        Self {
            embedded,
            thumbnails,
        }
    }

    pub fn thumbnails(&self) -> &ThumbnailStore {
        &self.thumbnails
    }

    /// Collect everything known about `model_path`.
    ///
    /// The thumbnail is only derived when `content_hash` is known, since it is
    /// addressed by that hash.
    pub fn read(&self, model_path: &Path, content_hash: Option<&str>) -> SidecarRecord {
        let info = read_json_object(&sibling(model_path, SidecarNames::INFO_SUFFIX));
        let meta = read_json_object(&sibling(model_path, SidecarNames::METADATA_SUFFIX));
        let header = self.embedded.read(model_path);

        let empty = Map::new();
        let info_obj = info.as_ref().unwrap_or(&empty);
        let meta_obj = meta.as_ref().unwrap_or(&empty);

        let name = info_obj
            .get("name")
            .filter(|v| is_truthy(v))
            .map(value_to_text)
            .unwrap_or_else(|| file_stem(model_path));

        let trigger_text = first_truthy(&[
            info_obj.get("triggerWords"),
            meta_obj.get("trainedWords"),
            header.get("ss_trigger_words"),
            header.get("trigger_words"),
        ])
        .map(flatten_text)
        .unwrap_or_default();

        let external_id = first_truthy(&[info_obj.get("id"), info_obj.get("modelId")])
            .map(value_to_text)
            .unwrap_or_default();

        let base_model = first_truthy(&[
            info_obj.get("baseModel"),
            header.get("ss_base_model_version"),
        ])
        .map(value_to_text);

        let mut tags = Vec::new();
        for key in TAG_KEYS {
            match first_truthy(&[info_obj.get(*key), meta_obj.get(*key)]) {
                Some(Value::Array(items)) => tags.extend(items.iter().map(value_to_text)),
                Some(Value::String(s)) => tags.extend(s.split(',').map(str::to_string)),
                _ => {}
            }
        }

        let preview_full_path = find_preview(model_path);
        let preview_thumb_path = match (&preview_full_path, content_hash) {
            (Some(preview), Some(hash)) => self.thumbnails.ensure(preview, hash),
            _ => None,
        };

        SidecarRecord {
            name,
            trigger_text,
            tags: normalize_tags(tags),
            external_id,
            base_model,
            preview_full_path,
            preview_thumb_path,
            info_json: to_blob(info.as_ref()),
            meta_json: to_blob(meta.as_ref()),
            header_json: to_blob(Some(&header)),
        }
    }
}

/// Locate the preview image, preferring `stem.preview.png` over `stem.png`.
pub fn find_preview(model_path: &Path) -> Option<PathBuf> {
    SidecarNames::PREVIEW_SUFFIXES
        .iter()
        .map(|suffix| sibling(model_path, suffix))
        .find(|p| p.is_file())
}

/// `dir/stem.ext` -> `dir/stem{suffix}`.
fn sibling(model_path: &Path, suffix: &str) -> PathBuf {
    let stem = model_path.with_extension("");
    let mut name = stem
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    stem.with_file_name(name)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Read a JSON object. Missing files and anything unparsable are `None`.
fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    if !path.is_file() {
        return None;
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read sidecar {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!("Sidecar {} is not a JSON object", path.display());
            None
        }
        Err(e) => {
            warn!("Malformed sidecar {}: {}", path.display(), e);
            None
        }
    }
}

/// Empty strings, empty collections, zero, false and null do not count.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn first_truthy<'a>(candidates: &[Option<&'a Value>]) -> Option<&'a Value> {
    candidates
        .iter()
        .flatten()
        .copied()
        .find(|v| is_truthy(v))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flatten_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => value_to_text(other),
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn to_blob(object: Option<&Map<String, Value>>) -> Option<String> {
    object
        .filter(|o| !o.is_empty())
        .and_then(|o| serde_json::to_string(o).ok())
}
