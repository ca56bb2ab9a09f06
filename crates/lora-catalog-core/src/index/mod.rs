//! Full-text search index over the catalog.
//!
//! This module provides:
//! - Synchronization of `lora_fts` rows from catalog entries and tags
//! - Query building over the trigram index
//! - A bounded, generation-invalidated result cache

mod cache;
pub mod fts5;
mod query;

pub use cache::SearchCache;
pub use fts5::{derive_row, existing_ids, rebuild, stored_row, sync_entry, FtsStats, IndexRow};
pub use query::{build_match_expression, escape_fts5_term, KindFilter, SearchQuery};

pub(crate) use query::run as run_query;
