//! Catalog store: entries, tags and the schema they live in.

mod record;
pub(crate) mod schema;
mod store;

pub use record::{
    kind_from_parent_dir, kind_label, CatalogEntry, EntryUpsert, Tag, KIND_UNSORTED,
};
pub use store::{
    add_tag, delete_entry, delete_tags_for, distinct_kinds, get_entry, get_entry_by_id,
    list_entries, replace_tags, tags_for, upsert_entry, CatalogStore,
};

pub(crate) use store::entry_paths;
