//! Bounded in-memory cache of search results.

use super::query::SearchQuery;
use mini_moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Search results keyed by `(generation, query)`.
///
/// Every catalog write bumps the generation before clearing the map, so a
/// result computed against an older snapshot can never be stored under the
/// current generation.
pub struct SearchCache {
    entries: Cache<(u64, SearchQuery), Arc<Vec<i64>>>,
    generation: AtomicU64,
}

impl SearchCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            generation: AtomicU64::new(0),
        }
    }

    /// Current generation and the cached ids for `query`, if any.
    pub fn lookup(&self, query: &SearchQuery) -> (u64, Option<Arc<Vec<i64>>>) {
        let generation = self.generation.load(Ordering::Acquire);
        let hit = self.entries.get(&(generation, query.clone()));
        (generation, hit)
    }

    /// Store ids computed while `generation` was current.
    pub fn insert(&self, generation: u64, query: SearchQuery, ids: Arc<Vec<i64>>) {
        if generation == self.generation.load(Ordering::Acquire) {
            self.entries.insert((generation, query), ids);
        }
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.invalidate_all();
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::KindFilter;

    #[test]
    fn test_insert_and_invalidate() {
        let cache = SearchCache::new(16);
        let query = SearchQuery::parse("blue", KindFilter::Any, 10);

        let (generation, hit) = cache.lookup(&query);
        assert!(hit.is_none());
        cache.insert(generation, query.clone(), Arc::new(vec![1, 2]));
        assert_eq!(cache.lookup(&query).1.as_deref(), Some(&vec![1, 2]));

        cache.invalidate();
        assert!(cache.lookup(&query).1.is_none());
    }

    #[test]
    fn test_stale_generation_not_stored() {
        let cache = SearchCache::new(16);
        let query = SearchQuery::parse("hair", KindFilter::Any, 5);

        let (generation, _) = cache.lookup(&query);
        cache.invalidate();
        cache.insert(generation, query.clone(), Arc::new(vec![3]));

        assert!(cache.lookup(&query).1.is_none());
        assert_eq!(cache.generation(), generation + 1);
    }
}
