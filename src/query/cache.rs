// Memoized query execution keyed on query parameters + directory state

use crate::error::Result;
use crate::query::executor::Query;
use crate::query::result::ResultSet;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// An in-process memo of query results.
///
/// The cache key combines a hash of the query parameters (repository name,
/// predicate, order-by, limit) with a hash of the repository directory's
/// file names and mtimes, so any document write naturally invalidates every
/// cached result for that repository. Entries for stale directory states
/// are never returned; they are only dropped on [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<String, ResultSet>,
}

impl QueryCache {
    pub fn new() -> Self {
        QueryCache::default()
    }

    /// Execute through the cache: return the memoized result when the
    /// query was already run against the current directory state, otherwise
    /// run it and remember the outcome.
    pub fn execute(&mut self, query: &Query<'_>) -> Result<ResultSet> {
        let key = format!(
            "{}|{}",
            parameter_hash(query),
            query.repository().directory_state_hash()?
        );

        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }

        let result = query.execute()?;
        self.entries.insert(key, result.clone());
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn parameter_hash(query: &Query<'_>) -> String {
    let mut hasher = DefaultHasher::new();
    query.repository().name().hash(&mut hasher);
    format!("{:?}", query.predicate()).hash(&mut hasher);
    query.order_specs().hash(&mut hasher);
    query.limit_spec().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
