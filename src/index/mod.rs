// Persisted field-level indexes that shortcut full scans

use crate::document::{self, Document};
use crate::error::Result;
use crate::query::Operator;
use crate::repository::Repository;
use crate::value;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Directory inside a repository reserved for index files.
pub(crate) const INDEX_DIR: &str = ".indexes";

/// The kinds of index a field can be registered with. A closed set: the
/// repository constructs instances from this, nothing is resolved by name
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Value-to-id-set map serving equality and inequality operators.
    Hash,
}

/// A constructed index instance for one field of one repository.
#[derive(Debug)]
pub(crate) enum FieldIndex {
    Hash(HashIndex),
}

impl FieldIndex {
    pub(crate) fn new(kind: IndexKind, field: &str, repo_path: &Path) -> Self {
        match kind {
            IndexKind::Hash => FieldIndex::Hash(HashIndex::new(field, repo_path)),
        }
    }

    /// Whether this index can answer the operator without a full scan.
    pub(crate) fn operator_compatible(&self, operator: Operator) -> bool {
        match self {
            FieldIndex::Hash(index) => index.operator_compatible(operator),
        }
    }

    pub(crate) fn get(
        &self,
        value: &Value,
        operator: Operator,
        repo: &Repository,
    ) -> Result<Vec<String>> {
        match self {
            FieldIndex::Hash(index) => index.get(value, operator, repo),
        }
    }

    pub(crate) fn update(
        &self,
        id: &str,
        new: Option<&Value>,
        old: Option<&Value>,
        repo: &Repository,
    ) -> Result<()> {
        match self {
            FieldIndex::Hash(index) => index.update(id, new, old, repo),
        }
    }
}

/// Stringified field value -> set of document ids holding that value.
/// The store/update/delete paths keep each id under at most one value.
type Buckets = BTreeMap<String, BTreeSet<String>>;

/// In-memory lifecycle of the persisted data. `Unloaded` until first use;
/// loading either decodes the on-disk file or rebuilds from a full scan.
#[derive(Debug)]
enum IndexState {
    Unloaded,
    Loaded(Buckets),
}

/// A lazily-loaded, self-healing hash index over one field.
///
/// Persisted as `.indexes/<field>.json` inside the repository directory and
/// fully rewritten (never appended) after each mutation. When the file is
/// absent or unreadable the index rebuilds itself from a full document scan,
/// recording only documents where the field resolves; queries through the
/// index are therefore always consistent with a fresh rebuild.
///
/// State is owned by the instance; each repository holds its own indexes,
/// there is no process-wide cache. Interior mutability keeps lazy loading
/// behind `&self`, matching the crate's single-threaded design.
#[derive(Debug)]
pub(crate) struct HashIndex {
    field: String,
    path: PathBuf,
    state: RefCell<IndexState>,
}

impl HashIndex {
    fn new(field: &str, repo_path: &Path) -> Self {
        HashIndex {
            field: field.to_string(),
            path: repo_path.join(INDEX_DIR).join(format!("{field}.json")),
            state: RefCell::new(IndexState::Unloaded),
        }
    }

    fn operator_compatible(&self, operator: Operator) -> bool {
        matches!(
            operator,
            Operator::Eq | Operator::StrictEq | Operator::Ne | Operator::StrictNe
        )
    }

    /// Ids matching `value` under `operator`. Equality returns the ids
    /// recorded under that exact (stringified) value; inequality returns the
    /// union of ids under every other value. Documents where the field never
    /// resolved are in neither answer, by construction.
    fn get(&self, value: &Value, operator: Operator, repo: &Repository) -> Result<Vec<String>> {
        self.ensure_loaded(repo)?;

        let state = self.state.borrow();
        let IndexState::Loaded(buckets) = &*state else {
            return Ok(Vec::new());
        };

        let key = value::key_string(value);
        let ids = match operator {
            Operator::Eq | Operator::StrictEq => buckets
                .get(&key)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
            Operator::Ne | Operator::StrictNe => buckets
                .iter()
                .filter(|(bucket_key, _)| **bucket_key != key)
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect(),
            // Coverage is checked before the index path is taken.
            other => {
                unreachable!("hash index asked to serve incompatible operator {other}")
            }
        };
        Ok(ids)
    }

    /// Move `id` from the `old` value's bucket to the `new` value's bucket
    /// and flush. A pure add (old absent) or pure remove (new absent) skips
    /// the other half. Equal old/new values are a no-op, checked before any
    /// loading happens.
    fn update(
        &self,
        id: &str,
        new: Option<&Value>,
        old: Option<&Value>,
        repo: &Repository,
    ) -> Result<()> {
        if new == old {
            return Ok(());
        }
        self.ensure_loaded(repo)?;

        {
            let mut state = self.state.borrow_mut();
            let IndexState::Loaded(buckets) = &mut *state else {
                return Ok(());
            };

            if let Some(old) = old {
                let key = value::key_string(old);
                if let Some(ids) = buckets.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        buckets.remove(&key);
                    }
                }
            }
            if let Some(new) = new {
                buckets
                    .entry(value::key_string(new))
                    .or_default()
                    .insert(id.to_string());
            }
        }

        self.flush()
    }

    /// Lazy-load path: `Unloaded -> Loaded`, either by decoding the
    /// persisted file or by rebuilding from a full scan (which also
    /// persists the fresh copy).
    fn ensure_loaded(&self, repo: &Repository) -> Result<()> {
        if matches!(&*self.state.borrow(), IndexState::Loaded(_)) {
            return Ok(());
        }

        let buckets = match self.load_from_disk() {
            Some(buckets) => buckets,
            None => {
                log::debug!(
                    "rebuilding index for field `{}` in {}",
                    self.field,
                    repo.name()
                );
                let buckets = rebuild(&repo.find_all()?, &self.field);
                *self.state.borrow_mut() = IndexState::Loaded(buckets);
                self.flush()?;
                return Ok(());
            }
        };

        *self.state.borrow_mut() = IndexState::Loaded(buckets);
        Ok(())
    }

    /// Decode the persisted file; `None` when absent or unreadable (both
    /// trigger a rebuild rather than an error).
    fn load_from_disk(&self) -> Option<Buckets> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(buckets) => Some(buckets),
            Err(e) => {
                log::warn!(
                    "index file {} is unreadable ({e}), rebuilding",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Rewrite the index file. Acquires an exclusive advisory lock for the
    /// write itself only; see the concurrency notes on `write_locked`.
    fn flush(&self) -> Result<()> {
        let state = self.state.borrow();
        let IndexState::Loaded(buckets) = &*state else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(buckets)?;
        document::write_locked(&self.path, &contents)
    }
}

/// Rebuild index contents from a full document scan: resolve the indexed
/// field on every document and record the ids where it was found. The one
/// and only rebuild path.
fn rebuild(documents: &[Document], field: &str) -> Buckets {
    let mut buckets = Buckets::new();
    for doc in documents {
        if let Some(val) = doc.field(field) {
            buckets
                .entry(value::key_string(&val))
                .or_default()
                .insert(doc.id().to_string());
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: serde_json::Value) -> Document {
        let mut d = Document::from_value(value).unwrap();
        d.set_id(id);
        d
    }

    #[test]
    fn test_rebuild_records_found_fields_only() {
        let docs = vec![
            doc("a", json!({"col": "x"})),
            doc("b", json!({"col": "y"})),
            doc("c", json!({"other": 1})),
            doc("d", json!({"col": "x"})),
        ];
        let buckets = rebuild(&docs, "col");

        assert_eq!(buckets.len(), 2);
        assert!(buckets["x"].contains("a"));
        assert!(buckets["x"].contains("d"));
        assert!(buckets["y"].contains("b"));
        assert!(!buckets.values().any(|ids| ids.contains("c")));
    }

    #[test]
    fn test_rebuild_resolves_dotted_fields() {
        let docs = vec![doc("a", json!({"tags": ["first", "second"]}))];
        let buckets = rebuild(&docs, "tags.0");
        assert!(buckets["first"].contains("a"));
    }

    #[test]
    fn test_rebuild_shares_bucket_for_loosely_equal_values() {
        let docs = vec![
            doc("a", json!({"n": 1})),
            doc("b", json!({"n": 1.0})),
            doc("c", json!({"n": "1"})),
        ];
        let buckets = rebuild(&docs, "n");
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets["1"].len(), 3);
    }
}
