// Result container - ordered, read-only page of matched documents

use crate::document::Document;
use crate::value;
use serde_json::Value;
use std::collections::HashMap;

/// The documents matched by a query, in final order, plus the number of
/// matches before pagination was applied.
///
/// Read-only by construction: there are no `&mut` accessors, so the
/// mutation-rejection rule of the design is enforced by the type system
/// rather than at runtime. Iteration is restartable and indexed access
/// out of range returns `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    documents: Vec<Document>,
    total: usize,
}

impl ResultSet {
    pub(crate) fn new(documents: Vec<Document>, total: usize) -> Self {
        debug_assert!(total >= documents.len());
        ResultSet { documents, total }
    }

    /// Number of documents in this page.
    pub fn count(&self) -> usize {
        self.documents.len()
    }

    /// Number of documents that matched before pagination. Useful for
    /// working out page counts.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The nth document of this page, or `None` out of range.
    pub fn get(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)
    }

    pub fn first(&self) -> Option<&Document> {
        self.documents.first()
    }

    pub fn last(&self) -> Option<&Document> {
        self.documents.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Resolve `field` on the first document, if any.
    pub fn value(&self, field: &str) -> Option<Value> {
        self.first().and_then(|doc| doc.field(field))
    }

    /// One resolved value of `field` per document, in order, skipping
    /// documents where the field is absent (no null padding).
    pub fn pick(&self, field: &str) -> Vec<Value> {
        self.documents
            .iter()
            .filter_map(|doc| doc.field(field))
            .collect()
    }

    /// Map each document's `key_field` value (stringified) to its
    /// `value_field` value. Documents missing the key field are skipped; a
    /// missing value field maps to null. On key collisions later documents
    /// overwrite earlier ones.
    pub fn hash(&self, key_field: &str, value_field: &str) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        for doc in &self.documents {
            if let Some(key) = doc.field(key_field) {
                let val = doc.field(value_field).unwrap_or(Value::Null);
                map.insert(value::key_string(&key), val);
            }
        }
        map
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}
