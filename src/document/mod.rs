// Document model + dotted-path field resolution

use crate::error::{Result, ShelfDbError};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;

const ID_LENGTH: usize = 9;
const ID_ALPHABET: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
    'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
    'V', 'W', 'X', 'Y', 'Z',
];

/// A single record in a repository: a string id plus an open-ended mapping of
/// field name to JSON-like value.
///
/// The id is mutable (a document can be renamed before re-saving), so the
/// document also remembers the id it was last loaded or stored under. The
/// repository uses that initial id to locate and remove the old file when an
/// update follows a rename.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    initial_id: String,
    fields: Map<String, Value>,
}

impl Document {
    /// Create an unsaved document with no id. Storing it assigns a random
    /// 9-character alphanumeric id.
    pub fn new(fields: Map<String, Value>) -> Self {
        Document {
            id: String::new(),
            initial_id: String::new(),
            fields,
        }
    }

    /// Create a document with a caller-chosen id.
    pub fn with_id(id: &str, fields: Map<String, Value>) -> Self {
        Document {
            id: id.to_string(),
            initial_id: id.to_string(),
            fields,
        }
    }

    /// Build a document from a JSON object value. Anything other than an
    /// object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Document::new(fields)),
            other => Err(ShelfDbError::InvalidArgument(format!(
                "document data must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The id this document was last loaded or stored under. Differs from
    /// `id()` only between a rename and the next save.
    pub fn initial_id(&self) -> &str {
        &self.initial_id
    }

    /// Change the id. The initial id is left untouched until the repository
    /// persists the rename.
    pub fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    /// Sync the initial id after a successful store.
    pub(crate) fn mark_stored(&mut self) {
        self.initial_id = self.id.clone();
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Set a top-level field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Remove a top-level field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Resolve a (possibly dotted) field path against this document.
    ///
    /// `"__id"` resolves to the current id and is always found. A path
    /// containing `.` is walked part by part: a part that parses as a
    /// non-negative integer indexes into an array, any other part keys into
    /// an object. Resolution degrades to `None` the moment any intermediate
    /// part is missing; it never errors.
    pub fn field(&self, path: &str) -> Option<Value> {
        if path == "__id" {
            return Some(Value::String(self.id.clone()));
        }

        if !path.contains('.') {
            return self.fields.get(path).cloned();
        }

        let mut current: Option<&Value> = None;
        for part in path.split('.') {
            let next = match current {
                None => self.fields.get(part),
                Some(value) => lookup_part(value, part),
            };
            match next {
                Some(v) => current = Some(v),
                None => return None,
            }
        }
        current.cloned()
    }

    /// Generate a random 9-character alphanumeric (base62) document id.
    pub(crate) fn generate_id() -> String {
        nanoid::nanoid!(ID_LENGTH, &ID_ALPHABET)
    }
}

fn lookup_part<'a>(value: &'a Value, part: &str) -> Option<&'a Value> {
    // An integer literal addresses an array element, anything else an
    // object key. "0" as an object key therefore shadows nothing: arrays
    // and objects are disjoint.
    if let Ok(index) = part.parse::<usize>() {
        if let Value::Array(items) = value {
            return items.get(index);
        }
    }
    value.as_object().and_then(|map| map.get(part))
}

/// Write a file under an exclusive advisory lock, released before close.
///
/// The lock covers the write only, not any read-modify step that preceded
/// it; two processes racing a read-modify-write can still lose an update,
/// and readers that do not lock can observe a torn file. Callers accept
/// that trade-off (see the concurrency notes in the crate docs).
pub(crate) fn write_locked(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.lock_exclusive()?;
    let written = (&file).write_all(contents.as_bytes());
    FileExt::unlock(&file)?;
    written?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_generate_id_is_alphanumeric() {
        let id = Document::generate_id();
        assert_eq!(id.len(), 9);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        assert!(Document::from_value(json!("nope")).is_err());
    }

    #[test]
    fn test_initial_id_tracks_rename() {
        let mut d = Document::with_id("old-id", Map::new());
        assert_eq!(d.initial_id(), "old-id");

        d.set_id("new-id");
        assert_eq!(d.id(), "new-id");
        assert_eq!(d.initial_id(), "old-id");

        d.mark_stored();
        assert_eq!(d.initial_id(), "new-id");
    }

    #[test]
    fn test_field_direct_lookup() {
        let d = doc(json!({"name": "Alice", "age": 30}));
        assert_eq!(d.field("name"), Some(json!("Alice")));
        assert_eq!(d.field("missing"), None);
    }

    #[test]
    fn test_field_id_pseudo_field() {
        let d = Document::with_id("abc123", Map::new());
        assert_eq!(d.field("__id"), Some(json!("abc123")));
    }

    #[test]
    fn test_field_dotted_path() {
        let d = doc(json!({"a": {"b": [10, 20]}}));
        assert_eq!(d.field("a.b.0"), Some(json!(10)));
        assert_eq!(d.field("a.b.1"), Some(json!(20)));
        assert_eq!(d.field("a.c.0"), None);
        assert_eq!(d.field("a.b.7"), None);
    }

    #[test]
    fn test_field_numeric_object_key() {
        // An integer part falls back to an object-key lookup when the
        // containing value is not an array.
        let d = doc(json!({"tags": {"0": "first"}}));
        assert_eq!(d.field("tags.0"), Some(json!("first")));
    }

    #[test]
    fn test_write_locked_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("sub").join("file.json");
        write_locked(&path, "{\"ok\":true}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"ok\":true}");
    }
}
