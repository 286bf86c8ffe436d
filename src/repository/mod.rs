// Repository - a directory-backed collection of documents

use crate::config::Config;
use crate::document::{self, Document};
use crate::error::{Result, ShelfDbError};
use crate::format::Format;
use crate::index::{FieldIndex, INDEX_DIR};
use crate::query::executor::Query;
use crate::query::Operator;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Analogous to a table in a traditional RDBMS: a directory where documents
/// live, one encoded file per document, with this repository's configured
/// indexes maintained alongside under `.indexes/`.
///
/// All methods take `&self`; lazily-loaded index state lives behind interior
/// mutability. Nothing here is synchronized -- the design is single-threaded
/// per instance, and cross-process safety is limited to advisory locks held
/// for the duration of each file write.
#[derive(Debug)]
pub struct Repository {
    name: String,
    path: PathBuf,
    format: Format,
    nested: bool,
    delete_empty_dirs: bool,
    indexes: HashMap<String, FieldIndex>,
}

impl Repository {
    /// Open (creating if needed) the repository directory `<root>/<name>`
    /// and construct one index instance per field registered in the config.
    pub fn open(name: &str, config: &Config) -> Result<Self> {
        if !valid_name(name) {
            return Err(ShelfDbError::InvalidName {
                name: name.to_string(),
                kind: "repository name",
            });
        }

        let path = config.path().join(name);
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }

        let indexes = config
            .indexes()
            .iter()
            .map(|(field, kind)| (field.clone(), FieldIndex::new(*kind, field, &path)))
            .collect();

        Ok(Repository {
            name: name.to_string(),
            path,
            format: config.format().clone(),
            nested: config.nested(),
            delete_empty_dirs: config.delete_empty_dirs(),
            indexes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start building a query against this repository.
    pub fn query(&self) -> Query<'_> {
        Query::new(self)
    }

    /// All documents, ordered by file path. Files that fail to decode are
    /// skipped with a warning rather than failing the whole scan.
    pub fn find_all(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();

        for file in self.document_files()? {
            let raw = std::fs::read_to_string(&file)?;
            match self.format.decode(&raw) {
                Ok(fields) => {
                    let id = self.id_from_path(&file);
                    documents.push(Document::with_id(&id, fields));
                }
                Err(e) => {
                    log::warn!("skipping undecodable document {}: {e}", file.display());
                }
            }
        }

        Ok(documents)
    }

    /// One document by id, or a `NotFound` error.
    pub fn find_by_id(&self, id: &str) -> Result<Document> {
        let path = self.path_for_document(id)?;
        if !path.exists() {
            return Err(self.not_found(id));
        }

        let raw = std::fs::read_to_string(&path)?;
        let fields = self.format.decode(&raw).map_err(|e| ShelfDbError::Decode {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Document::with_id(id, fields))
    }

    /// All of the requested documents, in the requested order. Any missing
    /// id fails the whole call -- an explicit failure, distinct from an
    /// empty match.
    pub fn find_by_ids(&self, ids: &[&str]) -> Result<Vec<Document>> {
        ids.iter().map(|id| self.find_by_id(id)).collect()
    }

    /// Persist a document under its current id, assigning a random
    /// 9-character alphanumeric id first when it has none. Indexed fields
    /// are diffed against the previously stored version (if any) and every
    /// affected index is updated and flushed before the file is written.
    /// Returns the id the document was stored under.
    pub fn store(&self, doc: &mut Document) -> Result<String> {
        if doc.id().is_empty() {
            let mut id = Document::generate_id();
            while self.path_for_document(&id)?.exists() {
                id = Document::generate_id();
            }
            doc.set_id(&id);
        }

        let path = self.path_for_document(doc.id())?;
        let previous = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            match self.format.decode(&raw) {
                Ok(fields) => Some(Document::with_id(doc.id(), fields)),
                Err(e) => {
                    log::warn!(
                        "previous version of {}/{} is undecodable ({e}); \
                         treating indexed fields as fresh",
                        self.name,
                        doc.id()
                    );
                    None
                }
            }
        } else {
            None
        };

        for (field, index) in &self.indexes {
            let old_value = previous.as_ref().and_then(|prev| prev.field(field));
            let new_value = doc.field(field);
            index.update(doc.id(), new_value.as_ref(), old_value.as_ref(), self)?;
        }

        let contents = self.format.encode(doc.fields())?;
        document::write_locked(&path, &contents)?;

        doc.mark_stored();
        Ok(doc.id().to_string())
    }

    /// Re-save a possibly renamed document. When the id changed since the
    /// last load/store, the file and index entries under the initial id are
    /// removed first, then the document is stored under the new id.
    pub fn update(&self, doc: &mut Document) -> Result<String> {
        if !doc.initial_id().is_empty() && doc.initial_id() != doc.id() {
            match self.delete(doc.initial_id()) {
                Ok(()) => {}
                // Nothing stored under the old id; treat as a plain store.
                Err(ShelfDbError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.store(doc)
    }

    /// Delete a document by id: removes its entries from every index, then
    /// the file itself. In nested mode with `delete_empty_dirs` set,
    /// directories left empty are pruned.
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for_document(id)?;
        if !path.exists() {
            return Err(self.not_found(id));
        }

        let raw = std::fs::read_to_string(&path)?;
        match self.format.decode(&raw) {
            Ok(fields) => {
                let doc = Document::with_id(id, fields);
                for (field, index) in &self.indexes {
                    let old_value = doc.field(field);
                    index.update(id, None, old_value.as_ref(), self)?;
                }
            }
            Err(e) => {
                log::warn!(
                    "deleting undecodable document {}/{id}; index entries \
                     will heal on the next rebuild ({e})",
                    self.name
                );
            }
        }

        std::fs::remove_file(&path)?;

        if self.nested && self.delete_empty_dirs {
            self.prune_empty_dirs(&path);
        }

        Ok(())
    }

    pub(crate) fn index_for(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.get(field)
    }

    /// Resolve ids for one leaf straight from its field's index. Only
    /// called after coverage was established.
    pub(crate) fn index_lookup(
        &self,
        field: &str,
        value: &Value,
        operator: Operator,
    ) -> Result<Vec<String>> {
        let index = self.index_for(field).ok_or_else(|| {
            ShelfDbError::Other(format!("no index registered for field `{field}`"))
        })?;
        index.get(value, operator, self)
    }

    /// Fingerprint of the document files (names + mtimes), used by the
    /// query cache to detect writes.
    pub(crate) fn directory_state_hash(&self) -> Result<String> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for file in self.document_files()? {
            let mtime = std::fs::metadata(&file)?
                .modified()?
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            file.to_string_lossy().hash(&mut hasher);
            mtime.hash(&mut hasher);
        }
        Ok(format!("{:016x}", hasher.finish()))
    }

    /// Enumerate document files, ordered by path. Nested mode scans
    /// subdirectories but never the reserved `.indexes` directory.
    fn document_files(&self) -> Result<Vec<PathBuf>> {
        let ext = self.format.extension();
        let pattern = if self.nested {
            format!("{}/**/*.{}", self.path.display(), ext)
        } else {
            format!("{}/*.{}", self.path.display(), ext)
        };

        let files = glob::glob(&pattern)
            .map_err(|e| ShelfDbError::Other(format!("glob error: {e}")))?
            .filter_map(|r| r.ok())
            .filter(|file| {
                file.strip_prefix(&self.path)
                    .map(|rel| !rel.starts_with(INDEX_DIR))
                    .unwrap_or(true)
            })
            .collect();
        Ok(files)
    }

    fn id_from_path(&self, file: &Path) -> String {
        if self.nested {
            let rel = file.strip_prefix(&self.path).unwrap_or(file);
            let rel = rel.to_string_lossy().replace('\\', "/");
            rel.strip_suffix(&format!(".{}", self.format.extension()))
                .unwrap_or(&rel)
                .to_string()
        } else {
            file.file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default()
        }
    }

    fn path_for_document(&self, id: &str) -> Result<PathBuf> {
        if !self.valid_id(id) {
            return Err(ShelfDbError::InvalidName {
                name: id.to_string(),
                kind: "document id",
            });
        }
        Ok(self
            .path
            .join(format!("{id}.{}", self.format.extension())))
    }

    /// Filename-safe ids only. Nested mode additionally allows interior
    /// `/` separators, but never empty or traversal segments.
    fn valid_id(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let segments: Vec<&str> = id.split('/').collect();
        if !self.nested && segments.len() > 1 {
            return false;
        }
        segments.iter().all(|segment| {
            !segment.is_empty()
                && *segment != "."
                && *segment != ".."
                && !segment
                    .chars()
                    .any(|c| matches!(c, '\\' | '?' | '*' | ':' | ';' | '{' | '}' | '\n'))
        })
    }

    /// Walk up from the deleted file, removing directories as long as they
    /// are empty and inside this repository.
    fn prune_empty_dirs(&self, deleted: &Path) {
        let mut dir = deleted.parent();
        while let Some(current) = dir {
            if current == self.path {
                break;
            }
            let empty = std::fs::read_dir(current)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !empty || std::fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    fn not_found(&self, id: &str) -> ShelfDbError {
        ShelfDbError::NotFound {
            repository: self.name.clone(),
            id: id.to_string(),
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
