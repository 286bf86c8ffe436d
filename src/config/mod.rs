use crate::format::Format;
use crate::index::IndexKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Settings shared by every repository opened against one storage root:
/// the root directory, the document format, per-field index registration
/// and the nested-id mode.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    format: Format,
    indexes: HashMap<String, IndexKind>,
    nested: bool,
    delete_empty_dirs: bool,
}

impl Config {
    /// Configuration rooted at `path`, JSON format, no indexes.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Config {
            path: path.into(),
            format: Format::default(),
            indexes: HashMap::new(),
            nested: false,
            delete_empty_dirs: false,
        }
    }

    /// Use a different document format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Register an index for a (possibly dotted) field path. The repository
    /// constructs one index instance per registered field when it opens.
    pub fn with_index(mut self, field: &str, kind: IndexKind) -> Self {
        self.indexes.insert(field.to_string(), kind);
        self
    }

    /// Allow `/`-separated document ids that map to subdirectories.
    pub fn with_nested_ids(mut self) -> Self {
        self.nested = true;
        self
    }

    /// In nested mode, remove directories left empty by a delete.
    pub fn with_delete_empty_dirs(mut self) -> Self {
        self.delete_empty_dirs = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn indexes(&self) -> &HashMap<String, IndexKind> {
        &self.indexes
    }

    pub fn nested(&self) -> bool {
        self.nested
    }

    pub fn delete_empty_dirs(&self) -> bool {
        self.delete_empty_dirs
    }
}
