//! A flat-file document store.
//!
//! Documents are arbitrary JSON-like objects persisted one file per
//! document inside a repository directory, encoded as JSON, YAML or
//! Markdown with YAML front matter. Repositories are queried with a
//! predicate tree of field/operator/value conditions combined with
//! AND/OR, plus ordering and pagination; fields registered in the
//! [`Config`] get a persisted hash index that answers equality
//! predicates without scanning every file.
//!
//! ```no_run
//! use shelfdb::{Config, Document, IndexKind, Repository};
//! use serde_json::json;
//!
//! let config = Config::new("/var/lib/app/data").with_index("status", IndexKind::Hash);
//! let posts = Repository::open("posts", &config)?;
//!
//! let mut doc = Document::from_value(json!({
//!     "title": "First post",
//!     "status": "draft",
//! }))?;
//! let id = posts.store(&mut doc)?;
//!
//! let drafts = posts
//!     .query()
//!     .where_("status", "==", "draft")?
//!     .order_by("title")
//!     .limit(10, 0)
//!     .execute()?;
//! assert_eq!(drafts.first().map(|d| d.id()), Some(id.as_str()));
//! # Ok::<(), shelfdb::ShelfDbError>(())
//! ```
//!
//! # Concurrency
//!
//! A [`Repository`] instance is single-threaded; index state is loaded
//! lazily behind interior mutability and is not `Sync`. Across
//! processes, each file write happens under an exclusive advisory lock,
//! so individual document and index files are never observed half
//! written by cooperating processes. The lock does not span the
//! read-modify-write of an index update: two processes storing into the
//! same indexed repository at once can lose one of the two index
//! updates. The index heals on the next rebuild (delete the file under
//! `.indexes/` to force one). Readers take no locks at all and may see
//! a document before its index entry, or the reverse.

pub mod config;
pub mod document;
pub mod error;
pub mod format;
pub mod index;
pub mod query;
pub mod repository;
mod value;

pub use config::Config;
pub use document::Document;
pub use error::{Result, ShelfDbError};
pub use format::Format;
pub use index::IndexKind;
pub use query::cache::QueryCache;
pub use query::executor::Query;
pub use query::result::ResultSet;
pub use query::{Operator, Predicate};
pub use repository::Repository;
