//! Storage abstraction for the hybrid index.
//!
//! The [`VectorStore`] trait defines the collection lifecycle and the two
//! subqueries (dense, sparse) that the hybrid query planner fuses. Backends:
//!
//! - [`sqlite::SqliteStore`] — SQLite with an FTS5 keyword table per
//!   collection and embedding BLOBs scored by in-process cosine.
//! - [`memory::MemoryStore`] — in-memory double for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkMetadata, HybridDocument, ScoredDocument};

/// Maximum number of collections a single store instance will hold.
pub const COLLECTION_LIMIT: usize = 100;

/// Equality predicate over document metadata, used both by search
/// filtering and incremental deletes.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Match documents from exactly this relative path.
    pub relative_path: Option<String>,
    /// Match documents whose extension is in this set (entries include the
    /// leading dot, e.g. `".ts"`).
    pub extensions: Option<Vec<String>>,
}

impl DocumentFilter {
    pub fn by_path(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: Some(relative_path.into()),
            extensions: None,
        }
    }

    pub fn by_extensions(extensions: Vec<String>) -> Self {
        Self {
            relative_path: None,
            extensions: Some(extensions),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relative_path.is_none() && self.extensions.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(path) = &self.relative_path {
            if &metadata.relative_path != path {
                return false;
            }
        }
        if let Some(extensions) = &self.extensions {
            if !extensions.iter().any(|e| e == &metadata.file_extension) {
                return false;
            }
        }
        true
    }
}

/// Abstract hybrid-document store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | Idempotent create with pinned dimension |
/// | [`has_collection`](VectorStore::has_collection) | Existence check |
/// | [`drop_collection`](VectorStore::drop_collection) | Remove a collection and its documents |
/// | [`upsert`](VectorStore::upsert) | Transactional batch write; duplicate ids overwrite |
/// | [`delete_by_predicate`](VectorStore::delete_by_predicate) | Delete by metadata equality |
/// | [`dense_search`](VectorStore::dense_search) | Cosine similarity over dense vectors |
/// | [`keyword_search`](VectorStore::keyword_search) | BM25 over keyword postings |
/// | [`count`](VectorStore::count) | Document count |
/// | [`list_collections`](VectorStore::list_collections) | All collection names |
/// | [`check_collection_limit`](VectorStore::check_collection_limit) | Refuse growth beyond the cap |
///
/// Queries against a missing collection fail with `NotIndexed` rather than
/// auto-creating. An upsert whose vectors do not match the collection's
/// pinned dimension fails the whole batch with `DimensionMismatch` and
/// writes nothing.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, name: &str, dimension: u32) -> Result<()>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Dimension the collection was created with, if it exists.
    async fn collection_dimension(&self, name: &str) -> Result<Option<u32>>;

    async fn upsert(&self, name: &str, documents: &[HybridDocument]) -> Result<()>;

    /// Returns the number of documents deleted.
    async fn delete_by_predicate(&self, name: &str, filter: &DocumentFilter) -> Result<u64>;

    /// Top-`limit` documents by cosine similarity against `vector`.
    async fn dense_search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ScoredDocument>>;

    /// Top-`limit` documents by BM25 relevance for `terms`.
    async fn keyword_search(
        &self,
        name: &str,
        terms: &[String],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ScoredDocument>>;

    async fn count(&self, name: &str) -> Result<u64>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Errors with `CollectionLimit` when no further collection may be
    /// created.
    async fn check_collection_limit(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(path: &str, ext: &str) -> ChunkMetadata {
        ChunkMetadata {
            relative_path: path.to_string(),
            start_line: 1,
            end_line: 2,
            language: "rust".to_string(),
            file_extension: ext.to_string(),
            node_kind: None,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = DocumentFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&metadata("src/a.rs", ".rs")));
    }

    #[test]
    fn path_filter() {
        let filter = DocumentFilter::by_path("src/a.rs");
        assert!(filter.matches(&metadata("src/a.rs", ".rs")));
        assert!(!filter.matches(&metadata("src/b.rs", ".rs")));
    }

    #[test]
    fn extension_filter() {
        let filter = DocumentFilter::by_extensions(vec![".ts".to_string(), ".tsx".to_string()]);
        assert!(filter.matches(&metadata("web/app.ts", ".ts")));
        assert!(!filter.matches(&metadata("src/a.rs", ".rs")));
    }
}
