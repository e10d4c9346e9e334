//! Core data models for the indexing and retrieval pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! walk → FileSynchronizer → SyncDiff → Splitter → Chunk
//!                                           ↓
//!                                 embed() → HybridDocument
//!                                           ↓
//!                                 query() → ScoredDocument → SearchResult
//! ```
//!
//! - A **[`Chunk`]** is a contiguous slice of one source file with a
//!   1-based inclusive line range, produced by a splitter.
//! - A **[`HybridDocument`]** is the stored unit: a chunk plus its dense
//!   vector and tokenized keywords, under a deterministic id.
//! - A **[`ScoredDocument`]** is what the vector store returns from a
//!   dense or sparse subquery.
//! - A **[`SearchResult`]** is the user-facing shape after fusion.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A contiguous slice of source produced by a splitter.
///
/// Invariants: `content` is non-empty, `start_line <= end_line`, lines are
/// 1-based inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Source text of the chunk.
    pub content: String,
    /// Path relative to the codebase root, forward-slash normalized.
    pub relative_path: String,
    /// First line of the chunk (1-based).
    pub start_line: usize,
    /// Last line of the chunk (1-based, inclusive).
    pub end_line: usize,
    /// Lowercase language tag (`"typescript"`, `"rust"`, `"unknown"`, ...).
    pub language: String,
    /// AST node type when produced by the AST splitter.
    pub node_kind: Option<String>,
    /// SHA-256 of `content`, used for dedup and id derivation.
    pub content_hash: String,
}

impl Chunk {
    pub fn new(
        content: String,
        relative_path: &str,
        start_line: usize,
        end_line: usize,
        language: &str,
        node_kind: Option<String>,
    ) -> Self {
        let content_hash = content_hash(&content);
        Self {
            content,
            relative_path: relative_path.to_string(),
            start_line,
            end_line,
            language: language.to_string(),
            node_kind,
            content_hash,
        }
    }

    /// Deterministic document id:
    /// `{fingerprint}-{relative_path}-{start}-{end}-{hash[0..8]}`.
    ///
    /// Identical re-ingestion of an unchanged chunk yields the identical id,
    /// which makes upserts idempotent.
    pub fn document_id(&self, path_fingerprint: &str) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            path_fingerprint,
            self.relative_path,
            self.start_line,
            self.end_line,
            &self.content_hash[..8]
        )
    }
}

/// SHA-256 hex digest of a text slice.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Metadata stored alongside every document, returned with search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub file_extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_kind: Option<String>,
}

/// The unit stored in the vector store: dense vector + keyword postings
/// plus the chunk content for snippet shaping.
#[derive(Debug, Clone)]
pub struct HybridDocument {
    /// Globally unique deterministic id (see [`Chunk::document_id`]).
    pub id: String,
    /// Chunk source text.
    pub content: String,
    /// Fixed-length embedding; length equals the provider dimension.
    pub dense_vector: Vec<f32>,
    /// Tokenized form of `content`, the sparse side of the hybrid index.
    pub keywords: Vec<String>,
    pub metadata: ChunkMetadata,
}

impl HybridDocument {
    /// Build a document from a chunk, its embedding, and its keywords.
    pub fn from_chunk(
        path_fingerprint: &str,
        chunk: &Chunk,
        dense_vector: Vec<f32>,
        keywords: Vec<String>,
    ) -> Self {
        let file_extension = chunk
            .relative_path
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{}", ext))
            .unwrap_or_default();
        Self {
            id: chunk.document_id(path_fingerprint),
            content: chunk.content.clone(),
            dense_vector,
            keywords,
            metadata: ChunkMetadata {
                relative_path: chunk.relative_path.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                language: chunk.language.clone(),
                file_extension,
                node_kind: chunk.node_kind.clone(),
            },
        }
    }
}

/// A candidate returned by one store subquery (dense or sparse), carrying
/// the backend's raw score (cosine similarity or negated BM25 rank).
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

/// A fused, user-facing search hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub file_extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_kind: Option<String>,
    pub content: String,
    /// Fused score under the selected rerank strategy.
    pub score: f64,
    /// Raw cosine similarity from the dense subquery, if the document
    /// appeared there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_similarity: Option<f64>,
}

/// Search response envelope. `partial` is set when the codebase is still
/// being indexed and results reflect whatever the store currently holds.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub partial: bool,
}

/// File-level change set computed by the synchronizer. Each vector holds
/// relative paths sorted lexicographically for deterministic processing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk::new(
            "fn main() {}".to_string(),
            "src/main.rs",
            1,
            1,
            "rust",
            Some("function_item".to_string()),
        )
    }

    #[test]
    fn document_id_is_deterministic() {
        let a = chunk().document_id("ab12cd34");
        let b = chunk().document_id("ab12cd34");
        assert_eq!(a, b);
        assert!(a.starts_with("ab12cd34-src/main.rs-1-1-"));
    }

    #[test]
    fn document_id_changes_with_content() {
        let mut other = chunk();
        other.content = "fn main() { panic!() }".to_string();
        other.content_hash = content_hash(&other.content);
        assert_ne!(chunk().document_id("ab12cd34"), other.document_id("ab12cd34"));
    }

    #[test]
    fn from_chunk_extracts_extension() {
        let doc = HybridDocument::from_chunk("ab12cd34", &chunk(), vec![0.0; 4], vec![]);
        assert_eq!(doc.metadata.file_extension, ".rs");
        assert_eq!(doc.metadata.language, "rust");
    }

    #[test]
    fn from_chunk_without_extension() {
        let c = Chunk::new("x".into(), "Makefile", 1, 1, "unknown", None);
        let doc = HybridDocument::from_chunk("ab12cd34", &c, vec![], vec![]);
        assert_eq!(doc.metadata.file_extension, "");
    }

    #[test]
    fn sync_diff_empty() {
        assert!(SyncDiff::default().is_empty());
        let diff = SyncDiff {
            added: vec!["a.rs".into()],
            ..Default::default()
        };
        assert!(!diff.is_empty());
        assert_eq!(diff.total(), 1);
    }
}
