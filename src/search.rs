//! Hybrid query planner.
//!
//! Executes the dense (cosine) and sparse (BM25) subqueries against the
//! store, each over `K = max(4·limit, 50)` candidates, and fuses the two
//! ranked lists. The default fusion is Reciprocal Rank Fusion:
//!
//! ```text
//! score(d) = Σ_i 1 / (k + rank_i(d)),  k = 60
//! ```
//!
//! where `i` ranges over the two lists and a missing rank contributes
//! nothing. `weighted_sum`, `dense_only`, and `sparse_only` strategies are
//! selectable. The similarity threshold applies only to the dense
//! component: documents below it survive only through a sparse hit.
//!
//! Query text is tokenized identically to ingestion so the sparse side
//! matches the stored posting lists.

use std::collections::HashMap;
use std::str::FromStr;

use crate::embedding::{normalized_similarity, EmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::models::{ScoredDocument, SearchResult};
use crate::store::{DocumentFilter, VectorStore};

/// RRF rank constant.
pub const RRF_K: f64 = 60.0;

/// Minimum candidate pool per subquery.
pub const MIN_CANDIDATES: usize = 50;

/// Common English words dropped from keyword postings and queries.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "will", "have",
    "has", "had", "not", "but", "can", "could", "should", "would", "into", "out", "than", "then",
    "them", "they", "their", "there",
];

/// Rerank strategy for fusing the dense and sparse lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RerankStrategy {
    /// Reciprocal Rank Fusion with `k = 60` (default).
    Rrf,
    /// `alpha · dense + (1 - alpha) · sparse` over min-max normalized
    /// scores.
    WeightedSum { alpha: f64 },
    DenseOnly,
    SparseOnly,
}

impl Default for RerankStrategy {
    fn default() -> Self {
        RerankStrategy::Rrf
    }
}

impl FromStr for RerankStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rrf" => Ok(Self::Rrf),
            "weighted_sum" => Ok(Self::WeightedSum { alpha: 0.5 }),
            "dense_only" => Ok(Self::DenseOnly),
            "sparse_only" => Ok(Self::SparseOnly),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown rerank strategy '{}' (expected rrf, weighted_sum, dense_only, or sparse_only)",
                other
            ))),
        }
    }
}

/// One hybrid query, ready to execute.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub query: String,
    pub limit: usize,
    /// Threshold on the normalized dense similarity, `[0, 1]`.
    pub threshold: f64,
    pub filter: DocumentFilter,
    pub strategy: RerankStrategy,
}

/// Tokenize text the same way for ingestion and querying: lowercase, split
/// on non-identifier characters, keep tokens of at least two characters,
/// drop stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.len() >= 2 && !STOPWORDS.contains(s))
        .map(String::from)
        .collect()
}

/// Execute a hybrid query: embed, run both subqueries, fuse, threshold,
/// and shape the top `limit` results.
pub async fn hybrid_search(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    collection: &str,
    request: &HybridQuery,
) -> Result<Vec<SearchResult>> {
    if request.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let candidate_k = (request.limit * 4).max(MIN_CANDIDATES);

    let dense = if request.strategy == RerankStrategy::SparseOnly {
        Vec::new()
    } else {
        let query_vector = provider.embed(&request.query).await?;
        store
            .dense_search(collection, &query_vector, candidate_k, &request.filter)
            .await?
    };

    let sparse = if request.strategy == RerankStrategy::DenseOnly {
        Vec::new()
    } else {
        let terms = tokenize(&request.query);
        store
            .keyword_search(collection, &terms, candidate_k, &request.filter)
            .await?
    };

    let fused = fuse(&dense, &sparse, request.strategy, request.threshold);

    Ok(fused
        .into_iter()
        .take(request.limit)
        .map(|entry| SearchResult {
            relative_path: entry.document.metadata.relative_path.clone(),
            start_line: entry.document.metadata.start_line,
            end_line: entry.document.metadata.end_line,
            language: entry.document.metadata.language.clone(),
            file_extension: entry.document.metadata.file_extension.clone(),
            node_kind: entry.document.metadata.node_kind.clone(),
            content: entry.document.content.clone(),
            score: entry.score,
            dense_similarity: entry.dense_similarity,
        })
        .collect())
}

/// A fused candidate, carrying its provenance for thresholding and
/// tie-breaking.
struct FusedDocument {
    document: ScoredDocument,
    score: f64,
    dense_similarity: Option<f64>,
}

/// Fuse the two ranked lists under the given strategy, then apply the
/// dense-side threshold and sort with deterministic tie-breaking (fused
/// score, then dense similarity, then id).
fn fuse(
    dense: &[ScoredDocument],
    sparse: &[ScoredDocument],
    strategy: RerankStrategy,
    threshold: f64,
) -> Vec<FusedDocument> {
    // 1-based ranks per list.
    let dense_ranks: HashMap<&str, usize> = dense
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.as_str(), i + 1))
        .collect();
    let sparse_ranks: HashMap<&str, usize> = sparse
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.as_str(), i + 1))
        .collect();

    let dense_norm = min_max_normalize(dense);
    let sparse_norm = min_max_normalize(sparse);

    let mut by_id: HashMap<&str, &ScoredDocument> = HashMap::new();
    for doc in dense.iter().chain(sparse.iter()) {
        by_id.entry(doc.id.as_str()).or_insert(doc);
    }
    let dense_scores: HashMap<&str, f64> = dense
        .iter()
        .map(|d| (d.id.as_str(), d.score))
        .collect();

    let mut fused: Vec<FusedDocument> = by_id
        .into_iter()
        .filter_map(|(id, doc)| {
            let in_sparse = sparse_ranks.contains_key(id);

            let score = match strategy {
                RerankStrategy::Rrf => {
                    let mut s = 0.0;
                    if let Some(rank) = dense_ranks.get(id) {
                        s += 1.0 / (RRF_K + *rank as f64);
                    }
                    if let Some(rank) = sparse_ranks.get(id) {
                        s += 1.0 / (RRF_K + *rank as f64);
                    }
                    s
                }
                RerankStrategy::WeightedSum { alpha } => {
                    let d = dense_norm.get(id).copied().unwrap_or(0.0);
                    let s = sparse_norm.get(id).copied().unwrap_or(0.0);
                    alpha * d + (1.0 - alpha) * s
                }
                RerankStrategy::DenseOnly => dense_scores.get(id).copied().unwrap_or(0.0),
                RerankStrategy::SparseOnly => {
                    if in_sparse {
                        doc.score
                    } else {
                        return None;
                    }
                }
            };

            // Threshold applies only to the dense component; sparse hits
            // survive regardless.
            let dense_similarity = dense_scores.get(id).copied();
            if let Some(similarity) = dense_similarity {
                if normalized_similarity(similarity) < threshold && !in_sparse {
                    return None;
                }
            } else if !in_sparse {
                return None;
            }

            Some(FusedDocument {
                document: doc.clone(),
                score,
                dense_similarity,
            })
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.dense_similarity
                    .unwrap_or(f64::MIN)
                    .partial_cmp(&a.dense_similarity.unwrap_or(f64::MIN))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.document.id.cmp(&b.document.id))
    });

    fused
}

/// Min-max normalize raw scores to `[0, 1]`; all-equal lists normalize
/// to `1.0`.
fn min_max_normalize(documents: &[ScoredDocument]) -> HashMap<&str, f64> {
    if documents.is_empty() {
        return HashMap::new();
    }

    let min = documents
        .iter()
        .map(|d| d.score)
        .fold(f64::INFINITY, f64::min);
    let max = documents
        .iter()
        .map(|d| d.score)
        .fold(f64::NEG_INFINITY, f64::max);

    documents
        .iter()
        .map(|d| {
            let norm = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (d.score - min) / (max - min)
            };
            (d.id.as_str(), norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn doc(id: &str, score: f64) -> ScoredDocument {
        ScoredDocument {
            id: id.to_string(),
            content: format!("content of {}", id),
            metadata: ChunkMetadata {
                relative_path: format!("{}.rs", id),
                start_line: 1,
                end_line: 2,
                language: "rust".to_string(),
                file_extension: ".rs".to_string(),
                node_kind: None,
            },
            score,
        }
    }

    #[test]
    fn tokenize_splits_identifiers() {
        let tokens = tokenize("function addNumbers(a, b) { return a + b; }");
        assert!(tokens.contains(&"function".to_string()));
        assert!(tokens.contains(&"addnumbers".to_string()));
        assert!(tokens.contains(&"return".to_string()));
        // Single characters are dropped.
        assert!(!tokens.iter().any(|t| t == "a" || t == "b"));
    }

    #[test]
    fn tokenize_drops_stopwords() {
        let tokens = tokenize("the quick AND the dead");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"and".to_string()));
        assert!(tokens.contains(&"quick".to_string()));
        assert!(tokens.contains(&"dead".to_string()));
    }

    #[test]
    fn tokenize_keeps_underscores() {
        let tokens = tokenize("my_function_name");
        assert_eq!(tokens, vec!["my_function_name".to_string()]);
    }

    #[test]
    fn strategy_parse() {
        assert_eq!("rrf".parse::<RerankStrategy>().unwrap(), RerankStrategy::Rrf);
        assert!(matches!(
            "weighted_sum".parse::<RerankStrategy>().unwrap(),
            RerankStrategy::WeightedSum { .. }
        ));
        assert!("best".parse::<RerankStrategy>().is_err());
    }

    #[test]
    fn rrf_prefers_documents_in_both_lists() {
        // A is in both lists, B only dense, C only sparse.
        let dense = vec![doc("b", 0.9), doc("a", 0.8)];
        let sparse = vec![doc("a", 5.0), doc("c", 4.0)];

        let fused = fuse(&dense, &sparse, RerankStrategy::Rrf, 0.0);
        assert_eq!(fused[0].document.id, "a");
        let a = &fused[0];
        // rank 2 dense + rank 1 sparse.
        let expected = 1.0 / (RRF_K + 2.0) + 1.0 / (RRF_K + 1.0);
        assert!((a.score - expected).abs() < 1e-12);
    }

    #[test]
    fn missing_rank_counts_as_absent() {
        let dense = vec![doc("a", 0.9)];
        let sparse: Vec<ScoredDocument> = Vec::new();
        let fused = fuse(&dense, &sparse, RerankStrategy::Rrf, 0.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / (RRF_K + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn threshold_drops_weak_dense_only_hits() {
        // cosine 0.8 → normalized 0.9; cosine -0.6 → normalized 0.2.
        let dense = vec![doc("strong", 0.8), doc("weak", -0.6)];
        let sparse: Vec<ScoredDocument> = Vec::new();

        let fused = fuse(&dense, &sparse, RerankStrategy::Rrf, 0.3);
        let ids: Vec<&str> = fused.iter().map(|f| f.document.id.as_str()).collect();
        assert_eq!(ids, vec!["strong"]);
    }

    #[test]
    fn threshold_keeps_sparse_backed_hits() {
        let dense = vec![doc("weak", -0.6)];
        let sparse = vec![doc("weak", 3.0)];

        let fused = fuse(&dense, &sparse, RerankStrategy::Rrf, 0.3);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].document.id, "weak");
        assert_eq!(fused[0].dense_similarity, Some(-0.6));
    }

    #[test]
    fn weighted_sum_orders_by_blend() {
        let dense = vec![doc("a", 1.0), doc("b", 0.0)];
        let sparse = vec![doc("b", 10.0), doc("a", 1.0)];

        // Pure dense weighting must order a first.
        let fused = fuse(&dense, &sparse, RerankStrategy::WeightedSum { alpha: 1.0 }, 0.0);
        assert_eq!(fused[0].document.id, "a");

        // Pure sparse weighting must order b first.
        let fused = fuse(&dense, &sparse, RerankStrategy::WeightedSum { alpha: 0.0 }, 0.0);
        assert_eq!(fused[0].document.id, "b");
    }

    #[test]
    fn sparse_only_ignores_dense_hits() {
        let dense = vec![doc("a", 0.99)];
        let sparse = vec![doc("b", 2.0)];
        let fused = fuse(&dense, &sparse, RerankStrategy::SparseOnly, 0.0);
        let ids: Vec<&str> = fused.iter().map(|f| f.document.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn ties_break_on_dense_then_id() {
        // Same RRF contribution for both (each rank 1 in one list).
        let dense = vec![doc("zed", 0.9)];
        let sparse = vec![doc("abc", 5.0)];
        let fused = fuse(&dense, &sparse, RerankStrategy::Rrf, 0.0);
        assert_eq!(fused.len(), 2);
        // Equal fused score; zed has a dense similarity, abc does not.
        assert_eq!(fused[0].document.id, "zed");
    }

    #[test]
    fn normalize_all_equal_is_one() {
        let docs = vec![doc("a", 3.0), doc("b", 3.0)];
        let norm = min_max_normalize(&docs);
        assert!((norm["a"] - 1.0).abs() < 1e-12);
        assert!((norm["b"] - 1.0).abs() < 1e-12);
    }
}
