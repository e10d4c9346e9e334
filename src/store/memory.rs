//! In-memory [`VectorStore`] implementation for tests.
//!
//! Uses `BTreeMap` behind `std::sync::RwLock`. Dense search is brute-force
//! cosine similarity; keyword search scores by matched-term count, which is
//! a deterministic stand-in for BM25 with the same ranking shape (more
//! matching terms → higher score).

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{EngineError, Result};
use crate::models::{HybridDocument, ScoredDocument};

use super::{DocumentFilter, VectorStore, COLLECTION_LIMIT};

struct Collection {
    dimension: u32,
    documents: BTreeMap<String, HybridDocument>,
}

/// In-memory store; the test double for engine and planner tests.
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, name: &str, dimension: u32) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension => {
                Err(EngineError::DimensionMismatch {
                    expected: existing.dimension,
                    actual: dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dimension,
                        documents: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().unwrap().contains_key(name))
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<u32>> {
        Ok(self
            .collections
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.dimension))
    }

    async fn upsert(&self, name: &str, documents: &[HybridDocument]) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| EngineError::NotIndexed(name.to_string()))?;

        // Whole-batch dimension check before any write.
        for doc in documents {
            if doc.dense_vector.len() != collection.dimension as usize {
                return Err(EngineError::DimensionMismatch {
                    expected: collection.dimension,
                    actual: doc.dense_vector.len() as u32,
                });
            }
        }

        for doc in documents {
            collection.documents.insert(doc.id.clone(), doc.clone());
        }
        Ok(())
    }

    async fn delete_by_predicate(&self, name: &str, filter: &DocumentFilter) -> Result<u64> {
        let mut collections = self.collections.write().unwrap();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| EngineError::NotIndexed(name.to_string()))?;

        let before = collection.documents.len();
        collection.documents.retain(|_, doc| !filter.matches(&doc.metadata));
        Ok((before - collection.documents.len()) as u64)
    }

    async fn dense_search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ScoredDocument>> {
        let collections = self.collections.read().unwrap();
        let collection = collections
            .get(name)
            .ok_or_else(|| EngineError::NotIndexed(name.to_string()))?;

        let mut candidates: Vec<ScoredDocument> = collection
            .documents
            .values()
            .filter(|doc| filter.matches(&doc.metadata))
            .map(|doc| ScoredDocument {
                id: doc.id.clone(),
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
                score: cosine_similarity(vector, &doc.dense_vector) as f64,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn keyword_search(
        &self,
        name: &str,
        terms: &[String],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ScoredDocument>> {
        let collections = self.collections.read().unwrap();
        let collection = collections
            .get(name)
            .ok_or_else(|| EngineError::NotIndexed(name.to_string()))?;

        let mut candidates: Vec<ScoredDocument> = collection
            .documents
            .values()
            .filter(|doc| filter.matches(&doc.metadata))
            .filter_map(|doc| {
                let matches = terms
                    .iter()
                    .filter(|t| doc.keywords.iter().any(|k| k == *t))
                    .count();
                if matches == 0 {
                    return None;
                }
                Some(ScoredDocument {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    metadata: doc.metadata.clone(),
                    score: matches as f64,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn count(&self, name: &str) -> Result<u64> {
        let collections = self.collections.read().unwrap();
        Ok(collections
            .get(name)
            .map(|c| c.documents.len() as u64)
            .unwrap_or(0))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().unwrap().keys().cloned().collect())
    }

    async fn check_collection_limit(&self) -> Result<()> {
        if self.collections.read().unwrap().len() >= COLLECTION_LIMIT {
            return Err(EngineError::CollectionLimit {
                max: COLLECTION_LIMIT,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, HybridDocument};

    fn doc(id_seed: &str, content: &str, vector: Vec<f32>) -> HybridDocument {
        let chunk = Chunk::new(content.to_string(), id_seed, 1, 1, "rust", None);
        let keywords = content
            .split_whitespace()
            .map(|s| s.to_lowercase())
            .collect();
        HybridDocument::from_chunk("deadbeef", &chunk, vector, keywords)
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let store = MemoryStore::new();
        store.ensure_collection("c", 3).await.unwrap();
        store.ensure_collection("c", 3).await.unwrap();
        assert!(store.has_collection("c").await.unwrap());
    }

    #[tokio::test]
    async fn ensure_rejects_dimension_change() {
        let store = MemoryStore::new();
        store.ensure_collection("c", 3).await.unwrap();
        let err = store.ensure_collection("c", 4).await.unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension_without_partial_write() {
        let store = MemoryStore::new();
        store.ensure_collection("c", 3).await.unwrap();
        let docs = vec![
            doc("a.rs", "good", vec![1.0, 0.0, 0.0]),
            doc("b.rs", "bad", vec![1.0, 0.0]),
        ];
        let err = store.upsert("c", &docs).await.unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
        assert_eq!(store.count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_missing_collection_is_not_indexed() {
        let store = MemoryStore::new();
        let err = store
            .dense_search("missing", &[1.0], 10, &DocumentFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotIndexed(_)));
    }

    #[tokio::test]
    async fn delete_by_path() {
        let store = MemoryStore::new();
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                &[
                    doc("a.rs", "alpha", vec![1.0, 0.0]),
                    doc("b.rs", "beta", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let deleted = store
            .delete_by_predicate("c", &DocumentFilter::by_path("a.rs"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dense_search_ranks_by_similarity() {
        let store = MemoryStore::new();
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                &[
                    doc("near.rs", "near", vec![1.0, 0.1]),
                    doc("far.rs", "far", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let results = store
            .dense_search("c", &[1.0, 0.0], 10, &DocumentFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.relative_path, "near.rs");
    }
}
