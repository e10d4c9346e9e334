//! SQLite-backed [`VectorStore`] implementation.
//!
//! Each collection maps to two tables: `<name>` holds documents (metadata,
//! content, embedding BLOB) and `<name>_fts` is an FTS5 virtual table over
//! the keyword postings with the filterable metadata columns stored
//! UNINDEXED. A `collections` meta table pins each collection's embedding
//! dimension.
//!
//! Dense search decodes embedding BLOBs and scores cosine similarity in
//! process; keyword search uses FTS5 BM25 `rank`. The database runs in WAL
//! mode.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{EngineError, Result};
use crate::models::{ChunkMetadata, HybridDocument, ScoredDocument};

use super::{DocumentFilter, VectorStore, COLLECTION_LIMIT};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and run base migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| EngineError::store("open", e))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::store("open", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| EngineError::store("migrate", e))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| EngineError::store("open", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::store("open", e))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (name TEXT PRIMARY KEY, dims INTEGER NOT NULL, created_at INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .map_err(|e| EngineError::store("migrate", e))?;
        Ok(Self { pool })
    }

    async fn dimension_of(&self, name: &str) -> Result<Option<u32>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::store("collection lookup", e))?;
        Ok(dims.map(|d| d as u32))
    }

    async fn require_dimension(&self, name: &str) -> Result<u32> {
        self.dimension_of(name)
            .await?
            .ok_or_else(|| EngineError::NotIndexed(name.to_string()))
    }
}

/// Collection names become SQL identifiers; restrict them hard.
fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !ok {
        return Err(EngineError::store(
            "validate collection name",
            format!("invalid collection name '{}'", name),
        ));
    }
    Ok(())
}

/// Build the metadata WHERE fragment and its binds for a filter.
/// `column_prefix` is `""` or an alias like `"d."`.
fn filter_sql(filter: &DocumentFilter, column_prefix: &str) -> (String, Vec<String>) {
    let mut clause = String::new();
    let mut binds = Vec::new();

    if let Some(path) = &filter.relative_path {
        clause.push_str(&format!(" AND {}relative_path = ?", column_prefix));
        binds.push(path.clone());
    }
    if let Some(extensions) = &filter.extensions {
        if !extensions.is_empty() {
            let placeholders = vec!["?"; extensions.len()].join(", ");
            clause.push_str(&format!(
                " AND {}file_extension IN ({})",
                column_prefix, placeholders
            ));
            binds.extend(extensions.iter().cloned());
        }
    }

    (clause, binds)
}

/// FTS5 MATCH expression: quoted terms OR-ed together.
fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn row_metadata(row: &sqlx::sqlite::SqliteRow) -> ChunkMetadata {
    ChunkMetadata {
        relative_path: row.get("relative_path"),
        start_line: row.get::<i64, _>("start_line") as usize,
        end_line: row.get::<i64, _>("end_line") as usize,
        language: row.get("language"),
        file_extension: row.get("file_extension"),
        node_kind: row.get("node_kind"),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ensure_collection(&self, name: &str, dimension: u32) -> Result<()> {
        validate_name(name)?;

        if let Some(existing) = self.dimension_of(name).await? {
            if existing != dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
            return Ok(());
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {name} (
                id TEXT PRIMARY KEY,
                relative_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                language TEXT NOT NULL,
                file_extension TEXT NOT NULL,
                node_kind TEXT,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::store("create collection", e))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{name}_path ON {name}(relative_path)"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::store("create collection", e))?;

        // FTS5 virtual tables have no IF NOT EXISTS before SQLite 3.38;
        // check sqlite_master first, as the schema migration does.
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(format!("{name}_fts"))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::store("create collection", e))?;

        if !fts_exists {
            sqlx::query(&format!(
                r#"
                CREATE VIRTUAL TABLE {name}_fts USING fts5(
                    doc_id UNINDEXED,
                    relative_path UNINDEXED,
                    file_extension UNINDEXED,
                    keywords
                )
                "#
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store("create collection", e))?;
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT OR IGNORE INTO collections (name, dims, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(dimension as i64)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store("create collection", e))?;

        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.dimension_of(name).await?.is_some())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {name}_fts"))
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store("drop collection", e))?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store("drop collection", e))?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store("drop collection", e))?;
        Ok(())
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<u32>> {
        self.dimension_of(name).await
    }

    async fn upsert(&self, name: &str, documents: &[HybridDocument]) -> Result<()> {
        validate_name(name)?;
        if documents.is_empty() {
            return Ok(());
        }

        let dims = self.require_dimension(name).await?;
        for doc in documents {
            if doc.dense_vector.len() != dims as usize {
                return Err(EngineError::DimensionMismatch {
                    expected: dims,
                    actual: doc.dense_vector.len() as u32,
                });
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::store("upsert", e))?;

        for doc in documents {
            sqlx::query(&format!("DELETE FROM {name}_fts WHERE doc_id = ?"))
                .bind(&doc.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::store("upsert", e))?;

            sqlx::query(&format!(
                r#"
                INSERT OR REPLACE INTO {name}
                    (id, relative_path, start_line, end_line, language,
                     file_extension, node_kind, content, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#
            ))
            .bind(&doc.id)
            .bind(&doc.metadata.relative_path)
            .bind(doc.metadata.start_line as i64)
            .bind(doc.metadata.end_line as i64)
            .bind(&doc.metadata.language)
            .bind(&doc.metadata.file_extension)
            .bind(&doc.metadata.node_kind)
            .bind(&doc.content)
            .bind(vec_to_blob(&doc.dense_vector))
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::store("upsert", e))?;

            sqlx::query(&format!(
                "INSERT INTO {name}_fts (doc_id, relative_path, file_extension, keywords) VALUES (?, ?, ?, ?)"
            ))
            .bind(&doc.id)
            .bind(&doc.metadata.relative_path)
            .bind(&doc.metadata.file_extension)
            .bind(doc.keywords.join(" "))
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::store("upsert", e))?;
        }

        tx.commit().await.map_err(|e| EngineError::store("upsert", e))?;
        Ok(())
    }

    async fn delete_by_predicate(&self, name: &str, filter: &DocumentFilter) -> Result<u64> {
        validate_name(name)?;
        self.require_dimension(name).await?;

        let (clause, binds) = filter_sql(filter, "");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::store("delete", e))?;

        let fts_sql = format!(
            "DELETE FROM {name}_fts WHERE doc_id IN (SELECT id FROM {name} WHERE 1=1{clause})"
        );
        let mut query = sqlx::query(&fts_sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::store("delete", e))?;

        let docs_sql = format!("DELETE FROM {name} WHERE 1=1{clause}");
        let mut query = sqlx::query(&docs_sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let deleted = query
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::store("delete", e))?
            .rows_affected();

        tx.commit().await.map_err(|e| EngineError::store("delete", e))?;
        Ok(deleted)
    }

    async fn dense_search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ScoredDocument>> {
        validate_name(name)?;
        self.require_dimension(name).await?;

        let (clause, binds) = filter_sql(filter, "");
        let sql = format!(
            "SELECT id, relative_path, start_line, end_line, language, \
             file_extension, node_kind, content, embedding FROM {name} WHERE 1=1{clause}"
        );

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::store("dense search", e))?;

        let mut candidates: Vec<ScoredDocument> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                ScoredDocument {
                    id: row.get("id"),
                    content: row.get("content"),
                    metadata: row_metadata(row),
                    score: cosine_similarity(vector, &stored) as f64,
                }
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
        validate_name(name)?;
        self.require_dimension(name).await?;

        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let (clause, binds) = filter_sql(filter, "");
        let sql = format!(
            "SELECT doc_id, rank FROM {name}_fts WHERE {name}_fts MATCH ?{clause} \
             ORDER BY rank LIMIT ?"
        );

        let mut query = sqlx::query(&sql).bind(match_expression(terms));
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(limit as i64);

        let matches = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::store("keyword search", e))?;

        let mut results = Vec::with_capacity(matches.len());
        for row in &matches {
            let doc_id: String = row.get("doc_id");
            let rank: f64 = row.get("rank");

            let doc_row = sqlx::query(&format!(
                "SELECT id, relative_path, start_line, end_line, language, \
                 file_extension, node_kind, content FROM {name} WHERE id = ?"
            ))
            .bind(&doc_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::store("keyword search", e))?;

            if let Some(doc_row) = doc_row {
                results.push(ScoredDocument {
                    id: doc_row.get("id"),
                    content: doc_row.get("content"),
                    metadata: row_metadata(&doc_row),
                    // FTS5 rank is more negative for better matches.
                    score: -rank,
                });
            }
        }

        Ok(results)
    }

    async fn count(&self, name: &str) -> Result<u64> {
        validate_name(name)?;
        if self.dimension_of(name).await?.is_none() {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {name}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::store("count", e))?;
        Ok(count as u64)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EngineError::store("list collections", e))?;
        Ok(names)
    }

    async fn check_collection_limit(&self) -> Result<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::store("collection limit", e))?;
        if count as usize >= COLLECTION_LIMIT {
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
    use crate::models::Chunk;

    fn doc(path: &str, content: &str, vector: Vec<f32>) -> HybridDocument {
        let chunk = Chunk::new(content.to_string(), path, 1, 2, "rust", None);
        let keywords: Vec<String> = content
            .split_whitespace()
            .map(|s| s.to_lowercase())
            .collect();
        HybridDocument::from_chunk("deadbeef", &chunk, vector, keywords)
    }

    #[tokio::test]
    async fn ensure_collection_idempotent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.ensure_collection("hybrid_code_chunks_ab12cd34", 2).await.unwrap();
        store.ensure_collection("hybrid_code_chunks_ab12cd34", 2).await.unwrap();
        assert!(store.has_collection("hybrid_code_chunks_ab12cd34").await.unwrap());
        assert_eq!(
            store.collection_dimension("hybrid_code_chunks_ab12cd34").await.unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn ensure_collection_pins_dimension() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.ensure_collection("hybrid_code_chunks_ab12cd34", 2).await.unwrap();
        let err = store
            .ensure_collection("hybrid_code_chunks_ab12cd34", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn rejects_invalid_collection_name() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.ensure_collection("bad name; --", 2).await.is_err());
        assert!(store.ensure_collection("UPPER", 2).await.is_err());
    }

    #[tokio::test]
    async fn upsert_and_dense_search() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let name = "hybrid_code_chunks_ab12cd34";
        store.ensure_collection(name, 2).await.unwrap();
        store
            .upsert(
                name,
                &[
                    doc("src/near.rs", "add numbers", vec![1.0, 0.0]),
                    doc("src/far.rs", "remove things", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let results = store
            .dense_search(name, &[1.0, 0.1], 10, &DocumentFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.relative_path, "src/near.rs");
        assert_eq!(store.count(name).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_wrong_dimension_fails_whole_batch() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let name = "hybrid_code_chunks_ab12cd34";
        store.ensure_collection(name, 2).await.unwrap();

        let err = store
            .upsert(
                name,
                &[
                    doc("a.rs", "fine", vec![1.0, 0.0]),
                    doc("b.rs", "broken", vec![1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
        assert_eq!(store.count(name).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_for_same_ids() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let name = "hybrid_code_chunks_ab12cd34";
        store.ensure_collection(name, 2).await.unwrap();

        let docs = vec![doc("a.rs", "same content", vec![1.0, 0.0])];
        store.upsert(name, &docs).await.unwrap();
        store.upsert(name, &docs).await.unwrap();
        assert_eq!(store.count(name).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keyword_search_matches_terms() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let name = "hybrid_code_chunks_ab12cd34";
        store.ensure_collection(name, 2).await.unwrap();
        store
            .upsert(
                name,
                &[
                    doc("src/add.rs", "function add numbers", vec![1.0, 0.0]),
                    doc("src/rm.rs", "function remove entries", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let results = store
            .keyword_search(
                name,
                &["add".to_string(), "numbers".to_string()],
                10,
                &DocumentFilter::default(),
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].metadata.relative_path, "src/add.rs");
    }

    #[tokio::test]
    async fn extension_filter_applies() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let name = "hybrid_code_chunks_ab12cd34";
        store.ensure_collection(name, 2).await.unwrap();
        store
            .upsert(
                name,
                &[
                    doc("app.ts", "shared words here", vec![1.0, 0.0]),
                    doc("app.rs", "shared words here", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let filter = DocumentFilter::by_extensions(vec![".ts".to_string()]);
        let dense = store.dense_search(name, &[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(dense.len(), 1);
        assert_eq!(dense[0].metadata.file_extension, ".ts");

        let sparse = store
            .keyword_search(name, &["shared".to_string()], 10, &filter)
            .await
            .unwrap();
        assert_eq!(sparse.len(), 1);
        assert_eq!(sparse[0].metadata.file_extension, ".ts");
    }

    #[tokio::test]
    async fn delete_by_path_removes_documents() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let name = "hybrid_code_chunks_ab12cd34";
        store.ensure_collection(name, 2).await.unwrap();
        store
            .upsert(
                name,
                &[
                    doc("keep.rs", "keep me", vec![1.0, 0.0]),
                    doc("drop.rs", "drop me", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let deleted = store
            .delete_by_predicate(name, &DocumentFilter::by_path("drop.rs"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count(name).await.unwrap(), 1);

        // The FTS side is cleaned too.
        let sparse = store
            .keyword_search(name, &["drop".to_string()], 10, &DocumentFilter::default())
            .await
            .unwrap();
        assert!(sparse.is_empty());
    }

    #[tokio::test]
    async fn query_missing_collection_is_not_indexed() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = store
            .dense_search(
                "hybrid_code_chunks_00000000",
                &[1.0],
                10,
                &DocumentFilter::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotIndexed(_)));
    }

    #[tokio::test]
    async fn drop_collection_removes_everything() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let name = "hybrid_code_chunks_ab12cd34";
        store.ensure_collection(name, 2).await.unwrap();
        store
            .upsert(name, &[doc("a.rs", "content", vec![1.0, 0.0])])
            .await
            .unwrap();

        store.drop_collection(name).await.unwrap();
        assert!(!store.has_collection(name).await.unwrap());
        assert!(store.list_collections().await.unwrap().is_empty());
    }
}
