//! Engine orchestration: indexing, search, and clearing per codebase.
//!
//! The [`Context`] owns the embedding provider, the vector store, the
//! snapshot manager, and one synchronizer per collection. `index_codebase`
//! acks immediately and runs the pipeline on a background task; progress
//! is observable through the snapshot (`get_indexing_status`) and an
//! optional reporter invoked at batch boundaries.
//!
//! Per-codebase exclusivity is a try-lock keyed by path fingerprint:
//! concurrent `index_codebase` calls on the same codebase fail fast with
//! `AlreadyIndexing` instead of blocking. `clear_index` during an active
//! run requests cooperative cancellation, honored at the next batch
//! boundary.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::fingerprint::{canonical_path, collection_name, fingerprint, PathRegistry};
use crate::models::{Chunk, HybridDocument, SearchResponse};
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::search::{hybrid_search, tokenize, HybridQuery, RerankStrategy};
use crate::snapshot::{CodebaseInfo, IndexCompletion, SnapshotManager};
use crate::splitter::{create_splitter, language_for_extension, Splitter, SplitterOptions};
use crate::store::{DocumentFilter, VectorStore};
use crate::sync::{FileSynchronizer, SyncOptions};

/// Options for [`Context::index_codebase`].
#[derive(Clone, Default)]
pub struct IndexOptions {
    /// Clear any existing index first.
    pub force: bool,
    /// Splitter override (`"ast"` or `"text"`); engine default otherwise.
    pub splitter: Option<String>,
    /// Extensions to index beyond the defaults.
    pub custom_extensions: Vec<String>,
    /// Ignore globs merged on top of defaults and configuration.
    pub ignore_patterns: Vec<String>,
    /// Progress reporter invoked at batch boundaries.
    pub progress: Option<Arc<dyn IndexProgressReporter>>,
}

/// Options for [`Context::search_code`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Threshold on the normalized dense similarity.
    pub threshold: f64,
    /// Restrict results to these extensions (entries like `".ts"`).
    pub extension_filter: Option<Vec<String>>,
    pub strategy: RerankStrategy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.3,
            extension_filter: None,
            strategy: RerankStrategy::default(),
        }
    }
}

/// Ack returned by [`Context::index_codebase`]; indexing continues in the
/// background. `wait` joins the run (used by the CLI and tests).
#[derive(Debug)]
pub struct IndexHandle {
    pub collection: String,
    join: JoinHandle<()>,
}

impl IndexHandle {
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

struct IndexStats {
    indexed_files: u64,
    total_chunks: u64,
    status: IndexCompletion,
}

/// The engine. Cheap to clone through its inner `Arc`; background tasks
/// share the same state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    snapshot: SnapshotManager,
    registry: PathRegistry,
    synchronizers: Mutex<HashMap<String, Arc<FileSynchronizer>>>,
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl Context {
    pub fn new(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let snapshot = SnapshotManager::load(&config.state_dir());

        let registry = PathRegistry::new();
        for path in snapshot.list_all() {
            registry.record(Path::new(&path));
        }

        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                store,
                snapshot,
                registry,
                synchronizers: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// `hybrid_code_chunks_<fingerprint>` for a codebase path.
    pub fn get_collection_name(&self, path: &Path) -> String {
        collection_name(path)
    }

    /// True iff the collection exists and the snapshot says `indexed`.
    pub async fn has_index(&self, path: &Path) -> Result<bool> {
        let collection = collection_name(path);
        let in_store = self.inner.store.has_collection(&collection).await?;
        let indexed = self
            .inner
            .snapshot
            .get_info(path)
            .map(|info| info.is_indexed())
            .unwrap_or(false);
        Ok(in_store && indexed)
    }

    /// Snapshot record for a codebase, if any.
    pub fn get_indexing_status(&self, path: &Path) -> Option<CodebaseInfo> {
        self.inner.snapshot.get_info(path)
    }

    /// Resolve a collection name back to its codebase path.
    pub fn path_for_collection(&self, collection: &str) -> Option<PathBuf> {
        self.inner.registry.path_for_collection(collection)
    }

    /// Start indexing a codebase in the background.
    ///
    /// Fails fast with `AlreadyIndexing` when a run is active,
    /// `AlreadyIndexed` when the snapshot says indexed and `force` is not
    /// set. With `force`, the existing index is cleared first.
    pub async fn index_codebase(&self, path: &Path, options: IndexOptions) -> Result<IndexHandle> {
        let inner = &self.inner;
        let canonical = preflight(path)?;
        let display = canonical.to_string_lossy().to_string();

        let splitter_kind = match &options.splitter {
            Some(name) => name.parse()?,
            None => inner.config.splitter.kind,
        };

        let fp = inner.registry.record(&canonical);

        if inner.active.lock().unwrap().contains_key(&fp) {
            return Err(EngineError::AlreadyIndexing(display));
        }

        match inner.snapshot.get_info(&canonical) {
            Some(CodebaseInfo::Indexing { .. }) => {
                return Err(EngineError::AlreadyIndexing(display));
            }
            Some(CodebaseInfo::Indexed { .. }) if !options.force => {
                return Err(EngineError::AlreadyIndexed(display));
            }
            _ => {}
        }

        if options.force {
            inner.clear(&canonical).await?;
            inner.registry.record(&canonical);
        }

        let collection = collection_name(&canonical);
        if !inner.store.has_collection(&collection).await? {
            inner.store.check_collection_limit().await?;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        inner
            .active
            .lock()
            .unwrap()
            .insert(fp.clone(), Arc::clone(&cancel));

        inner.snapshot.set_indexing(&canonical, 0.0)?;

        let splitter: Arc<dyn Splitter> = Arc::from(create_splitter(
            splitter_kind,
            SplitterOptions::from(&inner.config.splitter),
        ));

        let task_inner = Arc::clone(inner);
        let task_collection = collection.clone();
        let join = tokio::spawn(async move {
            task_inner
                .run_indexing(canonical, fp, task_collection, splitter, options, cancel)
                .await;
        });

        Ok(IndexHandle { collection, join })
    }

    /// Hybrid search over an indexed (or still-indexing) codebase.
    pub async fn search_code(
        &self,
        path: &Path,
        query: &str,
        options: SearchOptions,
    ) -> Result<SearchResponse> {
        let inner = &self.inner;
        let canonical = preflight(path)?;
        let display = canonical.to_string_lossy().to_string();

        let extensions = match &options.extension_filter {
            Some(entries) => {
                for entry in entries {
                    validate_extension(entry)?;
                }
                Some(entries.clone())
            }
            None => None,
        };

        let partial = match inner.snapshot.get_info(&canonical) {
            Some(info) if info.is_indexed() => false,
            Some(info) if info.is_indexing() => true,
            _ => return Err(EngineError::NotIndexed(display)),
        };

        inner.registry.record(&canonical);
        let collection = collection_name(&canonical);

        let request = HybridQuery {
            query: query.to_string(),
            limit: options.limit,
            threshold: options.threshold,
            filter: DocumentFilter {
                relative_path: None,
                extensions,
            },
            strategy: options.strategy,
        };

        let results = hybrid_search(
            inner.store.as_ref(),
            inner.provider.as_ref(),
            &collection,
            &request,
        )
        .await?;

        Ok(SearchResponse { results, partial })
    }

    /// Drop the collection, the synchronizer state, and the snapshot
    /// entry. Cancels an active indexing run at its next batch boundary.
    pub async fn clear_index(&self, path: &Path) -> Result<()> {
        self.inner.clear(&canonical_path(path)).await
    }
}

impl Inner {
    async fn clear(&self, canonical: &Path) -> Result<()> {
        let fp = fingerprint(canonical);
        let collection = collection_name(canonical);

        let cancel = self.active.lock().unwrap().get(&fp).cloned();
        if let Some(cancel) = cancel {
            cancel.store(true, Ordering::SeqCst);
            // Wait for the background task to observe the flag.
            for _ in 0..600 {
                if !self.active.lock().unwrap().contains_key(&fp) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.active.lock().unwrap().contains_key(&fp) {
                return Err(EngineError::Busy(canonical.to_string_lossy().to_string()));
            }
        }

        if self.store.has_collection(&collection).await? {
            self.store.drop_collection(&collection).await?;
        }

        let synchronizer = self.synchronizers.lock().unwrap().remove(&collection);
        match synchronizer {
            Some(synchronizer) => synchronizer.delete_state()?,
            None => {
                // No live synchronizer; construct one just to locate and
                // remove the persisted hash map.
                FileSynchronizer::new(canonical, &self.config.state_dir(), &SyncOptions::default())?
                    .delete_state()?;
            }
        }

        self.snapshot.remove(canonical)?;
        self.registry.forget(&fp);
        Ok(())
    }

    // ---- background pipeline ----

    async fn run_indexing(
        self: Arc<Self>,
        canonical: PathBuf,
        fp: String,
        collection: String,
        splitter: Arc<dyn Splitter>,
        options: IndexOptions,
        cancel: Arc<AtomicBool>,
    ) {
        let reporter: Arc<dyn IndexProgressReporter> = options
            .progress
            .clone()
            .unwrap_or_else(|| Arc::new(NoProgress));
        let path_display = canonical.to_string_lossy().to_string();

        reporter.report(&IndexProgressEvent::Preparing {
            path: path_display.clone(),
        });

        let result = self
            .index_pipeline(&canonical, &fp, &collection, splitter, &options, &cancel, &reporter)
            .await;

        self.active.lock().unwrap().remove(&fp);

        if cancel.load(Ordering::SeqCst) {
            // A concurrent clear owns the snapshot entry now.
            tracing::info!(path = %path_display, "indexing cancelled");
            return;
        }

        match result {
            Ok(Some(stats)) => {
                if let Err(e) = self.snapshot.set_indexed(
                    &canonical,
                    stats.indexed_files,
                    stats.total_chunks,
                    stats.status,
                ) {
                    tracing::warn!(error = %e, "failed to persist indexed status");
                }
                reporter.report(&IndexProgressEvent::Completed {
                    path: path_display,
                    indexed_files: stats.indexed_files,
                    total_chunks: stats.total_chunks,
                });
            }
            Ok(None) => {
                tracing::info!(path = %path_display, "indexing cancelled");
            }
            Err(e) => {
                let message = e.to_string();
                let percentage = match self.snapshot.get_info(&canonical) {
                    Some(CodebaseInfo::Indexing {
                        indexing_percentage,
                        ..
                    }) => Some(indexing_percentage),
                    _ => None,
                };
                if let Err(save_err) = self.snapshot.set_failed(&canonical, &message, percentage) {
                    tracing::warn!(error = %save_err, "failed to persist failed status");
                }
                tracing::error!(path = %path_display, error = %message, "indexing failed");
                reporter.report(&IndexProgressEvent::Failed {
                    path: path_display,
                    message,
                });
            }
        }
    }

    /// The indexing pipeline proper. `Ok(None)` means cancelled.
    #[allow(clippy::too_many_arguments)]
    async fn index_pipeline(
        &self,
        canonical: &Path,
        fp: &str,
        collection: &str,
        splitter: Arc<dyn Splitter>,
        options: &IndexOptions,
        cancel: &AtomicBool,
        reporter: &Arc<dyn IndexProgressReporter>,
    ) -> Result<Option<IndexStats>> {
        self.store
            .ensure_collection(collection, self.provider.dimension())
            .await?;

        let synchronizer = self.synchronizer_for(collection, canonical, options)?;
        let (diff, new_map) = synchronizer.diff()?;

        // Deletes for removed and modified files precede upserts.
        for path in diff.removed.iter().chain(diff.modified.iter()) {
            self.store
                .delete_by_predicate(collection, &DocumentFilter::by_path(path.clone()))
                .await?;
        }

        let mut files: Vec<String> = Vec::with_capacity(diff.added.len() + diff.modified.len());
        files.extend(diff.added.iter().cloned());
        files.extend(diff.modified.iter().cloned());
        files.sort();

        let display = canonical.to_string_lossy().to_string();
        let total_files = files.len() as u64;
        let mut processed_files = 0u64;
        let mut total_chunks = 0u64;
        let mut batch: Vec<Chunk> = Vec::new();
        let mut status = IndexCompletion::Completed;
        let mut unprocessed: Vec<&String> = Vec::new();

        for (index, file) in files.iter().enumerate() {
            if status == IndexCompletion::LimitReached {
                unprocessed = files[index..].iter().collect();
                break;
            }

            let absolute = canonical.join(file);
            let source = match std::fs::read_to_string(&absolute) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(path = %file, error = %e, "unreadable file, skipping");
                    processed_files += 1;
                    continue;
                }
            };

            let extension = file.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
            let language = language_for_extension(extension);
            let chunks = splitter.split(&source, language, file);

            // Dedup identical chunks within a file.
            let mut seen: HashSet<String> = HashSet::new();

            for chunk in chunks {
                if chunk.content.is_empty() || !seen.insert(chunk.document_id(fp)) {
                    continue;
                }

                if total_chunks >= self.config.chunk_limit as u64 {
                    tracing::warn!(
                        limit = self.config.chunk_limit,
                        "chunk limit reached, stopping ingestion"
                    );
                    status = IndexCompletion::LimitReached;
                    break;
                }

                batch.push(chunk);
                total_chunks += 1;

                if batch.len() >= self.config.embedding.batch_size {
                    if cancel.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    self.flush_batch(collection, fp, &mut batch).await?;
                }
            }

            processed_files += 1;
            let percentage = round1(processed_files as f64 / total_files.max(1) as f64 * 100.0);
            self.snapshot.set_indexing(canonical, percentage)?;
            reporter.report(&IndexProgressEvent::Indexing {
                path: display.clone(),
                processed_files,
                total_files,
                percentage,
            });
        }

        // Finish the in-flight batch even when the limit was hit.
        if !batch.is_empty() {
            if cancel.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.flush_batch(collection, fp, &mut batch).await?;
        }

        if cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }

        // Do not mark skipped files as seen, so the next run picks them up.
        let mut committed = new_map;
        for file in unprocessed {
            committed.remove(file.as_str());
        }
        synchronizer.commit(&committed)?;

        Ok(Some(IndexStats {
            indexed_files: processed_files,
            total_chunks,
            status,
        }))
    }

    /// Embed and upsert one batch. The provider retries retryable failures
    /// internally; the store gets one extra attempt for transient errors.
    async fn flush_batch(&self, collection: &str, fp: &str, batch: &mut Vec<Chunk>) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = self.provider.embed_batch(&texts).await?;

        let documents: Vec<HybridDocument> = batch
            .iter()
            .zip(vectors.into_iter())
            .map(|(chunk, vector)| {
                HybridDocument::from_chunk(fp, chunk, vector, tokenize(&chunk.content))
            })
            .collect();

        let mut attempt = 0;
        loop {
            match self.store.upsert(collection, &documents).await {
                Ok(()) => break,
                Err(e @ EngineError::DimensionMismatch { .. }) => return Err(e),
                Err(e) if attempt == 0 => {
                    tracing::warn!(error = %e, "upsert failed, retrying once");
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            }
        }

        batch.clear();
        Ok(())
    }

    fn synchronizer_for(
        &self,
        collection: &str,
        canonical: &Path,
        options: &IndexOptions,
    ) -> Result<Arc<FileSynchronizer>> {
        let mut synchronizers = self.synchronizers.lock().unwrap();
        if let Some(existing) = synchronizers.get(collection) {
            return Ok(Arc::clone(existing));
        }

        let mut ignore_patterns = self.config.custom_ignore_patterns.clone();
        ignore_patterns.extend(options.ignore_patterns.iter().cloned());

        let synchronizer = Arc::new(FileSynchronizer::new(
            canonical,
            &self.config.state_dir(),
            &SyncOptions {
                custom_extensions: options.custom_extensions.clone(),
                ignore_patterns,
                max_file_size: None,
            },
        )?);
        synchronizers.insert(collection.to_string(), Arc::clone(&synchronizer));
        Ok(synchronizer)
    }
}

fn preflight(path: &Path) -> Result<PathBuf> {
    let canonical = canonical_path(path);
    let metadata = std::fs::metadata(&canonical)
        .map_err(|_| EngineError::PathNotFound(canonical.clone()))?;
    if !metadata.is_dir() {
        return Err(EngineError::NotADirectory(canonical));
    }
    Ok(canonical)
}

/// Extension filter entries must look like `.ts` — a dot followed by
/// alphanumerics.
fn validate_extension(entry: &str) -> Result<()> {
    let valid = entry.len() >= 2
        && entry.starts_with('.')
        && entry[1..].chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(EngineError::InvalidExtensionFilter(entry.to_string()));
    }
    Ok(())
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
