//! # Code Context
//!
//! **A local-first semantic code-search engine.**
//!
//! Code Context ingests a directory tree of source code, partitions each
//! file into semantically meaningful chunks, embeds every chunk through a
//! pluggable provider, stores the result in a local hybrid index (dense
//! vectors + BM25 keyword postings), and serves fused semantic + lexical
//! queries. Per-codebase state makes repeated indexings incremental: only
//! changed, added, or removed files are re-processed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ FileSynchronizer│──▶│ Splitter          │──▶│  SQLite      │
//! │ walk/hash/diff │   │ AST + character   │   │  FTS5 + vecs │
//! └────────────────┘   └──────────────────┘   └──────┬──────┘
//!          ▲                    │                    │
//!          │             EmbeddingProvider     hybrid planner
//!     SnapshotManager    (OpenAI/Voyage/...)   (RRF fusion)
//! ```
//!
//! ## Data Flow
//!
//! 1. The **synchronizer** ([`sync`]) walks the codebase, applies ignore
//!    rules, hashes files, and diffs against the previous run.
//! 2. Changed files are split into [`models::Chunk`]s by the AST splitter
//!    ([`splitter::ast`]) or the character splitter ([`splitter::text`]).
//! 3. Chunks are embedded in batches ([`embedding`]) and upserted as
//!    [`models::HybridDocument`]s into a per-codebase collection
//!    ([`store`]).
//! 4. Queries run both a dense and a sparse subquery and fuse them with
//!    Reciprocal Rank Fusion ([`search`]).
//! 5. The **snapshot** ([`snapshot`]) records per-codebase status
//!    (`indexing`, `indexed`, `indexfailed`) across restarts.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment + TOML configuration and validation |
//! | [`context`] | Engine orchestration: index, search, clear |
//! | [`embedding`] | Embedding provider trait and OpenAI/Voyage/Gemini/Ollama backends |
//! | [`error`] | Error taxonomy (`EngineError`) |
//! | [`fingerprint`] | Deterministic path fingerprints and the path registry |
//! | [`models`] | Core data types: `Chunk`, `HybridDocument`, search results |
//! | [`progress`] | Progress reporting (human/JSON/off, stderr) |
//! | [`search`] | Hybrid query planner with RRF fusion |
//! | [`snapshot`] | Persistent per-codebase status with V1→V2 migration |
//! | [`splitter`] | AST-aware and recursive-character chunking |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`sync`] | Incremental file synchronizer |

pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod progress;
pub mod search;
pub mod snapshot;
pub mod splitter;
pub mod store;
pub mod sync;

pub use context::{Context, IndexHandle, IndexOptions, SearchOptions};
pub use error::{EngineError, Result};
