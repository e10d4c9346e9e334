//! # Code Context CLI (`cctx`)
//!
//! Thin shell over the engine: index a codebase, search it, clear the
//! index, or inspect indexing status.
//!
//! ```bash
//! cctx index /path/to/repo
//! cctx search /path/to/repo "parse config file" --limit 5
//! cctx status /path/to/repo
//! cctx clear /path/to/repo
//! ```
//!
//! Configuration comes from the environment (see `config`), optionally
//! layered over a TOML file passed with `--config`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use code_context::config::Config;
use code_context::config::VectorStoreKind;
use code_context::context::{Context, IndexOptions, SearchOptions};
use code_context::embedding::create_provider;
use code_context::error::EngineError;
use code_context::progress::ProgressMode;
use code_context::snapshot::CodebaseInfo;
use code_context::store::sqlite::SqliteStore;
use code_context::store::VectorStore;

/// Code Context — local-first semantic code search.
#[derive(Parser)]
#[command(
    name = "cctx",
    about = "Code Context — hybrid semantic + keyword search over local codebases",
    version
)]
struct Cli {
    /// Optional TOML configuration file; environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a codebase (runs in the background; this command waits).
    Index {
        /// Codebase root directory.
        path: PathBuf,

        /// Clear any existing index first.
        #[arg(long)]
        force: bool,

        /// Splitter: `ast` (default) or `text`.
        #[arg(long)]
        splitter: Option<String>,

        /// Extra file extensions to index (e.g. `.vue`). Repeatable.
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Extra ignore globs. Repeatable.
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,

        /// Progress output: `human`, `json`, or `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search an indexed codebase.
    Search {
        /// Codebase root directory.
        path: PathBuf,

        /// Free-text query.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Minimum normalized dense similarity.
        #[arg(long, default_value_t = 0.3)]
        threshold: f64,

        /// Restrict results to these extensions (e.g. `.ts`). Repeatable.
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Rerank strategy: `rrf`, `weighted_sum`, `dense_only`, `sparse_only`.
        #[arg(long, default_value = "rrf")]
        strategy: String,
    },

    /// Drop a codebase's index, hash map, and snapshot entry.
    Clear {
        /// Codebase root directory.
        path: PathBuf,
    },

    /// Show the snapshot status for a codebase.
    Status {
        /// Codebase root directory.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let store: Arc<dyn VectorStore> = match config.store.provider {
        VectorStoreKind::SqliteVec => Arc::new(SqliteStore::open(&config.store_path()).await?),
        VectorStoreKind::Milvus => {
            anyhow::bail!(
                "VECTOR_DB_PROVIDER=milvus is not supported by this build; use sqlite-vec"
            );
        }
    };

    let needs_provider = matches!(cli.command, Commands::Index { .. } | Commands::Search { .. });
    let provider = if needs_provider {
        Arc::from(create_provider(&config.embedding)?)
    } else {
        // Clear/status never embed; a provider without credentials must
        // not block them.
        create_provider(&config.embedding)
            .map(Arc::from)
            .unwrap_or_else(|_| Arc::from(null_provider()))
    };

    let engine = Arc::new(Context::new(config, provider, store));

    match cli.command {
        Commands::Index {
            path,
            force,
            splitter,
            extensions,
            ignore_patterns,
            progress,
        } => {
            let mode = match progress.as_deref() {
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some("off") => ProgressMode::Off,
                Some(other) => anyhow::bail!("unknown progress mode: {}", other),
                None => ProgressMode::default_for_tty(),
            };

            let handle = engine
                .index_codebase(&path, IndexOptions {
                    force,
                    splitter,
                    custom_extensions: extensions,
                    ignore_patterns,
                    progress: Some(Arc::from(mode.reporter())),
                })
                .await?;
            handle.wait().await;

            match engine.get_indexing_status(&path) {
                Some(CodebaseInfo::Indexed {
                    indexed_files,
                    total_chunks,
                    index_status,
                    ..
                }) => {
                    println!("indexed {} files, {} chunks", indexed_files, total_chunks);
                    if index_status == code_context::snapshot::IndexCompletion::LimitReached {
                        println!("note: chunk limit reached; index is partial");
                    }
                }
                Some(CodebaseInfo::IndexFailed { error_message, .. }) => {
                    anyhow::bail!("indexing failed: {}", error_message);
                }
                other => anyhow::bail!("unexpected final status: {:?}", other),
            }
        }

        Commands::Search {
            path,
            query,
            limit,
            threshold,
            extensions,
            strategy,
        } => {
            let response = engine
                .search_code(&path, &query, SearchOptions {
                    limit,
                    threshold,
                    extension_filter: if extensions.is_empty() {
                        None
                    } else {
                        Some(extensions)
                    },
                    strategy: strategy.parse()?,
                })
                .await?;

            if response.partial {
                eprintln!("note: indexing in progress, results may be partial");
            }
            if response.results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, result) in response.results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}:{}-{}",
                    i + 1,
                    result.score,
                    result.relative_path,
                    result.start_line,
                    result.end_line
                );
                if let Some(kind) = &result.node_kind {
                    println!("    kind: {}", kind);
                }
                let excerpt: String = result.content.lines().take(3).collect::<Vec<_>>().join(" | ");
                println!("    {}", excerpt);
                println!();
            }
        }

        Commands::Clear { path } => {
            engine.clear_index(&path).await?;
            println!("cleared");
        }

        Commands::Status { path } => match engine.get_indexing_status(&path) {
            Some(CodebaseInfo::Indexing {
                indexing_percentage,
                last_updated,
            }) => {
                println!("indexing  {:.1}%  (updated {})", indexing_percentage, last_updated);
            }
            Some(CodebaseInfo::Indexed {
                indexed_files,
                total_chunks,
                index_status,
                last_updated,
            }) => {
                println!(
                    "indexed  {} files, {} chunks ({:?}, updated {})",
                    indexed_files, total_chunks, index_status, last_updated
                );
            }
            Some(CodebaseInfo::IndexFailed {
                error_message,
                last_attempted_percentage,
                last_updated,
            }) => {
                println!(
                    "failed at {}%: {} (updated {})",
                    last_attempted_percentage.unwrap_or(0.0),
                    error_message,
                    last_updated
                );
            }
            None => println!("not indexed"),
        },
    }

    Ok(())
}

/// Placeholder provider for read-only commands when no credentials are
/// configured.
fn null_provider() -> Box<dyn code_context::embedding::EmbeddingProvider> {
    struct NullProvider;

    #[async_trait::async_trait]
    impl code_context::embedding::EmbeddingProvider for NullProvider {
        fn provider_id(&self) -> &str {
            "null"
        }
        fn model_name(&self) -> &str {
            "null"
        }
        fn dimension(&self) -> u32 {
            1
        }
        async fn embed_batch(
            &self,
            _texts: &[String],
        ) -> code_context::error::Result<Vec<Vec<f32>>> {
            Err(EngineError::embedding_permanent(
                "no embedding provider configured",
            ))
        }
    }

    Box::new(NullProvider)
}
