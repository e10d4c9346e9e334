//! Engine configuration.
//!
//! Configuration is layered: an optional TOML file provides the base, and
//! the environment variables below override it. Defaults apply when neither
//! is set.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `EMBEDDING_PROVIDER` | `openai`, `voyage`, `gemini`, or `ollama` (lowercase only) |
//! | `EMBEDDING_MODEL` | Model identifier; provider default applied if unset |
//! | `EMBEDDING_DIMENSION` | Manual dimension override; required for unknown models |
//! | `EMBEDDING_BATCH_SIZE` | Embedding batch cap (default 100) |
//! | `CHUNK_LIMIT` | Per-codebase chunk cap (default 450000) |
//! | `CUSTOM_IGNORE_PATTERNS` | Comma-separated glob list merged into ignore rules |
//! | `VECTOR_DB_PROVIDER` | `sqlite-vec` (default) or `milvus` |
//! | `VECTOR_DB_PATH` | Override for the local store location |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Default embedding batch cap.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 100;
/// Default per-codebase chunk cap.
pub const DEFAULT_CHUNK_LIMIT: usize = 450_000;

/// Embedding provider identifiers. Parsed from lowercase names only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    OpenAi,
    Voyage,
    Gemini,
    Ollama,
}

impl FromStr for EmbeddingProviderKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "voyage" => Ok(Self::Voyage),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown embedding provider '{}' (expected openai, voyage, gemini, or ollama)",
                other
            ))),
        }
    }
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Voyage => "voyage",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

/// Vector store backend identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum VectorStoreKind {
    #[serde(rename = "sqlite-vec")]
    SqliteVec,
    #[serde(rename = "milvus")]
    Milvus,
}

impl FromStr for VectorStoreKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite-vec" => Ok(Self::SqliteVec),
            "milvus" => Ok(Self::Milvus),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown vector store provider '{}' (expected sqlite-vec or milvus)",
                other
            ))),
        }
    }
}

/// Splitter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitterKind {
    #[default]
    Ast,
    Text,
}

impl FromStr for SplitterKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ast" => Ok(Self::Ast),
            "text" => Ok(Self::Text),
            other => Err(EngineError::InvalidSplitter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dimension: Option<u32>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            model: None,
            dimension: None,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::OpenAi
}
fn default_batch_size() -> usize {
    DEFAULT_EMBEDDING_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: VectorStoreKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: VectorStoreKind::SqliteVec,
            path: None,
        }
    }
}

fn default_store_provider() -> VectorStoreKind {
    VectorStoreKind::SqliteVec
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplitterSettings {
    #[serde(default)]
    pub kind: SplitterKind,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self {
            kind: SplitterKind::Ast,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2500
}
fn default_chunk_overlap() -> usize {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub splitter: SplitterSettings,
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,
    #[serde(default)]
    pub custom_ignore_patterns: Vec<String>,
    /// Directory for the snapshot and per-codebase hash maps.
    /// Defaults to `~/.context`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_chunk_limit() -> usize {
    DEFAULT_CHUNK_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            splitter: SplitterSettings::default(),
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            custom_ignore_patterns: Vec::new(),
            state_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay the
    /// environment variables, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    EngineError::InvalidConfig(format!(
                        "failed to read config file {}: {}",
                        p.display(),
                        e
                    ))
                })?;
                toml::from_str(&content).map_err(|e| {
                    EngineError::InvalidConfig(format!("failed to parse config file: {}", e))
                })?
            }
            None => Config::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment-only configuration.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("EMBEDDING_PROVIDER") {
            self.embedding.provider = v.parse()?;
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Ok(v) = std::env::var("EMBEDDING_DIMENSION") {
            self.embedding.dimension = Some(parse_env("EMBEDDING_DIMENSION", &v)?);
        }
        if let Ok(v) = std::env::var("EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = parse_env("EMBEDDING_BATCH_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("CHUNK_LIMIT") {
            self.chunk_limit = parse_env("CHUNK_LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("CUSTOM_IGNORE_PATTERNS") {
            self.custom_ignore_patterns.extend(
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
        if let Ok(v) = std::env::var("VECTOR_DB_PROVIDER") {
            self.store.provider = v.parse()?;
        }
        if let Ok(v) = std::env::var("VECTOR_DB_PATH") {
            self.store.path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.embedding.batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }
        if self.chunk_limit == 0 {
            return Err(EngineError::InvalidConfig(
                "chunk_limit must be > 0".to_string(),
            ));
        }
        if self.splitter.chunk_size == 0 {
            return Err(EngineError::InvalidConfig(
                "splitter.chunk_size must be > 0".to_string(),
            ));
        }
        if let Some(0) = self.embedding.dimension {
            return Err(EngineError::InvalidConfig(
                "EMBEDDING_DIMENSION must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory for snapshot and hash-map state, default `~/.context`.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| default_state_dir())
    }

    /// Location of the SQLite store file, default `<state_dir>/index.db`.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("index.db"))
    }
}

/// `~/.context`, the well-known per-host state directory.
pub fn default_state_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".context")
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        EngineError::InvalidConfig(format!("{} has invalid value '{}'", name, value))
    })
}
