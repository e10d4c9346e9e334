//! Persistent per-codebase indexing state.
//!
//! One snapshot file per host at `~/.context/mcp-codebase-snapshot.json`
//! records every codebase's status (`indexing`, `indexed`, `indexfailed`).
//! Writes are atomic (temp file + rename); a corrupt or missing file loads
//! as an empty snapshot and never throws past the manager.
//!
//! Legacy V1 files (`indexedCodebases` / `indexingCodebases`) are migrated
//! to V2 on load: codebases whose directories no longer exist are dropped
//! and the upgraded snapshot is saved back in V2 format.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const SNAPSHOT_FILE_NAME: &str = "mcp-codebase-snapshot.json";

const FORMAT_V2: &str = "v2";

/// Terminal completion state of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexCompletion {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "limitReached")]
    LimitReached,
}

/// Per-codebase status record, tagged by `status` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum CodebaseInfo {
    #[serde(rename = "indexing", rename_all = "camelCase")]
    Indexing {
        indexing_percentage: f64,
        last_updated: String,
    },
    #[serde(rename = "indexed", rename_all = "camelCase")]
    Indexed {
        indexed_files: u64,
        total_chunks: u64,
        index_status: IndexCompletion,
        last_updated: String,
    },
    #[serde(rename = "indexfailed", rename_all = "camelCase")]
    IndexFailed {
        error_message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_attempted_percentage: Option<f64>,
        last_updated: String,
    },
}

impl CodebaseInfo {
    pub fn is_indexing(&self) -> bool {
        matches!(self, CodebaseInfo::Indexing { .. })
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, CodebaseInfo::Indexed { .. })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    format_version: String,
    codebases: BTreeMap<String, CodebaseInfo>,
    last_updated: String,
}

/// Legacy V1 layout. `indexingCodebases` appeared both as a plain array
/// and as a path → percentage map in the wild; accept both.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1SnapshotFile {
    #[serde(default)]
    indexed_codebases: Vec<String>,
    #[serde(default)]
    indexing_codebases: V1Indexing,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum V1Indexing {
    List(Vec<String>),
    Map(BTreeMap<String, f64>),
}

impl Default for V1Indexing {
    fn default() -> Self {
        V1Indexing::List(Vec::new())
    }
}

/// Owner of the snapshot file. All mutation goes through this type; the
/// in-memory view is guarded by a mutex and every mutator saves atomically.
pub struct SnapshotManager {
    path: PathBuf,
    codebases: Mutex<BTreeMap<String, CodebaseInfo>>,
}

impl SnapshotManager {
    /// Load the snapshot from `<state_dir>/mcp-codebase-snapshot.json`,
    /// migrating V1 files and treating corrupt content as empty.
    pub fn load(state_dir: &Path) -> Self {
        let path = state_dir.join(SNAPSHOT_FILE_NAME);
        let (codebases, migrated) = read_snapshot(&path);

        let manager = Self {
            path,
            codebases: Mutex::new(codebases),
        };

        if migrated {
            if let Err(e) = manager.save() {
                tracing::warn!(error = %e, "failed to save migrated snapshot");
            }
        }

        manager
    }

    // ---- mutators ----

    pub fn set_indexing(&self, codebase: &Path, percentage: f64) -> Result<()> {
        self.update(codebase, CodebaseInfo::Indexing {
            indexing_percentage: percentage,
            last_updated: now_iso(),
        })
    }

    /// Idempotent: repeated calls with the same stats rewrite the entry.
    pub fn set_indexed(
        &self,
        codebase: &Path,
        indexed_files: u64,
        total_chunks: u64,
        index_status: IndexCompletion,
    ) -> Result<()> {
        self.update(codebase, CodebaseInfo::Indexed {
            indexed_files,
            total_chunks,
            index_status,
            last_updated: now_iso(),
        })
    }

    /// Records the failure message and preserves the last reported
    /// percentage for diagnostics.
    pub fn set_failed(
        &self,
        codebase: &Path,
        error_message: &str,
        last_attempted_percentage: Option<f64>,
    ) -> Result<()> {
        self.update(codebase, CodebaseInfo::IndexFailed {
            error_message: error_message.to_string(),
            last_attempted_percentage,
            last_updated: now_iso(),
        })
    }

    pub fn remove(&self, codebase: &Path) -> Result<()> {
        self.codebases
            .lock()
            .unwrap()
            .remove(&key_for(codebase));
        self.save()
    }

    // ---- pure reads ----

    pub fn get_info(&self, codebase: &Path) -> Option<CodebaseInfo> {
        self.codebases
            .lock()
            .unwrap()
            .get(&key_for(codebase))
            .cloned()
    }

    pub fn list_indexed(&self) -> Vec<String> {
        self.codebases
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, info)| info.is_indexed())
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn list_indexing(&self) -> Vec<String> {
        self.codebases
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, info)| info.is_indexing())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// All known codebase paths, for registry rebuilding.
    pub fn list_all(&self) -> Vec<String> {
        self.codebases.lock().unwrap().keys().cloned().collect()
    }

    // ---- persistence ----

    fn update(&self, codebase: &Path, info: CodebaseInfo) -> Result<()> {
        self.codebases
            .lock()
            .unwrap()
            .insert(key_for(codebase), info);
        self.save()
    }

    fn save(&self) -> Result<()> {
        let file = SnapshotFile {
            format_version: FORMAT_V2.to_string(),
            codebases: self.codebases.lock().unwrap().clone(),
            last_updated: now_iso(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, serde_json::to_string_pretty(&file)?)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

fn key_for(codebase: &Path) -> String {
    crate::fingerprint::canonical_path(codebase)
        .to_string_lossy()
        .to_string()
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Read and, if needed, migrate the snapshot file.
/// Returns `(codebases, needs_resave)`.
fn read_snapshot(path: &Path) -> (BTreeMap<String, CodebaseInfo>, bool) {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return (BTreeMap::new(), false),
    };

    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt snapshot, starting empty");
            return (BTreeMap::new(), false);
        }
    };

    let format_version = value.get("formatVersion").and_then(|v| v.as_str());

    if format_version == Some(FORMAT_V2) {
        match serde_json::from_value::<SnapshotFile>(value) {
            Ok(file) => (file.codebases, false),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable v2 snapshot, starting empty");
                (BTreeMap::new(), false)
            }
        }
    } else {
        // formatVersion absent or "v1": legacy layout.
        match serde_json::from_value::<V1SnapshotFile>(value) {
            Ok(v1) => (migrate_v1(v1), true),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable v1 snapshot, starting empty");
                (BTreeMap::new(), false)
            }
        }
    }
}

/// V1 → V2: indexed entries get zeroed stats, indexing entries keep their
/// percentage (0 for the array form). Dead paths are dropped.
fn migrate_v1(v1: V1SnapshotFile) -> BTreeMap<String, CodebaseInfo> {
    let mut codebases = BTreeMap::new();
    let now = now_iso();

    for path in v1.indexed_codebases {
        if !Path::new(&path).is_dir() {
            continue;
        }
        codebases.insert(path, CodebaseInfo::Indexed {
            indexed_files: 0,
            total_chunks: 0,
            index_status: IndexCompletion::Completed,
            last_updated: now.clone(),
        });
    }

    let indexing: Vec<(String, f64)> = match v1.indexing_codebases {
        V1Indexing::List(paths) => paths.into_iter().map(|p| (p, 0.0)).collect(),
        V1Indexing::Map(map) => map.into_iter().collect(),
    };

    for (path, percentage) in indexing {
        if !Path::new(&path).is_dir() {
            continue;
        }
        codebases.insert(path, CodebaseInfo::Indexing {
            indexing_percentage: percentage,
            last_updated: now.clone(),
        });
    }

    codebases
}
