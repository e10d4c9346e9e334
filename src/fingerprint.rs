//! Path fingerprinting and the path ↔ fingerprint registry.
//!
//! Every per-codebase artifact — the vector collection, the file-hash map,
//! the busy lock — is keyed by the same 8-hex-character fingerprint of the
//! canonical absolute path. This module is the single source of that
//! computation; nothing else in the crate hashes paths.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use sha2::{Digest, Sha256};

/// Collection names on the wire are `hybrid_code_chunks_<fingerprint>`.
pub const COLLECTION_PREFIX: &str = "hybrid_code_chunks_";

const FINGERPRINT_LEN: usize = 8;

/// Canonicalize a path lexically: make it absolute, normalize separators,
/// and resolve `.` / `..` segments. Symbolic links are not followed, so two
/// distinct link spellings of the same directory keep distinct fingerprints.
pub fn canonical_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Compute the 8-character lowercase hex fingerprint of a path.
///
/// Pure: the same path always yields the same fingerprint, across processes.
pub fn fingerprint(path: &Path) -> String {
    let canonical = canonical_path(path);
    let normalized = canonical.to_string_lossy().replace('\\', "/");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    digest[..FINGERPRINT_LEN].to_string()
}

/// Collection name for a codebase path.
pub fn collection_name(path: &Path) -> String {
    format!("{}{}", COLLECTION_PREFIX, fingerprint(path))
}

/// File name of the persisted hash map for a codebase path.
pub fn hash_map_file_name(path: &Path) -> String {
    format!("codebase_{}.json", fingerprint(path))
}

/// Bidirectional lookup between codebase paths and fingerprints.
///
/// The forward direction is [`fingerprint`] itself; the registry exists so
/// that a collection or snapshot entry can be resolved back to the path it
/// was created for. Rebuilt from the snapshot on startup and extended as
/// paths are seen.
pub struct PathRegistry {
    by_fingerprint: RwLock<HashMap<String, PathBuf>>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self {
            by_fingerprint: RwLock::new(HashMap::new()),
        }
    }

    /// Record a path, returning its fingerprint.
    pub fn record(&self, path: &Path) -> String {
        let fp = fingerprint(path);
        let canonical = canonical_path(path);
        self.by_fingerprint
            .write()
            .unwrap()
            .insert(fp.clone(), canonical);
        fp
    }

    /// Resolve a fingerprint back to the path it was recorded for.
    pub fn path_for(&self, fp: &str) -> Option<PathBuf> {
        self.by_fingerprint.read().unwrap().get(fp).cloned()
    }

    /// Resolve a collection name back to its codebase path.
    pub fn path_for_collection(&self, collection: &str) -> Option<PathBuf> {
        let fp = collection.strip_prefix(COLLECTION_PREFIX)?;
        self.path_for(fp)
    }

    pub fn forget(&self, fp: &str) {
        self.by_fingerprint.write().unwrap().remove(fp);
    }
}

impl Default for PathRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_eight_hex_chars() {
        let fp = fingerprint(Path::new("/tmp/foo"));
        assert_eq!(fp.len(), 8);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint(Path::new("/tmp/foo"));
        let b = fingerprint(Path::new("/tmp/foo"));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_resolves_dot_segments() {
        let plain = fingerprint(Path::new("/tmp/foo"));
        let dotted = fingerprint(Path::new("/tmp/./bar/../foo"));
        assert_eq!(plain, dotted);
    }

    #[test]
    fn distinct_paths_diverge() {
        assert_ne!(
            fingerprint(Path::new("/tmp/foo")),
            fingerprint(Path::new("/tmp/bar"))
        );
    }

    #[test]
    fn collection_name_uses_fingerprint() {
        let path = Path::new("/tmp/foo");
        let name = collection_name(path);
        assert_eq!(name, format!("hybrid_code_chunks_{}", fingerprint(path)));
    }

    #[test]
    fn registry_round_trip() {
        let registry = PathRegistry::new();
        let fp = registry.record(Path::new("/tmp/project"));
        assert_eq!(registry.path_for(&fp), Some(PathBuf::from("/tmp/project")));

        let collection = collection_name(Path::new("/tmp/project"));
        assert_eq!(
            registry.path_for_collection(&collection),
            Some(PathBuf::from("/tmp/project"))
        );
    }

    #[test]
    fn registry_unknown_fingerprint() {
        let registry = PathRegistry::new();
        assert_eq!(registry.path_for("deadbeef"), None);
    }
}
