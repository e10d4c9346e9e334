//! File-level change detection for incremental indexing.
//!
//! The [`FileSynchronizer`] walks a codebase (skipping symlinked
//! directories), applies merged ignore rules (engine defaults +
//! `.gitignore` + user patterns), hashes candidate files, and diffs the
//! result against the hash map persisted from the previous run. The hash
//! map lives at `<state_dir>/hashes/codebase_<fingerprint>.json` and is
//! written atomically (temp file + rename).

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::fingerprint::hash_map_file_name;
use crate::models::SyncDiff;

/// Files above this size are skipped (`size_exceeded`).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Extensions indexed when no custom list is supplied (no leading dot).
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs", "go", "java", "c", "h", "cpp", "cc",
    "hpp", "hh", "cs", "rb", "php", "swift", "kt", "kts", "scala", "m", "mm", "md", "markdown",
    "ipynb",
];

/// Built-in excludes: dependency/output directories and binary formats.
const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/target/**",
    "**/.venv/**",
    "**/venv/**",
    "**/__pycache__/**",
    "**/.idea/**",
    "**/.vscode/**",
    "**/coverage/**",
    "**/*.min.js",
    "**/*.map",
    "**/*.png",
    "**/*.jpg",
    "**/*.jpeg",
    "**/*.gif",
    "**/*.ico",
    "**/*.pdf",
    "**/*.zip",
    "**/*.tar",
    "**/*.gz",
    "**/*.exe",
    "**/*.dll",
    "**/*.so",
    "**/*.dylib",
    "**/*.bin",
    "**/*.o",
    "**/*.a",
    "**/*.class",
    "**/*.jar",
    "**/*.woff",
    "**/*.woff2",
    "**/*.ttf",
];

/// Knobs for a synchronizer instance.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Extra extensions to index, with or without the leading dot.
    pub custom_extensions: Vec<String>,
    /// Extra ignore globs merged after defaults and `.gitignore`.
    pub ignore_patterns: Vec<String>,
    /// Overrides [`DEFAULT_MAX_FILE_SIZE`] when set.
    pub max_file_size: Option<u64>,
}

pub struct FileSynchronizer {
    root: PathBuf,
    state_file: PathBuf,
    ignore: GlobSet,
    extensions: HashSet<String>,
    max_file_size: u64,
}

impl FileSynchronizer {
    pub fn new(root: &Path, state_dir: &Path, options: &SyncOptions) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        patterns.extend(read_gitignore(root));
        patterns.extend(options.ignore_patterns.iter().cloned());

        let ignore = build_globset(&patterns)?;

        let mut extensions: HashSet<String> = DEFAULT_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect();
        for ext in &options.custom_extensions {
            extensions.insert(ext.trim_start_matches('.').to_lowercase());
        }

        Ok(Self {
            root: root.to_path_buf(),
            state_file: state_dir.join("hashes").join(hash_map_file_name(root)),
            ignore,
            extensions,
            max_file_size: options.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
        })
    }

    /// Walk the codebase and hash every candidate file.
    /// Keys are forward-slash relative paths; `BTreeMap` keeps them sorted.
    pub fn walk(&self) -> Result<BTreeMap<String, String>> {
        let mut hashes = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if entry.file_type().is_dir() && entry.path_is_symlink() {
                    return false;
                }
                let relative = relative_str(&self.root, entry.path());
                if entry.file_type().is_dir() {
                    // Match the directory itself so "**/node_modules/**"
                    // style patterns prune the walk early.
                    return !self.ignore.is_match(format!("{}/", relative))
                        && !self.ignore.is_match(&relative);
                }
                true
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                EngineError::Io(std::io::Error::other(format!("walk failed: {}", e)))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = relative_str(&self.root, entry.path());
            if self.ignore.is_match(&relative) {
                continue;
            }

            let extension = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if !self.extensions.contains(&extension) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_file_size {
                tracing::debug!(path = %relative, size, reason = "size_exceeded", "skipping file");
                continue;
            }

            hashes.insert(relative, hash_file(entry.path())?);
        }

        Ok(hashes)
    }

    /// Hash map persisted by the previous run; empty when none exists or
    /// the file is unreadable.
    pub fn load_previous(&self) -> BTreeMap<String, String> {
        match std::fs::read_to_string(&self.state_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Walk and diff against the persisted state. Returns the diff plus
    /// the fresh hash map to pass to [`commit`](Self::commit) once the
    /// changes have been applied.
    pub fn diff(&self) -> Result<(SyncDiff, BTreeMap<String, String>)> {
        let previous = self.load_previous();
        let current = self.walk()?;

        let mut diff = SyncDiff::default();

        for (path, hash) in &current {
            match previous.get(path) {
                None => diff.added.push(path.clone()),
                Some(old) if old != hash => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in previous.keys() {
            if !current.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }

        // BTreeMap iteration is already sorted; keep the invariant explicit.
        diff.added.sort();
        diff.modified.sort();
        diff.removed.sort();

        Ok((diff, current))
    }

    /// Persist the hash map atomically so a subsequent diff on an
    /// unchanged tree is empty.
    pub fn commit(&self, hashes: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.state_file.with_extension("json.tmp");
        std::fs::write(&temp, serde_json::to_string_pretty(hashes)?)?;
        std::fs::rename(&temp, &self.state_file)?;
        Ok(())
    }

    /// Drop the persisted state (used by `clear_index`).
    pub fn delete_state(&self) -> Result<()> {
        match std::fs::remove_file(&self.state_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn relative_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Stream a file through SHA-256, skipping a leading UTF-8 BOM.
fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut first = true;

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        let mut bytes = &buffer[..n];
        if first {
            if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
                bytes = &bytes[3..];
            }
            first = false;
        }
        hasher.update(bytes);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Read `.gitignore` at the codebase root and convert its lines to globs.
/// Negations are not supported and are skipped.
fn read_gitignore(root: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(root.join(".gitignore")) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut patterns = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let trimmed = line.trim_end_matches('/');
        if let Some(anchored) = trimmed.strip_prefix('/') {
            patterns.push(anchored.to_string());
            patterns.push(format!("{}/**", anchored));
        } else {
            patterns.push(format!("**/{}", trimmed));
            patterns.push(format!("**/{}/**", trimmed));
        }
    }
    patterns
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            EngineError::InvalidConfig(format!("invalid ignore pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::InvalidConfig(format!("ignore patterns: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let state = tmp.path().join("state");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&state).unwrap();
        (tmp, root, state)
    }

    fn sync(root: &Path, state: &Path) -> FileSynchronizer {
        FileSynchronizer::new(root, state, &SyncOptions::default()).unwrap()
    }

    #[test]
    fn walk_hashes_candidate_files() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("x.ts"), "const x = 1;").unwrap();
        std::fs::write(root.join("y.ts"), "const y = 2;").unwrap();
        std::fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();

        let hashes = sync(&root, &state).walk().unwrap();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains_key("x.ts"));
        assert!(hashes.contains_key("y.ts"));
    }

    #[test]
    fn walk_skips_default_ignores() {
        let (_tmp, root, state) = setup();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/app.js"), "y").unwrap();

        let hashes = sync(&root, &state).walk().unwrap();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("src/app.js"));
    }

    #[test]
    fn walk_honors_gitignore() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join(".gitignore"), "generated/\n*.snap\n").unwrap();
        std::fs::create_dir_all(root.join("generated")).unwrap();
        std::fs::write(root.join("generated/code.ts"), "x").unwrap();
        std::fs::write(root.join("keep.ts"), "y").unwrap();
        std::fs::write(root.join("test.snap.ts"), "z").unwrap();

        let hashes = sync(&root, &state).walk().unwrap();
        assert!(hashes.contains_key("keep.ts"));
        assert!(!hashes.contains_key("generated/code.ts"));
    }

    #[test]
    fn walk_skips_oversize_files() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("big.ts"), "x".repeat(64)).unwrap();
        std::fs::write(root.join("small.ts"), "y").unwrap();

        let synchronizer = FileSynchronizer::new(
            &root,
            &state,
            &SyncOptions {
                max_file_size: Some(32),
                ..Default::default()
            },
        )
        .unwrap();

        let hashes = synchronizer.walk().unwrap();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("small.ts"));
    }

    #[test]
    fn custom_extensions_extend_defaults() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("config.xyz"), "data").unwrap();
        std::fs::write(root.join("main.rs"), "fn main() {}").unwrap();

        let synchronizer = FileSynchronizer::new(
            &root,
            &state,
            &SyncOptions {
                custom_extensions: vec![".xyz".to_string()],
                ..Default::default()
            },
        )
        .unwrap();

        let hashes = synchronizer.walk().unwrap();
        assert!(hashes.contains_key("config.xyz"));
        assert!(hashes.contains_key("main.rs"));
    }

    #[test]
    fn bom_is_normalized() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("bom.ts"), b"\xEF\xBB\xBFconst x = 1;").unwrap();
        std::fs::write(root.join("plain.ts"), "const x = 1;").unwrap();

        let hashes = sync(&root, &state).walk().unwrap();
        assert_eq!(hashes["bom.ts"], hashes["plain.ts"]);
    }

    #[test]
    fn first_diff_reports_everything_added() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("x.ts"), "one").unwrap();
        std::fs::write(root.join("y.ts"), "two").unwrap();

        let (diff, _) = sync(&root, &state).diff().unwrap();
        assert_eq!(diff.added, vec!["x.ts".to_string(), "y.ts".to_string()]);
        assert!(diff.modified.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn diff_after_commit_is_empty() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("x.ts"), "one").unwrap();

        let synchronizer = sync(&root, &state);
        let (_, map) = synchronizer.diff().unwrap();
        synchronizer.commit(&map).unwrap();

        let (diff, _) = synchronizer.diff().unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn incremental_diff_detects_add_modify_remove() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("x.ts"), "original x").unwrap();
        std::fs::write(root.join("y.ts"), "original y").unwrap();

        let synchronizer = sync(&root, &state);
        let (_, map) = synchronizer.diff().unwrap();
        synchronizer.commit(&map).unwrap();

        std::fs::remove_file(root.join("y.ts")).unwrap();
        std::fs::write(root.join("x.ts"), "edited x").unwrap();
        std::fs::write(root.join("z.ts"), "new z").unwrap();

        let (diff, _) = synchronizer.diff().unwrap();
        assert_eq!(diff.added, vec!["z.ts".to_string()]);
        assert_eq!(diff.modified, vec!["x.ts".to_string()]);
        assert_eq!(diff.removed, vec!["y.ts".to_string()]);
    }

    #[test]
    fn delete_state_resets_to_full_reindex() {
        let (_tmp, root, state) = setup();
        std::fs::write(root.join("x.ts"), "content").unwrap();

        let synchronizer = sync(&root, &state);
        let (_, map) = synchronizer.diff().unwrap();
        synchronizer.commit(&map).unwrap();
        synchronizer.delete_state().unwrap();

        let (diff, _) = synchronizer.diff().unwrap();
        assert_eq!(diff.added.len(), 1);
    }
}
