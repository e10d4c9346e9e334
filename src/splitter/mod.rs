//! Chunking pipeline: the [`Splitter`] contract and its two
//! implementations.
//!
//! - [`ast::AstSplitter`] parses supported languages with tree-sitter and
//!   extracts structural units (functions, classes, ...), refining oversize
//!   units and falling back to the character splitter when parsing fails.
//! - [`text::CharacterSplitter`] splits any text by a prioritized list of
//!   separators, respecting size and overlap bounds.
//!
//! Results are ordered by start line. Every chunk has non-empty content and
//! `end_line >= start_line`.

pub mod ast;
pub mod text;

use crate::config::{SplitterKind, SplitterSettings};
use crate::models::Chunk;

/// Size bounds shared by both splitters.
#[derive(Debug, Clone, Copy)]
pub struct SplitterOptions {
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Overlap carried into the next chunk by the character splitter, in
    /// bytes. Always strictly less than `chunk_size`.
    pub chunk_overlap: usize,
}

impl Default for SplitterOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2500,
            chunk_overlap: 300,
        }
    }
}

impl SplitterOptions {
    /// Clamp a configuration that violates `chunk_overlap < chunk_size`.
    pub fn normalized(mut self) -> Self {
        if self.chunk_size == 0 {
            self.chunk_size = SplitterOptions::default().chunk_size;
        }
        if self.chunk_overlap >= self.chunk_size {
            let clamped = self.chunk_size / 10;
            tracing::warn!(
                chunk_size = self.chunk_size,
                chunk_overlap = self.chunk_overlap,
                clamped,
                "chunk_overlap must be smaller than chunk_size; clamping"
            );
            self.chunk_overlap = clamped;
        }
        self
    }
}

impl From<&SplitterSettings> for SplitterOptions {
    fn from(settings: &SplitterSettings) -> Self {
        SplitterOptions {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        }
        .normalized()
    }
}

/// Splits source text into ordered chunks.
pub trait Splitter: Send + Sync {
    fn split(&self, source: &str, language: &str, relative_path: &str) -> Vec<Chunk>;
}

/// Instantiate the configured splitter.
pub fn create_splitter(kind: SplitterKind, options: SplitterOptions) -> Box<dyn Splitter> {
    match kind {
        SplitterKind::Ast => Box::new(ast::AstSplitter::new(options)),
        SplitterKind::Text => Box::new(text::CharacterSplitter::new(options)),
    }
}

/// Map a file extension (without dot) to a lowercase language tag.
/// Unrecognized extensions map to `"unknown"`, which routes the file to the
/// character splitter.
pub fn language_for_extension(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "rs" => "rust",
        "py" => "python",
        "ts" => "typescript",
        "tsx" => "tsx",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "md" | "markdown" => "markdown",
        _ => "unknown",
    }
}
