//! AST-aware splitter built on tree-sitter.
//!
//! For supported languages the splitter parses the source and walks the
//! tree collecting candidate nodes from a per-language extraction set
//! (functions, methods, classes, interfaces, modules, top-level
//! declarations). Contiguous top-level imports are grouped into a single
//! chunk.
//!
//! A mandatory refinement pass keeps every chunk within `chunk_size`:
//! oversize candidates are descended into along named-child boundaries,
//! packing consecutive children into chunks, and anything that still does
//! not fit is handed to the character splitter with the file-relative line
//! offset. Adjacent small declarations are coalesced. AST chunks do not
//! overlap; overlap only appears where the character-splitter fallback ran.
//!
//! Parsing failures are never propagated: the whole file falls back to the
//! character splitter and a `parse_failed` event is logged.

use tree_sitter::{Language, Node, Parser};

use crate::models::Chunk;
use crate::splitter::text::CharacterSplitter;
use crate::splitter::{Splitter, SplitterOptions};

/// Languages with a bundled tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedLanguage {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
}

impl SupportedLanguage {
    /// Match a lowercase language tag; unknown tags fall through to the
    /// character splitter.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "rust" => Some(Self::Rust),
            "typescript" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "javascript" => Some(Self::JavaScript),
            "python" => Some(Self::Python),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    fn grammar(&self) -> Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Node kinds extracted as chunk candidates. These tables are tuned per
    /// grammar; the walk recurses into anything not listed (e.g. TS
    /// `export_statement` wrappers reach their inner declaration).
    fn extraction_kinds(&self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "impl_item",
                "struct_item",
                "enum_item",
                "trait_item",
                "mod_item",
                "const_item",
                "static_item",
                "macro_definition",
            ],
            Self::TypeScript | Self::Tsx => &[
                "function_declaration",
                "class_declaration",
                "interface_declaration",
                "type_alias_declaration",
                "enum_declaration",
                "lexical_declaration",
                "variable_declaration",
                "method_definition",
            ],
            Self::JavaScript => &[
                "function_declaration",
                "class_declaration",
                "lexical_declaration",
                "variable_declaration",
                "method_definition",
            ],
            Self::Python => &[
                "function_definition",
                "class_definition",
                "decorated_definition",
            ],
            Self::Go => &[
                "function_declaration",
                "method_declaration",
                "type_declaration",
                "const_declaration",
                "var_declaration",
            ],
        }
    }

    /// Top-level import kinds grouped into one chunk per contiguous run.
    fn import_kinds(&self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["use_declaration", "extern_crate_declaration"],
            Self::TypeScript | Self::Tsx | Self::JavaScript => &["import_statement"],
            Self::Python => &["import_statement", "import_from_statement"],
            Self::Go => &["import_declaration"],
        }
    }
}

/// Node kinds small enough in practice that adjacent runs are merged.
const COALESCE_KINDS: &[&str] = &[
    "const_item",
    "static_item",
    "lexical_declaration",
    "variable_declaration",
    "const_declaration",
    "var_declaration",
    "type_alias_declaration",
];

pub struct AstSplitter {
    options: SplitterOptions,
    fallback: CharacterSplitter,
}

impl AstSplitter {
    pub fn new(options: SplitterOptions) -> Self {
        let options = options.normalized();
        Self {
            options,
            fallback: CharacterSplitter::new(options),
        }
    }

    fn split_ast(
        &self,
        source: &str,
        lang: SupportedLanguage,
        language_tag: &str,
        relative_path: &str,
    ) -> Option<Vec<Chunk>> {
        let mut parser = Parser::new();
        parser.set_language(&lang.grammar()).ok()?;
        let tree = parser.parse(source, None)?;
        let root = tree.root_node();

        if root.has_error() {
            return None;
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        // Byte range + 0-based end row of the import group being built.
        let mut import_group: Option<(usize, usize, usize)> = None;

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            if lang.import_kinds().contains(&child.kind()) {
                import_group = match import_group {
                    Some((start, _, end_row)) if child.start_position().row <= end_row + 1 => {
                        Some((start, child.end_byte(), child.end_position().row))
                    }
                    Some(group) => {
                        self.emit_imports(group, source, language_tag, relative_path, &mut chunks);
                        Some((
                            child.start_byte(),
                            child.end_byte(),
                            child.end_position().row,
                        ))
                    }
                    None => Some((
                        child.start_byte(),
                        child.end_byte(),
                        child.end_position().row,
                    )),
                };
                continue;
            }

            if let Some(group) = import_group.take() {
                self.emit_imports(group, source, language_tag, relative_path, &mut chunks);
            }

            let mut candidates = Vec::new();
            collect_candidates(child, lang, &mut candidates);
            for node in candidates {
                self.refine(node, source, language_tag, relative_path, &mut chunks, 0);
            }
        }

        if let Some(group) = import_group {
            self.emit_imports(group, source, language_tag, relative_path, &mut chunks);
        }

        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        Some(self.coalesce(chunks))
    }

    fn emit_imports(
        &self,
        (start, end, _): (usize, usize, usize),
        source: &str,
        language_tag: &str,
        relative_path: &str,
        out: &mut Vec<Chunk>,
    ) {
        let text = &source[start..end];
        if text.trim().is_empty() {
            return;
        }
        if text.len() > self.options.chunk_size {
            let line = line_of(source, start);
            let mut pieces =
                self.fallback
                    .split_with_offset(text, language_tag, relative_path, line - 1);
            out.append(&mut pieces);
            return;
        }
        let start_line = line_of(source, start);
        out.push(Chunk::new(
            text.to_string(),
            relative_path,
            start_line,
            start_line + count_newlines(text),
            language_tag,
            Some("imports".to_string()),
        ));
    }

    /// Emit a candidate node, descending when it exceeds `chunk_size`.
    fn refine(
        &self,
        node: Node,
        source: &str,
        language_tag: &str,
        relative_path: &str,
        out: &mut Vec<Chunk>,
        depth: usize,
    ) {
        let text = &source[node.byte_range()];
        if text.trim().is_empty() {
            return;
        }

        if text.len() <= self.options.chunk_size {
            out.push(Chunk::new(
                text.to_string(),
                relative_path,
                node.start_position().row + 1,
                node.end_position().row + 1,
                language_tag,
                Some(node.kind().to_string()),
            ));
            return;
        }

        if node.named_child_count() == 0 || depth >= 16 {
            let mut pieces = self.fallback.split_with_offset(
                text,
                language_tag,
                relative_path,
                node.start_position().row,
            );
            out.append(&mut pieces);
            return;
        }

        // Pack consecutive children into chunks up to chunk_size; recurse
        // into children that are themselves oversize. The first run starts
        // at the node's own start so leading tokens (`fn name(...)`) stay
        // with the first chunk.
        let mut run: Option<(usize, usize)> = None;
        let mut first_run = true;

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let child_len = child.end_byte() - child.start_byte();

            if child_len > self.options.chunk_size {
                if let Some(range) = run.take() {
                    self.emit_region(range, source, language_tag, relative_path, out);
                }
                first_run = false;
                self.refine(child, source, language_tag, relative_path, out, depth + 1);
                continue;
            }

            run = match run {
                Some((start, _)) if child.end_byte() - start <= self.options.chunk_size => {
                    Some((start, child.end_byte()))
                }
                Some(range) => {
                    self.emit_region(range, source, language_tag, relative_path, out);
                    first_run = false;
                    Some((child.start_byte(), child.end_byte()))
                }
                None => {
                    let start = if first_run {
                        node.start_byte()
                    } else {
                        child.start_byte()
                    };
                    Some((start, child.end_byte()))
                }
            };
        }

        if let Some(range) = run {
            self.emit_region(range, source, language_tag, relative_path, out);
        }
    }

    fn emit_region(
        &self,
        (start, end): (usize, usize),
        source: &str,
        language_tag: &str,
        relative_path: &str,
        out: &mut Vec<Chunk>,
    ) {
        let text = &source[start..end];
        if text.trim().is_empty() {
            return;
        }
        let start_line = line_of(source, start);
        out.push(Chunk::new(
            text.to_string(),
            relative_path,
            start_line,
            start_line + count_newlines(text),
            language_tag,
            None,
        ));
    }

    /// Merge runs of adjacent small declarations (< `chunk_size / 4`) up to
    /// `chunk_size`, preserving order. Functions, classes, and other
    /// primary units are never merged away.
    fn coalesce(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let small = self.options.chunk_size / 4;
        let coalescable = |c: &Chunk| {
            c.content.len() < small
                && match c.node_kind.as_deref() {
                    Some(kind) => COALESCE_KINDS.contains(&kind),
                    None => true,
                }
        };

        let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            if let Some(last) = merged.last_mut() {
                let combined = last.content.len() + 1 + chunk.content.len();
                if coalescable(last)
                    && coalescable(&chunk)
                    && combined <= self.options.chunk_size
                    && chunk.start_line >= last.end_line
                {
                    let content = format!("{}\n{}", last.content, chunk.content);
                    *last = Chunk::new(
                        content,
                        &chunk.relative_path,
                        last.start_line,
                        chunk.end_line,
                        &chunk.language,
                        None,
                    );
                    continue;
                }
            }
            merged.push(chunk);
        }

        merged
    }
}

/// Walk a subtree; extraction-set nodes become candidates, everything else
/// is descended into (so wrappers like `export_statement` or Python
/// `decorated_definition` bodies are reached).
fn collect_candidates<'t>(node: Node<'t>, lang: SupportedLanguage, out: &mut Vec<Node<'t>>) {
    if lang.extraction_kinds().contains(&node.kind()) {
        out.push(node);
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_candidates(child, lang, out);
    }
}

fn line_of(source: &str, byte_offset: usize) -> usize {
    count_newlines(&source[..byte_offset]) + 1
}

fn count_newlines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}

impl Splitter for AstSplitter {
    fn split(&self, source: &str, language: &str, relative_path: &str) -> Vec<Chunk> {
        let lang = match SupportedLanguage::from_tag(language) {
            Some(lang) => lang,
            None => return self.fallback.split_source(source, language, relative_path),
        };

        match self.split_ast(source, lang, language, relative_path) {
            Some(chunks) if !chunks.is_empty() => chunks,
            Some(_) => self.fallback.split_source(source, language, relative_path),
            None => {
                tracing::debug!(
                    path = relative_path,
                    language,
                    "parse_failed, using character splitter"
                );
                self.fallback.split_source(source, language, relative_path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> AstSplitter {
        AstSplitter::new(SplitterOptions {
            chunk_size: 500,
            chunk_overlap: 50,
        })
    }

    #[test]
    fn extracts_rust_functions() {
        let source = "fn alpha() -> u32 {\n    1\n}\n\nfn beta() -> u32 {\n    2\n}\n";
        let chunks = splitter().split(source, "rust", "src/lib.rs");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.contains("alpha"));
        assert_eq!(chunks[0].node_kind.as_deref(), Some("function_item"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert!(chunks[1].content.contains("beta"));
        assert_eq!(chunks[1].start_line, 5);
    }

    #[test]
    fn groups_contiguous_imports() {
        let source = "use std::fs;\nuse std::io;\nuse std::path::Path;\n\nfn main() {\n    let _ = Path::new(\".\");\n}\n";
        let chunks = splitter().split(source, "rust", "src/main.rs");
        let imports: Vec<_> = chunks
            .iter()
            .filter(|c| c.node_kind.as_deref() == Some("imports"))
            .collect();
        assert_eq!(imports.len(), 1);
        assert!(imports[0].content.contains("std::fs"));
        assert!(imports[0].content.contains("std::path::Path"));
        assert_eq!(imports[0].start_line, 1);
        assert_eq!(imports[0].end_line, 3);
    }

    #[test]
    fn unknown_language_falls_back() {
        let source = "some plain text\n\nwith paragraphs";
        let chunks = splitter().split(source, "unknown", "notes.txt");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.node_kind.is_none()));
    }

    #[test]
    fn broken_source_falls_back() {
        // Unbalanced braces abort the parse; the file must still chunk.
        let source = "fn broken( {{{{ ]]]] woeful\nmore text here\n";
        let chunks = splitter().split(source, "rust", "src/broken.rs");
        assert!(!chunks.is_empty());
    }

    #[test]
    fn python_classes_and_functions() {
        let source = "class Greeter:\n    def greet(self):\n        return 'hi'\n\ndef standalone():\n    return 1\n";
        let chunks = splitter().split(source, "python", "app.py");
        let kinds: Vec<_> = chunks.iter().filter_map(|c| c.node_kind.as_deref()).collect();
        assert!(kinds.contains(&"class_definition"));
        assert!(kinds.contains(&"function_definition"));
    }

    #[test]
    fn typescript_interfaces() {
        let source = "interface Point {\n  x: number;\n  y: number;\n}\n\nfunction origin(): Point {\n  return { x: 0, y: 0 };\n}\n";
        let chunks = splitter().split(source, "typescript", "geom.ts");
        let kinds: Vec<_> = chunks.iter().filter_map(|c| c.node_kind.as_deref()).collect();
        assert!(kinds.contains(&"interface_declaration"));
        assert!(kinds.contains(&"function_declaration"));
    }

    #[test]
    fn oversize_function_is_refined() {
        let body: String = (0..120)
            .map(|i| format!("    let v{} = {} + {};\n", i, i, i))
            .collect();
        let source = format!("fn big() {{\n{}}}\n", body);
        let small = AstSplitter::new(SplitterOptions {
            chunk_size: 400,
            chunk_overlap: 40,
        });
        let chunks = small.split(&source, "rust", "src/big.rs");
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(
                c.content.len() <= 400 + 40,
                "chunk too large: {} bytes",
                c.content.len()
            );
        }
        // Ordered, file-relative line numbers.
        assert_eq!(chunks[0].start_line, 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line);
        }
    }

    #[test]
    fn small_declarations_coalesce() {
        let source = "const A: u32 = 1;\n\nconst B: u32 = 2;\n\nconst C: u32 = 3;\n";
        let chunks = splitter().split(source, "rust", "src/consts.rs");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("A"));
        assert!(chunks[0].content.contains("C"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 5);
    }

    #[test]
    fn functions_are_not_coalesced() {
        let source = "fn a() {}\nfn b() {}\nfn c() {}\n";
        let chunks = splitter().split(source, "rust", "src/lib.rs");
        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line);
        }
    }

    #[test]
    fn go_methods_extracted() {
        let source = "func Hello() {\n\tprintln(\"hi\")\n}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n";
        let chunks = splitter().split(source, "go", "server.go");
        let kinds: Vec<_> = chunks.iter().filter_map(|c| c.node_kind.as_deref()).collect();
        assert!(kinds.contains(&"function_declaration"));
        assert!(kinds.contains(&"method_declaration"));
    }
}
