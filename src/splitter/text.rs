//! Recursive character-based splitter.
//!
//! Splits text by trying a prioritized list of separators per language.
//! Pieces larger than `chunk_size` are re-split with the next separator in
//! the list; the empty separator hard-splits at character boundaries as a
//! last resort. Adjacent pieces are then merged greedily up to `chunk_size`,
//! and each chunk after the first is extended backwards by up to
//! `chunk_overlap` bytes so neighboring chunks share context.
//!
//! Line numbers are recomputed by counting newlines from the buffer's
//! origin; whitespace-only chunks are discarded.

use crate::models::Chunk;
use crate::splitter::{Splitter, SplitterOptions};

pub struct CharacterSplitter {
    options: SplitterOptions,
}

impl CharacterSplitter {
    pub fn new(options: SplitterOptions) -> Self {
        Self {
            options: options.normalized(),
        }
    }

    /// Separator cascade for a language tag. Prose-like formats split on
    /// headings and sentences first; code splits on blank lines and lines.
    fn separators_for(language: &str) -> &'static [&'static str] {
        match language {
            "markdown" => &["\n## ", "\n\n", "\n", ". ", " ", ""],
            _ => &["\n\n", "\n", ". ", " ", ""],
        }
    }

    /// Split a whole file.
    pub fn split_source(&self, source: &str, language: &str, relative_path: &str) -> Vec<Chunk> {
        self.split_with_offset(source, language, relative_path, 0)
    }

    /// Split a fragment whose first line is `line_offset` lines into the
    /// original file. Used by the AST splitter's last-resort fallback so
    /// chunk line numbers stay file-relative.
    pub fn split_with_offset(
        &self,
        source: &str,
        language: &str,
        relative_path: &str,
        line_offset: usize,
    ) -> Vec<Chunk> {
        if source.trim().is_empty() {
            return Vec::new();
        }

        let separators = Self::separators_for(language);

        let mut segments: Vec<(usize, usize)> = Vec::new();
        self.segment(source, 0, separators, &mut segments);

        let ranges = self.merge(&segments);

        let mut chunks = Vec::new();
        let mut previous_start = 0usize;

        for (index, &(start, end)) in ranges.iter().enumerate() {
            let mut begin = start;

            // Extend backwards into the previous chunk by up to
            // chunk_overlap bytes.
            if index > 0 && self.options.chunk_overlap > 0 {
                let mut overlapped = start.saturating_sub(self.options.chunk_overlap);
                overlapped = overlapped.max(previous_start);
                while !source.is_char_boundary(overlapped) {
                    overlapped += 1;
                }
                begin = overlapped;
            }

            let (trimmed_start, trimmed_end) = trim_range(source, begin, end);
            if trimmed_start >= trimmed_end {
                continue;
            }

            let content = &source[trimmed_start..trimmed_end];
            let start_line = line_offset + 1 + count_newlines(&source[..trimmed_start]);
            let end_line = start_line + count_newlines(content);

            chunks.push(Chunk::new(
                content.to_string(),
                relative_path,
                start_line,
                end_line,
                language,
                None,
            ));
            previous_start = start;
        }

        chunks
    }

    /// Recursively cut `text` (at byte `offset` within the original source)
    /// into contiguous segments no larger than `chunk_size`.
    fn segment(
        &self,
        text: &str,
        offset: usize,
        separators: &[&str],
        out: &mut Vec<(usize, usize)>,
    ) {
        if text.len() <= self.options.chunk_size {
            if !text.is_empty() {
                out.push((offset, offset + text.len()));
            }
            return;
        }

        let (sep, rest) = match separators.split_first() {
            Some((s, r)) => (*s, r),
            None => {
                self.hard_split(text, offset, out);
                return;
            }
        };

        if sep.is_empty() {
            self.hard_split(text, offset, out);
            return;
        }

        let mut piece_start = 0usize;
        let mut found = false;

        for (pos, _) in text.match_indices(sep) {
            found = true;
            // Keep the separator attached to the preceding piece.
            let piece_end = pos + sep.len();
            let piece = &text[piece_start..piece_end];
            if piece.len() > self.options.chunk_size {
                self.segment(piece, offset + piece_start, rest, out);
            } else if !piece.is_empty() {
                out.push((offset + piece_start, offset + piece_end));
            }
            piece_start = piece_end;
        }

        if !found {
            self.segment(text, offset, rest, out);
            return;
        }

        let tail = &text[piece_start..];
        if tail.len() > self.options.chunk_size {
            self.segment(tail, offset + piece_start, rest, out);
        } else if !tail.is_empty() {
            out.push((offset + piece_start, offset + text.len()));
        }
    }

    /// Last resort: cut at `chunk_size` byte strides, snapped to char
    /// boundaries.
    fn hard_split(&self, text: &str, offset: usize, out: &mut Vec<(usize, usize)>) {
        let mut start = 0usize;
        while start < text.len() {
            let mut end = (start + self.options.chunk_size).min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            if end == start {
                // Single oversize character; move past it.
                end = start + 1;
                while end < text.len() && !text.is_char_boundary(end) {
                    end += 1;
                }
            }
            out.push((offset + start, offset + end));
            start = end;
        }
    }

    /// Greedily merge adjacent segments into ranges no larger than
    /// `chunk_size`.
    fn merge(&self, segments: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for &(start, end) in segments {
            match current {
                Some((cur_start, _)) if end - cur_start <= self.options.chunk_size => {
                    current = Some((cur_start, end));
                }
                Some(range) => {
                    ranges.push(range);
                    current = Some((start, end));
                }
                None => current = Some((start, end)),
            }
        }

        if let Some(range) = current {
            ranges.push(range);
        }

        ranges
    }
}

impl Splitter for CharacterSplitter {
    fn split(&self, source: &str, language: &str, relative_path: &str) -> Vec<Chunk> {
        self.split_source(source, language, relative_path)
    }
}

/// Shrink a byte range so it starts and ends on non-whitespace, snapped to
/// char boundaries.
fn trim_range(source: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &source[start..end];
    let trimmed_front = slice.len() - slice.trim_start().len();
    let trimmed_back = slice.len() - slice.trim_end().len();
    (start + trimmed_front, end - trimmed_back)
}

fn count_newlines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> CharacterSplitter {
        CharacterSplitter::new(SplitterOptions {
            chunk_size,
            chunk_overlap,
        })
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = splitter(100, 10).split("hello world", "unknown", "a.txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello world");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(splitter(100, 10).split("", "unknown", "a.txt").is_empty());
        assert!(splitter(100, 10).split("  \n\n  ", "unknown", "a.txt").is_empty());
    }

    #[test]
    fn splits_on_blank_lines_first() {
        let text = "first paragraph line\n\nsecond paragraph line\n\nthird paragraph line";
        let chunks = splitter(30, 0).split(text, "unknown", "a.txt");
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.contains("first"));
        // Ordered by start line.
        for pair in chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line);
        }
    }

    #[test]
    fn line_numbers_follow_newlines() {
        let text = "line one\nline two\n\nline four\nline five";
        let chunks = splitter(20, 0).split(text, "unknown", "a.txt");
        assert_eq!(chunks[0].start_line, 1);
        let last = chunks.last().unwrap();
        assert_eq!(last.end_line, 5);
    }

    #[test]
    fn oversize_line_hard_splits() {
        let text = "x".repeat(250);
        let chunks = splitter(100, 0).split(&text, "unknown", "a.txt");
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.content.len() <= 100));
    }

    #[test]
    fn overlap_extends_backwards() {
        let text = "aaaa aaaa aaaa aaaa bbbb bbbb bbbb bbbb";
        let chunks = splitter(20, 5).split(text, "unknown", "a.txt");
        assert!(chunks.len() >= 2);
        // Second chunk starts with the tail of the first.
        let first = &chunks[0].content;
        let second = &chunks[1].content;
        let tail: String = first.chars().rev().take(4).collect::<String>();
        let tail: String = tail.chars().rev().collect();
        assert!(
            second.starts_with(tail.trim_start()),
            "expected overlap, first={:?} second={:?}",
            first,
            second
        );
    }

    #[test]
    fn overlap_is_bounded() {
        let text = (0..40).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let overlap = 8;
        let chunks = splitter(40, overlap).split(&text, "unknown", "a.txt");
        for pair in chunks.windows(2) {
            // Overlapping prefix of the next chunk cannot exceed the
            // configured overlap.
            let prev = &pair[0].content;
            let next = &pair[1].content;
            let shared = (1..=next.len().min(prev.len()))
                .rev()
                .find(|&n| prev.ends_with(&next[..n]))
                .unwrap_or(0);
            assert!(shared <= overlap, "shared {} > overlap {}", shared, overlap);
        }
    }

    #[test]
    fn deterministic() {
        let text = "alpha\n\nbeta\n\ngamma\n\ndelta gamma beta alpha";
        let a = splitter(12, 4).split(text, "unknown", "a.txt");
        let b = splitter(12, 4).split(text, "unknown", "a.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn line_offset_applies() {
        let chunks =
            splitter(100, 0).split_with_offset("fn body() {}\nmore", "rust", "a.rs", 41);
        assert_eq!(chunks[0].start_line, 42);
        assert_eq!(chunks[0].end_line, 43);
    }

    #[test]
    fn multibyte_text_stays_on_char_boundaries() {
        let text = "héllo wörld ".repeat(30);
        let chunks = splitter(50, 10).split(&text, "unknown", "a.txt");
        // Would panic on a bad boundary; also verify non-empty content.
        assert!(chunks.iter().all(|c| !c.content.is_empty()));
    }
}
