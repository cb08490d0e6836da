//! Turns the PDF Extractor's markdown stream into a sequence of `Chunk`s
//! sized by token count, respecting heading/section boundaries and never
//! splitting inside a table row or code block.

use crate::types::{Chunk, MarkdownSegment};
use crate::utils::config::ChunkingConfig;
use text_splitter::{ChunkConfig, ChunkSizer, TextSplitter};

/// A splitter that counts tokens by whitespace-delimited words.
///
/// `tiktoken-rs` gives an exact BPE token count but requires a model's
/// encoding table at runtime; a word count is a stable, dependency-free
/// proxy that keeps chunk sizing deterministic across providers.
#[derive(Clone, Copy)]
struct WordTokenSizer;

impl ChunkSizer for WordTokenSizer {
    fn size(&self, chunk: &str) -> usize {
        chunk.split_whitespace().count()
    }
}

pub struct ChunkerOptions {
    pub size_tokens: usize,
    pub overlap_tokens: usize,
    pub respect_headings: bool,
    pub min_chunk_tokens: usize,
}

impl From<&ChunkingConfig> for ChunkerOptions {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            size_tokens: config.chunk_size_tokens,
            overlap_tokens: config.chunk_overlap_tokens,
            respect_headings: true,
            min_chunk_tokens: config.chunk_overlap_tokens,
        }
    }
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self { size_tokens: 1000, overlap_tokens: 100, respect_headings: true, min_chunk_tokens: 100 }
    }
}

/// One section of the markdown stream bounded by heading markers or a
/// table/code run, carrying the pages it was assembled from. An `atomic`
/// section is a contiguous run of table/code segments and is never handed to
/// the token splitter, so it always survives as a single chunk piece.
struct Section {
    text: String,
    pages: Vec<u32>,
    atomic: bool,
}

impl Section {
    fn empty() -> Self {
        Self { text: String::new(), pages: Vec::new(), atomic: false }
    }
}

/// Groups segments into sections, breaking at heading segments when
/// `respect_headings` is set and whenever a run of table/code segments
/// starts or ends. A heading, or a table/code boundary, starts a new section
/// rather than joining the previous one, so sections never straddle an
/// h1/h2/h3 break and a table/code run is never merged with surrounding
/// prose.
fn group_into_sections(segments: &[MarkdownSegment], respect_headings: bool) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section::empty();

    for segment in segments {
        let heading_break = respect_headings && segment.is_heading && !current.text.is_empty();
        let atomic_break = !current.text.is_empty() && segment.is_table_or_code != current.atomic;
        if heading_break || atomic_break {
            sections.push(std::mem::replace(&mut current, Section::empty()));
        }
        if current.text.is_empty() {
            current.atomic = segment.is_table_or_code;
        }
        if !current.text.is_empty() {
            current.text.push_str("\n\n");
        }
        current.text.push_str(&segment.markdown);
        for page in &segment.pages {
            if !current.pages.contains(page) {
                current.pages.push(*page);
            }
        }
    }
    if !current.text.trim().is_empty() {
        sections.push(current);
    }
    sections
}

/// Splits one section's text into token-sized pieces using sentence- and
/// paragraph-aware boundaries. An atomic (table/code) section is returned
/// whole, regardless of size, so a chunk boundary can never land inside a
/// table row or code block.
fn split_section(section: &Section, options: &ChunkerOptions) -> Vec<String> {
    let text = section.text.as_str();
    if section.atomic || text.split_whitespace().count() <= options.size_tokens {
        return vec![text.to_string()];
    }
    let config = ChunkConfig::new(options.size_tokens).with_sizer(WordTokenSizer).with_overlap(options.overlap_tokens).unwrap_or_else(|_| ChunkConfig::new(options.size_tokens).with_sizer(WordTokenSizer));
    let splitter = TextSplitter::new(config);
    splitter.chunks(text).map(|s| s.to_string()).collect()
}

/// Merges chunks shorter than `min_chunk_tokens` into the following chunk so
/// a stray trailing fragment never becomes its own chunk.
fn merge_short_chunks(pieces: Vec<(String, Vec<u32>)>, min_tokens: usize) -> Vec<(String, Vec<u32>)> {
    let mut merged: Vec<(String, Vec<u32>)> = Vec::new();
    for (text, pages) in pieces {
        let too_short = merged.last().map(|(prev, _)| prev.split_whitespace().count() < min_tokens).unwrap_or(false);
        if too_short {
            let (prev_text, prev_pages) = merged.last_mut().unwrap();
            prev_text.push_str("\n\n");
            prev_text.push_str(&text);
            for page in pages {
                if !prev_pages.contains(&page) {
                    prev_pages.push(page);
                }
            }
        } else {
            merged.push((text, pages));
        }
    }
    merged
}

/// Transforms a document's markdown stream into an ordered, non-overlapping
/// (except for the configured token overlap) sequence of `Chunk`s.
pub fn chunk_document(document_id: &str, workspace_id: &str, segments: &[MarkdownSegment], options: &ChunkerOptions) -> Vec<Chunk> {
    let sections = group_into_sections(segments, options.respect_headings);

    let mut pieces: Vec<(String, Vec<u32>)> = Vec::new();
    for section in &sections {
        for piece in split_section(section, options) {
            pieces.push((piece, section.pages.clone()));
        }
    }

    let pieces = merge_short_chunks(pieces, options.min_chunk_tokens);

    pieces
        .into_iter()
        .enumerate()
        .filter(|(_, (text, _))| !text.trim().is_empty())
        .map(|(index, (text, pages))| Chunk::new(document_id, workspace_id, index as u32, text, pages))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(markdown: &str, page: u32) -> MarkdownSegment {
        MarkdownSegment::new(markdown, vec![page])
    }

    fn heading(markdown: &str, page: u32) -> MarkdownSegment {
        let mut s = MarkdownSegment::new(markdown, vec![page]);
        s.is_heading = true;
        s
    }

    fn table_or_code(markdown: &str, page: u32) -> MarkdownSegment {
        let mut s = MarkdownSegment::new(markdown, vec![page]);
        s.is_table_or_code = true;
        s
    }

    #[test]
    fn chunk_indices_are_dense_from_zero() {
        let segments = vec![segment("short text", 1)];
        let chunks = chunk_document("doc-1", "ws-1", &segments, &ChunkerOptions::default());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
        }
    }

    #[test]
    fn single_short_segment_produces_one_chunk() {
        let segments = vec![segment("a short paragraph of text", 3)];
        let chunks = chunk_document("doc-1", "ws-1", &segments, &ChunkerOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_numbers, vec![3]);
    }

    #[test]
    fn page_numbers_are_tracked_through_the_stream() {
        let segments = vec![segment("intro text on page one", 1), segment("more text on page two", 2)];
        let chunks = chunk_document("doc-1", "ws-1", &segments, &ChunkerOptions::default());
        assert!(chunks[0].page_numbers.contains(&1));
        assert!(chunks[0].page_numbers.contains(&2));
    }

    #[test]
    fn heading_starts_a_new_section() {
        let big_para: String = std::iter::repeat("word ").take(1200).collect();
        let segments = vec![segment(&big_para, 1), heading("# Next Section", 2), segment("a short tail", 2)];
        let chunks = chunk_document("doc-1", "ws-1", &segments, &ChunkerOptions::default());
        assert!(chunks.iter().any(|c| c.content.contains("Next Section")));
    }

    #[test]
    fn large_section_is_split_into_multiple_chunks() {
        let big_para: String = std::iter::repeat("word ").take(3000).collect();
        let segments = vec![segment(&big_para, 1)];
        let options = ChunkerOptions { size_tokens: 1000, overlap_tokens: 100, respect_headings: true, min_chunk_tokens: 50 };
        let chunks = chunk_document("doc-1", "ws-1", &segments, &options);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn short_trailing_chunk_is_merged_forward() {
        let pieces = vec![("a tiny fragment".to_string(), vec![1]), ("a normal length paragraph of several words here".to_string(), vec![1])];
        let merged = merge_short_chunks(pieces, 10);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn empty_segments_produce_no_chunks() {
        let chunks = chunk_document("doc-1", "ws-1", &[], &ChunkerOptions::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn table_spanning_the_chunk_size_is_never_split() {
        let row: String = std::iter::repeat("| col1 | col2 | col3 |\n").take(400).collect();
        let segments = vec![segment("intro paragraph", 1), table_or_code(&row, 1)];
        let options = ChunkerOptions { size_tokens: 200, overlap_tokens: 20, respect_headings: true, min_chunk_tokens: 10 };
        let chunks = chunk_document("doc-1", "ws-1", &segments, &options);
        let table_chunk = chunks.iter().find(|c| c.content.contains("col1")).expect("table survives as a chunk");
        assert_eq!(table_chunk.content.matches("| col1 |").count(), 400);
    }

    #[test]
    fn table_is_not_merged_with_surrounding_prose_section() {
        let segments = vec![segment("before the table", 1), table_or_code("| a | b |\n| 1 | 2 |", 1), segment("after the table", 1)];
        let sections = group_into_sections(&segments, true);
        assert_eq!(sections.len(), 3);
        assert!(sections[1].atomic);
        assert!(!sections[0].atomic);
        assert!(!sections[2].atomic);
    }

    #[test]
    fn options_from_chunking_config_round_trip() {
        let config = ChunkingConfig { chunk_size_tokens: 800, chunk_overlap_tokens: 80 };
        let options = ChunkerOptions::from(&config);
        assert_eq!(options.size_tokens, 800);
        assert_eq!(options.overlap_tokens, 80);
    }
}
