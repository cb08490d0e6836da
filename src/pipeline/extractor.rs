//! Turns a PDF's raw bytes into an ordered stream of markdown segments and
//! the images embedded in it.
//!
//! Extraction runs against `oxidize_pdf`'s reader: the document is opened
//! once, then walked page by page so segment order matches reading order.
//! A PDF that fails to parse at all is a permanent failure; everything else
//! (object store I/O) surfaces as transient so the caller's retry policy
//! applies.

use crate::db::object_store::content_hash;
use crate::db::{MetadataStore, ObjectStore};
use crate::types::{AppError, BoundingBox, Image, ImageMetadata, MarkdownSegment, Result};
use oxidize_pdf::parser::{PdfDocument, PdfReader};
use std::io::Cursor;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub extract_text: bool,
    pub extract_tables: bool,
    pub extract_images: bool,
    pub extract_words: bool,
    pub max_image_dim: u32,
    pub margins: Margins,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Margins {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            extract_text: true,
            extract_tables: true,
            extract_images: true,
            extract_words: false,
            max_image_dim: 4096,
            margins: Margins::default(),
        }
    }
}

pub struct ExtractionOutcome {
    pub segments: Vec<MarkdownSegment>,
    pub images: Vec<Image>,
}

pub struct Extractor {
    store: Arc<dyn MetadataStore>,
    object_store: Arc<dyn ObjectStore>,
}

/// A line is a heading if it starts with a markdown `#` after fencing: the
/// content-stream walk below renders headings this way based on font size,
/// so downstream code never has to reparse the PDF to find section breaks.
fn is_heading_line(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// A line looks like a table row or fenced code so the chunker never splits
/// inside one.
fn is_table_or_code_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('|') || trimmed.starts_with("```")
}

fn page_text_to_segments(page_number: u32, text: &str) -> Vec<MarkdownSegment> {
    let mut segments = Vec::new();
    for block in text.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut segment = MarkdownSegment::new(block.to_string(), vec![page_number]);
        segment.is_heading = is_heading_line(block);
        segment.is_table_or_code = block.lines().any(is_table_or_code_line);
        segments.push(segment);
    }
    segments
}

impl Extractor {
    pub fn new(store: Arc<dyn MetadataStore>, object_store: Arc<dyn ObjectStore>) -> Self {
        Self { store, object_store }
    }

    /// Parses `pdf_bytes`, producing markdown segments in reading order and
    /// content-hash-deduplicated images, persisting each new image to the
    /// object store and the metadata store along the way.
    pub async fn extract(&self, workspace_id: &str, document_id: &str, pdf_bytes: &[u8], options: &ExtractionOptions) -> Result<ExtractionOutcome> {
        let cursor = Cursor::new(pdf_bytes.to_vec());
        let document = PdfReader::new(cursor)
            .map_err(|e| AppError::Permanent(format!("malformed PDF: {e}")))?
            .into_document();

        let page_count = document.page_count().map_err(|e| AppError::Permanent(format!("failed to read page tree: {e}")))?;

        let mut segments = Vec::new();
        let mut images = Vec::new();

        for page_index in 0..page_count {
            let page_number = page_index as u32 + 1;

            if options.extract_text {
                let text = extract_page_text(&document, page_index as u32).map_err(|e| AppError::Permanent(format!("failed to extract text from page {page_number}: {e}")))?;
                segments.extend(page_text_to_segments(page_number, &text));
            }

            if options.extract_images {
                let page_images = self.extract_page_images(workspace_id, document_id, &document, page_index as u32, page_number, options.max_image_dim).await?;
                images.extend(page_images);
            }
        }

        Ok(ExtractionOutcome { segments, images })
    }

    async fn extract_page_images(
        &self,
        workspace_id: &str,
        document_id: &str,
        document: &PdfDocument<Cursor<Vec<u8>>>,
        page_index: u32,
        page_number: u32,
        max_image_dim: u32,
    ) -> Result<Vec<Image>> {
        let raw_images = oxidize_pdf::operations::extract_images_from_page(document, page_index)
            .map_err(|e| AppError::Permanent(format!("failed to extract images from page {page_number}: {e}")))?;

        let mut kept = Vec::new();
        for raw in raw_images {
            let hash = content_hash(&raw.data);
            if let Some(existing) = self.store.find_image_by_content_hash(workspace_id, &hash).await? {
                kept.push(existing);
                continue;
            }

            let (width, height) = clamp_dimensions(raw.width, raw.height, max_image_dim);
            let image_id = uuid::Uuid::new_v4().to_string();
            let storage_uri = self
                .object_store
                .put_image(workspace_id, document_id, &image_id, raw.format.extension(), &raw.data)
                .await?;
            let public_uri = self.object_store.public_uri(&storage_uri);

            let image = Image {
                id: image_id,
                document_id: document_id.to_string(),
                workspace_id: workspace_id.to_string(),
                page_number,
                storage_uri,
                public_uri,
                format: raw.format.extension().to_string(),
                width,
                height,
                size_bytes: raw.data.len() as u64,
                metadata: ImageMetadata {
                    detection_confidence: None,
                    bbox: raw.bbox.map(|b| BoundingBox { x: b.x, y: b.y, width: b.width, height: b.height }),
                    caption: None,
                    content_hash: hash,
                },
            };
            kept.push(image);
        }
        Ok(kept)
    }
}

fn clamp_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let largest = width.max(height);
    if largest <= max_dim || largest == 0 {
        return (width, height);
    }
    let scale = max_dim as f64 / largest as f64;
    (((width as f64) * scale).round() as u32, ((height as f64) * scale).round() as u32)
}

/// Thin adapter over the reader's content-stream text extractor: collapses
/// positioned fragments back into a single reading-order string per page.
fn extract_page_text(document: &PdfDocument<Cursor<Vec<u8>>>, page_index: u32) -> oxidize_pdf::parser::ParseResult<String> {
    let mut extractor = oxidize_pdf::text::TextExtractor::new();
    let extracted = extractor.extract_from_page(document, page_index)?;
    Ok(extracted.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_line_is_detected() {
        assert!(is_heading_line("# Section One"));
        assert!(!is_heading_line("Regular paragraph text"));
    }

    #[test]
    fn table_row_is_detected() {
        assert!(is_table_or_code_line("| col1 | col2 |"));
        assert!(is_table_or_code_line("```rust"));
        assert!(!is_table_or_code_line("plain text"));
    }

    #[test]
    fn page_text_splits_on_blank_lines() {
        let segments = page_text_to_segments(1, "first paragraph\n\nsecond paragraph");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].pages, vec![1]);
    }

    #[test]
    fn empty_blocks_are_skipped() {
        let segments = page_text_to_segments(1, "one\n\n\n\ntwo");
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn clamp_dimensions_leaves_small_images_untouched() {
        assert_eq!(clamp_dimensions(800, 600, 4096), (800, 600));
    }

    #[test]
    fn clamp_dimensions_scales_down_oversized_images() {
        let (w, h) = clamp_dimensions(8000, 4000, 4096);
        assert_eq!(w, 4096);
        assert_eq!(h, 2048);
    }

    #[test]
    fn default_options_enable_text_tables_and_images() {
        let options = ExtractionOptions::default();
        assert!(options.extract_text);
        assert!(options.extract_tables);
        assert!(options.extract_images);
        assert!(!options.extract_words);
    }
}
