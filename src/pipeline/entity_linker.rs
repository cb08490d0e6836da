//! Links chunks, products, and images with weighted-signal relevance scores.
//!
//! Each of the three relationship kinds blends a different mix of page
//! proximity, embedding similarity, and text/visual overlap; a score below
//! the configured floor is discarded rather than persisted, so a weak,
//! noisy link never reaches the store.

use crate::db::MetadataStore;
use crate::pipeline::embedder::TEXT_MODEL;
use crate::types::{
    cosine_similarity, Chunk, ChunkImageRelationType, ChunkImageRelationship, ChunkProductRelationType, ChunkProductRelationship, EntityType, Image,
    Product, ProductImageRelationType, ProductImageRelationship, Result,
};
use std::collections::HashSet;
use std::sync::Arc;

pub struct EntityLinker {
    store: Arc<dyn MetadataStore>,
    min_relevance: f32,
}

fn page_proximity(chunk_pages: &[u32], target_page: u32) -> f32 {
    let distance = chunk_pages.iter().map(|p| (*p as i64 - target_page as i64).unsigned_abs()).min().unwrap_or(u64::MAX);
    match distance {
        0 => 1.0,
        1 => 0.5,
        _ => 0.0,
    }
}

fn mention_score(chunk_text: &str, product_name: &str) -> f32 {
    if product_name.trim().is_empty() {
        return 0.0;
    }
    if chunk_text.to_lowercase().contains(&product_name.to_lowercase()) {
        1.0
    } else {
        0.0
    }
}

fn page_overlap(pages_a: &[u32], page_b: u32) -> f32 {
    if pages_a.contains(&page_b) {
        1.0
    } else {
        0.0
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase().split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2).map(|w| w.to_string()).collect()
}

/// Jaccard overlap between `text`'s words and an image caption's words. Both
/// sides live in the same (plain-text) space, unlike a chunk/product's
/// `TEXT_MODEL` embedding and an image's `IMAGE_MODEL` embedding, which are
/// different vector spaces and never comparable by cosine.
fn caption_similarity(text: &str, caption: Option<&str>) -> f32 {
    let Some(caption) = caption else { return 0.0 };
    let a = tokenize(text);
    let b = tokenize(caption);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f32;
    let union = a.union(&b).count() as f32;
    intersection / union
}

impl EntityLinker {
    pub fn new(store: Arc<dyn MetadataStore>, min_relevance: f32) -> Self {
        Self { store, min_relevance }
    }

    /// Scores `chunk` against `product` as
    /// `0.4*page_proximity + 0.3*embedding_cosine + 0.3*mention_score`,
    /// persisting the link if it clears the relevance floor.
    pub async fn link_chunk_to_product(&self, workspace_id: &str, chunk: &Chunk, product: &Product, product_page: u32) -> Result<Option<ChunkProductRelationship>> {
        let proximity = page_proximity(&chunk.page_numbers, product_page);
        let mention = mention_score(&chunk.content, &product.name);
        let embedding_score = self.embedding_similarity(workspace_id, &chunk.id, &product.id).await?;

        let relevance = 0.4 * proximity + 0.3 * embedding_score + 0.3 * mention;
        if relevance < self.min_relevance {
            return Ok(None);
        }

        let relationship_type = if mention >= proximity && mention >= embedding_score {
            ChunkProductRelationType::Source
        } else if proximity >= embedding_score {
            ChunkProductRelationType::Related
        } else {
            ChunkProductRelationType::Component
        };

        let relationship = ChunkProductRelationship {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: chunk.id.clone(),
            product_id: product.id.clone(),
            workspace_id: workspace_id.to_string(),
            relationship_type,
            relevance_score: relevance,
        };
        self.store.insert_chunk_product_relationship(&relationship).await?;
        Ok(Some(relationship))
    }

    /// Scores `product` against `image` as
    /// `0.4*page_overlap + 0.4*visual_similarity + 0.2*detection_confidence`.
    /// `visual_similarity` is the word overlap between the product's name and
    /// the image's caption, since the product's text embedding and the
    /// image's visual embedding live in different spaces and can't be
    /// compared directly.
    pub async fn link_product_to_image(&self, workspace_id: &str, product: &Product, product_page: u32, image: &Image) -> Result<Option<ProductImageRelationship>> {
        let overlap = page_overlap(&[product_page], image.page_number);
        let visual_similarity = caption_similarity(&product.name, image.metadata.caption.as_deref());
        let detection_confidence = image.metadata.detection_confidence.unwrap_or(0.0);

        let relevance = 0.4 * overlap + 0.4 * visual_similarity + 0.2 * detection_confidence;
        if relevance < self.min_relevance {
            return Ok(None);
        }

        let relationship_type = if overlap >= 1.0 && visual_similarity > 0.7 {
            ProductImageRelationType::Depicts
        } else if visual_similarity > 0.5 {
            ProductImageRelationType::Illustrates
        } else {
            ProductImageRelationType::Related
        };

        let relationship = ProductImageRelationship {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            image_id: image.id.clone(),
            workspace_id: workspace_id.to_string(),
            relationship_type,
            relevance_score: relevance,
        };
        self.store.insert_product_image_relationship(&relationship).await?;
        Ok(Some(relationship))
    }

    /// Scores `chunk` against `image` as
    /// `0.5*same_page + 0.3*visual_text_similarity + 0.2*spatial_proximity`.
    /// Spatial proximity is 1.0 whenever both live on the same page (no
    /// finer-grained bounding-box distance is available at this layer) and
    /// 0.0 otherwise, so it only ever reinforces the same-page signal.
    pub async fn link_chunk_to_image(&self, workspace_id: &str, chunk: &Chunk, image: &Image) -> Result<Option<ChunkImageRelationship>> {
        let same_page = page_overlap(&chunk.page_numbers, image.page_number);
        let visual_text_similarity = caption_similarity(&chunk.content, image.metadata.caption.as_deref());
        let spatial_proximity = same_page;

        let relevance = 0.5 * same_page + 0.3 * visual_text_similarity + 0.2 * spatial_proximity;
        if relevance < self.min_relevance {
            return Ok(None);
        }

        let relationship_type = if same_page >= 1.0 && visual_text_similarity > 0.6 {
            ChunkImageRelationType::Depicts
        } else if visual_text_similarity > 0.4 {
            ChunkImageRelationType::Illustrates
        } else if same_page >= 1.0 {
            ChunkImageRelationType::Example
        } else {
            ChunkImageRelationType::Related
        };

        let relationship = ChunkImageRelationship {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: chunk.id.clone(),
            image_id: image.id.clone(),
            workspace_id: workspace_id.to_string(),
            relationship_type,
            relevance_score: relevance,
        };
        self.store.insert_chunk_image_relationship(&relationship).await?;
        Ok(Some(relationship))
    }

    async fn embedding_similarity(&self, workspace_id: &str, chunk_id: &str, product_id: &str) -> Result<f32> {
        let Some(chunk_embedding) = self.store.get_embedding(workspace_id, chunk_id, EntityType::Chunk, TEXT_MODEL).await? else { return Ok(0.0) };
        let Some(product_embedding) = self.store.get_embedding(workspace_id, product_id, EntityType::Product, TEXT_MODEL).await? else { return Ok(0.0) };
        Ok(cosine_similarity(&chunk_embedding.vector, &product_embedding.vector).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_proximity_decays_with_distance() {
        assert_eq!(page_proximity(&[5], 5), 1.0);
        assert_eq!(page_proximity(&[5], 6), 0.5);
        assert_eq!(page_proximity(&[5], 4), 0.5);
        assert_eq!(page_proximity(&[5], 20), 0.0);
    }

    #[test]
    fn mention_score_is_case_insensitive() {
        assert_eq!(mention_score("The OSLO CHAIR is solid oak", "Oslo Chair"), 1.0);
        assert_eq!(mention_score("a generic paragraph", "Oslo Chair"), 0.0);
    }

    #[test]
    fn mention_score_is_zero_for_empty_product_name() {
        assert_eq!(mention_score("anything", ""), 0.0);
    }

    #[test]
    fn page_overlap_matches_containment() {
        assert_eq!(page_overlap(&[1, 2, 3], 2), 1.0);
        assert_eq!(page_overlap(&[1, 2, 3], 9), 0.0);
    }

    #[test]
    fn caption_similarity_is_zero_without_a_caption() {
        assert_eq!(caption_similarity("Oslo Chair solid oak", None), 0.0);
    }

    #[test]
    fn caption_similarity_rewards_shared_words() {
        let score = caption_similarity("the Oslo Chair in solid oak", Some("Oslo Chair, solid oak finish"));
        assert!(score > 0.5, "expected strong overlap, got {score}");
    }

    #[test]
    fn caption_similarity_is_zero_for_unrelated_text() {
        let score = caption_similarity("the Oslo Chair in solid oak", Some("a completely unrelated photograph"));
        assert_eq!(score, 0.0);
    }
}
