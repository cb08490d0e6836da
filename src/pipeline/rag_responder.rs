//! Assembles a token-budgeted context window from retrieved chunks, calls
//! the LLM, and returns a cited answer. On permanent failure there is no
//! partial answer: the caller gets a structured error instead.

use crate::ai_gateway::{AiGateway, ChatMessage};
use crate::pipeline::quality::QualityEngine;
use crate::pipeline::retriever::Retriever;
use crate::types::{AppError, RagAnswer, Result, ScoredChunk, SearchFilters, SearchMode, Source};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

const MAX_CONTEXT_TOKENS: usize = 4000;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 200;

pub struct RagResponder {
    gateway: Arc<AiGateway>,
    retriever: Arc<Retriever>,
    quality: Arc<QualityEngine>,
    model: String,
}

/// Greedily packs chunks into the context window in rank order, stopping
/// once the running word-count proxy would exceed the token budget.
fn assemble_context(chunks: &[ScoredChunk], max_tokens: usize) -> (String, Vec<ScoredChunk>) {
    let mut used_tokens = 0;
    let mut used = Vec::new();
    let mut context = String::new();

    for scored in chunks {
        let tokens = scored.chunk.content.split_whitespace().count();
        if used_tokens + tokens > max_tokens && !used.is_empty() {
            break;
        }
        context.push_str(&format!("[chunk {}]\n{}\n\n", scored.chunk.id, scored.chunk.content));
        used_tokens += tokens;
        used.push(scored.clone());
    }
    (context, used)
}

fn sources_from(used: &[ScoredChunk]) -> Vec<Source> {
    used.iter().map(|s| Source { chunk_id: s.chunk.id.clone(), score: s.combined_score, page_numbers: s.chunk.page_numbers.clone() }).collect()
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase().split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 3).map(|w| w.to_string()).collect()
}

/// Fraction of the used sources the answer actually cites by `[chunk <id>]`.
fn source_attribution(answer: &str, used: &[ScoredChunk]) -> f32 {
    if used.is_empty() {
        return 0.0;
    }
    let cited = used.iter().filter(|s| answer.contains(&s.chunk.id)).count();
    cited as f32 / used.len() as f32
}

/// Fraction of the answer's distinctive words that don't appear anywhere in
/// the context it was grounded in, as a mechanical proxy for hallucination.
fn hallucination_rate(answer: &str, context: &str) -> f32 {
    let answer_words = words(answer);
    if answer_words.is_empty() {
        return 0.0;
    }
    let context_words = words(context);
    let unsupported = answer_words.iter().filter(|w| !context_words.contains(*w)).count();
    unsupported as f32 / answer_words.len() as f32
}

impl RagResponder {
    pub fn new(gateway: Arc<AiGateway>, retriever: Arc<Retriever>, quality: Arc<QualityEngine>, model: impl Into<String>) -> Self {
        Self { gateway, retriever, quality, model: model.into() }
    }

    /// Retrieves context for `query`, calls the LLM, and returns a cited
    /// answer. Retries transient provider failures up to three times with
    /// linear backoff; a permanent failure returns the error with no answer.
    pub async fn answer(&self, query: &str, workspace_id: &str, filters: &SearchFilters, mode: SearchMode, top_k: usize) -> Result<RagAnswer> {
        let started = Instant::now();
        let ranked = self.retriever.search_chunks(query, workspace_id, filters, mode, top_k).await?;
        if ranked.is_empty() {
            return Err(AppError::NotFound("no chunks matched the query".into()));
        }

        let (context, used) = assemble_context(&ranked, MAX_CONTEXT_TOKENS);

        let system = ChatMessage::system(
            "Answer the user's question using only the provided context chunks. \
             Cite chunk ids inline as [chunk <id>]. If the context does not contain \
             the answer, say so plainly instead of guessing.",
        );
        let user = ChatMessage::user(format!("Context:\n{context}\n\nQuestion: {query}"));

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self.gateway.chat(&self.model, vec![system.clone(), user.clone()]).await;
            match response.into_result() {
                Ok(answer) => {
                    let response_id = uuid::Uuid::new_v4().to_string();
                    self.score_answer(workspace_id, &response_id, &context, &answer, &used).await;
                    return Ok(RagAnswer {
                        response_id,
                        answer,
                        sources: sources_from(&used),
                        context_nodes_used: used.len() as u32,
                        latency_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    last_error = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(RETRY_BASE_DELAY_MS * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| AppError::Internal("rag responder exhausted retries".into())))
    }

    /// Judges the answer's coherence and factual consistency through the
    /// gateway, computes hallucination and source attribution mechanically
    /// against the context, and persists the result. Scoring never fails the
    /// answer itself: a judge-call failure is logged and skipped.
    async fn score_answer(&self, workspace_id: &str, response_id: &str, context: &str, answer: &str, used: &[ScoredChunk]) {
        let judged = match self.gateway.judge_response(&self.model, context, answer).await.into_result() {
            Ok(judged) => judged,
            Err(e) => {
                tracing::warn!(response_id, error = %e, "response judging failed, skipping quality scoring");
                return;
            }
        };

        let hallucination = hallucination_rate(answer, context);
        let attribution = source_attribution(answer, used);
        if let Err(e) = self.quality.score_response(workspace_id, response_id, judged.coherence, hallucination, attribution, judged.factual_consistency).await {
            tracing::warn!(response_id, error = %e, "failed to persist response quality metrics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    fn scored(id: &str, content: &str, score: f32) -> ScoredChunk {
        let mut chunk = Chunk::new("doc-1", "ws-1", 0, content.to_string(), vec![1]);
        chunk.id = id.to_string();
        ScoredChunk { chunk, similarity_score: score, boundary_score: None, validation_score: None, combined_score: score, content_type: None, validation_status: None }
    }

    #[test]
    fn assemble_context_stops_at_token_budget() {
        let big = "word ".repeat(3000);
        let chunks = vec![scored("a", &big, 0.9), scored("b", &big, 0.8)];
        let (_, used) = assemble_context(&chunks, 4000);
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn assemble_context_always_includes_at_least_one_chunk() {
        let huge = "word ".repeat(10000);
        let chunks = vec![scored("a", &huge, 0.9)];
        let (_, used) = assemble_context(&chunks, 10);
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn sources_from_preserves_rank_order_and_pages() {
        let used = vec![scored("a", "text a", 0.9), scored("b", "text b", 0.7)];
        let sources = sources_from(&used);
        assert_eq!(sources[0].chunk_id, "a");
        assert_eq!(sources[1].chunk_id, "b");
        assert_eq!(sources[0].page_numbers, vec![1]);
    }

    #[test]
    fn hallucination_rate_is_zero_when_answer_words_appear_in_context() {
        let context = "The Oslo Chair is made from solid oak and costs two hundred dollars";
        let answer = "The Oslo Chair is made from solid oak";
        assert_eq!(hallucination_rate(answer, context), 0.0);
    }

    #[test]
    fn hallucination_rate_is_high_for_unsupported_claims() {
        let context = "The Oslo Chair is made from solid oak";
        let answer = "The Stockholm Table is crafted from titanium alloy panels";
        assert!(hallucination_rate(answer, context) > 0.5);
    }

    #[test]
    fn source_attribution_counts_cited_chunks() {
        let used = vec![scored("chunk-a", "text a", 0.9), scored("chunk-b", "text b", 0.7)];
        let answer = "According to [chunk chunk-a], the material is oak.";
        assert_eq!(source_attribution(answer, &used), 0.5);
    }

    #[test]
    fn source_attribution_is_zero_without_sources() {
        assert_eq!(source_attribution("anything", &[]), 0.0);
    }
}
