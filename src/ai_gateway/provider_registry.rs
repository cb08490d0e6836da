//! `AiGateway`: the single outbound AI surface. Wraps one primary provider and
//! an optional fallback behind retry-with-backoff and a per-provider circuit
//! breaker, and exposes the six operations every pipeline stage calls through.

use super::client::{AiProvider, ChatMessage, GatewayResponse};
use super::rate_limit::RateLimiterRegistry;
use crate::types::{AppError, ContentType, Result};
use crate::utils::config::PipelineConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Default)]
struct CircuitState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

struct CircuitBreaker {
    states: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self { states: Mutex::new(HashMap::new()) }
    }

    fn is_open(&self, provider: &str) -> bool {
        let states = self.states.lock();
        match states.get(provider).and_then(|s| s.opened_at) {
            Some(opened_at) => opened_at.elapsed() < CIRCUIT_COOLDOWN,
            None => false,
        }
    }

    fn record_success(&self, provider: &str) {
        let mut states = self.states.lock();
        states.insert(provider.to_string(), CircuitState::default());
    }

    fn record_failure(&self, provider: &str) {
        let mut states = self.states.lock();
        let state = states.entry(provider.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD {
            state.opened_at = Some(Instant::now());
        }
    }
}

/// Classification output for one chunk.
#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub content_type: ContentType,
    pub confidence: f32,
    pub is_product_candidate: bool,
}

/// Enrichment output for one candidate chunk.
#[derive(Debug, Clone)]
pub enum EnrichResult {
    Rejected { reason: String },
    Accepted(EnrichedProduct),
}

/// LLM-judged quality signals for a generated answer.
#[derive(Debug, Clone)]
pub struct JudgeResult {
    pub coherence: f32,
    pub factual_consistency: f32,
}

#[derive(Debug, Clone)]
pub struct EnrichedProduct {
    pub name: String,
    pub short_description: String,
    pub long_description: String,
    pub properties: serde_json::Value,
    pub specifications: serde_json::Value,
    pub metadata: serde_json::Value,
    pub quality: String,
    pub confidence: f32,
}

pub struct AiGateway {
    primary: Box<dyn AiProvider>,
    fallback: Option<Box<dyn AiProvider>>,
    rate_limiter: RateLimiterRegistry,
    circuit: CircuitBreaker,
    max_retries: u32,
}

impl AiGateway {
    pub fn new(primary: Box<dyn AiProvider>, fallback: Option<Box<dyn AiProvider>>, config: &PipelineConfig) -> Self {
        Self {
            primary,
            fallback,
            rate_limiter: RateLimiterRegistry::new(config.rate_limits.clone()),
            circuit: CircuitBreaker::new(),
            max_retries: 3,
        }
    }

    fn provider_for(&self, name: &str) -> Option<&dyn AiProvider> {
        if self.primary.name() == name {
            return Some(self.primary.as_ref());
        }
        self.fallback.as_deref().filter(|p| p.name() == name)
    }

    /// Runs `op` against `provider`, retrying transient failures with
    /// exponential backoff, and updating the provider's circuit breaker.
    async fn call_with_retry<T, F, Fut>(&self, provider: &dyn AiProvider, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.circuit.is_open(provider.name()) {
            return Err(AppError::Permanent(format!("{} circuit is open", provider.name())));
        }

        self.rate_limiter.acquire(provider.name()).await;

        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.circuit.record_success(provider.name());
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                }
                Err(err) => {
                    self.circuit.record_failure(provider.name());
                    return Err(err);
                }
            }
        }
    }

    async fn run<T, F, Fut>(&self, op: F) -> GatewayResponse<T>
    where
        F: Fn(&dyn AiProvider) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.call_with_retry(self.primary.as_ref(), || op(self.primary.as_ref())).await {
            Ok(value) => GatewayResponse::ok(value),
            Err(primary_err) => {
                if let Some(fallback) = &self.fallback {
                    match self.call_with_retry(fallback.as_ref(), || op(fallback.as_ref())).await {
                        Ok(value) => return GatewayResponse::ok(value),
                        Err(fallback_err) => return GatewayResponse::err(&fallback_err),
                    }
                }
                GatewayResponse::err(&primary_err)
            }
        }
    }

    pub async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> GatewayResponse<String> {
        self.run(|provider| {
            let messages = messages.clone();
            async move { provider.chat(model, &messages).await }
        })
        .await
    }

    pub async fn vision(&self, model: &str, prompt: &str, image_url: &str) -> GatewayResponse<String> {
        self.run(|provider| async move { provider.vision(model, prompt, image_url).await }).await
    }

    pub async fn embed_text(&self, model: &str, texts: Vec<String>) -> GatewayResponse<Vec<Vec<f32>>> {
        self.run(|provider| {
            let texts = texts.clone();
            async move { provider.embed_text(model, &texts).await }
        })
        .await
    }

    pub async fn embed_image(&self, model: &str, image_bytes: Vec<u8>) -> GatewayResponse<Vec<f32>> {
        self.run(|provider| {
            let bytes = image_bytes.clone();
            async move { provider.embed_image(model, &bytes).await }
        })
        .await
    }

    /// Stage-1 classification: JSON-constrained chat call interpreted into `ClassifyResult`.
    pub async fn classify(&self, model: &str, chunk_text: &str, neighbors: &[String]) -> GatewayResponse<ClassifyResult> {
        let context = neighbors.join("\n---\n");
        let system = ChatMessage::system(
            "You classify document chunks for a product catalog pipeline. \
             Respond with JSON only: {\"content_type\": one of product|specification|introduction|legal_disclaimer|technical_detail|marketing|other, \
             \"confidence\": 0..1, \"is_product_candidate\": bool}.",
        );
        let user = ChatMessage::user(format!("Neighboring context:\n{context}\n\nChunk to classify:\n{chunk_text}"));

        let result: Result<ClassifyResult> = match self.call_with_retry(self.primary.as_ref(), || {
            let messages = vec![system.clone(), user.clone()];
            async move { self.primary.chat(model, &messages).await }
        })
        .await
        {
            Ok(raw) => parse_classify_response(&raw),
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => GatewayResponse::ok(value),
            Err(e) => GatewayResponse::err(&e),
        }
    }

    /// Stage-1 classification for a batch of chunks in one request, cutting call
    /// volume roughly tenfold over classifying one chunk per call. Returns one
    /// `ClassifyResult` per input item, in the same order.
    pub async fn classify_batch(&self, model: &str, items: &[(String, Vec<String>)]) -> GatewayResponse<Vec<ClassifyResult>> {
        let system = ChatMessage::system(
            "You classify document chunks for a product catalog pipeline. \
             You will receive a numbered list of chunks, each with neighboring context. \
             Respond with JSON only: an array with exactly one object per chunk, in the same order, \
             each shaped {\"content_type\": one of product|specification|introduction|legal_disclaimer|technical_detail|marketing|other, \
             \"confidence\": 0..1, \"is_product_candidate\": bool}.",
        );
        let user = ChatMessage::user(render_batch_prompt(items));

        let result: Result<Vec<ClassifyResult>> = match self.call_with_retry(self.primary.as_ref(), || {
            let messages = vec![system.clone(), user.clone()];
            async move { self.primary.chat(model, &messages).await }
        })
        .await
        {
            Ok(raw) => parse_classify_batch_response(&raw, items.len()),
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => GatewayResponse::ok(value),
            Err(e) => GatewayResponse::err(&e),
        }
    }

    /// Stage-2 enrichment: JSON-constrained chat call interpreted into `EnrichResult`.
    pub async fn enrich(&self, model: &str, chunk_text: &str, neighbors: &[String]) -> GatewayResponse<EnrichResult> {
        let context = neighbors.join("\n---\n");
        let system = ChatMessage::system(
            "You extract structured product metadata from catalog document chunks. \
             Respond with JSON only, either {\"is_valid_product\": false, \"rejection_reason\": string} or \
             {\"is_valid_product\": true, \"name\": string, \"short_description\": string, \"long_description\": string, \
             \"properties\": object, \"specifications\": object, \"metadata\": object, \"quality\": high|medium|low, \"confidence\": 0..1}.",
        );
        let user = ChatMessage::user(format!("Neighboring context:\n{context}\n\nCandidate chunk:\n{chunk_text}"));

        let result: Result<EnrichResult> = match self.call_with_retry(self.primary.as_ref(), || {
            let messages = vec![system.clone(), user.clone()];
            async move { self.primary.chat(model, &messages).await }
        })
        .await
        {
            Ok(raw) => parse_enrich_response(&raw),
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => GatewayResponse::ok(value),
            Err(e) => GatewayResponse::err(&e),
        }
    }

    /// Judges a generated answer against the context it was grounded in,
    /// scoring coherence and factual consistency. Hallucination and source
    /// attribution are computed mechanically by the caller instead, since
    /// they're checkable against the context directly.
    pub async fn judge_response(&self, model: &str, context: &str, answer: &str) -> GatewayResponse<JudgeResult> {
        let system = ChatMessage::system(
            "You judge an AI-generated answer against the context chunks it was grounded in. \
             Respond with JSON only: {\"coherence\": 0..1, \"factual_consistency\": 0..1}.",
        );
        let user = ChatMessage::user(format!("Context:\n{context}\n\nAnswer:\n{answer}"));

        let result: Result<JudgeResult> = match self.call_with_retry(self.primary.as_ref(), || {
            let messages = vec![system.clone(), user.clone()];
            async move { self.primary.chat(model, &messages).await }
        })
        .await
        {
            Ok(raw) => parse_judge_response(&raw),
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => GatewayResponse::ok(value),
            Err(e) => GatewayResponse::err(&e),
        }
    }
}

fn parse_judge_response(raw: &str) -> Result<JudgeResult> {
    let json: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| AppError::Transient(format!("malformed judge JSON: {e}")))?;
    let coherence = json.get("coherence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
    let factual_consistency = json.get("factual_consistency").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
    Ok(JudgeResult { coherence, factual_consistency })
}

fn parse_classify_response(raw: &str) -> Result<ClassifyResult> {
    let json: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| AppError::Transient(format!("malformed classify JSON: {e}")))?;
    let content_type: ContentType = json.get("content_type").and_then(|v| v.as_str()).unwrap_or("other").parse().unwrap_or(ContentType::Other);
    let confidence = json.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
    let is_product_candidate = json.get("is_product_candidate").and_then(|v| v.as_bool()).unwrap_or(false);
    Ok(ClassifyResult { content_type, confidence, is_product_candidate })
}

/// Renders a numbered prompt body for [`AiGateway::classify_batch`]: one
/// chunk per entry, its neighboring context inlined above it.
fn render_batch_prompt(items: &[(String, Vec<String>)]) -> String {
    let mut out = String::new();
    for (index, (chunk_text, neighbors)) in items.iter().enumerate() {
        let context = neighbors.join("\n---\n");
        out.push_str(&format!("Chunk {}:\nNeighboring context:\n{context}\n\nText:\n{chunk_text}\n\n", index + 1));
    }
    out
}

fn parse_classify_batch_response(raw: &str, expected_len: usize) -> Result<Vec<ClassifyResult>> {
    let json: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| AppError::Transient(format!("malformed classify-batch JSON: {e}")))?;
    let array = json.as_array().ok_or_else(|| AppError::Transient("classify-batch response is not a JSON array".to_string()))?;
    if array.len() != expected_len {
        return Err(AppError::Transient(format!("classify-batch returned {} results for {expected_len} chunks", array.len())));
    }
    Ok(array
        .iter()
        .map(|entry| ClassifyResult {
            content_type: entry.get("content_type").and_then(|v| v.as_str()).unwrap_or("other").parse().unwrap_or(ContentType::Other),
            confidence: entry.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
            is_product_candidate: entry.get("is_product_candidate").and_then(|v| v.as_bool()).unwrap_or(false),
        })
        .collect())
}

fn parse_enrich_response(raw: &str) -> Result<EnrichResult> {
    let json: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| AppError::Transient(format!("malformed enrich JSON: {e}")))?;
    let is_valid = json.get("is_valid_product").and_then(|v| v.as_bool()).unwrap_or(false);
    if !is_valid {
        let reason = json.get("rejection_reason").and_then(|v| v.as_str()).unwrap_or("unspecified").to_string();
        return Ok(EnrichResult::Rejected { reason });
    }
    let text_field = |key: &str| json.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    Ok(EnrichResult::Accepted(EnrichedProduct {
        name: text_field("name"),
        short_description: text_field("short_description"),
        long_description: text_field("long_description"),
        properties: json.get("properties").cloned().unwrap_or(serde_json::json!({})),
        specifications: json.get("specifications").cloned().unwrap_or(serde_json::json!({})),
        metadata: json.get("metadata").cloned().unwrap_or(serde_json::json!({})),
        quality: text_field("quality"),
        confidence: json.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_product_classification() {
        let raw = r#"{"content_type": "product", "confidence": 0.9, "is_product_candidate": true}"#;
        let result = parse_classify_response(raw).unwrap();
        assert_eq!(result.content_type, ContentType::Product);
        assert!(result.is_product_candidate);
    }

    #[test]
    fn malformed_classify_json_is_transient() {
        let err = parse_classify_response("not json").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn batch_prompt_numbers_each_chunk() {
        let items = vec![("first chunk".to_string(), vec![]), ("second chunk".to_string(), vec!["neighbor".to_string()])];
        let prompt = render_batch_prompt(&items);
        assert!(prompt.contains("Chunk 1:"));
        assert!(prompt.contains("Chunk 2:"));
        assert!(prompt.contains("second chunk"));
    }

    #[test]
    fn parses_a_batch_of_classifications_in_order() {
        let raw = r#"[
            {"content_type": "product", "confidence": 0.9, "is_product_candidate": true},
            {"content_type": "legal_disclaimer", "confidence": 0.8, "is_product_candidate": false}
        ]"#;
        let results = parse_classify_batch_response(raw, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content_type, ContentType::Product);
        assert_eq!(results[1].content_type, ContentType::LegalDisclaimer);
    }

    #[test]
    fn batch_response_with_wrong_length_is_retried_as_transient() {
        let raw = r#"[{"content_type": "product", "confidence": 0.9, "is_product_candidate": true}]"#;
        let err = parse_classify_batch_response(raw, 2).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn parses_judge_response() {
        let raw = r#"{"coherence": 0.85, "factual_consistency": 0.9}"#;
        let result = parse_judge_response(raw).unwrap();
        assert_eq!(result.coherence, 0.85);
        assert_eq!(result.factual_consistency, 0.9);
    }

    #[test]
    fn malformed_judge_json_is_transient() {
        let err = parse_judge_response("not json").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn rejected_enrichment_carries_reason() {
        let raw = r#"{"is_valid_product": false, "rejection_reason": "designer bio"}"#;
        match parse_enrich_response(raw).unwrap() {
            EnrichResult::Rejected { reason } => assert_eq!(reason, "designer bio"),
            EnrichResult::Accepted(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn accepted_enrichment_parses_fields() {
        let raw = r#"{"is_valid_product": true, "name": "Nova Sofa", "short_description": "a sofa",
            "long_description": "a very long sofa description indeed", "properties": {}, "specifications": {},
            "metadata": {}, "quality": "high", "confidence": 0.8}"#;
        match parse_enrich_response(raw).unwrap() {
            EnrichResult::Accepted(product) => {
                assert_eq!(product.name, "Nova Sofa");
                assert_eq!(product.quality, "high");
            }
            EnrichResult::Rejected { .. } => panic!("expected acceptance"),
        }
    }
}
