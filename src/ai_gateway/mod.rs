//! The AI Gateway: a single outbound surface over LLM chat, vision, and
//! embedding providers, hiding provider-specific request/response shapes
//! behind retries, a circuit breaker, and per-provider rate limiting.

pub mod client;
pub mod ollama;
pub mod openai;
pub mod provider_registry;
pub mod rate_limit;

pub use client::{AiProvider, ChatMessage, GatewayErrorInfo, GatewayResponse};
#[cfg(test)]
pub use client::MockAiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider_registry::{AiGateway, ClassifyResult, EnrichResult, EnrichedProduct, JudgeResult};
