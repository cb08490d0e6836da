//! The `AiProvider` trait every backend (OpenAI, Ollama, ...) implements, plus the
//! envelope type every `AiGateway` operation returns.

use crate::types::{AppError, Result};
use async_trait::async_trait;

/// One role+content pair in a chat exchange.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
}

/// A single provider backend. OpenAI implements every method; a local fallback
/// like Ollama may only cover `chat` and return `AppError::Permanent` for the rest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;

    /// A chat call with a single base64/URI image attached alongside the prompt.
    async fn vision(&self, model: &str, prompt: &str, image_url: &str) -> Result<String>;

    async fn embed_text(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_image(&self, model: &str, image_bytes: &[u8]) -> Result<Vec<f32>>;
}

/// Structured error surfaced from a gateway call: enough for a caller to decide
/// whether to retry without inspecting provider-specific error shapes.
#[derive(Debug, Clone)]
pub struct GatewayErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&AppError> for GatewayErrorInfo {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::Config(_) => "config",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Transient(_) => "transient",
            AppError::Permanent(_) => "permanent",
            AppError::Cancelled => "cancelled",
            AppError::Database(_) => "database",
            AppError::ObjectStore(_) => "object_store",
            AppError::Internal(_) => "internal",
        };
        Self { code: code.to_string(), message: err.to_string(), retryable: err.is_retryable() }
    }
}

/// `{success, data, error}` envelope every `AiGateway` operation returns.
#[derive(Debug, Clone)]
pub struct GatewayResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<GatewayErrorInfo>,
}

impl<T> GatewayResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(error: &AppError) -> Self {
        Self { success: false, data: None, error: Some(GatewayErrorInfo::from(error)) }
    }

    /// Collapses the envelope back into a `Result`, for internal pipeline callers
    /// that want `?` ergonomics instead of inspecting `success`.
    pub fn into_result(self) -> Result<T> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(e)) => Err(if e.retryable { AppError::Transient(e.message) } else { AppError::Permanent(e.message) }),
            (None, None) => Err(AppError::Internal("empty gateway response".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_error_maps_to_retryable_envelope() {
        let err = AppError::Transient("rate limited".into());
        let envelope: GatewayResponse<()> = GatewayResponse::err(&err);
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().retryable);
    }

    #[test]
    fn permanent_error_is_not_retryable() {
        let err = AppError::Permanent("bad request".into());
        let envelope: GatewayResponse<()> = GatewayResponse::err(&err);
        assert!(!envelope.error.unwrap().retryable);
    }

    #[test]
    fn ok_round_trips_through_into_result() {
        let envelope = GatewayResponse::ok(42);
        assert_eq!(envelope.into_result().unwrap(), 42);
    }
}
