//! Local-inference fallback `AiProvider` backed by an Ollama server. Used when
//! no OpenAI key is configured, or as an explicit offline/dev provider.

use super::client::{AiProvider, ChatMessage};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage as OllamaChatMessage};
use ollama_rs::generation::embeddings::request::GenerateEmbeddingsRequest;
use ollama_rs::Ollama;

fn classify_ollama_error(e: impl std::fmt::Display) -> AppError {
    AppError::Transient(format!("Ollama error: {e}"))
}

fn to_ollama_message(message: &ChatMessage) -> OllamaChatMessage {
    match message.role {
        "system" => OllamaChatMessage::system(message.content.clone()),
        "assistant" => OllamaChatMessage::assistant(message.content.clone()),
        _ => OllamaChatMessage::user(message.content.clone()),
    }
}

pub struct OllamaProvider {
    client: Ollama,
}

impl OllamaProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(AppError::Config("OLLAMA_URL is empty".into()));
        }
        let without_scheme = trimmed.strip_prefix("http://").or_else(|| trimmed.strip_prefix("https://")).unwrap_or(trimmed);
        let (host, port) = match without_scheme.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().unwrap_or(11434)),
            None => (without_scheme.to_string(), 11434),
        };
        Ok(Self { client: Ollama::new(format!("http://{host}"), port) })
    }
}

#[async_trait]
impl AiProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let ollama_messages: Vec<_> = messages.iter().map(to_ollama_message).collect();
        let request = ChatMessageRequest::new(model.to_string(), ollama_messages);
        let response = self.client.send_chat_messages(request).await.map_err(classify_ollama_error)?;
        Ok(response.message.content)
    }

    async fn vision(&self, _model: &str, _prompt: &str, _image_url: &str) -> Result<String> {
        Err(AppError::Permanent("local Ollama fallback does not support vision".into()))
    }

    async fn embed_text(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let request = GenerateEmbeddingsRequest::new(model.to_string(), text.clone().into());
            let response = self.client.generate_embeddings(request).await.map_err(classify_ollama_error)?;
            out.push(response.embeddings.into_iter().next().unwrap_or_default());
        }
        Ok(out)
    }

    async fn embed_image(&self, _model: &str, _image_bytes: &[u8]) -> Result<Vec<f32>> {
        Err(AppError::Permanent("local Ollama fallback does not support image embeddings".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_base_url() {
        assert!(OllamaProvider::new("").is_err());
    }

    #[test]
    fn parses_host_and_port() {
        let provider = OllamaProvider::new("http://localhost:11434").unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn parses_bare_host_without_port() {
        assert!(OllamaProvider::new("localhost").is_ok());
    }

    #[tokio::test]
    async fn chat_parses_a_mocked_server_response() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/chat"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "created_at": "2024-01-01T00:00:00Z",
                "message": {"role": "assistant", "content": "a durable oak chair"},
                "done": true
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&server.uri()).unwrap();
        let answer = provider.chat("llama3", &[ChatMessage::user("describe the chair")]).await.unwrap();
        assert_eq!(answer, "a durable oak chair");
    }
}
