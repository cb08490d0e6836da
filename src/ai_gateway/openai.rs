//! OpenAI-backed `AiProvider`: chat, vision, and text embeddings.

use super::client::{AiProvider, ChatMessage};
use crate::types::{AppError, Result};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageUrl,
    },
    types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    match message.role {
        "system" => {
            let msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.as_str())
                .build()
                .map_err(|e| AppError::Internal(format!("failed to build system message: {e}")))?;
            Ok(ChatCompletionRequestMessage::System(msg))
        }
        "assistant" => {
            let msg = ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.as_str())
                .build()
                .map_err(|e| AppError::Internal(format!("failed to build assistant message: {e}")))?;
            Ok(ChatCompletionRequestMessage::Assistant(msg))
        }
        _ => {
            let msg = ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.as_str())
                .build()
                .map_err(|e| AppError::Internal(format!("failed to build user message: {e}")))?;
            Ok(ChatCompletionRequestMessage::User(msg))
        }
    }
}

fn classify_openai_error(e: impl std::fmt::Display) -> AppError {
    let message = e.to_string();
    if message.contains("429") || message.contains("rate limit") || message.contains("timeout") || message.contains("503") {
        AppError::Transient(format!("OpenAI error: {message}"))
    } else {
        AppError::Permanent(format!("OpenAI error: {message}"))
    }
}

pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self { client: Client::with_config(config) }
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let request_messages: Result<Vec<_>> = messages.iter().map(to_request_message).collect();
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(request_messages?)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build chat request: {e}")))?;

        let response = self.client.chat().create(request).await.map_err(classify_openai_error)?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Transient("OpenAI returned no choices".into()))
    }

    async fn vision(&self, model: &str, prompt: &str, image_url: &str) -> Result<String> {
        let content = ChatCompletionRequestUserMessageContent::Array(vec![
            ChatCompletionRequestUserMessageContentPart::Text(ChatCompletionRequestMessageContentPartText { text: prompt.to_string() }),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(ChatCompletionRequestMessageContentPartImage {
                image_url: ImageUrl { url: image_url.to_string(), detail: None },
            }),
        ]);
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build vision message: {e}")))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(vec![ChatCompletionRequestMessage::User(user_message)])
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build vision request: {e}")))?;

        let response = self.client.chat().create(request).await.map_err(classify_openai_error)?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Transient("OpenAI returned no choices".into()))
    }

    async fn embed_text(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build embedding request: {e}")))?;

        let response = self.client.embeddings().create(request).await.map_err(classify_openai_error)?;
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn embed_image(&self, _model: &str, _image_bytes: &[u8]) -> Result<Vec<f32>> {
        Err(AppError::Permanent("OpenAI provider does not expose an image embedding endpoint".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_errors_are_retryable() {
        let err = classify_openai_error("HTTP 429 Too Many Requests");
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_errors_are_not_retryable() {
        let err = classify_openai_error("HTTP 401 invalid api key");
        assert!(!err.is_retryable());
    }
}
