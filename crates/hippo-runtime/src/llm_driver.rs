//! [`LlmDriver`] – OpenAI-compatible LLM interface.
//!
//! Talks to any server exposing an OpenAI-compatible `/v1/chat/completions`
//! endpoint, such as [Ollama](https://ollama.com) (`http://localhost:11434`)
//! or a hosted API, and provides the memory engine's
//! [`TopicExtractor`] and [`Summarizer`] capabilities on top of it.
//!
//! # Example
//!
//! ```rust,no_run
//! use hippo_runtime::llm_driver::{LlmDriver, ChatMessage, Role};
//!
//! let driver = LlmDriver::new("http://localhost:11434", "llama3");
//!
//! let messages = vec![
//!     ChatMessage { role: Role::User, content: "Name three teas.".into() },
//! ];
//!
//! // Requires a running model server – skipped in unit tests.
//! // let reply = driver.complete(&messages).await.unwrap();
//! ```

use std::time::Duration;

use async_trait::async_trait;
use hippo_memory::collaborator::{CollaboratorError, Summarizer, TopicExtractor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from LLM driver operations.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<LlmError> for CollaboratorError {
    fn from(err: LlmError) -> Self {
        CollaboratorError::Request(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompts
// ─────────────────────────────────────────────────────────────────────────────

const MEMORY_SYSTEM_PROMPT: &str = "You help an assistant remember conversations. \
Answer tersely and output only what is asked for, with no preamble.";

/// User prompt asking for up to `count` comma-separated topics of `text`.
pub fn topic_prompt(text: &str, count: usize) -> String {
    format!(
        "Here is a piece of text:\n{text}\n\n\
         List at most {count} topics discussed in it. Each topic must be a short \
         keyword or phrase. Separate topics with commas and output nothing else."
    )
}

/// User prompt asking what `text` says about `topic`.
pub fn summary_prompt(text: &str, topic: &str, time_span: &str) -> String {
    format!(
        "Conversation from {time_span}:\n{text}\n\n\
         Summarize in one or two sentences what this conversation says about \
         \"{topic}\", including who was involved, what happened and any opinions. \
         Output only the summary."
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share (it is cheap to clone the inner HTTP client).
#[derive(Clone)]
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a new driver pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Abort requests that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LlmError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Send `messages` to the model and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails, or
    /// [`LlmError::BadResponse`] if the response shape is unexpected.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = ChatRequest { model: &self.model, messages, stream: false, temperature: self.temperature };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request.send().await?.error_for_status()?.json().await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))?;
        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }

    async fn ask(&self, prompt: String) -> Result<String, LlmError> {
        let messages = [
            ChatMessage { role: Role::System, content: MEMORY_SYSTEM_PROMPT.to_string() },
            ChatMessage { role: Role::User, content: prompt },
        ];
        self.complete(&messages).await
    }
}

#[async_trait]
impl TopicExtractor for LlmDriver {
    async fn extract_topics(&self, text: &str, count: usize) -> Result<String, CollaboratorError> {
        Ok(self.ask(topic_prompt(text, count)).await?)
    }
}

#[async_trait]
impl Summarizer for LlmDriver {
    async fn summarize(&self, text: &str, topic: &str, time_span: &str) -> Result<String, CollaboratorError> {
        Ok(self.ask(summary_prompt(text, topic, time_span)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_role() {
        let msg = ChatMessage { role: Role::System, content: "hello".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"system\""));
    }

    #[test]
    fn chat_message_roundtrip() {
        let msg = ChatMessage { role: Role::User, content: "What is next?".into() };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.content, "What is next?");
    }

    #[test]
    fn request_omits_unset_temperature() {
        let messages = [ChatMessage { role: Role::User, content: "hi".into() }];
        let body = ChatRequest { model: "m", messages: &messages, stream: false, temperature: None };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let driver = LlmDriver::new("http://localhost:11434/", "llama3");
        assert_eq!(driver.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let driver = LlmDriver::new("http://x", "m").with_api_key(Some(String::new()));
        assert!(driver.api_key.is_none());
    }

    #[test]
    fn prompts_carry_their_inputs() {
        let topics = topic_prompt("we talked about tea", 3);
        assert!(topics.contains("we talked about tea"));
        assert!(topics.contains("at most 3 topics"));
        let summary = summary_prompt("chat text", "green tea", "conversation in 2024");
        assert!(summary.contains("\"green tea\""));
        assert!(summary.contains("conversation in 2024"));
    }

    #[test]
    fn bad_response_maps_to_request_error() {
        let err: CollaboratorError = LlmError::BadResponse("nope".into()).into();
        assert!(matches!(err, CollaboratorError::Request(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_collaborator_error() {
        // port 9 (discard) is not expected to serve HTTP
        let driver = LlmDriver::new("http://127.0.0.1:9", "m")
            .with_timeout(Duration::from_secs(2))
            .unwrap();
        assert!(driver.extract_topics("text", 3).await.is_err());
    }
}
