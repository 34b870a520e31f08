//! Language-model capabilities consumed by the engine.
//!
//! The engine never talks to a model directly; it goes through the
//! [`TopicExtractor`] and [`Summarizer`] traits so any backend (a hosted
//! chat-completions API, a local model, a scripted fake in tests) can be
//! plugged in.  A failed call is reported as a [`CollaboratorError`] and the
//! caller drops only the affected unit of work.

use async_trait::async_trait;
use thiserror::Error;

/// Separators accepted between topics in an extractor response.
const TOPIC_SEPARATORS: [char; 4] = [',', '，', '、', ' '];

/// Error returned by a language-model collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator request failed: {0}")]
    Request(String),

    #[error("collaborator timed out after {0} s")]
    Timeout(u64),

    #[error("collaborator returned no usable content")]
    Empty,
}

/// Extracts a delimited list of topics from a block of text.
#[async_trait]
pub trait TopicExtractor: Send + Sync {
    /// Return up to `count` topics as one raw, delimited string.
    async fn extract_topics(&self, text: &str, count: usize) -> Result<String, CollaboratorError>;
}

/// Summarizes what a block of text says about one topic.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `text` is the bare conversation; `time_span` describes when it happened.
    async fn summarize(&self, text: &str, topic: &str, time_span: &str) -> Result<String, CollaboratorError>;
}

/// Split a raw extractor response into trimmed, non-empty topics.
///
/// Duplicates are removed while keeping first-seen order.
pub fn parse_topic_list(raw: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for part in raw.split(TOPIC_SEPARATORS) {
        let topic = part.trim();
        if !topic.is_empty() && !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }
    topics
}
