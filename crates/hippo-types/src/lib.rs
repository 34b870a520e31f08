use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Seconds since the Unix epoch, with sub-second precision.
pub type Timestamp = f64;

/// Current wall-clock time as a [`Timestamp`].
pub fn unix_now() -> Timestamp {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One raw chat message as stored in the `messages` collection.
///
/// The sampler reads windows of these and bumps `memorized_times` every time a
/// message is folded into memory, so no message is consolidated forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique document key.
    pub id: String,
    /// Conversation (group / channel) the message belongs to.
    pub conversation_id: String,
    /// Send time.
    pub time: Timestamp,
    /// Plain-text rendering of the message, speaker included.
    pub text: String,
    /// How many times this message has already been sampled for consolidation.
    #[serde(default)]
    pub memorized_times: u32,
}

impl ConversationMessage {
    /// Construct a fresh message with a random id and a zero reuse counter.
    pub fn new(conversation_id: impl Into<String>, time: Timestamp, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            time,
            text: text.into(),
            memorized_times: 0,
        }
    }
}

/// Error type shared by the engine and the CLI.
///
/// Language-model failures never surface here: they only drop the unit of
/// work they belong to.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum HippoError {
    #[error("Document store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
