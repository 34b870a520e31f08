//! Conversation window sampling.
//!
//! A window is a run of consecutive messages from one conversation that
//! follow its anchor, the latest message sent at or before a target time.  Each message
//! carries a reuse counter; windows containing an overused message are
//! rejected so the same chatter is not consolidated over and over.
//!
//! Target times are drawn from three recency buckets:
//!
//! | bucket | age range        |
//! |--------|------------------|
//! | near   | 1 s – 1 h        |
//! | mid    | 1 h – 4 h        |
//! | far    | 4 h – 24 h       |

use std::sync::Arc;

use hippo_types::{ConversationMessage, Timestamp};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::{DocumentStore, Filter, Sort, StoreError};

/// Collection holding raw [`ConversationMessage`] documents.
pub const MESSAGES: &str = "messages";

/// Attempts per requested timestamp before the sample is given up.
pub const SAMPLE_ATTEMPTS: usize = 3;

const HOUR: f64 = 3600.0;

/// Which recency bucket a target time is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Near,
    Mid,
    Far,
}

impl Bucket {
    /// Age range in seconds, `(min, max)`.
    pub fn age_range(self) -> (f64, f64) {
        match self {
            Bucket::Near => (1.0, HOUR),
            Bucket::Mid => (HOUR, 4.0 * HOUR),
            Bucket::Far => (4.0 * HOUR, 24.0 * HOUR),
        }
    }
}

/// How many windows to draw from each recency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub near: usize,
    pub mid: usize,
    pub far: usize,
}

impl Default for BucketCounts {
    fn default() -> Self {
        Self { near: 1, mid: 4, far: 4 }
    }
}

impl BucketCounts {
    pub fn total(&self) -> usize {
        self.near + self.mid + self.far
    }
}

/// Random target timestamps for every requested sample, near bucket first.
pub fn draw_targets<R: Rng>(counts: &BucketCounts, now: Timestamp, rng: &mut R) -> Vec<(Bucket, Timestamp)> {
    let mut targets = Vec::with_capacity(counts.total());
    for (bucket, n) in [(Bucket::Near, counts.near), (Bucket::Mid, counts.mid), (Bucket::Far, counts.far)] {
        let (min_age, max_age) = bucket.age_range();
        for _ in 0..n {
            targets.push((bucket, now - rng.random_range(min_age..=max_age)));
        }
    }
    targets
}

/// Draws reuse-limited message windows from a [`DocumentStore`].
pub struct Sampler {
    store: Arc<dyn DocumentStore>,
    max_reuses: u32,
}

impl Sampler {
    pub fn new(store: Arc<dyn DocumentStore>, max_reuses: u32) -> Self {
        Self { store, max_reuses }
    }

    /// One sampling attempt at `target`.
    ///
    /// Returns `None` when no message precedes `target`, when nothing in the
    /// anchor's conversation follows it, or when the window contains a
    /// message already used `max_reuses` times.  On success every
    /// message in the window has its reuse counter incremented.
    pub async fn try_window(
        &self,
        target: Timestamp,
        window_size: usize,
    ) -> Result<Option<Vec<ConversationMessage>>, StoreError> {
        let anchor = self
            .store
            .find_many(MESSAGES, &Filter::all().lte("time", target), Some(&Sort::descending("time")), Some(1))
            .await?
            .into_iter()
            .next();
        let Some(anchor) = anchor else {
            return Ok(None);
        };
        let anchor: ConversationMessage = serde_json::from_value(anchor)?;

        let filter = Filter::all()
            .eq("conversation_id", anchor.conversation_id.as_str())
            .gt("time", anchor.time);
        let docs = self
            .store
            .find_many(MESSAGES, &filter, Some(&Sort::ascending("time")), Some(window_size))
            .await?;
        let window = docs
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ConversationMessage>, _>>()?;

        if window.is_empty() || window.iter().any(|m| m.memorized_times >= self.max_reuses) {
            return Ok(None);
        }

        let mut used = Vec::with_capacity(window.len());
        for mut message in window {
            message.memorized_times += 1;
            let mut set = Map::new();
            set.insert("memorized_times".into(), Value::from(message.memorized_times));
            self.store
                .update_one(MESSAGES, &Filter::all().eq("id", message.id.as_str()), set, false)
                .await?;
            used.push(message);
        }
        Ok(Some(used))
    }

    /// [`try_window`](Self::try_window) with up to [`SAMPLE_ATTEMPTS`] tries.
    pub async fn sample_window(
        &self,
        target: Timestamp,
        window_size: usize,
    ) -> Result<Option<Vec<ConversationMessage>>, StoreError> {
        for attempt in 1..=SAMPLE_ATTEMPTS {
            if let Some(window) = self.try_window(target, window_size).await? {
                return Ok(Some(window));
            }
            debug!(target_time = target, attempt, "window sampling attempt failed");
        }
        Ok(None)
    }

    /// Windows for every bucket target; failed samples are skipped.
    pub async fn build_sample_set(
        &self,
        chat_size: usize,
        counts: &BucketCounts,
        now: Timestamp,
    ) -> Result<Vec<Vec<ConversationMessage>>, StoreError> {
        let targets = draw_targets(counts, now, &mut rand::rng());
        let mut samples = Vec::new();
        for (i, (bucket, target)) in targets.into_iter().enumerate() {
            match self.sample_window(target, chat_size).await? {
                Some(window) => {
                    debug!(?bucket, messages = window.len(), "sampled conversation window");
                    samples.push(window);
                }
                None => warn!(?bucket, sample = i, "no eligible conversation window"),
            }
        }
        Ok(samples)
    }
}

/// Store `message` in the `messages` collection, keyed by its id.
pub async fn insert_message(store: &dyn DocumentStore, message: &ConversationMessage) -> Result<String, StoreError> {
    let mut doc = serde_json::to_value(message)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(crate::store::ID_FIELD.into(), Value::String(message.id.clone()));
    }
    store.insert_one(MESSAGES, doc).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
