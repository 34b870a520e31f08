//! Consolidation: turning conversation windows into `(topic, summary)` pairs.
//!
//! [`Compressor::compress`] renders a window as text, asks the
//! [`TopicExtractor`] for a number of topics proportional to the window's
//! length and information content, drops banned topics, and summarizes
//! every remaining topic concurrently.  Each summary is then matched against
//! the existing concepts so the caller can link it into the graph.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use futures_util::future::join_all;
use hippo_types::{ConversationMessage, Timestamp};
use tracing::{debug, info, warn};

use crate::collaborator::{CollaboratorError, Summarizer, TopicExtractor, parse_topic_list};
use crate::similarity::SimilarityScorer;

/// Minimum word-overlap similarity for an existing concept to count as similar.
pub const SIMILAR_TOPIC_THRESHOLD: f64 = 0.6;

/// Maximum number of similar existing concepts kept per topic.
pub const MAX_SIMILAR_TOPICS: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Text statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Shannon entropy, in bits, of the character distribution of `text`.
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts = std::collections::HashMap::<char, usize>::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Number of topics to request for `text`.
///
/// Averages a length-based estimate (`newlines * ratio`) with an
/// information-based one (`(entropy - 3) * 2`, clamped to `1..=5`).
pub fn topic_count(text: &str, compress_ratio: f64) -> usize {
    let by_length = text.matches('\n').count() as f64 * compress_ratio;
    let by_information = ((shannon_entropy(text) - 3.0) * 2.0).round().clamp(1.0, 5.0);
    ((by_length + by_information) / 2.0).round().max(1.0) as usize
}

/// Human-readable span between two timestamps in the `tz` time zone.
pub fn describe_time_span_in<Tz: TimeZone>(start: Timestamp, end: Timestamp, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let to_dt = |t: Timestamp| -> DateTime<Tz> {
        let utc = DateTime::from_timestamp(t.floor() as i64, 0).unwrap_or_default();
        utc.with_timezone(tz)
    };
    let (first, last) = (to_dt(start.min(end)), to_dt(start.max(end)));
    if first.format("%Y").to_string() == last.format("%Y").to_string() {
        format!(
            "conversation in {}, from {} to {}",
            first.format("%Y"),
            first.format("%m-%d %H:%M:%S"),
            last.format("%m-%d %H:%M:%S")
        )
    } else {
        format!(
            "conversation from {} to {}",
            first.format("%Y-%m-%d %H:%M:%S"),
            last.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// [`describe_time_span_in`] using the local time zone.
pub fn describe_time_span(start: Timestamp, end: Timestamp) -> String {
    describe_time_span_in(start, end, &Local)
}

// ─────────────────────────────────────────────────────────────────────────────
// Compressor
// ─────────────────────────────────────────────────────────────────────────────

/// One summarized memory produced from a window.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedMemory {
    pub topic: String,
    pub summary: String,
    /// Existing concepts resembling `topic`, most similar first.
    pub similar: Vec<(String, f64)>,
}

/// Output of [`Compressor::compress`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compression {
    pub memories: Vec<CompressedMemory>,
    /// Topics dropped for containing a ban word.
    pub banned: usize,
    /// Topics whose summary failed, timed out, or came back empty.
    pub dropped: usize,
}

impl Compression {
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.memories.iter().map(|m| m.topic.as_str())
    }
}

/// Window-to-memory compressor backed by language-model collaborators.
#[derive(Clone)]
pub struct Compressor {
    extractor: Arc<dyn TopicExtractor>,
    summarizer: Arc<dyn Summarizer>,
    scorer: SimilarityScorer,
    ban_words: Vec<String>,
    request_timeout: Duration,
}

impl Compressor {
    pub fn new(
        extractor: Arc<dyn TopicExtractor>,
        summarizer: Arc<dyn Summarizer>,
        scorer: SimilarityScorer,
        ban_words: Vec<String>,
        request_timeout: Duration,
    ) -> Self {
        Self { extractor, summarizer, scorer, ban_words, request_timeout }
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Whether `topic` contains any configured ban word.
    pub fn is_banned(&self, topic: &str) -> bool {
        self.ban_words.iter().any(|w| !w.is_empty() && topic.contains(w.as_str()))
    }

    /// Topics for `text`, or an empty list when extraction fails.
    pub async fn extract(&self, text: &str, count: usize) -> Vec<String> {
        match tokio::time::timeout(self.request_timeout, self.extractor.extract_topics(text, count)).await {
            Ok(Ok(raw)) => parse_topic_list(&raw),
            Ok(Err(e)) => {
                warn!(error = %e, "topic extraction failed");
                Vec::new()
            }
            Err(_) => {
                warn!(timeout_secs = self.request_timeout.as_secs(), "topic extraction timed out");
                Vec::new()
            }
        }
    }

    async fn summarize_one(&self, text: &str, topic: &str, span: &str) -> Result<String, CollaboratorError> {
        let summary = tokio::time::timeout(self.request_timeout, self.summarizer.summarize(text, topic, span))
            .await
            .map_err(|_| CollaboratorError::Timeout(self.request_timeout.as_secs()))??;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CollaboratorError::Empty);
        }
        Ok(summary.to_string())
    }

    /// Existing concepts resembling `topic` at or above the similarity
    /// threshold, most similar first, at most [`MAX_SIMILAR_TOPICS`].
    pub fn similar_concepts(&self, topic: &str, concepts: &[String]) -> Vec<(String, f64)> {
        let mut similar: Vec<(String, f64)> = concepts
            .iter()
            .filter(|c| c.as_str() != topic)
            .map(|c| (c.clone(), self.scorer.overlap_similarity(topic, c)))
            .filter(|(_, sim)| *sim >= SIMILAR_TOPIC_THRESHOLD)
            .collect();
        similar.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        similar.truncate(MAX_SIMILAR_TOPICS);
        similar
    }

    /// Compress one conversation window into summarized memories.
    ///
    /// `concepts` is the set of concepts currently in the graph; it is only
    /// read to compute each memory's similar topics.
    pub async fn compress(
        &self,
        window: &[ConversationMessage],
        compress_ratio: f64,
        concepts: &[String],
    ) -> Compression {
        if window.is_empty() {
            return Compression::default();
        }
        let start = window.iter().map(|m| m.time).fold(f64::INFINITY, f64::min);
        let end = window.iter().map(|m| m.time).fold(f64::NEG_INFINITY, f64::max);
        let span = describe_time_span(start, end);

        let mut body = String::new();
        for message in window {
            body.push_str(&message.text);
            body.push('\n');
        }
        let text = format!("{span}:\n{body}");

        let count = topic_count(&text, compress_ratio);
        let extracted = self.extract(&text, count).await;
        let (topics, banned): (Vec<String>, Vec<String>) = extracted.into_iter().partition(|t| !self.is_banned(t));
        if !banned.is_empty() {
            debug!(?banned, "dropped banned topics");
        }
        info!(requested = count, topics = ?topics, "topics extracted");

        let results = join_all(topics.iter().map(|topic| self.summarize_one(&body, topic, &span))).await;

        let mut compression = Compression { banned: banned.len(), ..Compression::default() };
        for (topic, result) in topics.into_iter().zip(results) {
            match result {
                Ok(summary) => {
                    let similar = self.similar_concepts(&topic, concepts);
                    compression.memories.push(CompressedMemory { topic, summary, similar });
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "summary dropped");
                    compression.dropped += 1;
                }
            }
        }
        compression
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Extractor returning a fixed response and recording the requested count.
    pub(crate) struct ScriptedExtractor {
        pub response: Result<String, String>,
        pub requested: Mutex<Vec<usize>>,
    }

    impl ScriptedExtractor {
        pub fn new(response: &str) -> Self {
            Self { response: Ok(response.to_string()), requested: Mutex::new(Vec::new()) }
        }

        pub fn failing() -> Self {
            Self { response: Err("offline".into()), requested: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl TopicExtractor for ScriptedExtractor {
        async fn extract_topics(&self, _text: &str, count: usize) -> Result<String, CollaboratorError> {
            self.requested.lock().unwrap().push(count);
            self.response.clone().map_err(CollaboratorError::Request)
        }
    }

    /// Summarizer answering `"about {topic}"` unless the topic is scripted.
    #[derive(Default)]
    pub(crate) struct ScriptedSummarizer {
        pub overrides: HashMap<String, Result<String, String>>,
    }

    impl ScriptedSummarizer {
        pub fn failing_on(topic: &str) -> Self {
            let mut overrides = HashMap::new();
            overrides.insert(topic.to_string(), Err("boom".to_string()));
            Self { overrides }
        }
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(&self, _text: &str, topic: &str, _span: &str) -> Result<String, CollaboratorError> {
            match self.overrides.get(topic) {
                Some(result) => result.clone().map_err(CollaboratorError::Request),
                None => Ok(format!("about {topic}")),
            }
        }
    }

    /// Summarizer recording the `(text, span)` it was asked about.
    #[derive(Default)]
    struct RecordingSummarizer {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        async fn summarize(&self, text: &str, topic: &str, span: &str) -> Result<String, CollaboratorError> {
            self.calls.lock().unwrap().push((text.to_string(), span.to_string()));
            Ok(format!("about {topic}"))
        }
    }

    /// Summarizer that never answers.
    struct StalledSummarizer;

    #[async_trait]
    impl Summarizer for StalledSummarizer {
        async fn summarize(&self, _text: &str, _topic: &str, _span: &str) -> Result<String, CollaboratorError> {
            std::future::pending().await
        }
    }

    pub(crate) fn compressor(
        extractor: Arc<dyn TopicExtractor>,
        summarizer: Arc<dyn Summarizer>,
        ban_words: &[&str],
    ) -> Compressor {
        Compressor::new(
            extractor,
            summarizer,
            SimilarityScorer::default(),
            ban_words.iter().map(|w| w.to_string()).collect(),
            Duration::from_secs(5),
        )
    }

    fn window(lines: &[&str]) -> Vec<ConversationMessage> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| ConversationMessage::new("g1", 1_700_000_000.0 + i as f64, *l))
            .collect()
    }

    // ── text statistics ──────────────────────────────────────────────────────

    #[test]
    fn entropy_of_uniform_text() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abab") - 1.0).abs() < 1e-9);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn topic_count_low_information_text() {
        // entropy 0 → information estimate clamps to 1; no newlines.
        assert_eq!(topic_count("aaaa", 0.1), 1);
    }

    #[test]
    fn topic_count_grows_with_length() {
        // 16 distinct characters → entropy 4 → information estimate 2.
        assert_eq!(topic_count("abcdefghijklmnop", 0.0), 1);
        // 40 newlines pull entropy to ~2 bits, so information clamps to 1;
        // (40 * 0.1 + 1) / 2 = 2.5 rounds to 3.
        let mut text = String::from("abcdefghijklmnop");
        text.push_str(&"\n".repeat(40));
        assert_eq!(topic_count(&text, 0.1), 3);
    }

    // ── time span ────────────────────────────────────────────────────────────

    #[test]
    fn time_span_same_year() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 5, 9).unwrap().timestamp() as f64;
        let end = Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap().timestamp() as f64;
        assert_eq!(
            describe_time_span_in(start, end, &Utc),
            "conversation in 2024, from 03-01 08:05:09 to 12-31 23:00:00"
        );
    }

    #[test]
    fn time_span_across_years() {
        let start = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 0).unwrap().timestamp() as f64;
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap().timestamp() as f64;
        assert_eq!(
            describe_time_span_in(end, start, &Utc),
            "conversation from 2023-12-31 23:59:00 to 2024-01-01 00:01:00"
        );
    }

    // ── compress ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn compress_summarizes_every_topic() {
        let c = compressor(Arc::new(ScriptedExtractor::new("cats, dogs")), Arc::new(ScriptedSummarizer::default()), &[]);
        let out = c.compress(&window(&["a: I love cats", "b: dogs too"]), 0.1, &[]).await;
        let pairs: Vec<(&str, &str)> = out.memories.iter().map(|m| (m.topic.as_str(), m.summary.as_str())).collect();
        assert_eq!(pairs, vec![("cats", "about cats"), ("dogs", "about dogs")]);
        assert_eq!(out.dropped, 0);
    }

    #[tokio::test]
    async fn ban_words_filter_topics() {
        let c = compressor(
            Arc::new(ScriptedExtractor::new("weather,topsecret,cats")),
            Arc::new(ScriptedSummarizer::default()),
            &["secret"],
        );
        let out = c.compress(&window(&["x"]), 0.1, &[]).await;
        assert_eq!(out.topics().collect::<Vec<_>>(), vec!["weather", "cats"]);
        assert_eq!(out.banned, 1);
    }

    #[tokio::test]
    async fn summarizer_failure_drops_only_that_topic() {
        let c = compressor(
            Arc::new(ScriptedExtractor::new("cats,dogs,birds")),
            Arc::new(ScriptedSummarizer::failing_on("dogs")),
            &[],
        );
        let out = c.compress(&window(&["x"]), 0.1, &[]).await;
        assert_eq!(out.topics().collect::<Vec<_>>(), vec!["cats", "birds"]);
        assert_eq!(out.dropped, 1);
    }

    #[tokio::test]
    async fn empty_summary_is_dropped() {
        let mut summarizer = ScriptedSummarizer::default();
        summarizer.overrides.insert("cats".into(), Ok("   ".into()));
        let c = compressor(Arc::new(ScriptedExtractor::new("cats")), Arc::new(summarizer), &[]);
        let out = c.compress(&window(&["x"]), 0.1, &[]).await;
        assert!(out.memories.is_empty());
        assert_eq!(out.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_summarizer_times_out() {
        let c = compressor(Arc::new(ScriptedExtractor::new("cats")), Arc::new(StalledSummarizer), &[]);
        let out = c.compress(&window(&["x"]), 0.1, &[]).await;
        assert!(out.memories.is_empty());
        assert_eq!(out.dropped, 1);
    }

    #[tokio::test]
    async fn extraction_failure_yields_nothing() {
        let c = compressor(Arc::new(ScriptedExtractor::failing()), Arc::new(ScriptedSummarizer::default()), &[]);
        let out = c.compress(&window(&["x"]), 0.1, &[]).await;
        assert_eq!(out, Compression::default());
    }

    #[tokio::test]
    async fn empty_window_skips_collaborators() {
        let extractor = Arc::new(ScriptedExtractor::new("cats"));
        let c = compressor(extractor.clone(), Arc::new(ScriptedSummarizer::default()), &[]);
        let out = c.compress(&[], 0.1, &[]).await;
        assert!(out.memories.is_empty());
        assert!(extractor.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn similar_concepts_are_thresholded_and_sorted() {
        let c = compressor(Arc::new(ScriptedExtractor::new("cat")), Arc::new(ScriptedSummarizer::default()), &[]);
        let concepts: Vec<String> = ["cat food", "cat", "dog", "black cat food", "Cat"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = c.compress(&window(&["x"]), 0.1, &concepts).await;
        assert_eq!(out.memories.len(), 1);
        // "Cat": 1.0, "cat food": 1/sqrt(2) ≈ 0.707, "black cat food": 1/sqrt(3) ≈ 0.577
        let names: Vec<&str> = out.memories[0].similar.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Cat", "cat food"]);
    }

    #[tokio::test]
    async fn summarizer_gets_the_span_once() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let c = compressor(Arc::new(ScriptedExtractor::new("tea")), summarizer.clone(), &[]);
        let out = c.compress(&window(&["green tea", "oolong"]), 0.1, &[]).await;
        assert_eq!(out.memories.len(), 1);

        let calls = summarizer.calls.lock().unwrap();
        let (text, span) = &calls[0];
        assert_eq!(text, "green tea\noolong\n");
        assert!(!span.is_empty());
        assert!(!text.contains(span.as_str()));
    }

    #[test]
    fn similar_concepts_capped_at_five() {
        let c = compressor(Arc::new(ScriptedExtractor::new("")), Arc::new(ScriptedSummarizer::default()), &[]);
        let concepts: Vec<String> = (0..8).map(|i| format!("apple x{i}")).collect();
        // each shares "apple": 1/sqrt(1*2) ≈ 0.707
        assert_eq!(c.similar_concepts("apple", &concepts).len(), MAX_SIMILAR_TOPICS);
    }
}
