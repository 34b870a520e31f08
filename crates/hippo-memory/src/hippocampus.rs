//! The `Hippocampus` facade: one owned memory graph plus the collaborators
//! and policies that build, age, persist and query it.
//!
//! All graph-mutating operations (consolidation, decay, merge, load) run one
//! at a time under a single mutation lock that is held for the whole
//! operation, language-model calls included.  Queries only take a shared read
//! lock on the graph, so they run concurrently with each other and see a
//! consistent graph between mutation steps.

use std::sync::Arc;
use std::time::Duration;

use hippo_types::{ConversationMessage, HippoError, Timestamp, unix_now};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument};

use crate::collaborator::{Summarizer, TopicExtractor};
use crate::consolidation::Compressor;
use crate::graph::MemoryGraph;
use crate::maintenance::{self, DecayPolicy, ForgetReport, MergeReport};
use crate::query::{self, IDENTIFY_TOPIC_COUNT, RecalledMemory};
use crate::sampler::{self, BucketCounts, Sampler};
use crate::similarity::{SimilarityScorer, Tokenizer};
use crate::store::DocumentStore;
use crate::sync::{GraphSynchronizer, LoadReport, SyncReport};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn default_compress_rate() -> f64 {
    0.1
}

fn default_forget_hours() -> f64 {
    24.0
}

fn default_percentage() -> f64 {
    0.1
}

fn default_merge_threshold() -> usize {
    100
}

fn default_merge_batch() -> usize {
    10
}

fn default_chat_size() -> usize {
    20
}

fn default_max_reuses() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Tunables of the memory engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HippocampusConfig {
    /// Topics requested per newline of a window.
    #[serde(default = "default_compress_rate")]
    pub compress_rate: f64,

    /// Hours a relation may go untouched before it weakens.
    #[serde(default = "default_forget_hours")]
    pub edge_forget_hours: f64,

    /// Hours a concept may go untouched before it loses an item.
    #[serde(default = "default_forget_hours")]
    pub node_forget_hours: f64,

    /// Fraction of nodes and edges inspected per decay pass.
    #[serde(default = "default_percentage")]
    pub forget_percentage: f64,

    /// Fraction of nodes inspected per merge pass.
    #[serde(default = "default_percentage")]
    pub merge_percentage: f64,

    /// A concept with more items than this is merged.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: usize,

    /// Items re-summarized per merged concept.
    #[serde(default = "default_merge_batch")]
    pub merge_batch: usize,

    /// Messages per sampled window.
    #[serde(default = "default_chat_size")]
    pub chat_size: usize,

    #[serde(default)]
    pub bucket_counts: BucketCounts,

    /// Times a message may be sampled before it is retired.
    #[serde(default = "default_max_reuses")]
    pub max_reuses: u32,

    /// Topics containing any of these substrings are never memorized.
    #[serde(default)]
    pub ban_words: Vec<String>,

    /// Per-call timeout for language-model requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HippocampusConfig {
    fn default() -> Self {
        Self {
            compress_rate: default_compress_rate(),
            edge_forget_hours: default_forget_hours(),
            node_forget_hours: default_forget_hours(),
            forget_percentage: default_percentage(),
            merge_percentage: default_percentage(),
            merge_threshold: default_merge_threshold(),
            merge_batch: default_merge_batch(),
            chat_size: default_chat_size(),
            bucket_counts: BucketCounts::default(),
            max_reuses: default_max_reuses(),
            ban_words: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl HippocampusConfig {
    pub fn decay_policy(&self) -> DecayPolicy {
        DecayPolicy { edge_forget_hours: self.edge_forget_hours, node_forget_hours: self.node_forget_hours }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome counts of one consolidation batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub windows: usize,
    pub memories_added: usize,
    pub similar_links: usize,
    pub co_occurrence_links: usize,
}

/// Size of the live graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub memory_items: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Hippocampus
// ─────────────────────────────────────────────────────────────────────────────

/// Associative memory engine over one owned [`MemoryGraph`].
pub struct Hippocampus {
    graph: RwLock<MemoryGraph>,
    mutation: Mutex<()>,
    store: Arc<dyn DocumentStore>,
    sampler: Sampler,
    compressor: Compressor,
    synchronizer: GraphSynchronizer,
    config: HippocampusConfig,
}

impl Hippocampus {
    /// Build an engine with an empty graph.  Call [`load`](Self::load) to
    /// restore persisted memory.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TopicExtractor>,
        summarizer: Arc<dyn Summarizer>,
        tokenizer: Arc<dyn Tokenizer>,
        config: HippocampusConfig,
    ) -> Self {
        let compressor = Compressor::new(
            extractor,
            summarizer,
            SimilarityScorer::new(tokenizer),
            config.ban_words.clone(),
            Duration::from_secs(config.request_timeout_secs),
        );
        Self {
            graph: RwLock::new(MemoryGraph::new()),
            mutation: Mutex::new(()),
            sampler: Sampler::new(store.clone(), config.max_reuses),
            synchronizer: GraphSynchronizer::new(store.clone()),
            store,
            compressor,
            config,
        }
    }

    pub fn config(&self) -> &HippocampusConfig {
        &self.config
    }

    // ── persistence ──────────────────────────────────────────────────────────

    /// Replace the live graph with the persisted one.
    pub async fn load(&self) -> Result<LoadReport, HippoError> {
        let _writer = self.mutation.lock().await;
        let (loaded, report) = self.synchronizer.load(unix_now()).await?;
        *self.graph.write().await = loaded;
        Ok(report)
    }

    /// Persist the live graph.
    pub async fn sync(&self) -> Result<SyncReport, HippoError> {
        let _writer = self.mutation.lock().await;
        self.sync_locked().await
    }

    async fn sync_locked(&self) -> Result<SyncReport, HippoError> {
        let graph = self.graph.read().await;
        Ok(self.synchronizer.sync_to_store(&graph).await?)
    }

    // ── consolidation ────────────────────────────────────────────────────────

    /// Sample windows with the configured sizes and consolidate them.
    pub async fn consolidate(&self) -> Result<ConsolidationReport, HippoError> {
        self.consolidate_batch(self.config.chat_size, &self.config.bucket_counts).await
    }

    /// Sample `counts` windows of `chat_size` messages, fold them into the
    /// graph, and persist the result.
    #[instrument(skip(self, counts))]
    pub async fn consolidate_batch(
        &self,
        chat_size: usize,
        counts: &BucketCounts,
    ) -> Result<ConsolidationReport, HippoError> {
        let _writer = self.mutation.lock().await;
        let windows = self.sampler.build_sample_set(chat_size, counts, unix_now()).await?;
        let mut report = ConsolidationReport::default();
        for window in &windows {
            self.consolidate_window(window, &mut report).await;
        }
        self.sync_locked().await?;
        info!(
            windows = report.windows,
            memories = report.memories_added,
            similar_links = report.similar_links,
            co_occurrence_links = report.co_occurrence_links,
            "consolidation finished"
        );
        Ok(report)
    }

    async fn consolidate_window(&self, window: &[ConversationMessage], report: &mut ConsolidationReport) {
        let concepts = self.graph.read().await.concepts();
        let compression = self.compressor.compress(window, self.config.compress_rate, &concepts).await;
        report.windows += 1;

        let now = unix_now();
        let mut graph = self.graph.write().await;
        let mut topics: Vec<&str> = Vec::with_capacity(compression.memories.len());
        for memory in &compression.memories {
            info!(topic = %memory.topic, "memory added");
            graph.add_node_at(&memory.topic, &memory.summary, now);
            report.memories_added += 1;
            for (existing, similarity) in &memory.similar {
                let strength = (similarity * 10.0).round() as u32;
                graph.link_with_strength(&memory.topic, existing, strength, now);
                report.similar_links += 1;
            }
            topics.push(&memory.topic);
        }
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                graph.connect_at(a, b, now);
                report.co_occurrence_links += 1;
            }
        }
    }

    // ── maintenance ──────────────────────────────────────────────────────────

    /// Decay a sample of the graph; persists when anything changed.
    pub async fn forget_pass(&self) -> Result<ForgetReport, HippoError> {
        let _writer = self.mutation.lock().await;
        let report = {
            let mut graph = self.graph.write().await;
            maintenance::forget_pass(
                &mut graph,
                &self.config.decay_policy(),
                self.config.forget_percentage,
                unix_now(),
                &mut rand::rng(),
            )
        };
        if report.changed() {
            self.sync_locked().await?;
        }
        Ok(report)
    }

    /// Re-summarize overgrown concepts; persists when anything changed.
    pub async fn merge_pass(&self) -> Result<MergeReport, HippoError> {
        let _writer = self.mutation.lock().await;
        let (plans, checked) = {
            let graph = self.graph.read().await;
            maintenance::plan_merges(
                &graph,
                self.config.merge_percentage,
                self.config.merge_threshold,
                self.config.merge_batch,
                &mut rand::rng(),
            )
        };
        let mut report = MergeReport { nodes_checked: checked, ..Default::default() };
        for plan in &plans {
            let now = unix_now();
            let summaries = maintenance::summarize_plan(&self.compressor, plan, now).await;
            let mut graph = self.graph.write().await;
            maintenance::apply_merge(&mut graph, plan, summaries, now, &mut report);
        }
        if report.changed() {
            self.sync_locked().await?;
        }
        info!(
            checked = report.nodes_checked,
            merged = report.nodes_merged,
            removed = report.items_removed,
            added = report.items_added,
            "merge pass finished"
        );
        Ok(report)
    }

    // ── queries ──────────────────────────────────────────────────────────────

    /// Topics the extractor finds in `text`; empty on collaborator failure.
    pub async fn identify_topics(&self, text: &str) -> Vec<String> {
        self.compressor.extract(text, IDENTIFY_TOPIC_COUNT).await
    }

    /// [`activation_value_with`](Self::activation_value_with) with 5 topics
    /// and threshold 0.3.
    pub async fn activation_value(&self, text: &str) -> u32 {
        self.activation_value_with(text, 5, 0.3).await
    }

    /// How strongly `text` resonates with existing memory (0 when nothing
    /// matches).
    pub async fn activation_value_with(&self, text: &str, max_topics: usize, threshold: f64) -> u32 {
        let identified = self.identify_topics(text).await;
        if identified.is_empty() {
            return 0;
        }
        let graph = self.graph.read().await;
        query::activation(&graph, self.compressor.scorer(), &identified, max_topics, threshold)
    }

    /// [`relevant_memories_with`](Self::relevant_memories_with) with 5
    /// topics, threshold 0.4 and at most 5 items.
    pub async fn relevant_memories(&self, text: &str) -> Vec<RecalledMemory> {
        self.relevant_memories_with(text, 5, 0.4, 5).await
    }

    pub async fn relevant_memories_with(
        &self,
        text: &str,
        max_topics: usize,
        threshold: f64,
        max_items: usize,
    ) -> Vec<RecalledMemory> {
        let identified = self.identify_topics(text).await;
        if identified.is_empty() {
            return Vec::new();
        }
        let graph = self.graph.read().await;
        query::relevant_memories(
            &graph,
            self.compressor.scorer(),
            &identified,
            max_topics,
            threshold,
            max_items,
            &mut rand::rng(),
        )
    }

    /// `(own items, neighbors' items)` of `concept`; see
    /// [`MemoryGraph::related_items`].
    pub async fn related_items(&self, concept: &str, depth: usize) -> (Vec<String>, Vec<String>) {
        self.graph.read().await.related_items(concept.trim(), depth)
    }

    pub async fn stats(&self) -> GraphStats {
        let graph = self.graph.read().await;
        GraphStats {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            memory_items: graph.nodes().map(|n| n.memory_items.len()).sum(),
        }
    }

    /// Copy of the live graph.
    pub async fn snapshot(&self) -> MemoryGraph {
        self.graph.read().await.clone()
    }

    // ── raw messages ─────────────────────────────────────────────────────────

    /// Append `lines` to the message store as one conversation, spread
    /// evenly between `start` and `end`.  Blank lines are skipped.
    pub async fn import_messages(
        &self,
        conversation_id: &str,
        lines: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<usize, HippoError> {
        let lines: Vec<&str> = lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
        let step = if lines.len() > 1 { (end - start) / (lines.len() - 1) as f64 } else { 0.0 };
        for (i, line) in lines.iter().enumerate() {
            let message = ConversationMessage::new(conversation_id, start + step * i as f64, *line);
            sampler::insert_message(self.store.as_ref(), &message).await?;
        }
        info!(conversation_id, messages = lines.len(), "messages imported");
        Ok(lines.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
