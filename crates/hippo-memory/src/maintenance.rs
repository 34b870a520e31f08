//! Periodic graph upkeep: decay ("forgetting") and compaction ("merging").
//!
//! Both passes inspect a random sample of the population rather than the
//! whole graph, so a large graph ages gradually across many runs.

use hippo_types::{ConversationMessage, Timestamp};
use rand::Rng;
use rand::seq::index;
use serde::Serialize;
use tracing::{debug, info};

use crate::consolidation::Compressor;
use crate::graph::{MemoryGraph, Weakening};

/// Compression ratio used when re-summarizing an overgrown node.
pub const MERGE_COMPRESS_RATIO: f64 = 0.1;

/// Conversation id stamped on the synthetic window built from merged items.
const MERGE_WINDOW_ID: &str = "memory-merge";

/// Number of elements to inspect out of `population`.
///
/// At least one whenever the population is non-empty.
pub fn sample_count(population: usize, percentage: f64) -> usize {
    if population == 0 {
        return 0;
    }
    ((population as f64 * percentage).floor() as usize).clamp(1, population)
}

fn sample_positions<R: Rng>(population: usize, percentage: f64, rng: &mut R) -> Vec<usize> {
    let amount = sample_count(population, percentage);
    index::sample(rng, population, amount).into_vec()
}

// ─────────────────────────────────────────────────────────────────────────────
// Decay
// ─────────────────────────────────────────────────────────────────────────────

/// Staleness thresholds for the decay pass, in hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPolicy {
    pub edge_forget_hours: f64,
    pub node_forget_hours: f64,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self { edge_forget_hours: 24.0, node_forget_hours: 24.0 }
    }
}

/// Outcome counts of one decay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForgetReport {
    pub edges_checked: usize,
    pub nodes_checked: usize,
    pub edges_weakened: usize,
    pub edges_removed: usize,
    pub nodes_reduced: usize,
    pub nodes_removed: usize,
}

impl ForgetReport {
    /// Whether the pass changed the graph.
    pub fn changed(&self) -> bool {
        self.edges_weakened + self.edges_removed + self.nodes_reduced + self.nodes_removed > 0
    }
}

/// Weaken stale relations and drop one memory item from stale concepts.
///
/// Nodes and edges are sampled independently before any change is made, so a
/// node may be sampled and then lose its edges (or vanish) mid-pass.
pub fn forget_pass<R: Rng>(
    graph: &mut MemoryGraph,
    policy: &DecayPolicy,
    percentage: f64,
    now: Timestamp,
    rng: &mut R,
) -> ForgetReport {
    let edge_keys = graph.edge_keys();
    let concepts = graph.concepts();
    let edges: Vec<_> = sample_positions(edge_keys.len(), percentage, rng)
        .into_iter()
        .map(|i| edge_keys[i].clone())
        .collect();
    let nodes: Vec<String> = sample_positions(concepts.len(), percentage, rng)
        .into_iter()
        .map(|i| concepts[i].clone())
        .collect();

    let mut report = ForgetReport { edges_checked: edges.len(), nodes_checked: nodes.len(), ..Default::default() };

    let edge_cutoff = policy.edge_forget_hours * 3600.0;
    for key in edges {
        let stale = graph
            .edge(key.source(), key.target())
            .is_some_and(|rel| now - rel.last_modified > edge_cutoff);
        if !stale {
            continue;
        }
        match graph.weaken(key.source(), key.target(), now) {
            Some(Weakening::Weakened(strength)) => {
                debug!(source = key.source(), target = key.target(), strength, "relation weakened");
                report.edges_weakened += 1;
            }
            Some(Weakening::Removed) => {
                debug!(source = key.source(), target = key.target(), "relation removed");
                report.edges_removed += 1;
            }
            None => {}
        }
    }

    let node_cutoff = policy.node_forget_hours * 3600.0;
    for concept in nodes {
        let stale = graph.node(&concept).is_some_and(|n| now - n.last_modified > node_cutoff);
        if !stale {
            continue;
        }
        if graph.forget_one_item_with(&concept, rng).is_none() {
            continue;
        }
        if graph.contains(&concept) {
            graph.touch_node(&concept, now);
            debug!(concept = %concept, remaining = graph.item_count(&concept), "memory item forgotten");
            report.nodes_reduced += 1;
        } else {
            debug!(concept = %concept, "concept forgotten");
            report.nodes_removed += 1;
        }
    }

    info!(
        edges_weakened = report.edges_weakened,
        edges_removed = report.edges_removed,
        nodes_reduced = report.nodes_reduced,
        nodes_removed = report.nodes_removed,
        "forget pass finished"
    );
    report
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

/// Items picked for re-summarization from one overgrown concept.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub concept: String,
    /// Positions of the picked items in the concept's item list.
    pub indices: Vec<usize>,
    pub items: Vec<String>,
}

/// Outcome counts of one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub nodes_checked: usize,
    pub nodes_merged: usize,
    pub items_removed: usize,
    pub items_added: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.nodes_merged > 0
    }
}

/// Sample concepts and plan a merge for each one holding more than
/// `threshold` items.  Returns the plans and how many concepts were sampled.
pub fn plan_merges<R: Rng>(
    graph: &MemoryGraph,
    percentage: f64,
    threshold: usize,
    batch: usize,
    rng: &mut R,
) -> (Vec<MergePlan>, usize) {
    let concepts = graph.concepts();
    let sampled = sample_positions(concepts.len(), percentage, rng);
    let checked = sampled.len();
    let mut plans = Vec::new();
    for i in sampled {
        let concept = &concepts[i];
        let Some(node) = graph.node(concept) else {
            continue;
        };
        let len = node.memory_items.len();
        if len <= threshold || batch == 0 {
            continue;
        }
        let mut indices = index::sample(rng, len, batch.min(len)).into_vec();
        indices.sort_unstable();
        let items = indices.iter().map(|&i| node.memory_items[i].clone()).collect();
        plans.push(MergePlan { concept: concept.clone(), indices, items });
    }
    (plans, checked)
}

/// Re-summarize a plan's items as one synthetic window stamped `now`.
///
/// Returns the new summaries; possibly empty if every collaborator call fails.
pub async fn summarize_plan(compressor: &Compressor, plan: &MergePlan, now: Timestamp) -> Vec<String> {
    let window: Vec<ConversationMessage> = plan
        .items
        .iter()
        .map(|item| ConversationMessage::new(MERGE_WINDOW_ID, now, item.as_str()))
        .collect();
    let compression = compressor.compress(&window, MERGE_COMPRESS_RATIO, &[]).await;
    compression.memories.into_iter().map(|m| m.summary).collect()
}

/// Swap a plan's items for `summaries` in the graph and record the change.
pub fn apply_merge(
    graph: &mut MemoryGraph,
    plan: &MergePlan,
    summaries: Vec<String>,
    now: Timestamp,
    report: &mut MergeReport,
) {
    let added = summaries.len();
    if let Some(removed) = graph.replace_items(&plan.concept, &plan.indices, summaries, now) {
        info!(concept = %plan.concept, removed, added, "memory items merged");
        report.nodes_merged += 1;
        report.items_removed += removed;
        report.items_added += added;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
