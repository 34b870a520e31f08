//! Read-only query path: how strongly does a text resonate with memory, and
//! which memories does it recall.
//!
//! Topic identification is asynchronous and lives on the facade; everything
//! here works on an already identified topic list and a graph snapshot.

use rand::Rng;
use rand::seq::index;
use serde::Serialize;
use tracing::debug;

use crate::graph::MemoryGraph;
use crate::similarity::SimilarityScorer;

/// Number of topics requested when identifying the topics of a query text.
pub const IDENTIFY_TOPIC_COUNT: usize = 5;

/// A memory fragment recalled for a query, tagged with its source concept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecalledMemory {
    pub topic: String,
    pub similarity: f64,
    pub content: String,
}

/// `(concept, similarity)` for every input topic / concept pair scoring at
/// least `threshold`.
pub fn find_similar_topics(
    graph: &MemoryGraph,
    scorer: &SimilarityScorer,
    topics: &[String],
    threshold: f64,
) -> Vec<(String, f64)> {
    let concepts: Vec<(&str, _)> = graph.nodes().map(|n| (n.concept.as_str(), scorer.vectorize(&n.concept))).collect();
    let mut similar = Vec::new();
    for topic in topics {
        let topic_vector = scorer.vectorize(topic);
        for (concept, concept_vector) in &concepts {
            let sim = crate::similarity::cosine(&topic_vector, concept_vector);
            if sim >= threshold {
                similar.push((concept.to_string(), sim));
            }
        }
    }
    similar
}

/// Highest-scoring distinct concepts, at most `max_topics`.
pub fn top_topics(mut pairs: Vec<(String, f64)>, max_topics: usize) -> Vec<(String, f64)> {
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut top: Vec<(String, f64)> = Vec::new();
    for (concept, sim) in pairs {
        if top.len() == max_topics {
            break;
        }
        if !top.iter().any(|(c, _)| *c == concept) {
            top.push((concept, sim));
        }
    }
    top
}

/// Dampening factor for concepts that already hold many memories.
pub fn content_penalty(item_count: usize) -> f64 {
    1.0 / (1.0 + (item_count as f64 + 1.0).ln())
}

/// Activation score of a text whose identified topics are `identified`.
pub fn activation(
    graph: &MemoryGraph,
    scorer: &SimilarityScorer,
    identified: &[String],
    max_topics: usize,
    threshold: f64,
) -> u32 {
    if identified.is_empty() {
        return 0;
    }
    let similar = find_similar_topics(graph, scorer, identified, threshold);
    if similar.is_empty() {
        return 0;
    }
    let top = top_topics(similar, max_topics);

    if let [(concept, sim)] = top.as_slice() {
        let penalty = content_penalty(graph.item_count(concept));
        let value = (sim * 50.0 * penalty).round() as u32;
        debug!(concept = %concept, similarity = sim, activation = value, "single-topic activation");
        return value;
    }

    // best penalty-adjusted similarity per input topic
    let mut best: Vec<Option<f64>> = vec![None; identified.len()];
    for (concept, _) in &top {
        let penalty = content_penalty(graph.item_count(concept));
        let concept_vector = scorer.vectorize(concept);
        for (i, topic) in identified.iter().enumerate() {
            let sim = crate::similarity::cosine(&scorer.vectorize(topic), &concept_vector);
            if sim >= threshold {
                let adjusted = sim * penalty;
                best[i] = Some(best[i].map_or(adjusted, |b: f64| b.max(adjusted)));
            }
        }
    }
    let matched: Vec<f64> = best.into_iter().flatten().collect();
    let match_rate = matched.len() as f64 / identified.len() as f64;
    let mean = if matched.is_empty() { 0.0 } else { matched.iter().sum::<f64>() / matched.len() as f64 };
    let value = ((match_rate + mean) / 2.0 * 100.0).round() as u32;
    debug!(match_rate, mean_similarity = mean, activation = value, "multi-topic activation");
    value
}

/// Memory fragments recalled by a text whose identified topics are
/// `identified`, most similar first.
///
/// Each concept contributes at most `max_items / 2` fragments (randomly
/// chosen when it holds more).  When the pool is still larger than
/// `max_items`, a random subset of that size is returned, kept in
/// descending similarity order.
pub fn relevant_memories<R: Rng>(
    graph: &MemoryGraph,
    scorer: &SimilarityScorer,
    identified: &[String],
    max_topics: usize,
    threshold: f64,
    max_items: usize,
    rng: &mut R,
) -> Vec<RecalledMemory> {
    let similar = find_similar_topics(graph, scorer, identified, threshold);
    let per_topic = max_items / 2;
    let mut pool = Vec::new();
    for (topic, similarity) in top_topics(similar, max_topics) {
        let (mut first_layer, _) = graph.related_items(&topic, 1);
        if first_layer.len() * 2 > max_items {
            let mut picked = index::sample(rng, first_layer.len(), per_topic).into_vec();
            picked.sort_unstable();
            first_layer = picked.into_iter().map(|i| first_layer[i].clone()).collect();
        }
        pool.extend(first_layer.into_iter().map(|content| RecalledMemory { topic: topic.clone(), similarity, content }));
    }

    pool.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    if pool.len() > max_items {
        let mut keep = index::sample(rng, pool.len(), max_items).into_vec();
        keep.sort_unstable();
        pool = keep.into_iter().map(|i| pool[i].clone()).collect();
    }
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn topics(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn graph() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        g.add_node_at("black cat", "the black cat sleeps", 1.0);
        g.add_node_at("green tea", "green tea is bitter", 1.0);
        g.add_node_at("green tea", "tea at noon", 1.0);
        g
    }

    #[test]
    fn similar_topics_apply_threshold() {
        let scorer = SimilarityScorer::default();
        let found = find_similar_topics(&graph(), &scorer, &topics(&["cat"]), 0.3);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "black cat");
        assert!((found[0].1 - 1.0 / 2f64.sqrt()).abs() < 1e-9);
        assert!(find_similar_topics(&graph(), &scorer, &topics(&["cat"]), 0.8).is_empty());
    }

    #[test]
    fn top_topics_sorts_and_dedupes() {
        let pairs = vec![("a".to_string(), 0.5), ("b".to_string(), 0.9), ("a".to_string(), 0.7), ("c".to_string(), 0.1)];
        let top = top_topics(pairs, 2);
        assert_eq!(top, vec![("b".to_string(), 0.9), ("a".to_string(), 0.7)]);
    }

    #[test]
    fn no_identified_topics_means_zero_activation() {
        assert_eq!(activation(&graph(), &SimilarityScorer::default(), &[], 5, 0.3), 0);
    }

    #[test]
    fn unknown_topics_mean_zero_activation() {
        assert_eq!(activation(&graph(), &SimilarityScorer::default(), &topics(&["rocket"]), 5, 0.3), 0);
    }

    #[test]
    fn single_topic_activation_is_penalized() {
        let value = activation(&graph(), &SimilarityScorer::default(), &topics(&["black cat"]), 5, 0.3);
        // similarity 1, one item: 50 / (1 + ln 2) ≈ 29.53
        assert_eq!(value, 30);
    }

    #[test]
    fn multi_topic_activation_blends_match_rate_and_similarity() {
        let scorer = SimilarityScorer::default();
        let value = activation(&graph(), &scorer, &topics(&["black cat", "green tea", "rocket"]), 5, 0.3);
        let p1 = content_penalty(1);
        let p2 = content_penalty(2);
        let expected = ((2.0 / 3.0 + (p1 + p2) / 2.0) / 2.0 * 100.0).round() as u32;
        assert_eq!(value, expected);
    }

    #[test]
    fn relevant_memories_tags_and_orders() {
        let mut rng = StdRng::seed_from_u64(1);
        let scorer = SimilarityScorer::default();
        let recalled = relevant_memories(&graph(), &scorer, &topics(&["cat", "green tea"]), 5, 0.4, 5, &mut rng);
        assert_eq!(recalled.len(), 3);
        assert_eq!(recalled[0].topic, "green tea");
        assert!(recalled.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(recalled.iter().any(|m| m.content == "the black cat sleeps"));
    }

    #[test]
    fn relevant_memories_caps_per_topic_and_total() {
        let mut g = MemoryGraph::new();
        for i in 0..10 {
            g.add_node_at("cat", &format!("cat memory {i}"), 1.0);
            g.add_node_at("cat food", &format!("food memory {i}"), 1.0);
            g.add_node_at("cat toy", &format!("toy memory {i}"), 1.0);
        }
        let mut rng = StdRng::seed_from_u64(3);
        let scorer = SimilarityScorer::default();
        let recalled = relevant_memories(&g, &scorer, &topics(&["cat"]), 5, 0.4, 5, &mut rng);
        // 2 per topic from 3 topics = 6, then a random 5
        assert_eq!(recalled.len(), 5);
        assert!(recalled.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn relevant_memories_for_unknown_text_is_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        let recalled = relevant_memories(&graph(), &SimilarityScorer::default(), &topics(&["rocket"]), 5, 0.4, 5, &mut rng);
        assert!(recalled.is_empty());
    }
}
