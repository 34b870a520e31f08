//! In-memory associative memory graph.
//!
//! A simple undirected graph whose nodes are *concepts* (normalized topic
//! strings) carrying an ordered list of memory fragments, and whose edges are
//! *relations* with an integer strength.
//!
//! ## Invariants
//!
//! * A node always holds at least one memory item.  Removing the last item
//!   deletes the node.
//! * Every edge joins two distinct nodes that are currently present.  Deleting
//!   a node deletes all of its edges.
//! * At most one edge exists per unordered pair, and its strength is ≥ 1.
//!
//! All mutations are infallible; operations on an absent concept return an
//! empty result or `None`.
//!
//! # Example
//!
//! ```rust
//! use hippo_memory::graph::MemoryGraph;
//!
//! let mut graph = MemoryGraph::new();
//! graph.add_node("cats", "cats are cute");
//! graph.add_node("dogs", "dogs are loyal");
//! graph.connect("cats", "dogs");
//! graph.connect("cats", "dogs");
//!
//! assert_eq!(graph.edge("cats", "dogs").unwrap().strength, 2);
//! let (first, second) = graph.related_items("cats", 2);
//! assert_eq!(first, vec!["cats are cute".to_string()]);
//! assert_eq!(second, vec!["dogs are loyal".to_string()]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use hippo_types::{Timestamp, unix_now};
use rand::Rng;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Node / edge types
// ─────────────────────────────────────────────────────────────────────────────

/// A named topic and the memory fragments accumulated for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub concept: String,
    /// Fragments in insertion order.  Never empty while the node exists.
    pub memory_items: Vec<String>,
    pub created_at: Timestamp,
    pub last_modified: Timestamp,
}

/// A weighted, undirected relation between two concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// ≥ 1 while the relation exists.
    pub strength: u32,
    pub created_at: Timestamp,
    pub last_modified: Timestamp,
}

/// Canonical key of an unordered concept pair (`a < b`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    a: String,
    b: String,
}

impl EdgeKey {
    /// Build the canonical key, or `None` for a self-loop.
    pub fn new(x: &str, y: &str) -> Option<Self> {
        match x.cmp(y) {
            std::cmp::Ordering::Less => Some(Self { a: x.to_string(), b: y.to_string() }),
            std::cmp::Ordering::Greater => Some(Self { a: y.to_string(), b: x.to_string() }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The lexicographically smaller endpoint.
    pub fn source(&self) -> &str {
        &self.a
    }

    /// The lexicographically larger endpoint.
    pub fn target(&self) -> &str {
        &self.b
    }
}

/// Outcome of weakening a relation by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weakening {
    /// Strength dropped to the contained value (≥ 1).
    Weakened(u32),
    /// Strength reached zero and the relation was deleted.
    Removed,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryGraph
// ─────────────────────────────────────────────────────────────────────────────

/// The concept/relation collection.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: BTreeMap<String, ConceptNode>,
    edges: BTreeMap<EdgeKey, Relation>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── concept mutations ────────────────────────────────────────────────────

    /// Append `fragment` to `concept`, creating the node if needed.
    pub fn add_node(&mut self, concept: &str, fragment: &str) {
        self.add_node_at(concept, fragment, unix_now());
    }

    /// [`add_node`][Self::add_node] with an explicit clock reading.
    pub fn add_node_at(&mut self, concept: &str, fragment: &str, now: Timestamp) {
        match self.nodes.get_mut(concept) {
            Some(node) => {
                node.memory_items.push(fragment.to_string());
                node.last_modified = now;
            }
            None => {
                self.nodes.insert(
                    concept.to_string(),
                    ConceptNode {
                        concept: concept.to_string(),
                        memory_items: vec![fragment.to_string()],
                        created_at: now,
                        last_modified: now,
                    },
                );
            }
        }
    }

    /// Insert a fully-formed node, replacing any node with the same concept.
    ///
    /// Nodes without memory items are rejected and `false` is returned.
    pub fn insert_node(&mut self, node: ConceptNode) -> bool {
        if node.memory_items.is_empty() || node.concept.is_empty() {
            return false;
        }
        self.nodes.insert(node.concept.clone(), node);
        true
    }

    /// Delete `concept` and every relation touching it.
    pub fn remove_node(&mut self, concept: &str) -> Option<ConceptNode> {
        let node = self.nodes.remove(concept)?;
        if let Some(neighbors) = self.adjacency.remove(concept) {
            for other in neighbors {
                if let Some(key) = EdgeKey::new(concept, &other) {
                    self.edges.remove(&key);
                }
                if let Some(set) = self.adjacency.get_mut(&other) {
                    set.remove(concept);
                    if set.is_empty() {
                        self.adjacency.remove(&other);
                    }
                }
            }
        }
        Some(node)
    }

    /// Remove one uniformly random memory item from `concept`.
    ///
    /// Deletes the node when its last item goes.  Returns the removed item.
    pub fn forget_one_item(&mut self, concept: &str) -> Option<String> {
        self.forget_one_item_with(concept, &mut rand::rng())
    }

    /// [`forget_one_item`][Self::forget_one_item] with a caller-supplied RNG.
    pub fn forget_one_item_with<R: Rng>(&mut self, concept: &str, rng: &mut R) -> Option<String> {
        let node = self.nodes.get_mut(concept)?;
        if node.memory_items.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..node.memory_items.len());
        let removed = node.memory_items.remove(idx);
        if node.memory_items.is_empty() {
            self.remove_node(concept);
        }
        Some(removed)
    }

    /// Remove the items at `indices` from `concept` and append
    /// `replacements`.  Out-of-range and duplicate indices are ignored.
    ///
    /// Returns the number of items removed, or `None` if the concept is
    /// absent.  The node is deleted if nothing remains.
    pub fn replace_items(
        &mut self,
        concept: &str,
        indices: &[usize],
        replacements: Vec<String>,
        now: Timestamp,
    ) -> Option<usize> {
        let node = self.nodes.get_mut(concept)?;
        let mut doomed: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < node.memory_items.len())
            .collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        doomed.dedup();
        for &i in &doomed {
            node.memory_items.remove(i);
        }
        node.memory_items.extend(replacements);
        node.last_modified = now;
        if node.memory_items.is_empty() {
            self.remove_node(concept);
        }
        Some(doomed.len())
    }

    /// Set the `last_modified` stamp of `concept`.
    pub fn touch_node(&mut self, concept: &str, now: Timestamp) {
        if let Some(node) = self.nodes.get_mut(concept) {
            node.last_modified = now;
        }
    }

    // ── relation mutations ───────────────────────────────────────────────────

    /// Strengthen the relation `a`–`b` by one, creating it at strength 1.
    ///
    /// No-op for self-loops or when either endpoint is absent.
    pub fn connect(&mut self, a: &str, b: &str) {
        self.connect_at(a, b, unix_now());
    }

    /// [`connect`][Self::connect] with an explicit clock reading.
    pub fn connect_at(&mut self, a: &str, b: &str, now: Timestamp) {
        let Some(key) = self.valid_key(a, b) else {
            return;
        };
        match self.edges.get_mut(&key) {
            Some(rel) => {
                rel.strength += 1;
                rel.last_modified = now;
            }
            None => self.put_edge(key, Relation { strength: 1, created_at: now, last_modified: now }),
        }
    }

    /// Create the relation `a`–`b` with `strength`, or raise an existing
    /// relation to at least `strength`.
    ///
    /// No-op for self-loops, absent endpoints, or zero strength.
    pub fn link_with_strength(&mut self, a: &str, b: &str, strength: u32, now: Timestamp) {
        if strength == 0 {
            return;
        }
        let Some(key) = self.valid_key(a, b) else {
            return;
        };
        match self.edges.get_mut(&key) {
            Some(rel) => {
                rel.strength = rel.strength.max(strength);
                rel.last_modified = now;
            }
            None => self.put_edge(key, Relation { strength, created_at: now, last_modified: now }),
        }
    }

    /// Insert a fully-formed relation.  Rejects (returns `false`) self-loops,
    /// dangling endpoints and zero strength.
    pub fn insert_edge(&mut self, a: &str, b: &str, relation: Relation) -> bool {
        if relation.strength == 0 {
            return false;
        }
        match self.valid_key(a, b) {
            Some(key) => {
                self.put_edge(key, relation);
                true
            }
            None => false,
        }
    }

    /// Decrement the strength of `a`–`b`, deleting the relation at zero.
    pub fn weaken(&mut self, a: &str, b: &str, now: Timestamp) -> Option<Weakening> {
        let key = EdgeKey::new(a, b)?;
        let rel = self.edges.get_mut(&key)?;
        if rel.strength <= 1 {
            self.remove_edge(a, b);
            Some(Weakening::Removed)
        } else {
            rel.strength -= 1;
            rel.last_modified = now;
            Some(Weakening::Weakened(rel.strength))
        }
    }

    /// Delete the relation `a`–`b` if present.
    pub fn remove_edge(&mut self, a: &str, b: &str) -> Option<Relation> {
        let key = EdgeKey::new(a, b)?;
        let rel = self.edges.remove(&key)?;
        for (x, y) in [(a, b), (b, a)] {
            if let Some(set) = self.adjacency.get_mut(x) {
                set.remove(y);
                if set.is_empty() {
                    self.adjacency.remove(x);
                }
            }
        }
        Some(rel)
    }

    /// Drop every node and relation.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.adjacency.clear();
    }

    // ── traversal ────────────────────────────────────────────────────────────

    /// `(first_layer, second_layer)` memory items around `concept`.
    ///
    /// The first layer is the concept's own items; when `depth >= 2` the
    /// second layer concatenates the items of every direct neighbor.
    pub fn related_items(&self, concept: &str, depth: usize) -> (Vec<String>, Vec<String>) {
        let Some(node) = self.nodes.get(concept) else {
            return (Vec::new(), Vec::new());
        };
        let first = node.memory_items.clone();
        let mut second = Vec::new();
        if depth >= 2 {
            for neighbor in self.neighbors(concept) {
                if let Some(n) = self.nodes.get(neighbor) {
                    second.extend(n.memory_items.iter().cloned());
                }
            }
        }
        (first, second)
    }

    /// Direct neighbors of `concept`, in lexicographic order.
    pub fn neighbors(&self, concept: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(concept)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    // ── lookups ──────────────────────────────────────────────────────────────

    pub fn node(&self, concept: &str) -> Option<&ConceptNode> {
        self.nodes.get(concept)
    }

    pub fn contains(&self, concept: &str) -> bool {
        self.nodes.contains_key(concept)
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&Relation> {
        self.edges.get(&EdgeKey::new(a, b)?)
    }

    /// Number of memory items held by `concept` (0 when absent).
    pub fn item_count(&self, concept: &str) -> usize {
        self.nodes.get(concept).map_or(0, |n| n.memory_items.len())
    }

    /// All concept names, sorted.
    pub fn concepts(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ConceptNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &Relation)> {
        self.edges.iter()
    }

    /// All relation keys, sorted.
    pub fn edge_keys(&self) -> Vec<EdgeKey> {
        self.edges.keys().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn valid_key(&self, a: &str, b: &str) -> Option<EdgeKey> {
        if !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return None;
        }
        EdgeKey::new(a, b)
    }

    fn put_edge(&mut self, key: EdgeKey, relation: Relation) {
        self.adjacency.entry(key.a.clone()).or_default().insert(key.b.clone());
        self.adjacency.entry(key.b.clone()).or_default().insert(key.a.clone());
        self.edges.insert(key, relation);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
