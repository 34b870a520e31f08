//! Hash-diff synchronization between a [`MemoryGraph`] and a [`DocumentStore`].
//!
//! Every persisted node and edge carries a content hash.  Writing the graph
//! compares hashes and only touches records whose content changed, so an
//! unchanged graph syncs with zero writes.  Loading rebuilds the graph from
//! scratch, repairing what it can and dropping what it cannot.
//!
//! # Document layout
//!
//! `graph_nodes`:
//!
//! | field         | type          |
//! |---------------|---------------|
//! | concept       | string        |
//! | memory_items  | array[string] |
//! | hash          | hex SHA-256   |
//! | created_time  | f64 seconds   |
//! | last_modified | f64 seconds   |
//!
//! `graph_edges`: `source`, `target` (with `source < target`), `strength`,
//! `hash`, `created_time`, `last_modified`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use hippo_types::Timestamp;
use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::graph::{ConceptNode, EdgeKey, MemoryGraph, Relation};
use crate::store::{DocumentStore, Filter, ID_FIELD, StoreError};

/// Collection holding concept nodes.
pub const NODES: &str = "graph_nodes";

/// Collection holding relations.
pub const EDGES: &str = "graph_edges";

const FIELD_SEPARATOR: char = '\u{1f}';

/// Content hash of a node: its concept plus its items in sorted order.
pub fn node_hash(concept: &str, items: &[String]) -> String {
    let mut sorted: Vec<&str> = items.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(concept.as_bytes());
    for item in sorted {
        hasher.update([FIELD_SEPARATOR as u8]);
        hasher.update(item.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Content hash of a relation: its canonical endpoints and strength.
pub fn edge_hash(key: &EdgeKey, strength: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.source().as_bytes());
    hasher.update([FIELD_SEPARATOR as u8]);
    hasher.update(key.target().as_bytes());
    hasher.update([FIELD_SEPARATOR as u8]);
    hasher.update(strength.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write counts of one [`GraphSynchronizer::sync_to_store`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// What [`GraphSynchronizer::load`] found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub nodes_loaded: usize,
    pub edges_loaded: usize,
    /// Node documents without a concept or without any memory item.
    pub nodes_dropped: usize,
    /// Edge documents that are dangling, self-loops, or have no strength.
    pub edges_dropped: usize,
    /// Records whose missing timestamps were backfilled and written back.
    pub backfilled: usize,
}

/// Stored record summary used for diffing.
struct StoredRecord {
    id: String,
    hash: Option<String>,
}

fn doc_id(doc: &Value) -> Option<String> {
    doc.get(ID_FIELD).and_then(Value::as_str).map(str::to_string)
}

fn by_id(id: &str) -> Filter {
    Filter::all().eq(ID_FIELD, id)
}

/// `memory_items` as a list; a bare string is a one-element list.
fn read_items(doc: &Value) -> Vec<String> {
    match doc.get("memory_items") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(item)) if !item.is_empty() => vec![item.clone()],
        _ => Vec::new(),
    }
}

/// Two-way synchronizer over the [`NODES`] and [`EDGES`] collections.
#[derive(Clone)]
pub struct GraphSynchronizer {
    store: Arc<dyn DocumentStore>,
}

impl GraphSynchronizer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ── graph → store ────────────────────────────────────────────────────────

    /// Persist `graph`, writing only records whose hash changed and deleting
    /// records no longer present in memory.
    pub async fn sync_to_store(&self, graph: &MemoryGraph) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();
        self.sync_nodes(graph, &mut report).await?;
        self.sync_edges(graph, &mut report).await?;
        if report.writes() > 0 {
            info!(
                inserted = report.inserted,
                updated = report.updated,
                deleted = report.deleted,
                "graph synced to store"
            );
        } else {
            debug!("graph already in sync");
        }
        Ok(report)
    }

    async fn sync_nodes(&self, graph: &MemoryGraph, report: &mut SyncReport) -> Result<(), StoreError> {
        let mut stored: HashMap<String, StoredRecord> = HashMap::new();
        let mut extras = Vec::new();
        for doc in self.store.find_many(NODES, &Filter::all(), None, None).await? {
            let Some(id) = doc_id(&doc) else { continue };
            let concept = doc.get("concept").and_then(Value::as_str).unwrap_or_default().to_string();
            if concept.is_empty() || stored.contains_key(&concept) {
                extras.push(id);
                continue;
            }
            let hash = doc.get("hash").and_then(Value::as_str).map(str::to_string);
            stored.insert(concept, StoredRecord { id, hash });
        }

        for node in graph.nodes() {
            let hash = node_hash(&node.concept, &node.memory_items);
            match stored.remove(&node.concept) {
                None => {
                    self.store.insert_one(NODES, node_document(node, &hash)).await?;
                    report.inserted += 1;
                }
                Some(record) if record.hash.as_deref() != Some(hash.as_str()) => {
                    let mut set = Map::new();
                    set.insert("memory_items".into(), json!(node.memory_items));
                    set.insert("hash".into(), json!(hash));
                    set.insert("created_time".into(), json!(node.created_at));
                    set.insert("last_modified".into(), json!(node.last_modified));
                    self.store.update_one(NODES, &by_id(&record.id), set, false).await?;
                    report.updated += 1;
                }
                Some(_) => {}
            }
        }

        let stale = stored.into_values().map(|r| r.id).chain(extras);
        for id in stale {
            if self.store.delete_one(NODES, &by_id(&id)).await? {
                report.deleted += 1;
            }
        }
        Ok(())
    }

    async fn sync_edges(&self, graph: &MemoryGraph, report: &mut SyncReport) -> Result<(), StoreError> {
        let mut stored: HashMap<EdgeKey, StoredRecord> = HashMap::new();
        let mut extras = Vec::new();
        for doc in self.store.find_many(EDGES, &Filter::all(), None, None).await? {
            let Some(id) = doc_id(&doc) else { continue };
            let source = doc.get("source").and_then(Value::as_str).unwrap_or_default();
            let target = doc.get("target").and_then(Value::as_str).unwrap_or_default();
            match EdgeKey::new(source, target) {
                // stored out of canonical order: rewrite it
                Some(key) if key.source() != source => extras.push(id),
                Some(key) if !stored.contains_key(&key) => {
                    let hash = doc.get("hash").and_then(Value::as_str).map(str::to_string);
                    stored.insert(key, StoredRecord { id, hash });
                }
                _ => extras.push(id),
            }
        }

        for (key, relation) in graph.edges() {
            let hash = edge_hash(key, relation.strength);
            match stored.remove(key) {
                None => {
                    self.store.insert_one(EDGES, edge_document(key, relation, &hash)).await?;
                    report.inserted += 1;
                }
                Some(record) if record.hash.as_deref() != Some(hash.as_str()) => {
                    let mut set = Map::new();
                    set.insert("strength".into(), json!(relation.strength));
                    set.insert("hash".into(), json!(hash));
                    set.insert("created_time".into(), json!(relation.created_at));
                    set.insert("last_modified".into(), json!(relation.last_modified));
                    self.store.update_one(EDGES, &by_id(&record.id), set, false).await?;
                    report.updated += 1;
                }
                Some(_) => {}
            }
        }

        let stale = stored.into_values().map(|r| r.id).chain(extras);
        for id in stale {
            if self.store.delete_one(EDGES, &by_id(&id)).await? {
                report.deleted += 1;
            }
        }
        Ok(())
    }

    // ── store → graph ────────────────────────────────────────────────────────

    /// Build a fresh graph from the store.
    ///
    /// Missing timestamps are backfilled with `now` and written back; broken
    /// records are skipped and counted.
    pub async fn load(&self, now: Timestamp) -> Result<(MemoryGraph, LoadReport), StoreError> {
        let mut graph = MemoryGraph::new();
        let mut report = LoadReport::default();

        for doc in self.store.find_many(NODES, &Filter::all(), None, None).await? {
            let concept = doc.get("concept").and_then(Value::as_str).map(str::trim).unwrap_or_default();
            let items = read_items(&doc);
            if concept.is_empty() || items.is_empty() {
                warn!(concept, "dropping node document without concept or memory items");
                report.nodes_dropped += 1;
                continue;
            }
            let (created_at, last_modified) = self.timestamps(NODES, &doc, now, &mut report).await?;
            graph.insert_node(ConceptNode { concept: concept.to_string(), memory_items: items, created_at, last_modified });
            report.nodes_loaded += 1;
        }

        // later documents for the same pair overwrite earlier ones
        let mut relations: BTreeMap<EdgeKey, Relation> = BTreeMap::new();
        for doc in self.store.find_many(EDGES, &Filter::all(), None, None).await? {
            let source = doc.get("source").and_then(Value::as_str).map(str::trim).unwrap_or_default();
            let target = doc.get("target").and_then(Value::as_str).map(str::trim).unwrap_or_default();
            let strength = doc.get("strength").map_or(Some(1), Value::as_i64).unwrap_or(0);
            let key = EdgeKey::new(source, target)
                .filter(|k| graph.contains(k.source()) && graph.contains(k.target()));
            let (Some(key), Ok(strength @ 1..)) = (key, u32::try_from(strength)) else {
                warn!(source, target, strength, "dropping invalid edge document");
                report.edges_dropped += 1;
                continue;
            };
            let (created_at, last_modified) = self.timestamps(EDGES, &doc, now, &mut report).await?;
            relations.insert(key, Relation { strength, created_at, last_modified });
        }
        for (key, relation) in relations {
            if graph.insert_edge(key.source(), key.target(), relation) {
                report.edges_loaded += 1;
            }
        }

        info!(
            nodes = report.nodes_loaded,
            edges = report.edges_loaded,
            nodes_dropped = report.nodes_dropped,
            edges_dropped = report.edges_dropped,
            backfilled = report.backfilled,
            "graph loaded from store"
        );
        Ok((graph, report))
    }

    /// `(created_time, last_modified)` of `doc`, backfilling absent fields.
    async fn timestamps(
        &self,
        collection: &str,
        doc: &Value,
        now: Timestamp,
        report: &mut LoadReport,
    ) -> Result<(Timestamp, Timestamp), StoreError> {
        let created = doc.get("created_time").and_then(Value::as_f64);
        let modified = doc.get("last_modified").and_then(Value::as_f64);
        if created.is_none() || modified.is_none() {
            let mut set = Map::new();
            if created.is_none() {
                set.insert("created_time".into(), json!(now));
            }
            if modified.is_none() {
                set.insert("last_modified".into(), json!(now));
            }
            if let Some(id) = doc_id(doc) {
                self.store.update_one(collection, &by_id(&id), set, false).await?;
            }
            report.backfilled += 1;
        }
        Ok((created.unwrap_or(now), modified.unwrap_or(now)))
    }
}

fn node_document(node: &ConceptNode, hash: &str) -> Value {
    json!({
        "concept": node.concept,
        "memory_items": node.memory_items,
        "hash": hash,
        "created_time": node.created_at,
        "last_modified": node.last_modified,
    })
}

fn edge_document(key: &EdgeKey, relation: &Relation, hash: &str) -> Value {
    json!({
        "source": key.source(),
        "target": key.target(),
        "strength": relation.strength,
        "hash": hash,
        "created_time": relation.created_at,
        "last_modified": relation.last_modified,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    fn sample_graph() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        g.add_node_at("cats", "cats are cute", 10.0);
        g.add_node_at("cats", "cats purr", 11.0);
        g.add_node_at("dogs", "dogs bark", 12.0);
        g.add_node_at("tea", "green tea", 13.0);
        g.connect_at("cats", "dogs", 14.0);
        g.connect_at("dogs", "cats", 15.0);
        g.link_with_strength("tea", "cats", 6, 16.0);
        g
    }

    fn setup() -> (Arc<InMemoryDocumentStore>, GraphSynchronizer) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let sync = GraphSynchronizer::new(store.clone());
        (store, sync)
    }

    fn shape(g: &MemoryGraph) -> (Vec<(String, Vec<String>)>, Vec<(String, String, u32)>) {
        let nodes = g.nodes().map(|n| (n.concept.clone(), n.memory_items.clone())).collect();
        let edges = g
            .edges()
            .map(|(k, r)| (k.source().to_string(), k.target().to_string(), r.strength))
            .collect();
        (nodes, edges)
    }

    // ── hashing ──────────────────────────────────────────────────────────────

    #[test]
    fn node_hash_ignores_item_order() {
        let a = node_hash("c", &["x".into(), "y".into()]);
        let b = node_hash("c", &["y".into(), "x".into()]);
        assert_eq!(a, b);
        assert_ne!(a, node_hash("c", &["x".into()]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn node_hash_separates_fields() {
        assert_ne!(node_hash("ab", &["c".into()]), node_hash("a", &["bc".into()]));
    }

    #[test]
    fn edge_hash_tracks_strength() {
        let key = EdgeKey::new("a", "b").unwrap();
        assert_ne!(edge_hash(&key, 1), edge_hash(&key, 2));
        assert_eq!(edge_hash(&key, 3), edge_hash(&EdgeKey::new("b", "a").unwrap(), 3));
    }

    // ── sync_to_store ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_sync_inserts_everything() {
        let (store, sync) = setup();
        let report = sync.sync_to_store(&sample_graph()).await.unwrap();
        assert_eq!(report, SyncReport { inserted: 5, updated: 0, deleted: 0 });
        assert_eq!(store.len(NODES), 3);
        assert_eq!(store.len(EDGES), 2);
    }

    #[tokio::test]
    async fn second_sync_performs_no_writes() {
        let (store, sync) = setup();
        let graph = sample_graph();
        sync.sync_to_store(&graph).await.unwrap();
        let writes = store.write_count();
        let report = sync.sync_to_store(&graph).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn changed_records_are_updated() {
        let (_store, sync) = setup();
        let mut graph = sample_graph();
        sync.sync_to_store(&graph).await.unwrap();
        graph.add_node_at("dogs", "dogs fetch", 20.0);
        graph.connect_at("cats", "dogs", 21.0);
        let report = sync.sync_to_store(&graph).await.unwrap();
        assert_eq!(report, SyncReport { inserted: 0, updated: 2, deleted: 0 });
    }

    #[tokio::test]
    async fn removed_records_are_deleted() {
        let (store, sync) = setup();
        let mut graph = sample_graph();
        sync.sync_to_store(&graph).await.unwrap();
        graph.remove_node("cats");
        let report = sync.sync_to_store(&graph).await.unwrap();
        // one node and both of its edges
        assert_eq!(report.deleted, 3);
        assert_eq!(store.len(NODES), 2);
        assert_eq!(store.len(EDGES), 0);
    }

    #[tokio::test]
    async fn edges_are_written_in_canonical_order() {
        let (store, sync) = setup();
        sync.sync_to_store(&sample_graph()).await.unwrap();
        let docs = store.find_many(EDGES, &Filter::all(), None, None).await.unwrap();
        for doc in docs {
            assert!(doc["source"].as_str().unwrap() < doc["target"].as_str().unwrap());
        }
    }

    // ── load ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn round_trip_preserves_graph_shape() {
        let (_store, sync) = setup();
        let graph = sample_graph();
        sync.sync_to_store(&graph).await.unwrap();
        let (loaded, report) = sync.load(99.0).await.unwrap();
        assert_eq!(shape(&loaded), shape(&graph));
        assert_eq!(report.backfilled, 0);
        assert_eq!(loaded.node("cats").unwrap().created_at, 10.0);
        assert_eq!(loaded.edge("tea", "cats").unwrap().last_modified, 16.0);
    }

    #[tokio::test]
    async fn load_then_sync_is_a_no_op() {
        let (store, sync) = setup();
        sync.sync_to_store(&sample_graph()).await.unwrap();
        let (loaded, _) = sync.load(99.0).await.unwrap();
        let writes = store.write_count();
        assert_eq!(sync.sync_to_store(&loaded).await.unwrap(), SyncReport::default());
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn load_backfills_missing_timestamps() {
        let (store, sync) = setup();
        store.insert_one(NODES, json!({"concept": "old", "memory_items": ["x"]})).await.unwrap();
        let (graph, report) = sync.load(500.0).await.unwrap();
        assert_eq!(report.backfilled, 1);
        let node = graph.node("old").unwrap();
        assert_eq!((node.created_at, node.last_modified), (500.0, 500.0));
        let doc = store.find_one(NODES, &Filter::all().eq("concept", "old")).await.unwrap().unwrap();
        assert_eq!(doc["created_time"], json!(500.0));
        assert_eq!(doc["last_modified"], json!(500.0));
    }

    #[tokio::test]
    async fn load_reads_legacy_scalar_items() {
        let (store, sync) = setup();
        store
            .insert_one(NODES, json!({"concept": "legacy", "memory_items": "one", "created_time": 1.0, "last_modified": 1.0}))
            .await
            .unwrap();
        let (graph, _) = sync.load(2.0).await.unwrap();
        assert_eq!(graph.node("legacy").unwrap().memory_items, vec!["one"]);
    }

    #[tokio::test]
    async fn load_drops_broken_records() {
        let (store, sync) = setup();
        let t = json!(1.0);
        for doc in [
            json!({"concept": "a", "memory_items": ["x"], "created_time": t, "last_modified": t}),
            json!({"concept": "b", "memory_items": ["y"], "created_time": t, "last_modified": t}),
            json!({"concept": "empty", "memory_items": [], "created_time": t, "last_modified": t}),
            json!({"memory_items": ["orphan"], "created_time": t, "last_modified": t}),
        ] {
            store.insert_one(NODES, doc).await.unwrap();
        }
        for doc in [
            json!({"source": "b", "target": "a", "strength": 2, "created_time": t, "last_modified": t}),
            json!({"source": "a", "target": "ghost", "strength": 1, "created_time": t, "last_modified": t}),
            json!({"source": "a", "target": "a", "strength": 1, "created_time": t, "last_modified": t}),
            json!({"source": "a", "target": "b", "strength": 0, "created_time": t, "last_modified": t}),
        ] {
            store.insert_one(EDGES, doc).await.unwrap();
        }
        let (graph, report) = sync.load(5.0).await.unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edge("a", "b").unwrap().strength, 2);
        assert_eq!(report.nodes_dropped, 2);
        assert_eq!(report.edges_dropped, 3);
    }

    #[tokio::test]
    async fn edge_without_strength_defaults_to_one() {
        let (store, sync) = setup();
        let t = json!(1.0);
        store.insert_one(NODES, json!({"concept": "a", "memory_items": ["x"], "created_time": t, "last_modified": t})).await.unwrap();
        store.insert_one(NODES, json!({"concept": "b", "memory_items": ["y"], "created_time": t, "last_modified": t})).await.unwrap();
        store.insert_one(EDGES, json!({"source": "a", "target": "b", "created_time": t, "last_modified": t})).await.unwrap();
        let (graph, _) = sync.load(5.0).await.unwrap();
        assert_eq!(graph.edge("a", "b").unwrap().strength, 1);
    }

    #[tokio::test]
    async fn load_trims_concepts_and_edge_endpoints_alike() {
        let (store, sync) = setup();
        let t = json!(1.0);
        store.insert_one(NODES, json!({"concept": " cats ", "memory_items": ["x"], "created_time": t, "last_modified": t})).await.unwrap();
        store.insert_one(NODES, json!({"concept": "dogs", "memory_items": ["y"], "created_time": t, "last_modified": t})).await.unwrap();
        store
            .insert_one(EDGES, json!({"source": " cats ", "target": "dogs\n", "strength": 3, "created_time": t, "last_modified": t}))
            .await
            .unwrap();
        let (graph, report) = sync.load(5.0).await.unwrap();
        assert!(graph.contains("cats"));
        assert_eq!(graph.edge("cats", "dogs").unwrap().strength, 3);
        assert_eq!(report.edges_dropped, 0);

        // the next sync replaces the padded records with clean ones
        sync.sync_to_store(&graph).await.unwrap();
        let edges = store.find_many(EDGES, &Filter::all(), None, None).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0]["source"].as_str(), edges[0]["target"].as_str()), (Some("cats"), Some("dogs")));
        assert!(store.find_one(NODES, &Filter::all().eq("concept", " cats ")).await.unwrap().is_none());
        assert_eq!(sync.sync_to_store(&graph).await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn sync_rewrites_non_canonical_edge_documents() {
        let (store, sync) = setup();
        let mut graph = MemoryGraph::new();
        graph.add_node_at("a", "x", 1.0);
        graph.add_node_at("b", "y", 1.0);
        graph.connect_at("a", "b", 1.0);
        store
            .insert_one(EDGES, json!({"source": "b", "target": "a", "strength": 1, "created_time": 1.0, "last_modified": 1.0}))
            .await
            .unwrap();
        sync.sync_to_store(&graph).await.unwrap();
        let docs = store.find_many(EDGES, &Filter::all(), None, None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["source"], "a");
    }
}
