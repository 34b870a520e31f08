//! `hippo-memory` – The associative memory engine.
//!
//! Turns raw conversation history into a persistent, decaying graph of
//! concepts and summarized memory fragments, and scores how strongly new text
//! resonates with what is already remembered.
//!
//! # Modules
//!
//! - [`graph`] – [`MemoryGraph`][graph::MemoryGraph]: the undirected
//!   concept/relation graph and its primitive mutations.
//! - [`similarity`] – bag-of-words vectorization, cosine scoring and the
//!   [`Tokenizer`][similarity::Tokenizer] seam.
//! - [`store`] – the [`DocumentStore`][store::DocumentStore] collection API and
//!   an in-memory implementation.
//! - [`sqlite_store`] – [`SqliteDocumentStore`][sqlite_store::SqliteDocumentStore]:
//!   JSON documents in a local SQLite file.
//! - [`collaborator`] – topic-extraction and summarization capabilities.
//! - [`sampler`] – reuse-limited conversation windows drawn by recency bucket.
//! - [`consolidation`] – [`Compressor`][consolidation::Compressor]: windows to
//!   `(topic, summary)` pairs.
//! - [`maintenance`] – decay and merge passes.
//! - [`sync`] – hash-diff persistence of the graph.
//! - [`query`] – activation scoring and memory recall.
//! - [`hippocampus`] – [`Hippocampus`][hippocampus::Hippocampus]: the facade
//!   that owns the graph and serializes every mutation.

pub mod collaborator;
pub mod consolidation;
pub mod graph;
pub mod hippocampus;
pub mod maintenance;
pub mod query;
pub mod sampler;
pub mod similarity;
pub mod sqlite_store;
pub mod store;
pub mod sync;

pub use hippocampus::{Hippocampus, HippocampusConfig};
