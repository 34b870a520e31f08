//! Document-store boundary.
//!
//! The engine persists its graph and reads raw chat messages through the
//! [`DocumentStore`] trait: a schemaless collection API in the spirit of a
//! document database (find / insert / update / delete by filter, no
//! transactions).  Documents are JSON objects; every stored document carries
//! a string `_id` key assigned on insert when the caller does not supply one.
//!
//! Two implementations ship with the crate:
//!
//! * [`InMemoryDocumentStore`] – process-local, counts writes; used in tests.
//! * [`SqliteDocumentStore`][crate::sqlite_store::SqliteDocumentStore] –
//!   persistent, backed by a single SQLite table.
//!
//! # Example
//!
//! ```rust
//! use hippo_memory::store::{DocumentStore, Filter, InMemoryDocumentStore};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemoryDocumentStore::new();
//! store.insert_one("notes", json!({"title": "a", "n": 1})).await.unwrap();
//! let found = store.find_one("notes", &Filter::all().eq("title", "a")).await.unwrap();
//! assert_eq!(found.unwrap()["n"], 1);
//! # }
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use hippo_types::HippoError;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Key under which every document's identifier is stored.
pub const ID_FIELD: &str = "_id";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from document-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl From<StoreError> for HippoError {
    fn from(err: StoreError) -> Self {
        HippoError::Store(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filters and sorting
// ─────────────────────────────────────────────────────────────────────────────

/// Comparison operator of a single filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
        }
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Op::Eq => ord == Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Lte => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Gte => ord != Ordering::Less,
        }
    }
}

/// One `field <op> value` test against a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

/// A conjunction of [`Condition`]s.  The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Filter matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    fn with(mut self, field: &str, op: Op, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition { field: field.to_string(), op, value: value.into() });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Eq, value)
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Lt, value)
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Lte, value)
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Gt, value)
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Gte, value)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// `true` if `document` satisfies every condition.  A missing field never
    /// matches.
    pub fn matches(&self, document: &Value) -> bool {
        self.conditions.iter().all(|c| {
            document
                .get(&c.field)
                .and_then(|v| compare_values(v, &c.value))
                .is_some_and(|ord| c.op.accepts(ord))
        })
    }

    /// Fields pinned by equality conditions; seeds an upserted document.
    pub(crate) fn equality_fields(&self) -> Map<String, Value> {
        self.conditions
            .iter()
            .filter(|c| c.op == Op::Eq)
            .map(|c| (c.field.clone(), c.value.clone()))
            .collect()
    }
}

/// Sort order for [`DocumentStore::find_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub ascending: bool,
}

impl Sort {
    pub fn ascending(field: &str) -> Self {
        Self { field: field.to_string(), ascending: true }
    }

    pub fn descending(field: &str) -> Self {
        Self { field: field.to_string(), ascending: false }
    }
}

/// Order two JSON scalars of the same kind.  Numbers compare numerically
/// regardless of integer/float representation; mismatched kinds are
/// incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => (a == b).then_some(Ordering::Equal),
    }
}

/// Ensure `document` is an object with a string `_id`, generating one if
/// absent.  Returns the id.
pub(crate) fn ensure_id(document: &mut Value) -> Result<String, StoreError> {
    let obj = document
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidDocument("document must be a JSON object".into()))?;
    match obj.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(other) => Err(StoreError::InvalidDocument(format!("`_id` must be a string, got {other}"))),
        None => {
            let id = Uuid::new_v4().to_string();
            obj.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DocumentStore trait
// ─────────────────────────────────────────────────────────────────────────────

/// A generic, non-transactional document collection API.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document of `collection` matching `filter`, in storage order.
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Value>, StoreError> {
        Ok(self.find_many(collection, filter, None, Some(1)).await?.into_iter().next())
    }

    /// All documents matching `filter`, optionally sorted and truncated.
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert `document` and return its `_id`.
    async fn insert_one(&self, collection: &str, document: Value) -> Result<String, StoreError>;

    /// Merge `set_fields` into the first document matching `filter`.
    ///
    /// With `upsert`, a missing document is created from the filter's
    /// equality fields plus `set_fields`.  Returns `true` if a document was
    /// modified or created.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set_fields: Map<String, Value>,
        upsert: bool,
    ) -> Result<bool, StoreError>;

    /// Delete the first document matching `filter`.  Returns `true` if one was
    /// deleted.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError>;

    /// Delete every document matching `filter` and return how many went.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryDocumentStore
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local [`DocumentStore`].
///
/// Keeps insertion order per collection and counts every successful write
/// (insert, modifying update, deletion) so tests can assert on write traffic.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    writes: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of writes performed so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.lock().get(collection).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>> {
        self.collections.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_writes(&self, n: usize) {
        self.writes.fetch_add(n, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        let guard = self.lock();
        let mut docs: Vec<Value> = guard
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();
        drop(guard);

        if let Some(sort) = sort {
            docs.sort_by(|a, b| {
                let ord = match (a.get(&sort.field), b.get(&sort.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if sort.ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(limit) = limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn insert_one(&self, collection: &str, mut document: Value) -> Result<String, StoreError> {
        let id = ensure_id(&mut document)?;
        self.lock().entry(collection.to_string()).or_default().push(document);
        self.record_writes(1);
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set_fields: Map<String, Value>,
        upsert: bool,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let docs = guard.entry(collection.to_string()).or_default();
        if let Some(doc) = docs.iter_mut().find(|d| filter.matches(d)) {
            if let Some(obj) = doc.as_object_mut() {
                obj.extend(set_fields);
            }
            self.record_writes(1);
            return Ok(true);
        }
        if !upsert {
            return Ok(false);
        }
        let mut fields = filter.equality_fields();
        fields.extend(set_fields);
        let mut document = Value::Object(fields);
        ensure_id(&mut document)?;
        docs.push(document);
        self.record_writes(1);
        Ok(true)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(idx) => {
                docs.remove(idx);
                self.record_writes(1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let mut guard = self.lock();
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        let removed = before - docs.len();
        self.record_writes(removed);
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
