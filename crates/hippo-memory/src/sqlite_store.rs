//! SQLite-backed [`DocumentStore`].
//!
//! Every collection lives in one table; documents are stored as JSON text and
//! filtered/sorted with SQLite's built-in JSON functions, so no per-collection
//! schema is needed.
//!
//! # Storage layout
//!
//! | column     | type | description                              |
//! |------------|------|------------------------------------------|
//! | collection | TEXT | Collection name                          |
//! | id         | TEXT | Document `_id` (unique per collection)   |
//! | body       | TEXT | The full JSON document, `_id` included   |
//!
//! # Example
//!
//! ```rust
//! use hippo_memory::sqlite_store::SqliteDocumentStore;
//! use hippo_memory::store::{DocumentStore, Filter};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = SqliteDocumentStore::open_in_memory().unwrap();
//! store.insert_one("messages", json!({"time": 5.0, "text": "hi"})).await.unwrap();
//! let hits = store
//!     .find_many("messages", &Filter::all().lte("time", 10.0), None, None)
//!     .await
//!     .unwrap();
//! assert_eq!(hits.len(), 1);
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::{Map, Value};
use tracing::debug;

use crate::store::{DocumentStore, Filter, ID_FIELD, Sort, StoreError, ensure_id};

/// Persistent document store on a single SQLite connection.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                body       TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `(id, body)` rows of `collection` matching `filter`.
    fn select(
        conn: &Connection,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let (clause, mut args) = where_clause(collection, filter);
        let mut sql = format!("SELECT id, body FROM documents WHERE {clause}");
        if let Some(sort) = sort {
            args.push(SqlValue::Text(json_path(&sort.field)));
            let dir = if sort.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY json_extract(body, ?{}) {dir}, rowid ASC", args.len()));
        } else {
            sql.push_str(" ORDER BY rowid ASC");
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let id: String = row.get(0)?;
            let body: String = row.get(1)?;
            Ok((id, body))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, body) = row?;
            out.push((id, serde_json::from_str(&body)?));
        }
        Ok(out)
    }

    fn write_body(conn: &Connection, collection: &str, id: &str, body: &Value) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR REPLACE INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
            params![collection, id, serde_json::to_string(body)?],
        )?;
        Ok(())
    }
}

/// JSON path addressing a top-level field.
fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// Translate a JSON scalar into the SQLite value `json_extract` yields for it.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// `WHERE` clause plus positional arguments; `?1` is always the collection.
fn where_clause(collection: &str, filter: &Filter) -> (String, Vec<SqlValue>) {
    let mut clause = String::from("collection = ?1");
    let mut args = vec![SqlValue::Text(collection.to_string())];
    for cond in filter.conditions() {
        args.push(SqlValue::Text(json_path(&cond.field)));
        let path_idx = args.len();
        args.push(to_sql(&cond.value));
        let value_idx = args.len();
        clause.push_str(&format!(
            " AND json_extract(body, ?{path_idx}) {} ?{value_idx}",
            cond.op.as_sql()
        ));
    }
    (clause, args)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        let conn = self.lock();
        let rows = Self::select(&conn, collection, filter, sort, limit)?;
        Ok(rows.into_iter().map(|(_, body)| body).collect())
    }

    async fn insert_one(&self, collection: &str, mut document: Value) -> Result<String, StoreError> {
        let id = ensure_id(&mut document)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
            params![collection, id, serde_json::to_string(&document)?],
        )?;
        debug!(collection, id = %id, "document inserted");
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set_fields: Map<String, Value>,
        upsert: bool,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let existing = Self::select(&conn, collection, filter, None, Some(1))?.into_iter().next();
        match existing {
            Some((id, mut body)) => {
                if let Some(obj) = body.as_object_mut() {
                    obj.extend(set_fields);
                    obj.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                }
                Self::write_body(&conn, collection, &id, &body)?;
                Ok(true)
            }
            None if upsert => {
                let mut fields = filter.equality_fields();
                fields.extend(set_fields);
                let mut body = Value::Object(fields);
                let id = ensure_id(&mut body)?;
                Self::write_body(&conn, collection, &id, &body)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        let conn = self.lock();
        let (clause, args) = where_clause(collection, filter);
        let id: Option<String> = conn
            .query_row(
                &format!("SELECT id FROM documents WHERE {clause} ORDER BY rowid ASC LIMIT 1"),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => {
                conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                )?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let conn = self.lock();
        let (clause, args) = where_clause(collection, filter);
        let removed = conn.execute(&format!("DELETE FROM documents WHERE {clause}"), params_from_iter(args.iter()))?;
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_and_find_by_equality() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.insert_one("nodes", json!({"concept": "cats", "n": 1})).await.unwrap();
        store.insert_one("nodes", json!({"concept": "dogs", "n": 2})).await.unwrap();
        let doc = store
            .find_one("nodes", &Filter::all().eq("concept", "dogs"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["n"], 2);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.insert_one("a", json!({"x": 1})).await.unwrap();
        let other = store.find_many("b", &Filter::all(), None, None).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn range_filter_sort_and_limit() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        for t in [1.5, 4.0, 2.5, 9.0] {
            store.insert_one("m", json!({"time": t, "g": "x"})).await.unwrap();
        }
        let docs = store
            .find_many(
                "m",
                &Filter::all().eq("g", "x").lte("time", 5.0),
                Some(&Sort::descending("time")),
                Some(2),
            )
            .await
            .unwrap();
        let times: Vec<f64> = docs.iter().map(|d| d["time"].as_f64().unwrap()).collect();
        assert_eq!(times, vec![4.0, 2.5]);
    }

    #[tokio::test]
    async fn integer_and_float_compare_numerically() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.insert_one("m", json!({"time": 3})).await.unwrap();
        let docs = store.find_many("m", &Filter::all().gt("time", 2.5), None, None).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn update_merges_and_keeps_id() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let id = store.insert_one("c", json!({"k": "a", "v": 1})).await.unwrap();
        let mut set = Map::new();
        set.insert("v".into(), json!(5));
        assert!(store.update_one("c", &Filter::all().eq("k", "a"), set, false).await.unwrap());
        let doc = store.find_one("c", &Filter::all().eq("k", "a")).await.unwrap().unwrap();
        assert_eq!(doc["v"], 5);
        assert_eq!(doc[ID_FIELD], json!(id));
    }

    #[tokio::test]
    async fn upsert_creates_missing_document() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let mut set = Map::new();
        set.insert("v".into(), json!(true));
        assert!(store.update_one("c", &Filter::all().eq("k", "z"), set, true).await.unwrap());
        let doc = store.find_one("c", &Filter::all().eq("v", true)).await.unwrap().unwrap();
        assert_eq!(doc["k"], "z");
    }

    #[tokio::test]
    async fn update_without_match_returns_false() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        assert!(!store.update_one("c", &Filter::all().eq("k", "z"), Map::new(), false).await.unwrap());
    }

    #[tokio::test]
    async fn delete_one_and_many() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        for k in ["a", "a", "b"] {
            store.insert_one("c", json!({"k": k})).await.unwrap();
        }
        assert!(store.delete_one("c", &Filter::all().eq("k", "a")).await.unwrap());
        assert_eq!(store.delete_many("c", &Filter::all()).await.unwrap(), 2);
        assert!(store.find_many("c", &Filter::all(), None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistent_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hippo.db");
        let path = path.to_string_lossy();
        {
            let store = SqliteDocumentStore::open(&path).unwrap();
            store.insert_one("c", json!({"k": "kept"})).await.unwrap();
        }
        let store = SqliteDocumentStore::open(&path).unwrap();
        let doc = store.find_one("c", &Filter::all()).await.unwrap().unwrap();
        assert_eq!(doc["k"], "kept");
    }
}
