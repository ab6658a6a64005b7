use crate::{
    error::StoreError,
    models::{Entry, EntryKind, EntryQuery},
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool, query_builder::QueryBuilder, types::Json};
use std::{
    collections::{BTreeMap, btree_map},
    sync::Arc,
};
use tokio::sync::RwLock;

/// EntryStore Trait
///
/// The ordered key-value range store the authorization core sits on top of.
/// Every operation is scoped to an `EntryKind` namespace; handlers only ever
/// pass `EntryKind::UserData`.
///
/// **Send + Sync + async_trait** make `Arc<dyn EntryStore>` shareable across
/// Axum's task boundaries.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Entries of `query.key`, newest first, bounded by the query's range,
    /// correlation id and limit.
    async fn query(&self, kind: EntryKind, query: &EntryQuery) -> Result<Vec<Entry>, StoreError>;

    /// Insert keyed by `(key, created)`. An occupied slot is never
    /// overwritten; it yields `StoreError::Conflict` instead.
    async fn put(&self, kind: EntryKind, entry: Entry) -> Result<(), StoreError>;

    /// Unconditional point delete. Deleting a missing entry is not an error.
    async fn delete(&self, kind: EntryKind, key: &str, created: &str) -> Result<(), StoreError>;
}

/// StoreState
///
/// The concrete type used to share the store across the application state.
pub type StoreState = Arc<dyn EntryStore>;

// --- Postgres Backend ---

#[derive(FromRow)]
struct EntryRow {
    key: String,
    created: String,
    readable: String,
    owner: String,
    data: Json<Value>,
    id: Option<String>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            key: row.key,
            created: row.created,
            readable: row.readable,
            owner: row.owner,
            data: row.data.0,
            id: row.id,
        }
    }
}

/// PostgresEntryStore
///
/// `EntryStore` backed by the `entries` table (see `migrations/`), whose
/// primary key is `(kind, key, created)`.
pub struct PostgresEntryStore {
    pool: PgPool,
}

impl PostgresEntryStore {
    /// Creates a new store using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntryStore for PostgresEntryStore {
    /// query
    ///
    /// Built with QueryBuilder so every caller-supplied bound is a bind
    /// parameter.
    async fn query(&self, kind: EntryKind, query: &EntryQuery) -> Result<Vec<Entry>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT key, created, readable, owner, data, id FROM entries WHERE kind = ",
        );
        builder.push_bind(kind.as_str());
        builder.push(" AND key = ");
        builder.push_bind(query.key.clone());

        if let Some(start) = &query.start {
            builder.push(" AND created >= ");
            builder.push_bind(start.clone());
        }
        if let Some(end) = &query.end {
            builder.push(" AND created <= ");
            builder.push_bind(end.clone());
        }
        if let Some(id) = &query.correlation_id {
            builder.push(" AND id = ");
            builder.push_bind(id.clone());
        }

        builder.push(" ORDER BY created DESC LIMIT ");
        builder.push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));

        let rows = builder
            .build_query_as::<EntryRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    /// put
    ///
    /// Several instances may share the table, each with its own clock, so two
    /// of them can stamp the same millisecond. `DO NOTHING` keeps the first
    /// writer's row; zero affected rows is reported as a conflict.
    async fn put(&self, kind: EntryKind, entry: Entry) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO entries (kind, key, created, readable, owner, data, id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (kind, key, created) DO NOTHING
            "#,
        )
        .bind(kind.as_str())
        .bind(&entry.key)
        .bind(&entry.created)
        .bind(&entry.readable)
        .bind(&entry.owner)
        .bind(Json(&entry.data))
        .bind(&entry.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                key: entry.key,
                created: entry.created,
            });
        }
        Ok(())
    }

    async fn delete(&self, kind: EntryKind, key: &str, created: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM entries WHERE kind = $1 AND key = $2 AND created = $3")
            .bind(kind.as_str())
            .bind(key)
            .bind(created)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// --- In-Memory Backend ---

type SlotKey = (EntryKind, String, String);

/// InMemoryEntryStore
///
/// Ordered in-process store used for local runs without `DATABASE_URL` and
/// throughout the test suite. Same ordering semantics as the Postgres backend.
#[derive(Default)]
pub struct InMemoryEntryStore {
    entries: RwLock<BTreeMap<SlotKey, Entry>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across every namespace.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn query(&self, kind: EntryKind, query: &EntryQuery) -> Result<Vec<Entry>, StoreError> {
        let entries = self.entries.read().await;
        let first = (kind, query.key.clone(), String::new());

        let mut matched: Vec<Entry> = entries
            .range(first..)
            .take_while(|((k, key, _), _)| *k == kind && *key == query.key)
            .map(|(_, entry)| entry)
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect();

        // BTreeMap iterates oldest first.
        matched.reverse();
        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn put(&self, kind: EntryKind, entry: Entry) -> Result<(), StoreError> {
        let slot = (kind, entry.key.clone(), entry.created.clone());
        match self.entries.write().await.entry(slot) {
            btree_map::Entry::Occupied(_) => Err(StoreError::Conflict {
                key: entry.key,
                created: entry.created,
            }),
            btree_map::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    async fn delete(&self, kind: EntryKind, key: &str, created: &str) -> Result<(), StoreError> {
        let slot = (kind, key.to_string(), created.to_string());
        self.entries.write().await.remove(&slot);
        Ok(())
    }
}
