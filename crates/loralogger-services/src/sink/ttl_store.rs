//! TTL store sink — short-retention raw capture buffer.
//!
//! Each record becomes one item keyed on (receive day, receive time of day)
//! with an `expires` attribute 14 days out. The store owns expiry; this
//! side only writes.
//!
//! [`SqliteTtlStore`] keeps items in a local file; the DynamoDB backend
//! lives in [`super::dynamodb`]. Any keyed store with a partition/sort key
//! upsert can sit behind [`TtlStore`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use loralogger_core::config::is_identifier;

use super::{Sink, SinkError};
use crate::record::Record;

/// Attribute holding the expiry Unix timestamp.
pub const EXPIRES_ATTRIBUTE: &str = "expires";

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number.
    N(i64),
}

/// One keyed item with named attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlItem {
    pub partition_key: String,
    pub sort_key: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl TtlItem {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Expiry Unix timestamp, if the item carries one.
    pub fn expires(&self) -> Option<i64> {
        match self.attribute(EXPIRES_ATTRIBUTE) {
            Some(AttributeValue::N(n)) => Some(*n),
            _ => None,
        }
    }
}

/// A key-value store with per-item expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Insert or fully replace the item with the same key.
    async fn upsert(&self, item: TtlItem) -> Result<(), SinkError>;
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Writes records into a [`TtlStore`].
pub struct TtlStoreSink {
    store: Arc<dyn TtlStore>,
}

impl TtlStoreSink {
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    /// The item a record is stored as.
    pub fn item_for(record: &Record) -> TtlItem {
        TtlItem::new(record.partition_key(), record.sort_key())
            .with_attribute("gateway_id", AttributeValue::S(record.gateway_id.to_string()))
            .with_attribute("packet", AttributeValue::S(record.packet_base64()))
            .with_attribute(
                EXPIRES_ATTRIBUTE,
                AttributeValue::N(record.expires_at().timestamp()),
            )
    }
}

#[async_trait]
impl Sink for TtlStoreSink {
    fn name(&self) -> &'static str {
        "ttl_store"
    }

    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        self.store.upsert(Self::item_for(record)).await
    }
}

// ── SQLite backend ────────────────────────────────────────────────────────────

/// SQLite-backed [`TtlStore`].
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync). All
/// statements run on the blocking pool.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE <table> (
///     item         TEXT NOT NULL,   -- partition key
///     date_or_time TEXT NOT NULL,   -- sort key
///     attributes   TEXT NOT NULL,   -- JSON object of AttributeValue
///     expires      INTEGER,         -- copy of the expires attribute
///     PRIMARY KEY (item, date_or_time)
/// );
/// CREATE INDEX <table>_expires ON <table>(expires);
/// ```
#[derive(Clone)]
pub struct SqliteTtlStore {
    conn: Arc<Mutex<Connection>>,
    table: Arc<str>,
}

impl SqliteTtlStore {
    /// Open (or create) a file-backed store.
    pub fn open(path: &Path, table: &str) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SinkError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Self::with_connection(Connection::open(path)?, table)
    }

    /// In-memory store, for tests.
    pub fn open_in_memory(table: &str) -> Result<Self, SinkError> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, SinkError> {
        if !is_identifier(table) {
            return Err(SinkError::Unavailable(format!(
                "invalid table name {table:?}"
            )));
        }
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                item TEXT NOT NULL,
                date_or_time TEXT NOT NULL,
                attributes TEXT NOT NULL,
                expires INTEGER,
                PRIMARY KEY (item, date_or_time)
            );
            CREATE INDEX IF NOT EXISTS {table}_expires ON {table}(expires);"
        ))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: Arc::from(table),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, SinkError>
    where
        F: FnOnce(&Connection, &str) -> Result<T, SinkError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn, &table)
        })
        .await?
    }

    /// Fetch one item by key.
    pub async fn get(&self, partition_key: &str, sort_key: &str) -> Result<Option<TtlItem>, SinkError> {
        let pk = partition_key.to_string();
        let sk = sort_key.to_string();
        self.with_conn(move |conn, table| {
            let json: Option<String> = conn
                .query_row(
                    &format!("SELECT attributes FROM {table} WHERE item = ?1 AND date_or_time = ?2"),
                    params![pk, sk],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(json) = json else {
                return Ok(None);
            };
            let attributes = serde_json::from_str(&json)
                .map_err(|e| SinkError::Unavailable(format!("corrupt attributes: {e}")))?;
            Ok(Some(TtlItem {
                partition_key: pk,
                sort_key: sk,
                attributes,
            }))
        })
        .await
    }

    /// Number of stored items, expired or not.
    pub async fn count(&self) -> Result<usize, SinkError> {
        self.with_conn(|conn, table| {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        })
        .await
    }

    /// Delete items whose expiry is at or before `now` (Unix seconds).
    /// Returns how many were removed.
    pub async fn purge_expired(&self, now: i64) -> Result<usize, SinkError> {
        self.with_conn(move |conn, table| {
            let removed = conn.execute(
                &format!("DELETE FROM {table} WHERE expires IS NOT NULL AND expires <= ?1"),
                params![now],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl TtlStore for SqliteTtlStore {
    async fn upsert(&self, item: TtlItem) -> Result<(), SinkError> {
        let attributes = serde_json::to_string(&item.attributes)
            .map_err(|e| SinkError::Unavailable(format!("unserializable attributes: {e}")))?;
        let expires = item.expires();
        self.with_conn(move |conn, table| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (item, date_or_time, attributes, expires)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (item, date_or_time)
                     DO UPDATE SET attributes = excluded.attributes, expires = excluded.expires"
                ),
                params![item.partition_key, item.sort_key, attributes, expires],
            )?;
            Ok(())
        })
        .await
    }
}

/// Delete expired items every `interval`.
///
/// Runs until the task is aborted.
pub async fn purge_loop(store: SqliteTtlStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match store.purge_expired(Utc::now().timestamp()).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "purged expired captures"),
            Err(e) => tracing::warn!(error = %e, "purging expired captures failed"),
        }
    }
}
