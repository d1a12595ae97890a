//! Cached query results keyed by structural tuples.
//!
//! The dashboard reads through [`QueryStore`]: results are cached by
//! [`CacheKey`], marked stale when a matching push arrives, and refetched
//! lazily on the next read. The store is deliberately small; the
//! subscription layer only depends on the [`QueryCache`] seam so any
//! fetch/cache implementation can sit behind it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use crate::error::SyncError;

/// One segment of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Str(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Str(s)
    }
}

impl From<i64> for Segment {
    fn from(n: i64) -> Self {
        Segment::Int(n)
    }
}

impl From<bool> for Segment {
    fn from(b: bool) -> Self {
        Segment::Bool(b)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Str(s) => f.write_str(s),
            Segment::Int(n) => write!(f, "{n}"),
            Segment::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// An ordered tuple of primitives identifying one cached query result.
///
/// Equality is structural, so two keys built independently from the same
/// parts compare (and hash) equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<Segment>);

impl CacheKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(vec![s.into()])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("/");
        f.write_str(&joined)
    }
}

/// The one operation the synchronization layer needs from a query layer.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Marks the query stale so it refetches on next read. Unknown keys
    /// are a no-op.
    async fn invalidate(&self, key: &CacheKey);
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    stale: bool,
}

/// Default query layer: cache-by-key with lazy refetch.
pub struct QueryStore {
    entries: Arc<RwLock<HashMap<CacheKey, Entry>>>,
    invalidations_tx: broadcast::Sender<CacheKey>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(invalidation_capacity: usize) -> Self {
        let (invalidations_tx, _) = broadcast::channel(invalidation_capacity.max(1));
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            invalidations_tx,
        }
    }

    /// Returns the cached value unless it is absent or stale.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.stale)
            .map(|entry| entry.value.clone())
    }

    /// Typed variant of [`QueryStore::get`].
    pub async fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn put(&self, key: CacheKey, value: Value) {
        let mut entries = self.entries.write().await;
        entries.insert(key, Entry { value, stale: false });
    }

    pub async fn is_stale(&self, key: &CacheKey) -> bool {
        let entries = self.entries.read().await;
        entries.get(key).map(|entry| entry.stale).unwrap_or(false)
    }

    /// Reads through the cache, running `fetch` when the entry is absent
    /// or has been invalidated since the last fetch.
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Value, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, SyncError>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = fetch().await?;
        self.put(key.clone(), value.clone()).await;
        Ok(value)
    }

    /// Stream of keys invalidated by the dispatcher; dashboard bindings
    /// use it to schedule refetches for mounted queries.
    pub fn invalidations(&self) -> BroadcastStream<CacheKey> {
        BroadcastStream::new(self.invalidations_tx.subscribe())
    }
}

#[async_trait]
impl QueryCache for QueryStore {
    async fn invalidate(&self, key: &CacheKey) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.stale = true;
        }
        drop(entries);

        tracing::debug!("invalidate: {}", key);
        let _ = self.invalidations_tx.send(key.clone());
    }
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for QueryStore {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            invalidations_tx: self.invalidations_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_structural_equality() {
        let a = CacheKey::new(["cameras", "list"]);
        let b = CacheKey::new(["cameras".to_string(), "list".to_string()]);
        assert_eq!(a, b);

        let c = CacheKey::new(["cameras"]);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_invalidate_marks_stale() {
        let store = QueryStore::new();
        let key = CacheKey::from("cameras");

        store.put(key.clone(), json!(["camera_one"])).await;
        assert_eq!(store.get(&key).await, Some(json!(["camera_one"])));

        store.invalidate(&key).await;
        assert!(store.is_stale(&key).await);
        assert_eq!(store.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_key_is_noop() {
        let store = QueryStore::new();
        store.invalidate(&CacheKey::from("never_seen")).await;
        assert!(!store.is_stale(&CacheKey::from("never_seen")).await);
    }

    #[tokio::test]
    async fn test_get_or_fetch_refetches_when_stale() {
        let store = QueryStore::new();
        let key = CacheKey::from("cameras");

        let first = store
            .get_or_fetch(&key, || async { Ok(json!(1)) })
            .await
            .unwrap();
        assert_eq!(first, json!(1));

        // fresh hit: fetcher not consulted
        let second = store
            .get_or_fetch(&key, || async { Ok(json!(2)) })
            .await
            .unwrap();
        assert_eq!(second, json!(1));

        store.invalidate(&key).await;
        let third = store
            .get_or_fetch(&key, || async { Ok(json!(3)) })
            .await
            .unwrap();
        assert_eq!(third, json!(3));
        assert!(!store.is_stale(&key).await);
    }

    #[tokio::test]
    async fn test_invalidation_stream() {
        use tokio_stream::StreamExt;

        let store = QueryStore::new();
        let mut invalidations = store.invalidations();

        store.put(CacheKey::from("cameras"), json!([])).await;
        store.invalidate(&CacheKey::from("cameras")).await;

        let key = invalidations.next().await.unwrap().unwrap();
        assert_eq!(key, CacheKey::from("cameras"));
    }
}
