//! Topic reference counting and server-side subscription lifecycle.
//!
//! Many dashboard consumers can declare interest in the same topic; the
//! registry coalesces them into at most one live server-side subscription
//! per topic. Each topic carries a small state machine
//! (Idle/Subscribing/Active/Unsubscribing) and every async completion
//! consults the record's current state, never the state captured when the
//! call started. An epoch counter, bumped on every connection transition,
//! keeps completions from a previous connection from touching records the
//! transition handlers already reset.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::SyncError;
use crate::query::CacheKey;
use crate::topic::Topic;

/// Issues subscribe/unsubscribe frames to the server.
///
/// Implemented by the connection handle; tests substitute an in-memory
/// recording sink.
#[async_trait]
pub trait SubscriptionSink: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> Result<(), SyncError>;
    async fn unsubscribe(&self, topic: &Topic) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Subscribing,
    Active,
    Unsubscribing,
}

#[derive(Debug)]
struct TopicRecord {
    count: usize,
    phase: Phase,
    cache_keys: Vec<CacheKey>,
}

impl Default for TopicRecord {
    fn default() -> Self {
        Self {
            count: 0,
            phase: Phase::Idle,
            cache_keys: Vec::new(),
        }
    }
}

struct Inner {
    connected: bool,
    epoch: u64,
    topics: HashMap<Topic, TopicRecord>,
}

/// Shared table of per-topic subscription records.
///
/// All mutation goes through [`add_interest`](TopicRegistry::add_interest)
/// and [`remove_interest`](TopicRegistry::remove_interest) plus the two
/// connection-transition handlers; the lock is never held across a sink
/// call.
pub struct TopicRegistry {
    sink: Arc<dyn SubscriptionSink>,
    inner: RwLock<Inner>,
}

enum Action {
    Subscribe,
    Unsubscribe,
}

enum Next {
    Done,
    Remove,
    Unsubscribe,
    Resubscribe,
}

impl TopicRegistry {
    pub fn new(sink: Arc<dyn SubscriptionSink>) -> Self {
        Self {
            sink,
            inner: RwLock::new(Inner {
                connected: false,
                epoch: 0,
                topics: HashMap::new(),
            }),
        }
    }

    /// Registers `cache_key` against `topic` (idempotent) and increments
    /// the interest count. The 0→1 transition while connected issues the
    /// server-side subscribe; other callers only bump the count.
    pub async fn add_interest(&self, topic: &Topic, cache_key: CacheKey) {
        let initiate = {
            let mut inner = self.inner.write().await;
            let epoch = inner.epoch;
            let connected = inner.connected;
            let record = inner.topics.entry(topic.clone()).or_default();
            if !record.cache_keys.contains(&cache_key) {
                record.cache_keys.push(cache_key);
            }
            record.count += 1;
            if record.count == 1 && connected && record.phase == Phase::Idle {
                record.phase = Phase::Subscribing;
                Some(epoch)
            } else {
                None
            }
        };

        if let Some(epoch) = initiate {
            self.drive(topic, epoch, Action::Subscribe).await;
        }
    }

    /// Decrements the interest count. The 1→0 transition on an active
    /// topic tears the server-side subscription down; if a subscribe is
    /// still in flight the completion performs the corrective
    /// unsubscribe instead.
    pub async fn remove_interest(&self, topic: &Topic) {
        let initiate = {
            let mut inner = self.inner.write().await;
            let epoch = inner.epoch;
            let Some(record) = inner.topics.get_mut(topic) else {
                return;
            };
            record.count = record.count.saturating_sub(1);
            if record.count > 0 {
                None
            } else {
                match record.phase {
                    Phase::Active => {
                        record.phase = Phase::Unsubscribing;
                        Some(epoch)
                    }
                    Phase::Idle => {
                        inner.topics.remove(topic);
                        None
                    }
                    // in-flight completions observe count == 0 and clean up
                    Phase::Subscribing | Phase::Unsubscribing => None,
                }
            }
        };

        if let Some(epoch) = initiate {
            self.drive(topic, epoch, Action::Unsubscribe).await;
        }
    }

    /// Every cache key registered under a topic matching `event`,
    /// deduplicated across fan-in topics.
    pub async fn cache_keys_for(&self, event: &str) -> Vec<CacheKey> {
        let inner = self.inner.read().await;
        let mut keys = Vec::new();
        for (topic, record) in inner.topics.iter() {
            if topic.matches(event) {
                for key in &record.cache_keys {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        keys
    }

    /// Current interest count for a topic.
    pub async fn interest_count(&self, topic: &Topic) -> usize {
        let inner = self.inner.read().await;
        inner.topics.get(topic).map(|r| r.count).unwrap_or(0)
    }

    /// The transport came up. Server-side state never survives a
    /// reconnect, so every topic still under interest gets a fresh
    /// subscribe, exactly once each.
    pub async fn on_connected(&self) {
        let (epoch, pending) = {
            let mut inner = self.inner.write().await;
            inner.connected = true;
            inner.epoch += 1;
            let epoch = inner.epoch;
            let mut pending = Vec::new();
            for (topic, record) in inner.topics.iter_mut() {
                if record.count > 0 {
                    record.phase = Phase::Subscribing;
                    pending.push(topic.clone());
                }
            }
            (epoch, pending)
        };

        for topic in pending {
            self.drive(&topic, epoch, Action::Subscribe).await;
        }
    }

    /// The transport dropped. Pending unsubscribes would only talk to a
    /// dead socket, so records are reset locally without network calls.
    pub async fn on_disconnected(&self) {
        let mut inner = self.inner.write().await;
        inner.connected = false;
        inner.epoch += 1;
        inner.topics.retain(|_, record| record.count > 0);
        for record in inner.topics.values_mut() {
            record.phase = Phase::Idle;
        }
    }

    /// Runs the sink call for `action` and settles the record from its
    /// state at completion time. Interest that flips while a call is in
    /// flight keeps the loop going until record and server agree.
    async fn drive(&self, topic: &Topic, epoch: u64, mut action: Action) {
        loop {
            let result = match action {
                Action::Subscribe => self.sink.subscribe(topic).await,
                Action::Unsubscribe => {
                    // best effort: on failure the connection is usually
                    // gone, which already stops the pushes
                    if let Err(err) = self.sink.unsubscribe(topic).await {
                        tracing::warn!("unsubscribe for {} failed: {}", topic, err);
                    }
                    Ok(())
                }
            };

            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                // connection flapped mid-call; the transition handlers
                // already put the record in the right state
                return;
            }

            let next = {
                let Some(record) = inner.topics.get_mut(topic) else {
                    return;
                };
                match action {
                    Action::Subscribe => match result {
                        Ok(()) if record.count == 0 => {
                            record.phase = Phase::Unsubscribing;
                            Next::Unsubscribe
                        }
                        Ok(()) => {
                            record.phase = Phase::Active;
                            Next::Done
                        }
                        Err(err) => {
                            tracing::warn!(
                                "subscribe for {} failed: {}; retrying on next reconnect",
                                topic,
                                err
                            );
                            if record.count == 0 {
                                Next::Remove
                            } else {
                                record.phase = Phase::Idle;
                                Next::Done
                            }
                        }
                    },
                    Action::Unsubscribe => {
                        if record.count == 0 {
                            Next::Remove
                        } else {
                            // interest returned while tearing down
                            record.phase = Phase::Subscribing;
                            Next::Resubscribe
                        }
                    }
                }
            };

            match next {
                Next::Done => return,
                Next::Remove => {
                    inner.topics.remove(topic);
                    return;
                }
                Next::Unsubscribe => action = Action::Unsubscribe,
                Next::Resubscribe => action = Action::Subscribe,
            }
        }
    }
}

/// RAII interest: dropping the handle removes that consumer's interest
/// without an explicit call. Each handle stands for exactly one
/// consumer, so there is nothing to clone.
pub struct InterestHandle {
    registry: Option<Arc<TopicRegistry>>,
    topic: Topic,
}

impl InterestHandle {
    pub async fn register(
        registry: Arc<TopicRegistry>,
        topic: Topic,
        cache_key: CacheKey,
    ) -> Self {
        registry.add_interest(&topic, cache_key).await;
        Self {
            registry: Some(registry),
            topic,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

impl Drop for InterestHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            let topic = self.topic.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    registry.remove_interest(&topic).await;
                });
            }
        }
    }
}
