//! Client façade wiring the connection loop, topic registry, dispatcher
//! and query store into one session-scoped object.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatch::Dispatcher;
use crate::error::SyncError;
use crate::query::{CacheKey, QueryStore};
use crate::subscription::{InterestHandle, TopicRegistry};
use crate::topic::Topic;

/// One per application session: created at login, torn down at logout.
#[derive(Clone)]
pub struct SyncClient {
    connection: ConnectionManager,
    registry: Arc<TopicRegistry>,
    store: QueryStore,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient").finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Spawns the connection loop and starts synchronizing. Returns
    /// immediately; subscriptions declared before the socket comes up are
    /// issued on the connected transition.
    pub async fn connect(url: impl Into<String>, config: SyncConfig) -> Result<Self, SyncError> {
        let url = url.into();
        if url.is_empty() {
            return Err(SyncError::MissingUrl);
        }

        let (push_tx, mut push_rx) = mpsc::channel(100);
        let connection = ConnectionManager::new(url, config.clone().into(), push_tx);
        let registry = Arc::new(TopicRegistry::new(Arc::new(connection.clone())));
        let store = QueryStore::with_capacity(config.invalidation_capacity);

        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(store.clone()));
        tokio::spawn(async move {
            while let Some(message) = push_rx.recv().await {
                dispatcher.dispatch(&message).await;
            }
        });

        tokio::spawn(watch_connection_edges(
            connection.state_changes(),
            registry.clone(),
        ));

        Ok(Self {
            connection,
            registry,
            store,
        })
    }

    /// Declares interest in a topic; the returned handle removes it on
    /// drop. `cache_key` is invalidated whenever a matching push arrives.
    pub async fn interest(
        &self,
        topic: impl Into<Topic>,
        cache_key: CacheKey,
    ) -> InterestHandle {
        InterestHandle::register(self.registry.clone(), topic.into(), cache_key).await
    }

    pub async fn add_interest(&self, topic: &Topic, cache_key: CacheKey) {
        self.registry.add_interest(topic, cache_key).await;
    }

    pub async fn remove_interest(&self, topic: &Topic) {
        self.registry.remove_interest(topic).await;
    }

    pub async fn interest_count(&self, topic: &Topic) -> usize {
        self.registry.interest_count(topic).await
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    /// Stream of cache keys invalidated by server pushes.
    pub fn invalidations(&self) -> BroadcastStream<CacheKey> {
        self.store.invalidations()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }
}

/// Forwards connection transitions to the registry.
///
/// Cloning a watch receiver marks its current value as seen, so a fast
/// handshake can publish `Connected` before this task ever polls; the
/// rising edge is checked from the current value up front instead of
/// relying on a `changed` wakeup for it.
async fn watch_connection_edges(
    mut state_rx: tokio::sync::watch::Receiver<ConnectionState>,
    registry: Arc<TopicRegistry>,
) {
    let mut was_connected = false;
    if state_rx.borrow().is_connected() {
        registry.on_connected().await;
        was_connected = true;
    }

    while state_rx.changed().await.is_ok() {
        let connected = state_rx.borrow().is_connected();
        if connected && !was_connected {
            registry.on_connected().await;
        } else if !connected && was_connected {
            registry.on_disconnected().await;
        }
        was_connected = connected;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::watch;
    use tokio::time::sleep;

    use super::*;
    use crate::subscription::SubscriptionSink;

    struct RecordingSink {
        subscribed: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                subscribed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SubscriptionSink for RecordingSink {
        async fn subscribe(&self, topic: &Topic) -> Result<(), SyncError> {
            self.subscribed
                .lock()
                .unwrap()
                .push(topic.as_str().to_string());
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &Topic) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn offline_config() -> SyncConfig {
        SyncConfig {
            auto_reconnect: false,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connected_before_watcher_polls_still_subscribes() {
        let sink = RecordingSink::new();
        let registry = Arc::new(TopicRegistry::new(sink.clone()));
        registry
            .add_interest(&Topic::new("cameras"), CacheKey::from("cameras"))
            .await;

        // handshake finishes before the watcher exists: the receiver is
        // cloned after Connected was published, so no change is pending
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        state_tx.send(ConnectionState::Connected).unwrap();
        let watcher = tokio::spawn(watch_connection_edges(state_rx.clone(), registry.clone()));

        for _ in 0..100 {
            if sink.subscribed.lock().unwrap().as_slice() == ["cameras"] {
                drop(state_tx);
                watcher.await.unwrap();
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("rising edge at startup was missed");
    }

    #[tokio::test]
    async fn test_rising_edge_after_watcher_starts_subscribes() {
        let sink = RecordingSink::new();
        let registry = Arc::new(TopicRegistry::new(sink.clone()));
        registry
            .add_interest(&Topic::new("cameras"), CacheKey::from("cameras"))
            .await;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let watcher = tokio::spawn(watch_connection_edges(state_rx.clone(), registry.clone()));

        state_tx.send(ConnectionState::Connected).unwrap();

        for _ in 0..100 {
            if sink.subscribed.lock().unwrap().as_slice() == ["cameras"] {
                drop(state_tx);
                watcher.await.unwrap();
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("rising edge was not forwarded to the registry");
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let err = SyncClient::connect("", offline_config()).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingUrl));
    }

    #[tokio::test]
    async fn test_interest_bookkeeping_while_disconnected() {
        // nothing listens on the discard port; interest must still be
        // tracked so the eventual connect subscribes it
        let client = SyncClient::connect("ws://127.0.0.1:9", offline_config())
            .await
            .unwrap();

        let cameras = Topic::new("cameras");
        let handle = client.interest("cameras", CacheKey::from("cameras")).await;
        assert_eq!(client.interest_count(&cameras).await, 1);

        drop(handle);
        for _ in 0..100 {
            if client.interest_count(&cameras).await == 0 {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("interest not released");
    }
}
