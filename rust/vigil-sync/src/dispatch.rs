//! Routes server pushes into cache invalidations.

use std::sync::Arc;

use crate::message::ServerMessage;
use crate::query::QueryCache;
use crate::subscription::TopicRegistry;

/// Looks up every cache key registered under topics matching a push and
/// marks them stale in the query layer.
pub struct Dispatcher {
    registry: Arc<TopicRegistry>,
    cache: Arc<dyn QueryCache>,
}

impl Dispatcher {
    pub fn new(registry: Arc<TopicRegistry>, cache: Arc<dyn QueryCache>) -> Self {
        Self { registry, cache }
    }

    /// A push with no matching topic is expected (all consumers may have
    /// unmounted while it was en route) and is simply ignored.
    pub async fn dispatch(&self, message: &ServerMessage) {
        let Some(event) = message.topic() else {
            return;
        };

        let keys = self.registry.cache_keys_for(event).await;
        if keys.is_empty() {
            tracing::trace!("push for {} matched no registered topics", event);
            return;
        }

        tracing::debug!("push for {} invalidates {} cache keys", event, keys.len());
        for key in keys {
            self.cache.invalidate(&key).await;
        }
    }
}
