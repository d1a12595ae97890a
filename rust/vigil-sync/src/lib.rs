//! # vigil-sync
//!
//! Realtime synchronization client for Vigil NVR dashboards.
//!
//! The dashboard holds one WebSocket session to the recorder. Components
//! declare interest in topics (entity ids or event-name patterns) along
//! with the cache keys their queries live under; the client coalesces
//! interest into at most one server-side subscription per topic and
//! invalidates the registered cache keys when a matching push arrives,
//! prompting the query layer to refetch.
//!
//! ## Example
//!
//! ```rust,ignore
//! use vigil_sync::{CacheKey, SyncClient, SyncConfig};
//!
//! let client = SyncClient::connect("wss://nvr.local/ws", SyncConfig::default()).await?;
//!
//! // invalidate the cameras list whenever any recorder event fires
//! let _interest = client
//!     .interest("camera_one/recorder/*", CacheKey::new(["camera", "camera_one"]))
//!     .await;
//!
//! let mut invalidations = client.invalidations();
//! while let Some(Ok(key)) = invalidations.next().await {
//!     println!("stale: {key}");
//! }
//! ```
//!
//! Subscriptions survive reconnects: the registry re-issues a fresh
//! subscribe for every topic still under interest once the transport
//! comes back up.

mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod message;
mod player;
mod query;
mod subscription;
mod topic;

pub mod prelude;

pub use client::SyncClient;
pub use config::{ConnectionConfig, SyncConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::Dispatcher;
pub use error::SyncError;
pub use message::{parse_message, ClientMessage, ServerMessage};
pub use player::{LivePlayer, PlayerStatus, StreamSource};
pub use query::{CacheKey, QueryCache, QueryStore, Segment};
pub use subscription::{InterestHandle, SubscriptionSink, TopicRegistry};
pub use topic::Topic;

pub use serde_json::Value;
