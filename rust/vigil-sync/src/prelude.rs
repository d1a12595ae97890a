//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use vigil_sync::prelude::*;
//!
//! let client = SyncClient::connect("wss://nvr.local/ws", SyncConfig::default()).await?;
//! let mut invalidations = client.invalidations();
//! while let Some(Ok(key)) = invalidations.next().await {
//!     // StreamExt methods available without a separate import
//! }
//! ```

pub use crate::{
    CacheKey, ClientMessage, ConnectionState, InterestHandle, LivePlayer, PlayerStatus,
    QueryCache, QueryStore, ServerMessage, StreamSource, SyncClient, SyncConfig, SyncError,
    Topic,
};

pub use tokio_stream::StreamExt;
