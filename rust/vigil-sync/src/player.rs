//! Live-stream player orchestration.
//!
//! A live view negotiates WebRTC first and falls back to server-relayed
//! transports (MSE, HLS, MP4, MJPEG) when negotiation fails. This module
//! only walks the ladder and tracks status; transport and codec
//! internals live behind the [`StreamSource`] seam.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Loading,
    Mse,
    Hls,
    Mp4,
    Mjpeg,
    Rtc,
    Error,
}

/// One candidate transport in the fallback ladder.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Status reported while this source is playing.
    fn status(&self) -> PlayerStatus;

    /// Negotiates and opens the stream.
    async fn open(&self) -> Result<(), SyncError>;

    /// Tears the stream down; called before re-initialization.
    async fn close(&self) {}
}

/// Walks the source ladder and publishes the active status.
pub struct LivePlayer {
    sources: Vec<Arc<dyn StreamSource>>,
    active: RwLock<Option<Arc<dyn StreamSource>>>,
    status_tx: watch::Sender<PlayerStatus>,
    status_rx: watch::Receiver<PlayerStatus>,
}

impl LivePlayer {
    /// Sources are tried in order; put the preferred transport first
    /// (WebRTC, then the relayed fallbacks).
    pub fn new(sources: Vec<Arc<dyn StreamSource>>) -> Self {
        let (status_tx, status_rx) = watch::channel(PlayerStatus::Loading);
        Self {
            sources,
            active: RwLock::new(None),
            status_tx,
            status_rx,
        }
    }

    pub fn status(&self) -> PlayerStatus {
        *self.status_rx.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<PlayerStatus> {
        self.status_rx.clone()
    }

    /// Opens the first source that negotiates successfully.
    pub async fn start(&self) -> Result<(), SyncError> {
        let _ = self.status_tx.send(PlayerStatus::Loading);

        for source in &self.sources {
            match source.open().await {
                Ok(()) => {
                    *self.active.write().await = Some(source.clone());
                    let _ = self.status_tx.send(source.status());
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!("stream source {:?} failed: {}", source.status(), err);
                }
            }
        }

        *self.active.write().await = None;
        let _ = self.status_tx.send(PlayerStatus::Error);
        Err(SyncError::NoPlayableSource)
    }

    /// Re-initializes the whole pipeline from the top of the ladder;
    /// the recovery path for unrecoverable playback errors.
    pub async fn restart(&self) -> Result<(), SyncError> {
        if let Some(active) = self.active.write().await.take() {
            active.close().await;
        }
        self.start().await
    }
}
