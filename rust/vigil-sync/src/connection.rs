//! Connection handle owning the duplex channel to the NVR server.
//!
//! A spawned loop drives the WebSocket: it parses inbound frames into
//! [`ServerMessage`]s, forwards outbound [`ClientMessage`]s from the
//! command channel, answers pings, and reconnects with the configured
//! backoff ladder. Connection transitions are published over a watch
//! channel; resubscription after a reconnect is the topic registry's
//! job, not this loop's.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::ConnectionConfig;
use crate::error::SyncError;
use crate::message::{parse_message, ClientMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

pub enum ConnectionCommand {
    Send(ClientMessage),
    Disconnect,
}

struct ConnectionManagerInner {
    state_rx: watch::Receiver<ConnectionState>,
    command_tx: mpsc::Sender<ConnectionCommand>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        url: String,
        config: ConnectionConfig,
        push_tx: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        spawn_connection_loop(url, state_tx, config, push_tx, command_rx);

        Self {
            inner: Arc::new(ConnectionManagerInner {
                state_rx,
                command_tx,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Watch receiver observing every connection transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    pub async fn send(&self, message: ClientMessage) -> Result<(), SyncError> {
        self.inner
            .command_tx
            .send(ConnectionCommand::Send(message))
            .await
            .map_err(|_| SyncError::ConnectionClosed)
    }

    pub async fn disconnect(&self) {
        let _ = self
            .inner
            .command_tx
            .send(ConnectionCommand::Disconnect)
            .await;
    }
}

fn spawn_connection_loop(
    url: String,
    state_tx: watch::Sender<ConnectionState>,
    config: ConnectionConfig,
    push_tx: mpsc::Sender<ServerMessage>,
    mut command_rx: mpsc::Receiver<ConnectionCommand>,
) {
    tokio::spawn(async move {
        let mut reconnect_attempt: u32 = 0;
        let mut should_run = true;

        while should_run {
            let _ = state_tx.send(ConnectionState::Connecting);

            match connect_async(&url).await {
                Ok((ws, _)) => {
                    let _ = state_tx.send(ConnectionState::Connected);
                    reconnect_attempt = 0;

                    let (mut ws_tx, mut ws_rx) = ws.split();
                    let mut ping_timer = tokio::time::interval(config.ping_interval);

                    loop {
                        tokio::select! {
                            msg = ws_rx.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        forward_frame(&push_tx, &text).await;
                                    }
                                    Some(Ok(Message::Binary(bytes))) => {
                                        let text = String::from_utf8_lossy(&bytes);
                                        forward_frame(&push_tx, &text).await;
                                    }
                                    Some(Ok(Message::Ping(payload))) => {
                                        let _ = ws_tx.send(Message::Pong(payload)).await;
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        break;
                                    }
                                    Some(Err(err)) => {
                                        tracing::error!("WebSocket error: {}", err);
                                        break;
                                    }
                                    None => {
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                            cmd = command_rx.recv() => {
                                match cmd {
                                    Some(ConnectionCommand::Send(message)) => {
                                        match serde_json::to_string(&message) {
                                            Ok(text) => {
                                                if let Err(err) = ws_tx.send(Message::Text(text)).await {
                                                    tracing::warn!("send failed: {}", err);
                                                    break;
                                                }
                                            }
                                            Err(err) => {
                                                tracing::warn!("failed to encode frame: {}", err);
                                            }
                                        }
                                    }
                                    Some(ConnectionCommand::Disconnect) => {
                                        let _ = ws_tx.close().await;
                                        let _ = state_tx.send(ConnectionState::Disconnected);
                                        should_run = false;
                                        break;
                                    }
                                    None => {
                                        should_run = false;
                                        break;
                                    }
                                }
                            }
                            _ = ping_timer.tick() => {
                                if let Ok(text) = serde_json::to_string(&ClientMessage::Ping) {
                                    let _ = ws_tx.send(Message::Text(text)).await;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::error!("Connection failed: {}", err);
                }
            }

            if !should_run {
                break;
            }

            if !config.auto_reconnect {
                let _ = state_tx.send(ConnectionState::Error);
                break;
            }

            if reconnect_attempt >= config.max_reconnect_attempts {
                let _ = state_tx.send(ConnectionState::Error);
                break;
            }

            let delay = config
                .reconnect_intervals
                .get(reconnect_attempt as usize)
                .copied()
                .unwrap_or_else(|| {
                    config
                        .reconnect_intervals
                        .last()
                        .copied()
                        .unwrap_or(Duration::from_secs(16))
                });

            let _ = state_tx.send(ConnectionState::Reconnecting {
                attempt: reconnect_attempt,
            });
            reconnect_attempt += 1;

            tracing::info!(
                "Reconnecting in {:?} (attempt {})",
                delay,
                reconnect_attempt
            );

            if !wait_backoff(delay, &mut command_rx).await {
                let _ = state_tx.send(ConnectionState::Disconnected);
                should_run = false;
            }
        }
    });
}

/// Sleeps out a reconnect backoff window while draining the command
/// channel. Sends have nowhere to go and are discarded without cutting
/// the window short; returns `false` when a `Disconnect` arrives or the
/// channel closes.
async fn wait_backoff(
    delay: Duration,
    command_rx: &mut mpsc::Receiver<ConnectionCommand>,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ConnectionCommand::Send(_)) => {}
                    Some(ConnectionCommand::Disconnect) | None => return false,
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl crate::subscription::SubscriptionSink for ConnectionManager {
    async fn subscribe(&self, topic: &crate::topic::Topic) -> Result<(), SyncError> {
        self.send(ClientMessage::subscribe(topic.as_str())).await
    }

    async fn unsubscribe(&self, topic: &crate::topic::Topic) -> Result<(), SyncError> {
        self.send(ClientMessage::unsubscribe(topic.as_str())).await
    }
}

async fn forward_frame(push_tx: &mpsc::Sender<ServerMessage>, text: &str) {
    match parse_message(text) {
        Ok(message) => {
            let _ = push_tx.send(message).await;
        }
        Err(err) => {
            tracing::warn!("dropping frame: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sends_during_backoff_do_not_shorten_the_window() {
        let (command_tx, mut command_rx) = mpsc::channel(8);
        let delay = Duration::from_secs(4);

        let start = tokio::time::Instant::now();
        let waiter = tokio::spawn(async move { wait_backoff(delay, &mut command_rx).await });

        for _ in 0..3 {
            command_tx
                .send(ConnectionCommand::Send(ClientMessage::Ping))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert!(waiter.await.unwrap());
        assert!(start.elapsed() >= delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cuts_backoff_short() {
        let (command_tx, mut command_rx) = mpsc::channel(8);
        let delay = Duration::from_secs(16);

        let start = tokio::time::Instant::now();
        let waiter = tokio::spawn(async move { wait_backoff(delay, &mut command_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        command_tx.send(ConnectionCommand::Disconnect).await.unwrap();

        assert!(!waiter.await.unwrap());
        assert!(start.elapsed() < delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_command_channel_ends_backoff() {
        let (command_tx, mut command_rx) = mpsc::channel::<ConnectionCommand>(8);
        drop(command_tx);

        assert!(!wait_backoff(Duration::from_secs(4), &mut command_rx).await);
    }
}
