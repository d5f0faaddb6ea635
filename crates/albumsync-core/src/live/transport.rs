//! Websocket transport for the live update channel using tokio-tungstenite.
//!
//! A `Connector` opens one connection and hands back a `FrameLink`: a pair of
//! text-frame queues pumped by background tasks. Dropping the link closes the
//! connection. Reconnect pacing (`Backoff`) also lives here.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::ChannelError;

/// Buffer size for frame queues in each direction.
const FRAME_BUFFER_SIZE: usize = 32;

// Reconnection pacing: 1s, 2s, 4s, then every 5s.
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 5_000;
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Text frames to and from one open connection.
pub struct FrameLink {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<FrameLink, ChannelError>;
}

/// Socket.IO endpoint for a backend origin:
/// `{ws|wss}://host/socket.io/?EIO=4&transport=websocket`.
pub fn socket_url(base_url: &str) -> Result<Url, ChannelError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ChannelError::Config(format!("Bad base URL {}: {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChannelError::Config(format!("Unsupported URL scheme: {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ChannelError::Config(format!("Cannot use {} for {}", scheme, base_url)))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    url.set_fragment(None);
    Ok(url)
}

pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(base_url: &str) -> Result<Self, ChannelError> {
        Ok(Self {
            url: socket_url(base_url)?,
        })
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<FrameLink, ChannelError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        debug!(host = ?self.url.host_str(), "Websocket open");

        let (mut write, mut read) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(FRAME_BUFFER_SIZE);
        let (incoming_tx, incoming_rx) = mpsc::channel::<String>(FRAME_BUFFER_SIZE);

        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "Failed to send websocket frame");
                    return;
                }
            }
            // Link dropped: say goodbye so the reader sees the close promptly.
            let _ = write.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = incoming_tx.closed() => break,
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if incoming_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Websocket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "Websocket error");
                            break;
                        }
                    },
                }
            }
        });

        Ok(FrameLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

/// Reconnect delays. Unbounded attempts; reset after each successful connect.
#[derive(Debug)]
pub struct Backoff {
    attempts: u32,
    delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay_ms: INITIAL_RETRY_DELAY_MS,
        }
    }
}

impl Backoff {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay_ms;
        self.attempts += 1;
        self.delay_ms = (self.delay_ms * BACKOFF_MULTIPLIER).min(MAX_RETRY_DELAY_MS);
        Duration::from_millis(current)
    }
}
