//! Live update channel: a push subscription to one album's event room.
//!
//! The channel connects through a `Connector`, joins the album's room on
//! every fresh connection, and forwards `challenge_created` and
//! `challenge_deleted` events to its owner as `LiveEvent`s. It keeps no
//! list state of its own.

pub mod packet;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::Challenge;
use packet::{Packet, SocketPacket, DEFAULT_NAMESPACE};
pub use transport::{Backoff, Connector, FrameLink, WsConnector};

pub const JOIN_ALBUM_EVENT: &str = "join_album";
pub const CHALLENGE_CREATED_EVENT: &str = "challenge_created";
pub const CHALLENGE_DELETED_EVENT: &str = "challenge_deleted";

// Engine.IO heartbeat defaults, used until the open packet says otherwise.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Invalid channel configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server refused the connection: {0}")]
    Refused(String),

    #[error("Connection closed")]
    Closed,

    #[error("No heartbeat from server for {0:?}")]
    HeartbeatTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What the channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    ChallengeCreated(Challenge),
    ChallengeDeleted { id: String },
    /// Joined the album room on a fresh connection.
    Connected,
    /// A connection attempt failed; the channel keeps retrying.
    Unavailable(ChannelError),
}

/// Body of `challenge_deleted`. The backend may send `id`, `_id` or both;
/// `id` wins when both are present.
#[derive(Debug, Deserialize)]
struct DeletedPayload {
    id: Option<String>,
    #[serde(rename = "_id")]
    object_id: Option<String>,
}

pub struct LiveUpdateChannel {
    connector: Arc<dyn Connector>,
    room: String,
    events: mpsc::Sender<LiveEvent>,
    state: Arc<watch::Sender<ChannelState>>,
    task: Option<JoinHandle<()>>,
}

impl LiveUpdateChannel {
    pub fn new(connector: Arc<dyn Connector>, room: impl Into<String>, events: mpsc::Sender<LiveEvent>) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            connector,
            room: room.into(),
            events,
            state: Arc::new(state),
            task: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start the subscription. Does nothing if it is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("Live channel already running");
            return;
        }
        let session = Session {
            connector: Arc::clone(&self.connector),
            room: self.room.clone(),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
        };
        self.task = Some(tokio::spawn(session.run()));
    }

    /// Stop the subscription. No event is delivered once this returns.
    pub async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Live channel closed");
        }
        self.state.send_replace(ChannelState::Disconnected);
    }
}

impl Drop for LiveUpdateChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Everything the background task needs, moved into it on start.
struct Session {
    connector: Arc<dyn Connector>,
    room: String,
    events: mpsc::Sender<LiveEvent>,
    state: Arc<watch::Sender<ChannelState>>,
}

impl Session {
    async fn run(self) {
        let mut backoff = Backoff::default();

        loop {
            self.state.send_replace(ChannelState::Connecting);
            match self.connector.connect().await {
                Ok(link) => match self.drive(link, &mut backoff).await {
                    Ok(()) => debug!("Live channel disconnected"),
                    Err(e) => warn!(error = %e, "Live channel dropped"),
                },
                Err(e) => {
                    warn!(error = %e, attempt = backoff.attempts() + 1, "Live channel connection failed");
                    if self.events.send(LiveEvent::Unavailable(e)).await.is_err() {
                        break;
                    }
                }
            }
            self.state.send_replace(ChannelState::Disconnected);

            if self.events.is_closed() {
                break;
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }

        self.state.send_replace(ChannelState::Disconnected);
    }

    /// Run one connection until it ends. `Ok` means the server said goodbye
    /// or the owner stopped listening.
    ///
    /// A connection that stays silent for longer than `pingInterval +
    /// pingTimeout` is treated as dead.
    async fn drive(&self, mut link: FrameLink, backoff: &mut Backoff) -> Result<(), ChannelError> {
        let mut silence_limit = heartbeat_limit(&Value::Null);

        loop {
            let frame = match tokio::time::timeout(silence_limit, link.incoming.recv()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(ChannelError::Closed),
                Err(_) => return Err(ChannelError::HeartbeatTimeout(silence_limit)),
            };
            let packet = match packet::decode(&frame) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed frame");
                    continue;
                }
            };

            match packet {
                Packet::Open(handshake) => {
                    silence_limit = heartbeat_limit(&handshake);
                    send(&link, packet::connect()).await?;
                }
                Packet::Ping(payload) => send(&link, packet::pong(&payload)).await?,
                Packet::Close => return Ok(()),
                Packet::Message(socket) if socket.namespace() != DEFAULT_NAMESPACE => {
                    debug!(namespace = socket.namespace(), "Ignoring packet for other namespace");
                }
                Packet::Message(SocketPacket::Connect { .. }) => {
                    self.state.send_replace(ChannelState::Connected);
                    backoff.reset();
                    send(&link, packet::event(JOIN_ALBUM_EVENT, &Value::String(self.room.clone()))).await?;
                    info!("Live channel connected");
                    if self.events.send(LiveEvent::Connected).await.is_err() {
                        return Ok(());
                    }
                }
                Packet::Message(SocketPacket::ConnectError { payload, .. }) => {
                    let reason = payload.map(|p| p.to_string()).unwrap_or_default();
                    return Err(ChannelError::Refused(reason));
                }
                Packet::Message(SocketPacket::Disconnect { .. }) => return Ok(()),
                Packet::Message(SocketPacket::Event { name, payload, .. }) => {
                    if let Some(event) = translate(&name, payload) {
                        if self.events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Packet::Message(SocketPacket::Unsupported(kind)) => {
                    debug!(kind = %kind, "Ignoring unsupported packet");
                }
                Packet::Pong(_) | Packet::Upgrade | Packet::Noop => {}
            }
        }
    }
}

/// Longest silence tolerated on a connection, from the open handshake.
fn heartbeat_limit(handshake: &Value) -> Duration {
    let ms = |field: &str, default: u64| handshake.get(field).and_then(Value::as_u64).unwrap_or(default);
    Duration::from_millis(
        ms("pingInterval", DEFAULT_PING_INTERVAL_MS) + ms("pingTimeout", DEFAULT_PING_TIMEOUT_MS),
    )
}

async fn send(link: &FrameLink, frame: String) -> Result<(), ChannelError> {
    link.outgoing.send(frame).await.map_err(|_| ChannelError::Closed)
}

/// Map a server event to a list mutation. Unknown or malformed events are dropped.
fn translate(name: &str, payload: Option<Value>) -> Option<LiveEvent> {
    let payload = payload.unwrap_or(Value::Null);
    match name {
        CHALLENGE_CREATED_EVENT => match serde_json::from_value::<Challenge>(payload) {
            Ok(challenge) => Some(LiveEvent::ChallengeCreated(challenge)),
            Err(e) => {
                warn!(error = %e, "Malformed challenge_created payload");
                None
            }
        },
        CHALLENGE_DELETED_EVENT => match serde_json::from_value::<DeletedPayload>(payload) {
            Ok(DeletedPayload { id: Some(id), .. }) | Ok(DeletedPayload { id: None, object_id: Some(id) }) => {
                Some(LiveEvent::ChallengeDeleted { id })
            }
            Ok(_) => {
                warn!("challenge_deleted payload without an id");
                None
            }
            Err(e) => {
                warn!(error = %e, "Malformed challenge_deleted payload");
                None
            }
        },
        other => {
            debug!(event = other, "Ignoring event");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector: each connect hands the test the server side of the link.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{ChannelError, Connector, FrameLink};

    pub struct ServerEnd {
        pub from_client: mpsc::Receiver<String>,
        pub to_client: mpsc::Sender<String>,
    }

    impl ServerEnd {
        /// Run the Engine.IO + Socket.IO handshake and return the join frame.
        pub async fn accept(&mut self) -> String {
            self.to_client
                .send(r#"0{"sid":"eio","pingInterval":25000,"pingTimeout":20000}"#.to_string())
                .await
                .expect("client listening");
            assert_eq!(self.from_client.recv().await.as_deref(), Some("40"));
            self.to_client
                .send(r#"40{"sid":"sio"}"#.to_string())
                .await
                .expect("client listening");
            self.from_client.recv().await.expect("join frame")
        }

        pub async fn emit(&self, frame: &str) {
            self.to_client.send(frame.to_string()).await.expect("client listening");
        }
    }

    pub struct MemoryConnector {
        servers: mpsc::UnboundedSender<ServerEnd>,
        connects: AtomicUsize,
        failures_left: Mutex<usize>,
    }

    impl MemoryConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
            Self::failing_first(0)
        }

        /// Refuse the first `failures` connection attempts.
        pub fn failing_first(failures: usize) -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
            let (servers, rx) = mpsc::unbounded_channel();
            let connector = Self {
                servers,
                connects: AtomicUsize::new(0),
                failures_left: Mutex::new(failures),
            };
            (connector, rx)
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<FrameLink, ChannelError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures_left.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ChannelError::Transport("connection refused".to_string()));
                }
            }

            let (outgoing, from_client) = mpsc::channel(32);
            let (to_client, incoming) = mpsc::channel(32);
            self.servers
                .send(ServerEnd { from_client, to_client })
                .map_err(|_| ChannelError::Closed)?;
            Ok(FrameLink { outgoing, incoming })
        }
    }
}
