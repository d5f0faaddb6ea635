//! Socket.IO v4 packets, as carried in Engine.IO v4 websocket text frames.
//!
//! Only what a subscriber needs: the Engine.IO open/ping/close packets and
//! Socket.IO connect, disconnect and event packets on the default namespace.
//! Binary attachments are not supported and decode as `Unsupported`.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    #[error("bad payload: {0}")]
    BadPayload(String),
}

/// Engine.IO layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO layer, inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        payload: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        name: String,
        payload: Option<Value>,
    },
    ConnectError {
        namespace: String,
        payload: Option<Value>,
    },
    Unsupported(char),
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
            SocketPacket::Unsupported(_) => DEFAULT_NAMESPACE,
        }
    }
}

pub const DEFAULT_NAMESPACE: &str = "/";

pub fn decode(frame: &str) -> Result<Packet, PacketError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(parse_json(rest)?.unwrap_or(Value::Null))),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping(rest.to_string())),
        '3' => Ok(Packet::Pong(rest.to_string())),
        '4' => decode_socket(rest).map(Packet::Message),
        '5' => Ok(Packet::Upgrade),
        '6' => Ok(Packet::Noop),
        other => Err(PacketError::UnknownType(other)),
    }
}

fn decode_socket(body: &str) -> Result<SocketPacket, PacketError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        let nsp = rest[..end].to_string();
        rest = rest.get(end + 1..).unwrap_or("");
        nsp
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    match kind {
        '0' => Ok(SocketPacket::Connect {
            namespace,
            payload: parse_json(rest)?,
        }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            // An ack id may sit between the type and the array; we never ack.
            let json = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let Some(Value::Array(mut items)) = parse_json(json)? else {
                return Err(PacketError::BadPayload("event is not an array".to_string()));
            };
            if items.is_empty() {
                return Err(PacketError::BadPayload("event without a name".to_string()));
            }
            let payload = if items.len() > 1 { Some(items.remove(1)) } else { None };
            let Value::String(name) = items.swap_remove(0) else {
                return Err(PacketError::BadPayload("event name is not a string".to_string()));
            };
            Ok(SocketPacket::Event {
                namespace,
                name,
                payload,
            })
        }
        '4' => Ok(SocketPacket::ConnectError {
            namespace,
            payload: parse_json(rest)?,
        }),
        other @ ('3' | '5' | '6') => Ok(SocketPacket::Unsupported(other)),
        other => Err(PacketError::UnknownType(other)),
    }
}

fn parse_json(raw: &str) -> Result<Option<Value>, PacketError> {
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| PacketError::BadPayload(e.to_string()))
}

/// Socket.IO connect to the default namespace.
pub fn connect() -> String {
    "40".to_string()
}

pub fn pong(payload: &str) -> String {
    format!("3{}", payload)
}

/// Socket.IO event on the default namespace.
pub fn event(name: &str, payload: &Value) -> String {
    let body = Value::Array(vec![Value::String(name.to_string()), payload.clone()]);
    format!("42{}", body)
}
