//! Wire protocol for discovery, control and chat datagrams
//!
//! Every message is a flat JSON object carried in a single UDP datagram and
//! discriminated by its `type` key:
//!
//! ```text
//! presence  {"type":"presence","name":..,"ip":..,"role":"sender","audio_port":..}
//! discover  {"type":"discover","name":..,"ip":..}
//! join      {"type":"join","name":..,"role":"receiver"}
//! ack       {"type":"ack","from":..}
//! chat      {"type":"chat","sender":..,"message":..,"time":"HH:MM"}
//! ```
//!
//! Decoding is permissive. Anything that is not one of these records is
//! treated as noise from the shared broadcast domain and dropped.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Role advertised inside `presence` and `join` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Sender,
    Receiver,
}

/// A chat line as it travels over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "sender", default)]
    pub sender_name: String,
    #[serde(rename = "message", default)]
    pub text: String,
    #[serde(rename = "time", default)]
    pub timestamp: String,
}

impl ChatMessage {
    /// Build a message stamped with the current local wall-clock time
    pub fn now(sender_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
            text: text.into(),
            timestamp: chrono::Local::now().format("%H:%M").to_string(),
        }
    }
}

/// All datagrams exchanged on the discovery and control ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Periodic self-announcement of an active sender
    Presence {
        name: String,
        #[serde(rename = "ip")]
        address: IpAddr,
        role: PeerRole,
        audio_port: u16,
    },
    /// Periodic "looking for a sender" broadcast from a receiver
    Discover {
        name: String,
        #[serde(rename = "ip")]
        address: IpAddr,
    },
    /// Receiver registering itself with a sender
    Join { name: String, role: PeerRole },
    /// Sender acknowledging a connection
    Ack { from: String },
    /// Chat payload
    Chat(ChatMessage),
}

impl Message {
    pub fn presence(name: &str, address: IpAddr, audio_port: u16) -> Self {
        Message::Presence {
            name: name.to_string(),
            address,
            role: PeerRole::Sender,
            audio_port,
        }
    }

    pub fn discover(name: &str, address: IpAddr) -> Self {
        Message::Discover {
            name: name.to_string(),
            address,
        }
    }

    pub fn join(name: &str) -> Self {
        Message::Join {
            name: name.to_string(),
            role: PeerRole::Receiver,
        }
    }

    pub fn ack(from: &str) -> Self {
        Message::Ack {
            from: from.to_string(),
        }
    }

    /// Short name of the message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Presence { .. } => "presence",
            Message::Discover { .. } => "discover",
            Message::Join { .. } => "join",
            Message::Ack { .. } => "ack",
            Message::Chat(_) => "chat",
        }
    }

    /// Serialize to the datagram payload
    pub fn encode(&self) -> Vec<u8> {
        // Plain data with string keys cannot fail to serialize
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a datagram payload, discarding anything malformed or foreign
    pub fn decode(data: &[u8]) -> Option<Self> {
        match serde_json::from_slice(data) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::debug!("Discarding {} byte datagram: {}", data.len(), e);
                None
            }
        }
    }

    /// Parse a datagram received from `source`, dropping our own traffic
    pub fn decode_from(data: &[u8], source: SocketAddr, local: IpAddr) -> Option<Self> {
        if source.ip() == local {
            return None;
        }
        Self::decode(data)
    }
}

impl From<ChatMessage> for Message {
    fn from(chat: ChatMessage) -> Self {
        Message::Chat(chat)
    }
}
