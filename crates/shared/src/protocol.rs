//! Wire protocol between the relay and its sessions.
//!
//! Every WebSocket text frame is a JSON object `{"type": ..., "data": ...}`.
//! Frames without a payload (`request_clients_count`) omit `data`.

use serde::{Deserialize, Serialize};

use crate::models::Announcement;

/// Path the relay serves its WebSocket endpoint on.
pub const WS_PATH: &str = "/ws";

/// Frames sent by a session to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Operator publishes a new announcement.
    Broadcast(Announcement),
    /// Ask for the current number of connected sessions.
    RequestClientsCount,
}

/// Frames sent by the relay to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Number of sessions currently registered with the relay.
    ClientsCount(usize),
    /// Fan-out delivery of another session's broadcast.
    Announcement(Announcement),
    /// Acknowledgment of the sender's own broadcast.
    BroadcastSuccess(BroadcastReceipt),
    /// The relay could not accept the sender's broadcast.
    BroadcastError(BroadcastFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    /// Sessions the announcement was forwarded to, excluding the sender.
    pub clients: usize,
    /// Relay clock at fan-out, epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFailure {
    pub message: String,
}

impl ClientMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Read just the `type` tag of a frame, even when its payload is malformed.
pub fn frame_type(text: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Tag {
        #[serde(rename = "type")]
        kind: String,
    }

    serde_json::from_str::<Tag>(text).ok().map(|tag| tag.kind)
}
