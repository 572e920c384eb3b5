//! Registry of the sessions currently connected to the relay.

use std::collections::HashMap;

use pa_shared::ServerMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound queue of a single connection, drained by its socket writer task.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Connected sessions keyed by connection ID.
///
/// Only the relay mutates the registry; its size is the client count every
/// session is told about.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ConnectionId, Outbox>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the ID was already registered.
    pub fn register(&mut self, id: ConnectionId, outbox: Outbox) -> bool {
        self.clients.insert(id, outbox).is_none()
    }

    /// Returns false if the ID was not registered.
    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Queue a message for one connection. Returns false if it is unknown or
    /// its writer has already gone away.
    pub fn send_to(&self, id: &ConnectionId, msg: ServerMessage) -> bool {
        match self.clients.get(id) {
            Some(outbox) => outbox.send(msg).is_ok(),
            None => false,
        }
    }

    /// Queue a message for every connection. Returns how many accepted it.
    pub fn send_all(&self, msg: &ServerMessage) -> usize {
        self.fan_out(None, msg)
    }

    /// Queue a message for every connection except `excluded`.
    pub fn send_all_except(&self, excluded: &ConnectionId, msg: &ServerMessage) -> usize {
        self.fan_out(Some(excluded), msg)
    }

    fn fan_out(&self, excluded: Option<&ConnectionId>, msg: &ServerMessage) -> usize {
        self.clients
            .iter()
            .filter(|(id, _)| Some(*id) != excluded)
            .filter(|(_, outbox)| outbox.send(msg.clone()).is_ok())
            .count()
    }
}
