//! Broadcast relay.
//!
//! A single task owns the [`ClientRegistry`]. Socket handlers never touch the
//! registry directly; they send [`RelayEvent`]s through a [`RelayHandle`], so
//! the join, leave and broadcast events of every connection are applied one at
//! a time in arrival order.

use chrono::Utc;
use pa_shared::{Announcement, BroadcastFailure, BroadcastReceipt, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::registry::{ClientRegistry, ConnectionId, Outbox};

/// Something that happened on one of the relay's connections.
#[derive(Debug)]
pub enum RelayEvent {
    Joined { id: ConnectionId, outbox: Outbox },
    Left { id: ConnectionId },
    Broadcast { from: ConnectionId, announcement: Announcement },
    /// A `broadcast` frame whose payload could not be decoded.
    MalformedBroadcast { from: ConnectionId, reason: String },
    RequestClientsCount { from: ConnectionId },
    /// Out-of-band count query used by the HTTP health route.
    QueryCount { reply: oneshot::Sender<usize> },
}

#[derive(Debug, Default)]
pub struct Relay {
    registry: ClientRegistry,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Apply one event to the registry and queue the resulting frames.
    pub fn handle(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Joined { id, outbox } => {
                if self.registry.register(id, outbox) {
                    tracing::info!(%id, clients = self.registry.len(), "client connected");
                    self.publish_count();
                }
            }
            RelayEvent::Left { id } => {
                if self.registry.unregister(&id) {
                    tracing::info!(%id, clients = self.registry.len(), "client disconnected");
                    self.publish_count();
                }
            }
            RelayEvent::Broadcast { from, announcement } => {
                tracing::info!(
                    %from,
                    priority = %announcement.priority(),
                    languages = ?announcement.languages(),
                    "broadcast received"
                );
                let delivered = self
                    .registry
                    .send_all_except(&from, &ServerMessage::Announcement(announcement));

                let receipt = BroadcastReceipt {
                    clients: self.registry.len().saturating_sub(1),
                    timestamp: Utc::now().timestamp_millis(),
                };
                tracing::debug!(%from, delivered, clients = receipt.clients, "broadcast fanned out");
                self.registry
                    .send_to(&from, ServerMessage::BroadcastSuccess(receipt));
            }
            RelayEvent::MalformedBroadcast { from, reason } => {
                tracing::warn!(%from, %reason, "rejecting malformed broadcast");
                self.registry.send_to(
                    &from,
                    ServerMessage::BroadcastError(BroadcastFailure {
                        message: format!("invalid announcement: {}", reason),
                    }),
                );
            }
            RelayEvent::RequestClientsCount { from } => {
                self.registry
                    .send_to(&from, ServerMessage::ClientsCount(self.registry.len()));
            }
            RelayEvent::QueryCount { reply } => {
                let _ = reply.send(self.registry.len());
            }
        }
    }

    fn publish_count(&self) {
        self.registry
            .send_all(&ServerMessage::ClientsCount(self.registry.len()));
    }

    /// Move the relay onto its own task and return the handle used to feed it.
    pub fn spawn(self) -> (RelayHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (RelayHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RelayEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        tracing::debug!("relay stopped");
    }
}

/// Cloneable sender side of a running relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayHandle {
    pub fn send(&self, event: RelayEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("relay task is gone, dropping event");
        }
    }

    pub fn joined(&self, id: ConnectionId, outbox: Outbox) {
        self.send(RelayEvent::Joined { id, outbox });
    }

    pub fn left(&self, id: ConnectionId) {
        self.send(RelayEvent::Left { id });
    }

    /// Current registry size, or `None` if the relay has stopped.
    pub async fn clients_count(&self) -> Option<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RelayEvent::QueryCount { reply }).ok()?;
        rx.await.ok()
    }
}
