//! Session driver: the single task that owns the WebSocket.
//!
//! Commands from the [`Session`](super::Session) handle, connection attempt
//! results, the retry timer and inbound frames are all handled here one at a
//! time. Connection state only changes through [`SessionMachine::dispatch`].

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pa_shared::{Announcement, ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::backoff::ReconnectPolicy;
use super::fallback::OfflineFallback;
use super::machine::{Command, SessionEvent, SessionMachine};
use super::state::{Role, SessionNotice, SessionStatus};
use super::{BroadcastOutcome, SessionConfig, LAST_ANNOUNCEMENT_KEY};
use crate::error::SessionError;
use crate::storage::Storage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a closing handshake may take before the socket is just dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub(crate) enum SessionCommand {
    Connect,
    Retry,
    RequestClientsCount,
    Broadcast {
        announcement: Announcement,
        reply: oneshot::Sender<Result<BroadcastOutcome, SessionError>>,
    },
    Shutdown,
}

/// Where the driver publishes what it observes.
pub(crate) struct Outputs {
    pub status: watch::Sender<SessionStatus>,
    pub last_announcement: watch::Sender<Option<Announcement>>,
    /// Present only when the caller asked for every announcement.
    pub feed: Option<mpsc::UnboundedSender<Announcement>>,
    pub notices: broadcast::Sender<SessionNotice>,
}

struct AttemptResult {
    generation: u64,
    result: Result<WsStream, String>,
}

pub(crate) struct Driver {
    endpoint: Url,
    role: Role,
    storage: Option<Storage>,
    machine: SessionMachine,
    fallback: Box<dyn OfflineFallback>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    outputs: Outputs,
    transport: Option<WsStream>,
    attempt: Option<JoinHandle<()>>,
    attempt_tx: mpsc::UnboundedSender<AttemptResult>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptResult>,
    /// Bumped whenever an in-flight attempt is abandoned, so its result can
    /// be recognised as stale.
    generation: u64,
    retry_timer: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    pub(crate) fn new(
        config: SessionConfig,
        fallback: Box<dyn OfflineFallback>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
        outputs: Outputs,
    ) -> Self {
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        Self {
            endpoint: config.endpoint,
            role: config.role,
            storage: config.storage,
            machine: SessionMachine::new(),
            fallback,
            commands,
            outputs,
            transport: None,
            attempt: None,
            attempt_tx,
            attempt_rx,
            generation: 0,
            retry_timer: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                Some(attempt) = self.attempt_rx.recv() => self.on_attempt(attempt).await,
                () = wait_for_timer(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.dispatch(SessionEvent::RetryTimerFired).await;
                }
                frame = next_frame(&mut self.transport) => self.on_frame(frame).await,
            }
        }

        self.dispatch(SessionEvent::ShutdownRequested).await;
        tracing::debug!(endpoint = %self.endpoint, "session stopped");
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => self.dispatch(SessionEvent::ConnectRequested).await,
            SessionCommand::Retry => {
                tracing::info!(endpoint = %self.endpoint, "manual reconnect requested");
                self.dispatch(SessionEvent::RetryRequested).await;
            }
            SessionCommand::RequestClientsCount => {
                if self.machine.status().is_live() {
                    match ClientMessage::RequestClientsCount.encode() {
                        Ok(frame) => {
                            self.send_text(frame).await;
                        }
                        Err(e) => tracing::error!(error = %e, "failed to encode count request"),
                    }
                }
            }
            SessionCommand::Broadcast {
                announcement,
                reply,
            } => {
                let outcome = self.broadcast(announcement).await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn broadcast(
        &mut self,
        announcement: Announcement,
    ) -> Result<BroadcastOutcome, SessionError> {
        if !self.machine.status().is_live() {
            tracing::info!(
                text = %announcement.preview(50),
                "relay unavailable, broadcast recorded in offline mode"
            );
            return Ok(BroadcastOutcome::Offline);
        }

        let frame = ClientMessage::Broadcast(announcement).encode()?;
        if self.send_text(frame).await {
            Ok(BroadcastOutcome::Sent)
        } else {
            Ok(BroadcastOutcome::Offline)
        }
    }

    /// Write one text frame. A failed write counts as losing the transport.
    async fn send_text(&mut self, frame: String) -> bool {
        let Some(ws) = self.transport.as_mut() else {
            return false;
        };
        tracing::debug!(%frame, "sending frame");
        match ws.send(Message::Text(frame.into())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                self.dispatch(SessionEvent::TransportLost {
                    reason: "transport error".to_string(),
                })
                .await;
                false
            }
        }
    }

    async fn on_attempt(&mut self, attempt: AttemptResult) {
        if attempt.generation != self.generation {
            // Superseded by a retry or teardown; a late socket is just dropped.
            return;
        }
        self.attempt = None;

        match attempt.result {
            Ok(ws) => {
                tracing::info!(endpoint = %self.endpoint, "connected to relay");
                self.transport = Some(ws);
                self.dispatch(SessionEvent::TransportEstablished).await;
                if !self.machine.state().is_connected() {
                    self.close_transport().await;
                }
            }
            Err(error) => {
                tracing::warn!(endpoint = %self.endpoint, %error, "connection attempt failed");
                self.dispatch(SessionEvent::TransportFailed { error }).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        let reason = match frame {
            Some(Ok(Message::Text(text))) => {
                self.on_text(&text).await;
                return;
            }
            Some(Ok(Message::Close(close))) => {
                tracing::info!(?close, "relay closed the connection");
                "io server disconnect"
            }
            Some(Ok(_)) => return,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "transport error");
                "transport error"
            }
            None => "transport close",
        };

        self.dispatch(SessionEvent::TransportLost {
            reason: reason.to_string(),
        })
        .await;
    }

    async fn on_text(&mut self, text: &str) {
        let msg = match ServerMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed frame");
                return;
            }
        };

        match (self.role, msg) {
            (Role::Operator, ServerMessage::ClientsCount(count)) => {
                self.dispatch(SessionEvent::ClientsCount(count)).await;
            }
            (Role::Operator, ServerMessage::BroadcastSuccess(receipt)) => {
                tracing::info!(clients = receipt.clients, "broadcast acknowledged");
                self.notify(SessionNotice::BroadcastAcknowledged(receipt));
            }
            (Role::Operator, ServerMessage::BroadcastError(failure)) => {
                tracing::warn!(message = %failure.message, "relay rejected broadcast");
                self.notify(SessionNotice::BroadcastFailed {
                    message: failure.message,
                });
            }
            (Role::Receiver, ServerMessage::Announcement(announcement)) => {
                self.deliver(announcement);
            }
            (role, msg) => tracing::debug!(?role, ?msg, "ignoring frame for other role"),
        }
    }

    fn deliver(&mut self, announcement: Announcement) {
        tracing::info!(
            priority = %announcement.priority(),
            text = %announcement.preview(50),
            "announcement received"
        );
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(LAST_ANNOUNCEMENT_KEY, &announcement) {
                tracing::warn!(error = %e, "failed to persist last announcement");
            }
        }
        let consumer_gone = self
            .outputs
            .feed
            .as_ref()
            .is_some_and(|feed| feed.send(announcement.clone()).is_err());
        if consumer_gone {
            self.outputs.feed = None;
        }
        self.outputs.last_announcement.send_replace(Some(announcement));
    }

    /// Feed an event through the state machine and carry out its commands,
    /// including any follow-up events they produce.
    async fn dispatch(&mut self, event: SessionEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            tracing::debug!(?event, state = ?self.machine.state(), "session event");
            for command in self.machine.dispatch(event) {
                if let Some(follow_up) = self.execute(command).await {
                    pending.push_back(follow_up);
                }
            }
        }

        let status = self.machine.status();
        self.outputs.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    async fn execute(&mut self, command: Command) -> Option<SessionEvent> {
        match command {
            Command::OpenTransport => self.open_transport(),
            Command::CloseTransport => self.close_transport().await,
            Command::ScheduleRetry(delay) => {
                tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Command::CancelRetry => self.retry_timer = None,
            Command::ConsultFallback => {
                let clients = self.fallback.simulated_clients()?;
                tracing::warn!(clients, "relay unreachable, simulating a connection");
                return Some(SessionEvent::FallbackEngaged { clients });
            }
            Command::Notify(notice) => self.notify(notice),
        }
        None
    }

    fn open_transport(&mut self) {
        self.abandon_attempt();

        let generation = self.generation;
        let url = self.endpoint.to_string();
        let timeout = ReconnectPolicy::STANDARD.attempt_timeout;
        let results = self.attempt_tx.clone();
        tracing::info!(endpoint = %url, "connecting");

        self.attempt = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
                Ok(Ok((ws, _response))) => Ok(ws),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
            };
            let _ = results.send(AttemptResult { generation, result });
        }));
    }

    async fn close_transport(&mut self) {
        self.abandon_attempt();
        if let Some(mut ws) = self.transport.take() {
            match tokio::time::timeout(CLOSE_GRACE, ws.close(None)).await {
                Ok(Ok(())) => tracing::debug!("transport closed"),
                Ok(Err(e)) => tracing::debug!(error = %e, "transport already gone"),
                Err(_) => tracing::debug!("close handshake timed out"),
            }
        }
    }

    fn abandon_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.generation += 1;
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine.
        let _ = self.outputs.notices.send(notice);
    }
}

async fn wait_for_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(transport: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match transport {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}
