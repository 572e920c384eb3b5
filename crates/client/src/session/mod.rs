//! Connection session to the relay.
//!
//! A [`Session`] is a cheap handle over a background task that owns the
//! WebSocket, reconnects with capped exponential backoff and publishes
//! everything it learns through watch and broadcast channels. Operator
//! sessions broadcast and track the client count; receiver sessions collect
//! announcements.

mod backoff;
mod connection;
mod fallback;
mod machine;
mod state;

pub use backoff::{backoff_delay, ReconnectPolicy};
pub use fallback::{DemoFallback, NoFallback, OfflineFallback};
pub use machine::{Command, SessionEvent, SessionMachine};
pub use state::{ConnectionState, Role, SessionNotice, SessionStatus};

use pa_shared::Announcement;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::error::SessionError;
use crate::storage::Storage;
use connection::{Driver, Outputs, SessionCommand};

/// Storage key under which receivers keep the most recent announcement.
pub const LAST_ANNOUNCEMENT_KEY: &str = "pa_last_announcement";

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Url,
    pub role: Role,
    /// Where receivers persist the last announcement. `None` keeps it in memory only.
    pub storage: Option<Storage>,
    /// Queue every received announcement for [`Session::take_announcements`].
    /// Without it only the latest is kept.
    pub feed: bool,
}

impl SessionConfig {
    pub fn operator(endpoint: Url) -> Self {
        Self {
            endpoint,
            role: Role::Operator,
            storage: None,
            feed: false,
        }
    }

    pub fn receiver(endpoint: Url) -> Self {
        Self {
            endpoint,
            role: Role::Receiver,
            storage: None,
            feed: false,
        }
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Ignored for operators, which never receive announcements.
    pub fn with_feed(mut self) -> Self {
        self.feed = true;
        self
    }
}

/// What happened to an accepted broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Written to the relay; an acknowledgment notice follows.
    Sent,
    /// No live relay connection. Nothing was transmitted.
    Offline,
}

pub struct Session {
    role: Role,
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    last_announcement: watch::Receiver<Option<Announcement>>,
    feed: Option<mpsc::UnboundedReceiver<Announcement>>,
    notices: broadcast::Sender<SessionNotice>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawn the session task. Must be called inside a tokio runtime.
    ///
    /// The session starts `Disconnected`; call [`Session::connect`] to dial.
    pub fn new(config: SessionConfig, fallback: Box<dyn OfflineFallback>) -> Self {
        let restored = match (config.role, &config.storage) {
            (Role::Receiver, Some(storage)) => storage
                .load::<Announcement>(LAST_ANNOUNCEMENT_KEY)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "ignoring unreadable last announcement");
                    None
                }),
            _ => None,
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SessionStatus::default());
        let (last_tx, last_announcement) = watch::channel(restored);
        let (feed_tx, feed) = if config.role == Role::Receiver && config.feed {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let role = config.role;
        let driver = Driver::new(
            config,
            fallback,
            command_rx,
            Outputs {
                status: status_tx,
                last_announcement: last_tx,
                feed: feed_tx,
                notices: notices.clone(),
            },
        );
        let task = tokio::spawn(driver.run());

        Self {
            role,
            commands,
            status,
            last_announcement,
            feed,
            notices,
            task: Some(task),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Start connecting. Does nothing while connecting or connected; from
    /// `Failed` it starts a fresh cycle.
    pub fn connect(&self) {
        self.command(SessionCommand::Connect);
    }

    /// Drop any connection or pending attempt and dial again immediately.
    pub fn retry_connection(&self) {
        self.command(SessionCommand::Retry);
    }

    /// Ask the relay for a fresh client count. Ignored unless live.
    pub fn request_clients_count(&self) {
        self.command(SessionCommand::RequestClientsCount);
    }

    /// Validate and send an announcement to every other connected session.
    ///
    /// Invalid announcements are rejected here and never reach the relay.
    pub async fn broadcast(
        &self,
        announcement: Announcement,
    ) -> Result<BroadcastOutcome, SessionError> {
        if self.role != Role::Operator {
            return Err(SessionError::NotOperator);
        }
        announcement.validate()?;

        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(SessionCommand::Broadcast {
                announcement,
                reply,
            })
            .map_err(|_| SessionError::Closed)?;
        outcome.await.map_err(|_| SessionError::Closed)?
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Most recent announcement received (or restored from storage).
    pub fn last_announcement(&self) -> Option<Announcement> {
        self.last_announcement.borrow().clone()
    }

    pub fn watch_last_announcement(&self) -> watch::Receiver<Option<Announcement>> {
        self.last_announcement.clone()
    }

    /// Every announcement received, in arrival order. Can be taken once, and
    /// only exists for receivers configured [`SessionConfig::with_feed`].
    pub fn take_announcements(&mut self) -> Option<mpsc::UnboundedReceiver<Announcement>> {
        self.feed.take()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Close the connection and wait for the session task to finish.
    pub async fn shutdown(mut self) {
        self.command(SessionCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "session task failed");
            }
        }
    }

    fn command(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("session task already stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }
}
