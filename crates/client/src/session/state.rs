//! Observable session state.

use pa_shared::BroadcastReceipt;

/// Which side of the relay a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// May broadcast; tracks the relay's client count.
    Operator,
    /// Only consumes announcements.
    Receiver,
}

/// Connection state for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

/// Snapshot of everything the presentation layer may read about a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts in the current reconnect cycle
    pub reconnect_attempts: u32,
    /// Sessions registered with the relay, as last reported (operator role)
    pub connected_clients: usize,
    /// True while the offline fallback stands in for a real connection
    pub simulated: bool,
}

impl SessionStatus {
    /// Connected to an actual relay, not a simulated one.
    pub fn is_live(&self) -> bool {
        self.state.is_connected() && !self.simulated
    }
}

/// Lifecycle and acknowledgment events, for toasts and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Connected,
    Disconnected { reason: String },
    ConnectError { error: String },
    /// Ordinal of the attempt about to be made in the current cycle.
    ReconnectAttempt(u32),
    /// Retries exhausted; only `retry_connection` restarts the cycle.
    ReconnectFailed,
    /// Offline fallback engaged with a made-up client count.
    Simulated { clients: usize },
    ClientsCount(usize),
    BroadcastAcknowledged(BroadcastReceipt),
    BroadcastFailed { message: String },
}
