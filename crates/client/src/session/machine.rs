//! Connection lifecycle state machine.
//!
//! The machine never touches the network or the clock. Every transport event
//! goes in through [`SessionMachine::dispatch`], which updates the state and
//! returns the [`Command`]s the driver has to carry out.

use std::time::Duration;

use super::backoff::ReconnectPolicy;
use super::state::{ConnectionState, SessionNotice, SessionStatus};

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    RetryRequested,
    TransportEstablished,
    /// A connection attempt was refused, errored or timed out.
    TransportFailed { error: String },
    /// An established connection went away.
    TransportLost { reason: String },
    RetryTimerFired,
    /// The offline fallback agreed to stand in for the relay.
    FallbackEngaged { clients: usize },
    ClientsCount(usize),
    ShutdownRequested,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenTransport,
    CloseTransport,
    ScheduleRetry(Duration),
    CancelRetry,
    /// Ask the offline fallback whether to simulate a connection.
    ConsultFallback,
    Notify(SessionNotice),
}

#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    reconnect_attempts: u32,
    connected_clients: usize,
    simulated: bool,
    ever_connected: bool,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            connected_clients: self.connected_clients,
            simulated: self.simulated,
        }
    }

    /// Whether a real transport has succeeded at least once.
    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    pub fn dispatch(&mut self, event: SessionEvent) -> Vec<Command> {
        use ConnectionState::*;

        match event {
            SessionEvent::ConnectRequested => match self.state {
                Disconnected | Failed => self.begin_connecting(),
                Connecting | Connected | Reconnecting => Vec::new(),
            },

            SessionEvent::RetryRequested => {
                let mut commands = vec![Command::CancelRetry, Command::CloseTransport];
                commands.extend(self.begin_connecting());
                commands
            }

            SessionEvent::TransportEstablished => match self.state {
                Connecting | Reconnecting => {
                    self.state = Connected;
                    self.reconnect_attempts = 0;
                    self.simulated = false;
                    self.ever_connected = true;
                    vec![Command::CancelRetry, Command::Notify(SessionNotice::Connected)]
                }
                _ => Vec::new(),
            },

            SessionEvent::TransportFailed { error } => match self.state {
                Connecting | Reconnecting => {
                    self.reconnect_attempts += 1;
                    let mut commands = vec![Command::Notify(SessionNotice::ConnectError { error })];

                    if self.reconnect_attempts >= self.policy.max_attempts {
                        self.state = Failed;
                        commands.push(Command::CancelRetry);
                        commands.push(Command::Notify(SessionNotice::ReconnectFailed));
                    } else {
                        self.state = Reconnecting;
                        let delay = self.policy.delay_for_attempt(self.reconnect_attempts - 1);
                        commands.push(Command::ScheduleRetry(delay));
                    }

                    if !self.ever_connected {
                        commands.push(Command::ConsultFallback);
                    }
                    commands
                }
                _ => Vec::new(),
            },

            SessionEvent::TransportLost { reason } => {
                if self.state != Connected || self.simulated {
                    return Vec::new();
                }
                self.state = Reconnecting;
                self.reconnect_attempts = 0;
                vec![
                    Command::CloseTransport,
                    Command::Notify(SessionNotice::Disconnected { reason }),
                    Command::ScheduleRetry(self.policy.delay_for_attempt(0)),
                ]
            }

            SessionEvent::RetryTimerFired => match self.state {
                Reconnecting => vec![
                    Command::Notify(SessionNotice::ReconnectAttempt(self.reconnect_attempts + 1)),
                    Command::OpenTransport,
                ],
                _ => Vec::new(),
            },

            SessionEvent::FallbackEngaged { clients } => {
                if self.ever_connected || !matches!(self.state, Connecting | Reconnecting | Failed) {
                    return Vec::new();
                }
                self.state = Connected;
                self.simulated = true;
                self.reconnect_attempts = 0;
                self.connected_clients = clients;
                vec![
                    Command::CancelRetry,
                    Command::CloseTransport,
                    Command::Notify(SessionNotice::Simulated { clients }),
                ]
            }

            SessionEvent::ClientsCount(count) => {
                if self.state != Connected || self.simulated {
                    return Vec::new();
                }
                self.connected_clients = count;
                vec![Command::Notify(SessionNotice::ClientsCount(count))]
            }

            SessionEvent::ShutdownRequested => {
                self.state = Disconnected;
                self.reconnect_attempts = 0;
                self.connected_clients = 0;
                self.simulated = false;
                vec![Command::CancelRetry, Command::CloseTransport]
            }
        }
    }

    fn begin_connecting(&mut self) -> Vec<Command> {
        self.state = ConnectionState::Connecting;
        self.reconnect_attempts = 0;
        self.simulated = false;
        vec![Command::OpenTransport]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn failed() -> SessionEvent {
        SessionEvent::TransportFailed {
            error: "connection refused".to_string(),
        }
    }

    /// Connect, then fail `failures` times in a row, firing the retry timer
    /// between failures the way the driver would.
    fn fail_repeatedly(machine: &mut SessionMachine, failures: u32) -> Vec<Command> {
        machine.dispatch(SessionEvent::ConnectRequested);
        let mut last = Vec::new();
        for n in 0..failures {
            if n > 0 {
                machine.dispatch(SessionEvent::RetryTimerFired);
            }
            last = machine.dispatch(failed());
        }
        last
    }

    fn connected_machine() -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.dispatch(SessionEvent::ConnectRequested);
        machine.dispatch(SessionEvent::TransportEstablished);
        machine
    }

    #[test]
    fn test_connect_opens_transport_once() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        assert_eq!(
            machine.dispatch(SessionEvent::ConnectRequested),
            vec![Command::OpenTransport]
        );
        assert_eq!(machine.state(), ConnectionState::Connecting);

        assert!(machine.dispatch(SessionEvent::ConnectRequested).is_empty());
        machine.dispatch(SessionEvent::TransportEstablished);
        assert!(machine.dispatch(SessionEvent::ConnectRequested).is_empty());
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_established_resets_attempts() {
        let mut machine = SessionMachine::new();
        fail_repeatedly(&mut machine, 4);
        assert_eq!(machine.status().reconnect_attempts, 4);

        machine.dispatch(SessionEvent::RetryTimerFired);
        let commands = machine.dispatch(SessionEvent::TransportEstablished);

        assert_eq!(machine.state(), ConnectionState::Connected);
        assert_eq!(machine.status().reconnect_attempts, 0);
        assert!(commands.contains(&Command::Notify(SessionNotice::Connected)));
    }

    #[test]
    fn test_first_failure_schedules_base_delay() {
        let mut machine = SessionMachine::new();
        let commands = fail_repeatedly(&mut machine, 1);

        assert_eq!(machine.state(), ConnectionState::Reconnecting);
        assert!(commands.contains(&Command::ScheduleRetry(Duration::from_secs(1))));
    }

    #[test]
    fn test_retry_delays_follow_backoff() {
        let mut machine = SessionMachine::new();
        machine.dispatch(SessionEvent::ConnectRequested);
        let mut delays = Vec::new();
        for n in 0..9 {
            if n > 0 {
                machine.dispatch(SessionEvent::RetryTimerFired);
            }
            for command in machine.dispatch(failed()) {
                if let Command::ScheduleRetry(delay) = command {
                    delays.push(delay.as_secs());
                }
            }
        }
        assert_eq!(delays, vec![1, 2, 4, 5, 5, 5, 5, 5, 5]);
    }

    #[test]
    fn test_tenth_failure_is_terminal() {
        let mut machine = SessionMachine::new();
        let commands = fail_repeatedly(&mut machine, 10);

        assert_eq!(machine.state(), ConnectionState::Failed);
        assert!(commands.contains(&Command::Notify(SessionNotice::ReconnectFailed)));
        assert!(!commands.iter().any(|c| matches!(c, Command::ScheduleRetry(_))));

        // Nothing restarts the cycle on its own.
        assert!(machine.dispatch(SessionEvent::RetryTimerFired).is_empty());
        assert!(machine.dispatch(failed()).is_empty());
        assert_eq!(machine.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_retry_from_failed_restarts_cycle() {
        let mut machine = SessionMachine::new();
        fail_repeatedly(&mut machine, 10);

        let commands = machine.dispatch(SessionEvent::RetryRequested);

        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.status().reconnect_attempts, 0);
        assert_eq!(
            commands,
            vec![
                Command::CancelRetry,
                Command::CloseTransport,
                Command::OpenTransport
            ]
        );
    }

    #[test]
    fn test_retry_while_connected_tears_down_first() {
        let mut machine = connected_machine();
        let commands = machine.dispatch(SessionEvent::RetryRequested);
        assert_eq!(commands.first(), Some(&Command::CancelRetry));
        assert_eq!(commands.get(1), Some(&Command::CloseTransport));
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_server_disconnect_goes_to_reconnecting() {
        let mut machine = connected_machine();
        let commands = machine.dispatch(SessionEvent::TransportLost {
            reason: "io server disconnect".to_string(),
        });

        assert_eq!(machine.state(), ConnectionState::Reconnecting);
        assert_eq!(machine.status().reconnect_attempts, 0);
        assert_eq!(
            commands,
            vec![
                Command::CloseTransport,
                Command::Notify(SessionNotice::Disconnected {
                    reason: "io server disconnect".to_string()
                }),
                Command::ScheduleRetry(Duration::from_secs(1)),
            ]
        );
    }

    #[test]
    fn test_retry_timer_reopens_transport() {
        let mut machine = connected_machine();
        machine.dispatch(SessionEvent::TransportLost {
            reason: "transport close".to_string(),
        });

        let commands = machine.dispatch(SessionEvent::RetryTimerFired);
        assert_eq!(
            commands,
            vec![
                Command::Notify(SessionNotice::ReconnectAttempt(1)),
                Command::OpenTransport
            ]
        );

        machine.dispatch(SessionEvent::TransportEstablished);
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_fallback_offered_only_before_first_real_connection() {
        let mut machine = SessionMachine::new();
        let commands = fail_repeatedly(&mut machine, 1);
        assert!(commands.contains(&Command::ConsultFallback));

        machine.dispatch(SessionEvent::RetryTimerFired);
        machine.dispatch(SessionEvent::TransportEstablished);
        machine.dispatch(SessionEvent::TransportLost {
            reason: "transport error".to_string(),
        });
        machine.dispatch(SessionEvent::RetryTimerFired);
        let commands = machine.dispatch(failed());

        assert!(!commands.contains(&Command::ConsultFallback));
        assert!(machine
            .dispatch(SessionEvent::FallbackEngaged { clients: 4 })
            .is_empty());
        assert!(!machine.status().simulated);
    }

    #[test]
    fn test_fallback_simulates_connection() {
        let mut machine = SessionMachine::new();
        fail_repeatedly(&mut machine, 1);

        let commands = machine.dispatch(SessionEvent::FallbackEngaged { clients: 7 });

        let status = machine.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(status.simulated);
        assert!(!status.is_live());
        assert_eq!(status.connected_clients, 7);
        assert_eq!(commands[0], Command::CancelRetry);

        // Leaving simulated mode means trying the relay for real.
        machine.dispatch(SessionEvent::RetryRequested);
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(!machine.status().simulated);
    }

    #[test]
    fn test_simulated_session_ignores_transport_noise() {
        let mut machine = SessionMachine::new();
        fail_repeatedly(&mut machine, 1);
        machine.dispatch(SessionEvent::FallbackEngaged { clients: 2 });

        assert!(machine
            .dispatch(SessionEvent::TransportLost {
                reason: "transport close".to_string()
            })
            .is_empty());
        assert!(machine.dispatch(SessionEvent::ClientsCount(9)).is_empty());
        assert_eq!(machine.status().connected_clients, 2);
    }

    #[test]
    fn test_clients_count_tracked_while_connected() {
        let mut machine = connected_machine();
        assert_eq!(
            machine.dispatch(SessionEvent::ClientsCount(5)),
            vec![Command::Notify(SessionNotice::ClientsCount(5))]
        );
        assert_eq!(machine.status().connected_clients, 5);
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let mut machine = SessionMachine::new();
        fail_repeatedly(&mut machine, 3);

        let commands = machine.dispatch(SessionEvent::ShutdownRequested);

        assert_eq!(commands, vec![Command::CancelRetry, Command::CloseTransport]);
        assert_eq!(machine.status(), SessionStatus::default());
    }

    #[test]
    fn test_shutdown_forgets_client_count() {
        let mut machine = connected_machine();
        machine.dispatch(SessionEvent::ClientsCount(4));

        machine.dispatch(SessionEvent::ShutdownRequested);
        assert_eq!(machine.status(), SessionStatus::default());
    }

    proptest! {
        #[test]
        fn prop_fewer_than_ten_failures_keep_reconnecting(failures in 1u32..10) {
            let mut machine = SessionMachine::new();
            fail_repeatedly(&mut machine, failures);
            prop_assert_eq!(machine.state(), ConnectionState::Reconnecting);
            prop_assert_eq!(machine.status().reconnect_attempts, failures);
        }

        #[test]
        fn prop_retry_always_restarts_from_any_failure_count(failures in 0u32..=10) {
            let mut machine = SessionMachine::new();
            fail_repeatedly(&mut machine, failures);
            machine.dispatch(SessionEvent::RetryRequested);
            prop_assert_eq!(machine.state(), ConnectionState::Connecting);
            prop_assert_eq!(machine.status().reconnect_attempts, 0);
        }
    }
}
