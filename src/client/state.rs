use std::fmt;

use serde::Serialize;

use crate::recovery::{ConnectionError, ErrorKind};

/// consecutive failures at which a client counts as flapping
pub(crate) const FLAPPING_THRESHOLD: u32 = 3;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// never connected, or waiting for a first `connect()`
    Disconnected,
    /// a connect attempt is in flight
    Connecting,
    /// the channel is open
    Connected,
    /// waiting out a backoff delay before the next attempt
    Reconnecting,
    /// gave up, only a manual `connect()` or a network-online signal leaves it
    Suspended,
    /// shut down by the application, terminal
    Closed,
}

impl ConnectionState {
    /// Stable snake case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// the application called `connect()`
    ConnectRequested,
    /// the channel opened
    Opened,
    /// a failure of this class was observed
    Failure(ErrorKind),
    /// the class is configured non-recoverable
    NonRecoverable(ErrorKind),
    /// the class used up its attempt budget
    AttemptsExhausted(ErrorKind),
    /// automatic reconnection is disabled
    AutoReconnectDisabled,
    /// the backoff delay elapsed and the precondition held
    BackoffElapsed,
    /// the network came back while suspended
    NetworkOnline,
    /// the application called `close()`
    UserClosed,
}

impl Reason {
    /// Stable snake case name.
    ///
    /// A class configured non-recoverable reports the class itself, so an
    /// authorization rejection surfaces as `auth_error`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectRequested => "connect_requested",
            Self::Opened => "opened",
            Self::Failure(kind) | Self::NonRecoverable(kind) => kind.as_str(),
            Self::AttemptsExhausted(_) => "attempts_exhausted",
            Self::AutoReconnectDisabled => "auto_reconnect_disabled",
            Self::BackoffElapsed => "backoff_elapsed",
            Self::NetworkOnline => "network_online",
            Self::UserClosed => "user_closed",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition, delivered as a `ConnectionChange` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// state before
    pub from: ConnectionState,
    /// state after
    pub to: ConnectionState,
    /// why
    pub reason: Reason,
}

/// Failure bookkeeping of the reconnect loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// failures since the last confirmed connection, any class
    pub consecutive_failures: u32,
    /// class of the latest failure
    pub last_error_kind: Option<ErrorKind>,
    /// failures counted against the budget of `last_error_kind`
    pub attempts_for_current_kind: u32,
}

impl ReconnectState {
    /// Record a failure, returns the attempt number for the backoff curve.
    ///
    /// A class change restarts the per-class count. When `consume` is false
    /// the failure is remembered but not charged to the budget.
    pub(crate) fn record_failure(&mut self, kind: ErrorKind, consume: bool) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.last_error_kind != Some(kind) {
            self.last_error_kind = Some(kind);
            self.attempts_for_current_kind = 0;
        }

        if consume {
            self.attempts_for_current_kind = self.attempts_for_current_kind.saturating_add(1);
        }

        self.attempts_for_current_kind
    }

    /// Give the current class a fresh budget.
    pub(crate) fn reset_budget(&mut self) {
        self.attempts_for_current_kind = 0;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Snapshot published by the connection task after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// current state
    pub state: ConnectionState,
    /// failure bookkeeping
    pub reconnect: ReconnectState,
    /// latest classified failure
    pub last_error: Option<ConnectionError>,
    /// envelopes waiting in the outbound queue
    pub queued: usize,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect: ReconnectState::default(),
            last_error: None,
            queued: 0,
        }
    }
}

/// Derived connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// current state
    pub state: ConnectionState,
    /// failures since the last confirmed connection
    pub consecutive_failures: u32,
    /// connected and not flapping
    pub is_healthy: bool,
}

impl From<&Status> for HealthSnapshot {
    fn from(status: &Status) -> Self {
        let consecutive_failures = status.reconnect.consecutive_failures;

        Self {
            state: status.state,
            consecutive_failures,
            is_healthy: status.state == ConnectionState::Connected
                && consecutive_failures < FLAPPING_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_kind_change_restarts_count() {
        let mut r = ReconnectState::default();
        assert_eq!(r.record_failure(ErrorKind::Timeout, true), 1);
        assert_eq!(r.record_failure(ErrorKind::Timeout, true), 2);
        assert_eq!(r.record_failure(ErrorKind::Network, true), 1);
        assert_eq!(r.consecutive_failures, 3);
        assert_eq!(r.last_error_kind, Some(ErrorKind::Network));
    }

    #[test]
    fn test_unconsumed_failure_keeps_budget() {
        let mut r = ReconnectState::default();
        assert_eq!(r.record_failure(ErrorKind::Network, false), 0);
        assert_eq!(r.record_failure(ErrorKind::Network, false), 0);
        assert_eq!(r.consecutive_failures, 2);
    }

    #[test]
    fn test_flapping_is_unhealthy_while_connected() {
        let mut status = Status {
            state: ConnectionState::Connected,
            ..Status::default()
        };
        assert!(HealthSnapshot::from(&status).is_healthy);

        for _ in 0..3 {
            status.reconnect.record_failure(ErrorKind::Unknown, true);
        }
        let health = HealthSnapshot::from(&status);
        assert!(!health.is_healthy);
        assert_eq!(health.consecutive_failures, 3);
    }

    #[test]
    fn test_auth_reason_name() {
        assert_eq!(Reason::NonRecoverable(ErrorKind::Auth).as_str(), "auth_error");
        assert_eq!(Reason::Failure(ErrorKind::Timeout).to_string(), "timeout");
    }
}
