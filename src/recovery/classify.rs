use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::transport::TransportError;

/// close codes meaning the peer rejected us by policy or authorization
const AUTH_CLOSE_CODES: &[u16] = &[1008, 4001, 4003, 4401, 4403];

/// close codes meaning the connection was cut abnormally
const ABNORMAL_CLOSE_CODES: &[u16] = &[1001, 1006, 1012, 1013, 1014, 1015];

/// close codes meaning the peer could not understand our framing
const PROTOCOL_CLOSE_CODES: &[u16] = &[1002, 1003, 1007, 1009];

/// handshake status codes meaning the credentials were refused
const AUTH_HANDSHAKE_STATUS: &[u16] = &[401, 403];

/// Semantic failure class used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// rejected by policy or authorization, needs external re-authentication
    Auth,
    /// no network path, or the connection was cut abruptly
    Network,
    /// traffic did not follow the expected framing
    Protocol,
    /// no answer arrived within the probe or connect window
    Timeout,
    /// anything else
    Unknown,
}

impl ErrorKind {
    /// Stable snake case name, also used as transition reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth_error",
            Self::Network => "network_error",
            Self::Protocol => "protocol_error",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure observed by the connection task, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// channel closed, with the close code if the peer sent one
    Closed {
        /// close code, `None` when the channel ended without a close frame
        code: Option<u16>,
        /// close reason
        reason: String,
    },
    /// the transport failed while opening, reading or writing
    Transport(TransportError),
    /// an inbound message could not be decoded
    Undecodable {
        /// decoder error description
        reason: String,
    },
    /// heartbeat probe went unanswered
    ProbeTimeout {
        /// how long we waited for an answer
        after: Duration,
    },
    /// connect attempt did not complete in time
    ConnectTimeout {
        /// how long we waited for the channel to open
        after: Duration,
    },
}

impl From<TransportError> for RawFailure {
    fn from(err: TransportError) -> Self {
        match err {
            // using a closed channel is the same as seeing it close abruptly
            TransportError::Closed => Self::Closed {
                code: None,
                reason: "channel already closed".to_string(),
            },
            err => Self::Transport(err),
        }
    }
}

impl RawFailure {
    fn code(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => *code,
            Self::Transport(TransportError::Rejected { status }) => Some(*status),
            _ => None,
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::Closed { reason, .. } => reason.clone(),
            Self::Transport(err) => err.to_string(),
            Self::Undecodable { reason } => format!("undecodable message: {reason}"),
            Self::ProbeTimeout { after } => format!("no heartbeat answer within {after:?}"),
            Self::ConnectTimeout { after } => format!("connect did not complete within {after:?}"),
        }
    }

    fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Closed {
                code: Some(code), ..
            } => AUTH_CLOSE_CODES.contains(code),
            Self::Transport(TransportError::Rejected { status }) => {
                AUTH_HANDSHAKE_STATUS.contains(status)
            }
            _ => false,
        }
    }

    fn is_abnormal_termination(&self) -> bool {
        match self {
            Self::Closed { code: None, .. } => true,
            Self::Closed {
                code: Some(code), ..
            } => ABNORMAL_CLOSE_CODES.contains(code),
            Self::Transport(TransportError::Broken { .. }) => true,
            _ => false,
        }
    }

    fn is_framing_violation(&self) -> bool {
        match self {
            Self::Closed {
                code: Some(code), ..
            } => PROTOCOL_CLOSE_CODES.contains(code),
            Self::Transport(TransportError::Malformed { .. }) | Self::Undecodable { .. } => true,
            _ => false,
        }
    }

    fn is_timeout(&self) -> bool {
        matches!(self, Self::ProbeTimeout { .. } | Self::ConnectTimeout { .. })
    }
}

/// A classified failure, the only failure shape the application ever sees.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("{kind}: {reason}"))]
pub struct ConnectionError {
    /// failure class
    pub kind: ErrorKind,
    /// originating close code or handshake status, if any
    pub code: Option<u16>,
    /// originating reason
    pub reason: String,
}

/// Map a raw failure to its [`ErrorKind`].
///
/// Precedence is fixed: authorization rejection, then offline or abnormal
/// termination, then framing violations, then timeouts. Being offline beats
/// every code except an explicit authorization rejection, a stale close code
/// seen while offline says nothing about the protocol.
pub fn classify(failure: &RawFailure, online: bool) -> ConnectionError {
    let kind = if failure.is_auth_rejection() {
        ErrorKind::Auth
    } else if !online || failure.is_abnormal_termination() {
        ErrorKind::Network
    } else if failure.is_framing_violation() {
        ErrorKind::Protocol
    } else if failure.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown
    };

    ConnectionError {
        kind,
        code: failure.code(),
        reason: failure.reason(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn closed(code: u16) -> RawFailure {
        RawFailure::Closed {
            code: Some(code),
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_auth_codes() {
        for code in [1008, 4001, 4003, 4401, 4403] {
            assert_eq!(classify(&closed(code), true).kind, ErrorKind::Auth);
        }

        let rejected = RawFailure::Transport(TransportError::Rejected { status: 401 });
        let err = classify(&rejected, true);
        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(err.code, Some(401));
    }

    #[test]
    fn test_auth_wins_over_offline() {
        assert_eq!(classify(&closed(1008), false).kind, ErrorKind::Auth);
    }

    #[test]
    fn test_abnormal_close_is_network() {
        assert_eq!(classify(&closed(1006), true).kind, ErrorKind::Network);

        let ended = RawFailure::Closed {
            code: None,
            reason: "stream ended".to_string(),
        };
        assert_eq!(classify(&ended, true).kind, ErrorKind::Network);

        let broken = RawFailure::Transport(TransportError::Broken {
            message: "connection reset".to_string(),
        });
        assert_eq!(classify(&broken, true).kind, ErrorKind::Network);
    }

    #[test]
    fn test_offline_beats_protocol_and_timeout() {
        assert_eq!(classify(&closed(1002), false).kind, ErrorKind::Network);

        let probe = RawFailure::ProbeTimeout {
            after: Duration::from_millis(50),
        };
        assert_eq!(classify(&probe, false).kind, ErrorKind::Network);
        assert_eq!(classify(&probe, true).kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_framing_violation_is_protocol() {
        assert_eq!(classify(&closed(1007), true).kind, ErrorKind::Protocol);

        let undecodable = RawFailure::Undecodable {
            reason: "expected object".to_string(),
        };
        assert_eq!(classify(&undecodable, true).kind, ErrorKind::Protocol);
    }

    #[test]
    fn test_everything_else_is_unknown() {
        assert_eq!(classify(&closed(1000), true).kind, ErrorKind::Unknown);
        assert_eq!(classify(&closed(1011), true).kind, ErrorKind::Unknown);

        let rejected = RawFailure::Transport(TransportError::Rejected { status: 500 });
        assert_eq!(classify(&rejected, true).kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_closed_transport_error_is_abrupt_close() {
        let failure = RawFailure::from(TransportError::Closed);
        assert_eq!(classify(&failure, true).kind, ErrorKind::Network);
    }

    #[test]
    fn test_reason_carried() {
        let err = classify(
            &RawFailure::Closed {
                code: Some(4003),
                reason: "token expired".to_string(),
            },
            true,
        );
        assert_eq!(err.code, Some(4003));
        assert_eq!(err.reason, "token expired");
        assert_eq!(err.to_string(), "auth_error: token expired");
    }
}
