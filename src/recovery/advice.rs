use serde::Serialize;

use super::ErrorKind;
use crate::client::{ConnectionState, Status, FLAPPING_THRESHOLD};

/// What the hosting UI should suggest to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// check the network connection
    CheckNetwork,
    /// sign in again, credentials were rejected
    Reauthenticate,
    /// reload the page or restart the process
    Reload,
    /// retry manually with `connect()`
    Retry,
    /// nothing to do, recovery is in progress
    Wait,
}

/// Human readable guidance derived from the client status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    /// failure class the guidance is about
    pub kind: ErrorKind,
    /// message suitable for a toast or banner
    pub message: String,
    /// suggested next step
    pub suggested_action: SuggestedAction,
}

impl Recommendation {
    fn new(kind: ErrorKind, message: &str, suggested_action: SuggestedAction) -> Self {
        Self {
            kind,
            message: message.to_string(),
            suggested_action,
        }
    }
}

/// Guidance for the current status, most urgent first.
pub fn recommendations(status: &Status, online: bool) -> Vec<Recommendation> {
    let mut advice = Vec::new();
    let last_kind = status.reconnect.last_error_kind;

    if !online {
        advice.push(Recommendation::new(
            ErrorKind::Network,
            "offline: check your network connection",
            SuggestedAction::CheckNetwork,
        ));
    }

    match (status.state, last_kind) {
        (ConnectionState::Suspended, Some(ErrorKind::Auth)) => {
            advice.push(Recommendation::new(
                ErrorKind::Auth,
                "the server rejected the session: sign in again",
                SuggestedAction::Reauthenticate,
            ));
        }
        (ConnectionState::Suspended, kind) => {
            advice.push(Recommendation::new(
                kind.unwrap_or(ErrorKind::Unknown),
                "live updates are paused: retry the connection",
                SuggestedAction::Retry,
            ));
        }
        (ConnectionState::Reconnecting | ConnectionState::Connecting, Some(kind)) if online => {
            advice.push(Recommendation::new(
                kind,
                "connection lost: reconnecting",
                SuggestedAction::Wait,
            ));
        }
        _ => {}
    }

    if status.reconnect.consecutive_failures >= FLAPPING_THRESHOLD
        && last_kind != Some(ErrorKind::Auth)
    {
        advice.push(Recommendation::new(
            last_kind.unwrap_or(ErrorKind::Unknown),
            "too many consecutive errors: reload the page",
            SuggestedAction::Reload,
        ));
    }

    advice
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::ReconnectState;

    fn status(state: ConnectionState, kind: Option<ErrorKind>, failures: u32) -> Status {
        Status {
            state,
            reconnect: ReconnectState {
                consecutive_failures: failures,
                last_error_kind: kind,
                attempts_for_current_kind: failures,
            },
            ..Status::default()
        }
    }

    fn actions(advice: &[Recommendation]) -> Vec<SuggestedAction> {
        advice.iter().map(|r| r.suggested_action).collect()
    }

    #[test]
    fn test_healthy_has_no_advice() {
        let advice = recommendations(&status(ConnectionState::Connected, None, 0), true);
        assert!(advice.is_empty());
    }

    #[test]
    fn test_offline_first() {
        let advice = recommendations(
            &status(ConnectionState::Reconnecting, Some(ErrorKind::Network), 1),
            false,
        );
        assert_eq!(actions(&advice), vec![SuggestedAction::CheckNetwork]);
        assert_eq!(advice[0].kind, ErrorKind::Network);
    }

    #[test]
    fn test_auth_suspension() {
        let advice = recommendations(
            &status(ConnectionState::Suspended, Some(ErrorKind::Auth), 4),
            true,
        );
        assert_eq!(actions(&advice), vec![SuggestedAction::Reauthenticate]);
    }

    #[test]
    fn test_flapping_suggests_reload() {
        let advice = recommendations(
            &status(ConnectionState::Connected, Some(ErrorKind::Protocol), 3),
            true,
        );
        assert_eq!(actions(&advice), vec![SuggestedAction::Reload]);
        assert_eq!(advice[0].kind, ErrorKind::Protocol);
    }

    #[test]
    fn test_exhausted_suspension() {
        let advice = recommendations(
            &status(ConnectionState::Suspended, Some(ErrorKind::Timeout), 2),
            true,
        );
        assert_eq!(actions(&advice), vec![SuggestedAction::Retry]);
    }

    #[test]
    fn test_reconnecting_waits() {
        let advice = recommendations(
            &status(ConnectionState::Reconnecting, Some(ErrorKind::Unknown), 1),
            true,
        );
        assert_eq!(actions(&advice), vec![SuggestedAction::Wait]);
    }
}
