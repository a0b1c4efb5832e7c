//! Server-pushed dashboard events, the usual content of inbound messages.
//!
//! ```no_run
//! # fn handle(msg: &steadylink::InboundMessage) {
//! use steadylink::dashboard::DashboardEvent;
//!
//! match msg.decode::<DashboardEvent>() {
//!     Ok(DashboardEvent::Alert(alert)) => println!("{}: {}", alert.severity, alert.title),
//!     Ok(event) => println!("{:?}", event),
//!     Err(err) => eprintln!("{}", err),
//! }
//! # }
//! ```

use std::{collections::HashMap, fmt};

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

/// Event body, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// a metric changed value
    MetricUpdate(MetricUpdate),
    /// something needs attention
    Alert(Alert),
    /// informational message for the user
    Notification(Notification),
}

/// type = metric_update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    /// metric name
    pub metric: String,
    /// new value
    pub value: f64,
    /// milliseconds since unix epoch, as reported by the server
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// dimension labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Alert severity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// informational
    Info,
    /// degraded
    Warning,
    /// broken
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// type = alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// alert id, stable across updates of the same alert
    pub id: String,
    /// how bad it is
    pub severity: Severity,
    /// short title
    pub title: String,
    /// longer description
    #[serde(default)]
    pub message: String,
}

/// type = notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// title
    pub title: String,
    /// body
    #[serde(default)]
    pub body: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{inbound::InboundMessage, transport::Payload};

    fn message(s: &str) -> InboundMessage {
        InboundMessage {
            payload: Payload::from(s),
            sequence: None,
        }
    }

    #[test]
    fn test_decode_metric() {
        let event: DashboardEvent = message(
            r#"{"type":"metric_update","metric":"cpu","value":0.75,"labels":{"host":"a"}}"#,
        )
        .decode()
        .unwrap();

        let metric = event.into_metric_update().unwrap();
        assert_eq!(metric.metric, "cpu");
        assert_eq!(metric.value, 0.75);
        assert_eq!(metric.timestamp, None);
        assert_eq!(metric.labels["host"], "a");
    }

    #[test]
    fn test_decode_alert() {
        let event: DashboardEvent = message(
            r#"{"type":"alert","id":"disk-1","severity":"critical","title":"Disk full"}"#,
        )
        .decode()
        .unwrap();

        let alert = event.as_alert().unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.severity > Severity::Warning);
        assert_eq!(alert.message, "");
    }

    #[test]
    fn test_unknown_type_is_error() {
        let err = message(r#"{"type":"chat","text":"hi"}"#)
            .decode::<DashboardEvent>()
            .unwrap_err();
        assert!(err.to_string().contains("DashboardEvent"), "{}", err);
    }
}
