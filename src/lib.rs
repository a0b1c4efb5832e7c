//! # Steadylink
//!
//! A resilient client for long-lived duplex connections, built for live
//! dashboards receiving server-pushed events.
//!
//! One logical session is kept across an unreliable transport: failures are
//! detected by heartbeat, classified, and recovered from with a per-class
//! strategy and jittered exponential backoff. Messages sent while
//! disconnected are queued and flushed in order on reconnect; replayed
//! inbound messages can be dropped by sequence number.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use steadylink::{transport::WebsocketConnector, Client, ClientEvent, Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = WebsocketConnector::parse("wss://example.com/live")?;
//! let client = Client::new(Config::default(), connector)?;
//! let mut events = client.subscribe()?;
//! client.connect()?;
//!
//! while let Some(event) = events.next().await {
//!     if let ClientEvent::ConnectionChange(change) = event {
//!         println!("{} -> {}", change.from, change.to);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod dashboard;
pub mod inbound;
pub mod network;
pub mod queue;
pub mod recovery;
pub mod transport;

mod error;
#[cfg(test)]
mod testing;

pub use client::{
    Client, ClientBuilder, ClientEvent, ConnectionState, EventKind, EventStream, HealthSnapshot,
    ListenerId, Reason, StateChange, Status,
};
pub use config::Config;
pub use error::{Error, Result};
pub use inbound::InboundMessage;
pub use network::NetworkStatus;
pub use recovery::{ConnectionError, ErrorKind, Recommendation, SuggestedAction};
