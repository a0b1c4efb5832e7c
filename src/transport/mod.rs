//! Transport abstraction the connection task drives.
//!
//! A transport is anything that can open a bidirectional, message oriented
//! [`Channel`]. The client never looks at protocol handshakes; it only sees
//! [`Frame`]s and [`TransportError`]s.

mod websocket;

pub use websocket::{ParseEndpointError, WebsocketChannel, WebsocketConnector};

use bytes::Bytes;
use futures_util::{Sink, Stream};
use snafu::prelude::*;

/// Application payload carried by a data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text payload
    Text(String),
    /// Raw binary payload
    Binary(Bytes),
}

impl Payload {
    /// Payload content as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// true if the payload carries no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data.into())
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

/// Close code and reason sent or received when a channel shuts down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// close code, websocket numbering
    pub code: u16,
    /// human readable reason
    pub reason: String,
}

/// Unit of traffic on a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// application data
    Data(Payload),
    /// liveness probe
    Ping,
    /// liveness probe answer
    Pong,
    /// peer (or local side) is closing the channel
    Close(Option<CloseFrame>),
}

/// Failure reported by a transport while opening, reading or writing.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum TransportError {
    /// the server refused the handshake
    #[snafu(display("handshake rejected with status {status}"))]
    Rejected {
        /// status code of the refusal
        status: u16,
    },

    /// the underlying connection broke without a clean close
    #[snafu(display("transport broken: {message}"))]
    Broken {
        /// error description
        message: String,
    },

    /// a frame violated the expected protocol framing
    #[snafu(display("malformed frame: {message}"))]
    Malformed {
        /// error description
        message: String,
    },

    /// the channel was used after it closed
    #[snafu(display("channel already closed"))]
    Closed,
}

/// Bidirectional frame channel produced by a [`Connector`].
pub trait Channel:
    Stream<Item = Result<Frame, TransportError>>
    + Sink<Frame, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Channel for T where
    T: Stream<Item = Result<Frame, TransportError>>
        + Sink<Frame, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}

/// Opens a fresh [`Channel`] for every connect attempt.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// channel type this connector produces
    type Channel: Channel;

    /// open a new channel, a handle is never reused across attempts
    async fn connect(&self) -> Result<Self::Channel, TransportError>;
}
