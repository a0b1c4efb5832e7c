use std::task::Poll;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use miniz_oxide::inflate;
use snafu::prelude::*;
use tokio_tungstenite::{
    tungstenite::{
        self as websocket,
        protocol::{frame::coding::CloseCode, CloseFrame as WsCloseFrame},
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use super::{CloseFrame, Connector, Frame, Payload, TransportError};

type WebsocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Error when parse string as websocket endpoint
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseEndpointError {
    /// the str is not a valid url
    #[snafu(display("{s} is an invalid url: {source}"))]
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the endpoint url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },
}

fn transport_error(err: websocket::Error) -> TransportError {
    use websocket::Error as E;

    match err {
        E::Http(response) => TransportError::Rejected {
            status: response.status().as_u16(),
        },
        E::Protocol(e) => TransportError::Malformed {
            message: e.to_string(),
        },
        E::Capacity(e) => TransportError::Malformed {
            message: e.to_string(),
        },
        E::Utf8 => TransportError::Malformed {
            message: "text frame is not valid utf-8".to_string(),
        },
        E::ConnectionClosed | E::AlreadyClosed => TransportError::Closed,
        other => TransportError::Broken {
            message: other.to_string(),
        },
    }
}

/// Opens websocket channels to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebsocketConnector {
    url: Url,
    compress: bool,
}

impl WebsocketConnector {
    /// Parse and validate a `ws://` or `wss://` endpoint.
    pub fn parse<S: AsRef<str> + ?Sized>(s: &S) -> Result<Self, ParseEndpointError> {
        let s = s.as_ref();
        let url = Url::parse(s).context(error::InvalidURL { s })?;

        ensure!(
            matches!(url.scheme(), "ws" | "wss"),
            error::InvalidSchema {
                s,
                schema: url.scheme()
            }
        );
        ensure!(url.host().is_some(), error::NoHost { s });

        Ok(Self {
            url,
            compress: false,
        })
    }

    /// Whether the server zlib-compresses binary frames.
    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Endpoint this connector dials.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait::async_trait]
impl Connector for WebsocketConnector {
    type Channel = WebsocketChannel;

    async fn connect(&self) -> Result<Self::Channel, TransportError> {
        log::debug!("Connecting websocket endpoint: {}", self.url);

        let (ws, _) = tokio_tungstenite::connect_async(self.url.clone())
            .await
            .map_err(transport_error)?;

        Ok(WebsocketChannel::new(ws, self.compress))
    }
}

/// Websocket connection adapted to the [`Frame`] channel interface.
#[derive(Debug)]
pub struct WebsocketChannel {
    ws: WebsocketStream,
    compress: bool,
}

impl WebsocketChannel {
    /// Wrap an established websocket connection.
    ///
    /// the `compress` argument controls if binary frames are decompressed
    /// before they are handed to the client.
    pub fn new(ws: WebsocketStream, compress: bool) -> Self {
        Self { ws, compress }
    }

    fn decode(&self, frame: websocket::Message) -> Option<Result<Frame, TransportError>> {
        let frame = match frame {
            websocket::Message::Text(text) => Frame::Data(Payload::Text(text)),
            websocket::Message::Binary(data) if self.compress => {
                match inflate::decompress_to_vec_zlib(&data) {
                    Ok(plain) => Frame::Data(Payload::Binary(plain.into())),
                    Err(status) => {
                        log::trace!("Decompress failed message data, status {:?}", status);
                        return Some(Err(TransportError::Malformed {
                            message: format!("decompress binary frame failed: {status:?}"),
                        }));
                    }
                }
            }
            websocket::Message::Binary(data) => Frame::Data(Payload::Binary(Bytes::from(data))),
            websocket::Message::Ping(_) => Frame::Ping,
            websocket::Message::Pong(_) => Frame::Pong,
            websocket::Message::Close(close) => Frame::Close(close.map(|f| CloseFrame {
                code: f.code.into(),
                reason: f.reason.into_owned(),
            })),
            // raw frames are never produced when reading
            #[allow(unreachable_patterns)]
            _ => return None,
        };

        Some(Ok(frame))
    }

    fn encode(frame: Frame) -> websocket::Message {
        match frame {
            Frame::Data(Payload::Text(text)) => websocket::Message::Text(text),
            Frame::Data(Payload::Binary(data)) => websocket::Message::Binary(data.to_vec()),
            Frame::Ping => websocket::Message::Ping(Vec::new()),
            Frame::Pong => websocket::Message::Pong(Vec::new()),
            Frame::Close(close) => websocket::Message::Close(close.map(|f| WsCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.into(),
            })),
        }
    }
}

impl Stream for WebsocketChannel {
    type Item = Result<Frame, TransportError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match self.ws.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(transport_error(e)))),
                Poll::Ready(Some(Ok(frame))) => frame,
            };

            if let Some(item) = self.decode(frame) {
                return Poll::Ready(Some(item));
            }
        }
    }
}

impl Sink<Frame> for WebsocketChannel {
    type Error = TransportError;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws.poll_ready_unpin(cx).map_err(transport_error)
    }

    fn start_send(mut self: std::pin::Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.ws
            .start_send_unpin(Self::encode(item))
            .map_err(transport_error)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws.poll_flush_unpin(cx).map_err(transport_error)
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws.poll_close_unpin(cx).map_err(transport_error)
    }
}
