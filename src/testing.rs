//! In-memory transport for exercising the client without a server.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

use futures_util::{future, Sink, Stream};
use tokio::sync::mpsc;

use crate::transport::{CloseFrame, Connector, Frame, Payload, TransportError};

/// What the next connect attempt does.
#[derive(Debug)]
pub(crate) enum Dial {
    Accept,
    /// Accept, but every write on the channel fails.
    RejectWrites,
    Fail(TransportError),
    Hang,
}

/// Client side of an accepted connection.
#[derive(Debug)]
pub(crate) struct MockChannel {
    incoming: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    outgoing: mpsc::UnboundedSender<Frame>,
}

impl Stream for MockChannel {
    type Item = Result<Frame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_recv(cx)
    }
}

impl Sink<Frame> for MockChannel {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.outgoing.send(item).map_err(|_| TransportError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Server side of an accepted connection. Dropping it ends the client's
/// stream.
#[derive(Debug)]
pub(crate) struct Remote {
    tx: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Remote {
    pub fn push(&self, frame: Frame) {
        let _ = self.tx.send(Ok(frame));
    }

    pub fn text(&self, s: &str) {
        self.push(Frame::Data(s.into()));
    }

    pub fn close(&self, code: u16) {
        self.push(Frame::Close(Some(CloseFrame {
            code,
            reason: "closed by test".to_string(),
        })));
    }

    /// Next data frame the client wrote, skipping liveness frames.
    pub async fn next_data(&mut self) -> Payload {
        loop {
            match self.rx.recv().await {
                Some(Frame::Data(payload)) => return payload,
                Some(_) => continue,
                None => panic!("client dropped the channel"),
            }
        }
    }

    /// Stop taking frames, later client writes fail.
    pub fn stop_reading(&mut self) {
        self.rx.close();
    }

    /// Frames written so far and not yet read.
    pub fn written(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnector {
    script: Arc<Mutex<VecDeque<Dial>>>,
    attempts: Arc<AtomicUsize>,
    remotes: mpsc::UnboundedSender<Remote>,
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    type Channel = MockChannel;

    async fn connect(&self) -> Result<MockChannel, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let dial = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Dial::Accept);

        match dial {
            Dial::Accept | Dial::RejectWrites => {
                let (to_client, incoming) = mpsc::unbounded_channel();
                let (outgoing, from_client) = mpsc::unbounded_channel();
                let mut remote = Remote {
                    tx: to_client,
                    rx: from_client,
                };
                if matches!(dial, Dial::RejectWrites) {
                    remote.stop_reading();
                }
                let _ = self.remotes.send(remote);
                Ok(MockChannel { incoming, outgoing })
            }
            Dial::Fail(err) => Err(err),
            Dial::Hang => future::pending().await,
        }
    }
}

/// Test side of a [`MockConnector`].
#[derive(Debug)]
pub(crate) struct MockServer {
    script: Arc<Mutex<VecDeque<Dial>>>,
    attempts: Arc<AtomicUsize>,
    remotes: mpsc::UnboundedReceiver<Remote>,
}

impl MockServer {
    /// Connect attempts seen so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Queue the outcome of a future attempt, unscripted attempts succeed.
    pub fn script(&self, dial: Dial) {
        self.script.lock().unwrap().push_back(dial);
    }

    pub async fn accept(&mut self) -> Remote {
        self.remotes.recv().await.expect("connector dropped")
    }
}

pub(crate) fn mock() -> (MockConnector, MockServer) {
    let _ = pretty_env_logger::try_init();

    let script = Arc::new(Mutex::new(VecDeque::new()));
    let attempts = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::unbounded_channel();

    (
        MockConnector {
            script: script.clone(),
            attempts: attempts.clone(),
            remotes: tx,
        },
        MockServer {
            script,
            attempts,
            remotes: rx,
        },
    )
}
