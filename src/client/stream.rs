use std::task::Poll;

use futures_util::Stream;
use tokio::sync::mpsc;

use super::ClientEvent;

/// Stream of every [`ClientEvent`], ends when the client shuts down.
#[derive(Debug)]
pub struct EventStream {
    pub(crate) rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Stream for EventStream {
    type Item = ClientEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
