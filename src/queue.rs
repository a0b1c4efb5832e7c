//! Outbound buffering while the channel is not connected.

use std::collections::VecDeque;

use futures_util::{Sink, SinkExt};
use tokio::time::Instant;

use crate::transport::{Frame, Payload};

/// A message written while the channel was not connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    /// enqueue order, strictly increasing for the lifetime of the client
    pub sequence: u64,
    /// message content
    pub payload: Payload,
    /// when it was enqueued
    pub enqueued_at: Instant,
}

/// FIFO of [`OutboundEnvelope`]s, optionally bounded.
///
/// When the bound is hit the oldest envelope is evicted and handed back to
/// the caller, so a drop is never silent.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<OutboundEnvelope>,
    next_sequence: u64,
    capacity: Option<usize>,
    warning_threshold: usize,
    warned: bool,
}

impl OutboundQueue {
    /// `capacity` of `None` means unbounded; a warning is logged once the
    /// queue grows to `warning_threshold`.
    pub fn new(capacity: Option<usize>, warning_threshold: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_sequence: 0,
            capacity,
            warning_threshold,
            warned: false,
        }
    }

    /// Append a payload, returns the envelope evicted to make room if any.
    pub fn enqueue(&mut self, payload: Payload) -> Option<OutboundEnvelope> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.entries.push_back(OutboundEnvelope {
            sequence,
            payload,
            enqueued_at: Instant::now(),
        });

        log::trace!("Enqueued outbound message {}, {} queued", sequence, self.len());

        if !self.warned && self.len() >= self.warning_threshold {
            self.warned = true;
            log::warn!(
                "Outbound queue reached {} messages while disconnected",
                self.len()
            );
        }

        match self.capacity {
            Some(capacity) if self.len() > capacity => {
                let evicted = self.entries.pop_front();
                if let Some(ref e) = evicted {
                    log::warn!("Outbound queue full, dropped oldest message {}", e.sequence);
                }
                evicted
            }
            _ => None,
        }
    }

    /// Write every envelope to `sink` in sequence order.
    ///
    /// An envelope leaves the queue only after its write succeeded; on error
    /// the failed envelope and everything behind it stay queued.
    pub async fn flush<S>(&mut self, sink: &mut S) -> Result<usize, S::Error>
    where
        S: Sink<Frame> + Unpin,
    {
        let mut sent = 0;

        while let Some(front) = self.entries.front() {
            sink.send(Frame::Data(front.payload.clone())).await?;
            if let Some(e) = self.entries.pop_front() {
                log::trace!("Flushed outbound message {}", e.sequence);
            }
            sent += 1;
        }

        self.warned = false;

        Ok(sent)
    }

    /// Discard everything, returns how many envelopes were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.warned = false;
        n
    }

    /// Queued envelope count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued envelopes in flush order.
    pub fn iter(&self) -> impl Iterator<Item = &OutboundEnvelope> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::TransportError;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Frame>,
        fail_after: Option<usize>,
    }

    impl Sink<Frame> for Recorder {
        type Error = TransportError;

        fn poll_ready(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn start_send(mut self: std::pin::Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
            if self.fail_after == Some(self.frames.len()) {
                return Err(TransportError::Closed);
            }
            self.frames.push(item);
            Ok(())
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    fn texts(frames: &[Frame]) -> Vec<&str> {
        frames
            .iter()
            .map(|f| match f {
                Frame::Data(Payload::Text(s)) => s.as_str(),
                other => panic!("unexpected frame {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_flush_in_order() {
        let mut queue = OutboundQueue::new(None, 100);
        for s in ["a", "b", "c"] {
            assert!(queue.enqueue(s.into()).is_none());
        }

        let mut sink = Recorder::default();
        assert_eq!(queue.flush(&mut sink).await.unwrap(), 3);
        assert_eq!(texts(&sink.frames), vec!["a", "b", "c"]);
        assert!(queue.is_empty());

        // a second flush must not replay anything
        assert_eq!(queue.flush(&mut sink).await.unwrap(), 0);
        assert_eq!(sink.frames.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_rest() {
        let mut queue = OutboundQueue::new(None, 100);
        for s in ["a", "b", "c"] {
            queue.enqueue(s.into());
        }

        let mut sink = Recorder {
            fail_after: Some(1),
            ..Recorder::default()
        };
        assert!(queue.flush(&mut sink).await.is_err());
        assert_eq!(texts(&sink.frames), vec!["a"]);

        let rest: Vec<_> = queue.iter().map(|e| e.sequence).collect();
        assert_eq!(rest, vec![1, 2]);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut queue = OutboundQueue::new(Some(2), 100);
        assert!(queue.enqueue("a".into()).is_none());
        assert!(queue.enqueue("b".into()).is_none());

        let evicted = queue.enqueue("c".into()).unwrap();
        assert_eq!(evicted.sequence, 0);
        assert_eq!(evicted.payload, Payload::from("a"));

        let left: Vec<_> = queue.iter().map(|e| e.sequence).collect();
        assert_eq!(left, vec![1, 2]);
    }

    #[test]
    fn test_clear() {
        let mut queue = OutboundQueue::new(None, 1);
        queue.enqueue("a".into());
        queue.enqueue("b".into());
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
