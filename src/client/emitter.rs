use std::{fmt, sync::Arc};

use enum_as_inner::EnumAsInner;
use tokio::sync::mpsc;

use super::StateChange;
use crate::{inbound::InboundMessage, queue::OutboundEnvelope, recovery::ConnectionError};

/// Event category used when registering a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ClientEvent::ConnectionChange`]
    ConnectionChange,
    /// [`ClientEvent::Message`]
    Message,
    /// [`ClientEvent::QueueOverflow`]
    QueueOverflow,
    /// [`ClientEvent::Error`]
    Error,
}

/// Everything the client tells the application.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum ClientEvent {
    /// state transition, the only way to observe connectivity
    ConnectionChange(StateChange),
    /// message from the server
    Message(InboundMessage),
    /// the bounded outbound queue evicted its oldest message
    QueueOverflow(OutboundEnvelope),
    /// a failure was classified
    Error(ConnectionError),
}

impl ClientEvent {
    /// Category of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionChange(_) => EventKind::ConnectionChange,
            Self::Message(_) => EventKind::Message,
            Self::QueueOverflow(_) => EventKind::QueueOverflow,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Handle returned by `on`, pass it to `off` to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

pub(crate) type Handler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

pub(crate) enum Listener {
    Callback(Handler),
    Stream(mpsc::UnboundedSender<ClientEvent>),
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Listener::Callback"),
            Self::Stream(_) => f.write_str("Listener::Stream"),
        }
    }
}

#[derive(Debug)]
struct Registration {
    id: ListenerId,
    kind: Option<EventKind>,
    listener: Listener,
}

/// Dispatches events to registered listeners, in registration order.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
    registrations: Vec<Registration>,
}

impl Emitter {
    /// `kind` of `None` receives every event.
    pub fn add(&mut self, id: ListenerId, kind: Option<EventKind>, listener: Listener) {
        self.registrations.push(Registration { id, kind, listener });
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        before != self.registrations.len()
    }

    pub fn emit(&mut self, event: ClientEvent) {
        let kind = event.kind();

        self.registrations.retain(|r| {
            if r.kind.is_some_and(|k| k != kind) {
                return true;
            }

            match &r.listener {
                Listener::Callback(handler) => {
                    handler(&event);
                    true
                }
                Listener::Stream(tx) => {
                    let alive = tx.send(event.clone()).is_ok();
                    if !alive {
                        log::debug!("Event stream {:?} dropped, unregister it", r.id);
                    }
                    alive
                }
            }
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;
    use crate::recovery::ErrorKind;

    fn error_event() -> ClientEvent {
        ClientEvent::Error(ConnectionError {
            kind: ErrorKind::Unknown,
            code: None,
            reason: "test".to_string(),
        })
    }

    #[test]
    fn test_kind_filter_and_off() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = Emitter::default();

        let s = seen.clone();
        emitter.add(
            ListenerId(1),
            Some(EventKind::Error),
            Listener::Callback(Arc::new(move |e: &ClientEvent| {
                s.lock().unwrap().push(e.kind())
            })),
        );

        emitter.emit(error_event());
        emitter.emit(ClientEvent::QueueOverflow(OutboundEnvelope {
            sequence: 0,
            payload: "x".into(),
            enqueued_at: tokio::time::Instant::now(),
        }));
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::Error]);

        assert!(emitter.remove(ListenerId(1)));
        assert!(!emitter.remove(ListenerId(1)));
        emitter.emit(error_event());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_stream_unregistered() {
        let mut emitter = Emitter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        emitter.add(ListenerId(7), None, Listener::Stream(tx));

        emitter.emit(error_event());
        assert_eq!(emitter.len(), 1);

        drop(rx);
        emitter.emit(error_event());
        assert_eq!(emitter.len(), 0);
    }
}
