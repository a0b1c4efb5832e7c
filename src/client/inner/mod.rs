mod heartbeat;

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use futures_util::{
    future::{self, BoxFuture},
    FutureExt, SinkExt, StreamExt,
};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use super::{
    emitter::{Emitter, Listener},
    ClientEvent, ConnectionState, EventKind, ListenerId, Reason, ReconnectState, StateChange,
    Status,
};
use crate::{
    config::Config,
    inbound::{sequence_of, InboundMessage, InboundTracker},
    network::NetworkStatus,
    queue::OutboundQueue,
    recovery::{
        classify, BackoffScheduler, ConnectionError, ErrorKind, RawFailure, RecoveryRegistry,
        RecoveryStrategy,
    },
    transport::{CloseFrame, Connector, Frame, Payload, TransportError},
};
use heartbeat::{Beat, Heartbeat};

/// how long a user initiated close waits for the close handshake
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// close code reported when the peer sent a close frame without status
const NO_STATUS_CODE: u16 = 1005;

/// Requests from [`Client`](super::Client) handles, processed in order.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Send(Payload),
    Close(Option<CloseFrame>),
    ClearQueue,
    Listen {
        id: ListenerId,
        kind: Option<EventKind>,
        listener: Listener,
    },
    Unlisten(ListenerId),
}

/// What the task currently holds besides its bookkeeping. Replacing the
/// link drops whatever the old one was waiting on, which is how timers and
/// in-flight attempts get cancelled.
enum Link<S> {
    Idle,
    Dialing(BoxFuture<'static, Result<S, RawFailure>>),
    Open {
        channel: S,
        heartbeat: Option<Heartbeat>,
        confirmed: bool,
    },
    Waiting {
        due: Instant,
        strategy: Arc<RecoveryStrategy>,
        check: Option<BoxFuture<'static, bool>>,
        /// the backoff already elapsed and a precondition check failed
        deferred: bool,
    },
}

enum Wake<S> {
    Dialed(Result<S, RawFailure>),
    Frame(Option<Result<Frame, TransportError>>),
    Beat(Beat),
    RetryDue,
    Checked(bool),
    Network(bool),
}

pub(crate) struct ClientParts<C> {
    pub config: Config,
    pub connector: C,
    pub registry: RecoveryRegistry,
    pub backoff: BackoffScheduler,
    pub network: NetworkStatus,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub status_tx: watch::Sender<Status>,
}

/// The connection task. It alone owns the channel and every piece of
/// mutable state; handles talk to it through [`Command`]s.
pub(crate) struct ClientInner<C: Connector> {
    config: Config,
    connector: Arc<C>,
    registry: RecoveryRegistry,
    backoff: BackoffScheduler,
    network: NetworkStatus,
    network_rx: watch::Receiver<bool>,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<Status>,

    state: ConnectionState,
    reconnect: ReconnectState,
    last_error: Option<ConnectionError>,
    queue: OutboundQueue,
    inbound: InboundTracker,
    emitter: Emitter,
    link: Link<C::Channel>,
}

impl<C: Connector> ClientInner<C> {
    pub fn new(parts: ClientParts<C>) -> Self {
        let queue = OutboundQueue::new(
            parts.config.max_queued_messages,
            parts.config.queue_warning_threshold,
        );

        Self {
            network_rx: parts.network.watch(),
            connector: Arc::new(parts.connector),
            registry: parts.registry,
            backoff: parts.backoff,
            network: parts.network,
            commands: parts.commands,
            status_tx: parts.status_tx,
            config: parts.config,
            state: ConnectionState::Disconnected,
            reconnect: ReconnectState::default(),
            last_error: None,
            queue,
            inbound: InboundTracker::default(),
            emitter: Emitter::default(),
            link: Link::Idle,
        }
    }

    pub fn start(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        log::debug!("Connection task start");

        loop {
            let flow = tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        log::debug!("Every client handle dropped, shut down");
                        self.shutdown(None).await
                    }
                },

                wake = Self::wait(&mut self.link, &mut self.network_rx) => {
                    self.on_wake(wake).await;
                    ControlFlow::Continue(())
                }
            };

            if flow.is_break() {
                break;
            }
        }

        log::debug!("Connection task stop");
    }

    async fn wait(
        link: &mut Link<C::Channel>,
        network: &mut watch::Receiver<bool>,
    ) -> Wake<C::Channel> {
        let link_wake = async {
            match link {
                Link::Idle => future::pending().await,
                Link::Dialing(dial) => Wake::Dialed(dial.await),
                Link::Open {
                    channel, heartbeat, ..
                } => {
                    let beat = async {
                        match heartbeat {
                            Some(hb) => hb.tick().await,
                            None => future::pending().await,
                        }
                    };

                    tokio::select! {
                        biased;

                        frame = channel.next() => Wake::Frame(frame),
                        beat = beat => Wake::Beat(beat),
                    }
                }
                Link::Waiting {
                    check: Some(check),
                    ..
                } => Wake::Checked(check.await),
                Link::Waiting { due, .. } => {
                    tokio::time::sleep_until(*due).await;
                    Wake::RetryDue
                }
            }
        };

        tokio::select! {
            biased;

            wake = link_wake => wake,
            Ok(()) = network.changed() => Wake::Network(*network.borrow_and_update()),
        }
    }

    async fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect => self.on_connect(),
            Command::Send(payload) => self.on_send(payload).await,
            Command::Close(frame) => return self.shutdown(frame).await,
            Command::ClearQueue => {
                let dropped = self.queue.clear();
                log::debug!("Cleared {} queued messages", dropped);
                self.publish();
            }
            Command::Listen { id, kind, listener } => {
                log::trace!("Register listener {:?} for {:?}", id, kind);
                self.emitter.add(id, kind, listener);
            }
            Command::Unlisten(id) => {
                if !self.emitter.remove(id) {
                    log::debug!("Listener {:?} is not registered", id);
                }
            }
        }

        ControlFlow::Continue(())
    }

    async fn on_wake(&mut self, wake: Wake<C::Channel>) {
        match wake {
            Wake::Dialed(Ok(channel)) => self.on_open(channel).await,
            Wake::Dialed(Err(failure)) => {
                log::warn!("Connect attempt failed: {:?}", failure);
                self.fail(failure);
            }
            Wake::Frame(Some(Ok(frame))) => self.on_frame(frame),
            Wake::Frame(Some(Err(err))) => {
                log::warn!("Channel broken when receive: {}", err);
                self.fail(err.into());
            }
            Wake::Frame(None) => {
                log::warn!("Channel ended without close frame");
                self.fail(RawFailure::Closed {
                    code: None,
                    reason: "channel ended without close frame".to_string(),
                });
            }
            Wake::Beat(Beat::Ping) => self.on_ping_due().await,
            Wake::Beat(Beat::Expired) => self.on_pong_timeout(),
            Wake::RetryDue => self.on_retry_due(),
            Wake::Checked(ready) => self.on_checked(ready),
            Wake::Network(online) => self.on_network(online),
        }
    }

    fn on_connect(&mut self) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                log::debug!("Connect requested while {}, ignored", self.state);
            }
            ConnectionState::Suspended => {
                // a manual retry starts a fresh budget
                self.reconnect.reset_budget();
                self.dial(Reason::ConnectRequested);
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                self.dial(Reason::ConnectRequested);
            }
            ConnectionState::Closed => {}
        }
    }

    async fn on_send(&mut self, payload: Payload) {
        let write_now = matches!(self.link, Link::Open { .. }) && self.queue.is_empty();

        if write_now {
            if let Link::Open { channel, .. } = &mut self.link {
                match channel.send(Frame::Data(payload.clone())).await {
                    Ok(()) => {
                        log::trace!("Sent message of {} bytes", payload.len());
                        return;
                    }
                    Err(err) => {
                        log::warn!("Channel broken when send: {}", err);
                        self.enqueue(payload);
                        self.fail(err.into());
                        return;
                    }
                }
            }
        }

        self.enqueue(payload);

        if matches!(self.link, Link::Open { .. }) {
            self.flush().await;
        }
    }

    fn enqueue(&mut self, payload: Payload) {
        if let Some(evicted) = self.queue.enqueue(payload) {
            self.emitter.emit(ClientEvent::QueueOverflow(evicted));
        }
        self.publish();
    }

    async fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let result = match &mut self.link {
            Link::Open { channel, .. } => self.queue.flush(channel).await,
            _ => return,
        };

        match result {
            Ok(n) => {
                log::debug!("Flushed {} queued messages", n);
                self.publish();
            }
            Err(err) => {
                log::warn!(
                    "Channel broken when flush, {} messages stay queued: {}",
                    self.queue.len(),
                    err
                );
                self.fail(err.into());
            }
        }
    }

    async fn on_open(&mut self, channel: C::Channel) {
        let heartbeat = self
            .config
            .enable_heartbeat
            .then(|| Heartbeat::new(self.config.ping_interval(), self.config.pong_timeout()));

        self.link = Link::Open {
            channel,
            heartbeat,
            confirmed: false,
        };

        self.transition(ConnectionState::Connected, Reason::Opened);
        self.flush().await;
    }

    fn on_frame(&mut self, frame: Frame) {
        if let Frame::Close(close) = frame {
            let (code, reason) = match close {
                Some(f) => (f.code, f.reason),
                None => (NO_STATUS_CODE, String::new()),
            };
            log::info!("Server closed channel with code {}: {}", code, reason);
            self.fail(RawFailure::Closed {
                code: Some(code),
                reason,
            });
            return;
        }

        // a close frame does not prove the connection works, anything else does
        let mut first_traffic = false;

        if let Link::Open {
            heartbeat,
            confirmed,
            ..
        } = &mut self.link
        {
            if let Some(hb) = heartbeat {
                hb.traffic();
            }
            if !*confirmed {
                *confirmed = true;
                first_traffic = true;
            }
        }

        if first_traffic {
            if self.reconnect.consecutive_failures > 0 {
                log::info!(
                    "Connection confirmed by server traffic, clear {} failures",
                    self.reconnect.consecutive_failures
                );
            }
            self.reconnect.reset();
            self.publish();
        }

        match frame {
            Frame::Data(payload) => self.on_data(payload),
            Frame::Ping | Frame::Pong => log::trace!("Received liveness frame"),
            Frame::Close(_) => {}
        }
    }

    fn on_data(&mut self, payload: Payload) {
        let parsed = self
            .config
            .inbound_sequence_field
            .as_deref()
            .map(|field| sequence_of(&payload, field));

        let sequence = match parsed {
            None => None,
            Some(Ok(sequence)) => sequence,
            Some(Err(err)) => {
                log::warn!("Received message with invalid envelope: {}", err);
                self.fail(RawFailure::Undecodable {
                    reason: err.to_string(),
                });
                return;
            }
        };

        if let Some(sn) = sequence {
            if !self.inbound.accept(sn) {
                return;
            }
        }

        log::trace!("Received message of {} bytes, sequence {:?}", payload.len(), sequence);

        self.emitter
            .emit(ClientEvent::Message(InboundMessage { payload, sequence }));
    }

    async fn on_ping_due(&mut self) {
        let result = match &mut self.link {
            Link::Open {
                channel,
                heartbeat: Some(hb),
                ..
            } => {
                log::trace!("Send heartbeat ping");
                let result = channel.send(Frame::Ping).await;
                if result.is_ok() {
                    hb.ping_sent();
                }
                result
            }
            _ => return,
        };

        if let Err(err) = result {
            log::warn!("Channel broken when send ping: {}", err);
            self.fail(err.into());
        }
    }

    fn on_pong_timeout(&mut self) {
        let after = match &self.link {
            Link::Open {
                heartbeat: Some(hb),
                ..
            } => hb.timeout(),
            _ => return,
        };

        log::warn!("Heartbeat timeout: no answer within {:?}, force close", after);
        self.fail(RawFailure::ProbeTimeout { after });
    }

    fn on_retry_due(&mut self) {
        if let Link::Waiting {
            strategy, check, ..
        } = &mut self.link
        {
            let precondition = strategy.precondition.clone();
            *check = Some(async move { precondition.check().await }.boxed());
        }
    }

    fn on_checked(&mut self, ready: bool) {
        if ready {
            self.dial(Reason::BackoffElapsed);
            return;
        }

        let recheck = self.config.precondition_recheck();
        if let Link::Waiting {
            due,
            check,
            deferred,
            ..
        } = &mut self.link
        {
            *check = None;
            *deferred = true;
            *due = Instant::now() + recheck;
            log::debug!("Retry precondition not met, check again in {:?}", recheck);
        }
    }

    fn on_network(&mut self, online: bool) {
        if !online {
            log::debug!("Network went offline while {}", self.state);
            return;
        }

        match self.state {
            ConnectionState::Reconnecting => {
                // only a retry already held back by its precondition is
                // pulled forward, a running backoff delay is kept
                if let Link::Waiting {
                    due,
                    check: None,
                    deferred: true,
                    ..
                } = &mut self.link
                {
                    log::debug!("Network back online, check retry precondition now");
                    *due = Instant::now();
                }
            }
            ConnectionState::Suspended
                if self.reconnect.last_error_kind == Some(ErrorKind::Network) =>
            {
                self.reconnect.reset_budget();
                self.dial(Reason::NetworkOnline);
            }
            _ => {}
        }
    }

    fn dial(&mut self, reason: Reason) {
        let connector = self.connector.clone();
        let timeout = self.config.connection_timeout();

        // replacing the link drops any previous channel or pending retry
        self.link = Link::Dialing(
            async move {
                match tokio::time::timeout(timeout, connector.connect()).await {
                    Ok(result) => result.map_err(RawFailure::from),
                    Err(_) => Err(RawFailure::ConnectTimeout { after: timeout }),
                }
            }
            .boxed(),
        );

        self.transition(ConnectionState::Connecting, reason);
    }

    /// Classify a failure and move to `Reconnecting` or `Suspended`.
    fn fail(&mut self, failure: RawFailure) {
        // the failed channel is discarded, a retry always opens a new one
        self.link = Link::Idle;

        let online = self.network.is_online();
        let error = classify(&failure, online);
        let kind = error.kind;

        log::warn!("Connection failure classified as {}", error);

        let strategy = self.registry.strategy_for(kind);
        // while offline a network failure says nothing about the server
        let consume = online || kind != ErrorKind::Network;
        let attempt = self.reconnect.record_failure(kind, consume);

        self.last_error = Some(error.clone());
        self.emitter.emit(ClientEvent::Error(error));

        if !self.config.enable_auto_reconnect {
            self.transition(ConnectionState::Suspended, Reason::AutoReconnectDisabled);
            return;
        }

        if !strategy.is_recoverable() {
            self.transition(ConnectionState::Suspended, Reason::NonRecoverable(kind));
            return;
        }

        if attempt >= strategy.max_attempts {
            self.transition(ConnectionState::Reconnecting, Reason::Failure(kind));
            log::warn!("{} failed attempts for {}, suspend", attempt, kind);
            self.transition(ConnectionState::Suspended, Reason::AttemptsExhausted(kind));
            return;
        }

        let delay = self.backoff.next_delay(attempt.max(1), &strategy);
        log::info!("Retry attempt {} for {} in {:?}", attempt, kind, delay);

        self.link = Link::Waiting {
            due: Instant::now() + delay,
            strategy,
            check: None,
            deferred: false,
        };
        self.transition(ConnectionState::Reconnecting, Reason::Failure(kind));
    }

    async fn shutdown(&mut self, frame: Option<CloseFrame>) -> ControlFlow<()> {
        if let Link::Open { channel, .. } = &mut self.link {
            let frame = frame.unwrap_or(CloseFrame {
                code: 1000,
                reason: String::new(),
            });

            let closing = async {
                channel.send(Frame::Close(Some(frame))).await?;
                channel.close().await
            };

            match tokio::time::timeout(CLOSE_GRACE, closing).await {
                Ok(Ok(())) => log::debug!("Channel closed"),
                Ok(Err(err)) => log::debug!("Close channel failed: {}", err),
                Err(_) => log::debug!("Close channel timed out"),
            }
        }

        // dropping the link cancels any pending timer or connect attempt
        self.link = Link::Idle;

        let dropped = self.queue.clear();
        if dropped > 0 {
            log::info!("Discarded {} queued messages on close", dropped);
        }

        self.transition(ConnectionState::Closed, Reason::UserClosed);

        ControlFlow::Break(())
    }

    fn transition(&mut self, to: ConnectionState, reason: Reason) {
        let from = self.state;
        if from == to {
            return;
        }

        self.state = to;
        log::info!("Connection state {} -> {} ({})", from, to, reason);

        self.publish();
        self.emitter
            .emit(ClientEvent::ConnectionChange(StateChange { from, to, reason }));
    }

    fn publish(&self) {
        self.status_tx.send_replace(Status {
            state: self.state,
            reconnect: self.reconnect,
            last_error: self.last_error.clone(),
            queued: self.queue.len(),
        });
    }
}
