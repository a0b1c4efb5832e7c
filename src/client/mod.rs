//! The resilient connection client.
//!
//! A [`Client`] is a cheap handle to a connection task spawned on the tokio
//! runtime. The task owns the channel, the outbound queue and all recovery
//! bookkeeping; handles send it commands and read the [`Status`] it
//! publishes after every change.

mod emitter;
mod inner;
mod state;
mod stream;

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use snafu::ResultExt;
use tokio::sync::{mpsc, watch};

pub use emitter::{ClientEvent, EventKind, ListenerId};
pub use state::{ConnectionState, HealthSnapshot, Reason, ReconnectState, StateChange, Status};
pub use stream::EventStream;

pub(crate) use state::FLAPPING_THRESHOLD;

use crate::{
    config::Config,
    error::{self, Result},
    network::NetworkStatus,
    recovery::{self, BackoffScheduler, Recommendation, RecoveryRegistry, RecoveryStrategy},
    transport::{CloseFrame, Connector, Payload},
};
use emitter::Listener;
use inner::{ClientInner, ClientParts, Command};

/// Handle to a resilient connection.
///
/// Clones share the same connection. When every handle is dropped the
/// connection closes as if [`close`](Client::close) was called.
#[derive(Debug, Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    network: NetworkStatus,
    next_listener: Arc<AtomicU64>,
}

impl Client {
    /// Create a client with default recovery, see [`ClientBuilder::build`].
    pub fn new<C: Connector>(config: Config, connector: C) -> Result<Self> {
        Self::builder(connector).config(config).build()
    }

    /// Start building a client around `connector`.
    pub fn builder<C: Connector>(connector: C) -> ClientBuilder<C> {
        ClientBuilder {
            connector,
            config: Config::default(),
            network: None,
            registry: None,
            jitter_seed: None,
        }
    }

    /// Open the connection. Ignored while connecting or connected; from
    /// `Reconnecting` it skips the remaining backoff, from `Suspended` it
    /// starts over with a fresh attempt budget.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Send a message, or queue it until the connection is open.
    pub fn send<P: Into<Payload>>(&self, payload: P) -> Result<()> {
        self.command(Command::Send(payload.into()))
    }

    /// Close with code 1000. Pending timers are cancelled, the queue is
    /// discarded and the client enters the terminal `Closed` state.
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close(None))
    }

    /// Like [`close`](Client::close) with an explicit close code and reason.
    pub fn close_with<S: Into<String>>(&self, code: u16, reason: S) -> Result<()> {
        self.command(Command::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
    }

    /// Discard every queued outbound message.
    pub fn clear_queue(&self) -> Result<()> {
        self.command(Command::ClearQueue)
    }

    /// Call `handler` for every event of `kind`.
    ///
    /// Handlers run on the connection task and must not block.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Result<ListenerId>
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.listen(Some(kind), Listener::Callback(Arc::new(handler)))
    }

    /// Call `handler` for every event.
    pub fn on_any<F>(&self, handler: F) -> Result<ListenerId>
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.listen(None, Listener::Callback(Arc::new(handler)))
    }

    /// Unregister a handler.
    pub fn off(&self, id: ListenerId) -> Result<()> {
        self.command(Command::Unlisten(id))
    }

    /// Stream of every event from now on.
    pub fn subscribe(&self) -> Result<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listen(None, Listener::Stream(tx))?;
        Ok(EventStream { rx })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Latest published status.
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Health derived from the current status.
    pub fn check_connection_health(&self) -> HealthSnapshot {
        HealthSnapshot::from(&*self.status.borrow())
    }

    /// What the application should do about the current situation, if
    /// anything.
    pub fn recovery_recommendations(&self) -> Vec<Recommendation> {
        recovery::recommendations(&self.status.borrow(), self.network.is_online())
    }

    /// The online flag this client follows.
    pub fn network(&self) -> &NetworkStatus {
        &self.network
    }

    /// Resolves once the connection task has stopped.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    fn listen(&self, kind: Option<EventKind>, listener: Listener) -> Result<ListenerId> {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.command(Command::Listen { id, kind, listener })?;
        Ok(id)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| error::ClientClosed.build())
    }
}

/// Configures and starts a [`Client`].
pub struct ClientBuilder<C> {
    connector: C,
    config: Config,
    network: Option<NetworkStatus>,
    registry: Option<RecoveryRegistry>,
    jitter_seed: Option<u64>,
}

impl<C> fmt::Debug for ClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("network", &self.network)
            .field("registry", &self.registry)
            .field("jitter_seed", &self.jitter_seed)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ClientBuilder<C> {
    /// Use this configuration instead of the defaults.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Follow an online flag shared with the host, a fresh always-online
    /// flag is used otherwise.
    pub fn network(mut self, network: NetworkStatus) -> Self {
        self.network = Some(network);
        self
    }

    /// Use custom recovery strategies.
    pub fn registry(mut self, registry: RecoveryRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Make the backoff jitter reproducible.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Validate the configuration and spawn the connection task.
    ///
    /// Must be called within a tokio runtime. The client starts
    /// `Disconnected`; nothing is dialed until [`Client::connect`].
    ///
    /// Without an explicit registry, strategies come from
    /// [`RecoveryRegistry::from_config`], or one uniform strategy built from
    /// the configured attempts and delays when `enable_error_recovery` is off.
    pub fn build(self) -> Result<Client> {
        let config = self.config;
        config.validate().context(error::InvalidConfig)?;

        let network = self.network.unwrap_or_default();

        let registry = match self.registry {
            Some(registry) => registry,
            None if config.enable_error_recovery => {
                RecoveryRegistry::from_config(&config, &network)
            }
            None => RecoveryRegistry::uniform(RecoveryStrategy::new(
                config.max_reconnect_attempts,
                config.base_reconnect_delay(),
                config.max_reconnect_delay(),
            )),
        };

        let backoff = match self.jitter_seed {
            Some(seed) => BackoffScheduler::seeded(seed),
            None => BackoffScheduler::default(),
        };

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status::default());

        log::debug!("Start client with {:?}", config);

        ClientInner::new(ClientParts {
            config,
            connector: self.connector,
            registry,
            backoff,
            network: network.clone(),
            commands,
            status_tx,
        })
        .start();

        Ok(Client {
            commands: commands_tx,
            status,
            network,
            next_listener: Arc::new(AtomicU64::new(0)),
        })
    }
}
