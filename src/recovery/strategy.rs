use std::{collections::HashMap, fmt, future::Future, sync::Arc, time::Duration};

use super::ErrorKind;
use crate::{config::Config, network::NetworkStatus};

const CONSERVATIVE_MAX_ATTEMPTS: u32 = 3;
const CONSERVATIVE_BASE_DELAY: Duration = Duration::from_millis(5000);

/// Async gate checked after a backoff delay elapses, before the next connect
/// attempt. A `false` answer defers the attempt without consuming budget.
#[async_trait::async_trait]
pub trait Precondition: Send + Sync {
    /// true if a connect attempt may proceed now
    async fn check(&self) -> bool;
}

#[async_trait::async_trait]
impl<F, Fut> Precondition for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn check(&self) -> bool {
        self().await
    }
}

/// Precondition that always holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

#[async_trait::async_trait]
impl Precondition for Always {
    async fn check(&self) -> bool {
        true
    }
}

/// Recovery policy for one [`ErrorKind`].
#[derive(Clone)]
pub struct RecoveryStrategy {
    /// failed attempts tolerated before suspending, zero means non-recoverable
    pub max_attempts: u32,
    /// delay before the first retry
    pub base_delay: Duration,
    /// upper bound of the exponential delay
    pub max_delay: Duration,
    /// gate checked before each retry
    pub precondition: Arc<dyn Precondition>,
}

impl fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryStrategy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RecoveryStrategy {
    /// Strategy with no precondition.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
            precondition: Arc::new(Always),
        }
    }

    /// Strategy that never retries.
    pub fn non_recoverable() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Replace the retry gate.
    pub fn with_precondition<P: Precondition + 'static>(mut self, precondition: P) -> Self {
        self.precondition = Arc::new(precondition);
        self
    }

    /// true if failures of this class are never retried.
    pub fn is_recoverable(&self) -> bool {
        self.max_attempts > 0
    }
}

/// Maps every [`ErrorKind`] to its [`RecoveryStrategy`].
///
/// Strategies are fixed once the registry is handed to a client.
#[derive(Debug, Clone)]
pub struct RecoveryRegistry {
    strategies: HashMap<ErrorKind, Arc<RecoveryStrategy>>,
    fallback: Arc<RecoveryStrategy>,
}

impl RecoveryRegistry {
    /// Per-class defaults derived from the client configuration.
    ///
    /// - `Auth`: non-recoverable
    /// - `Network`: configured attempts and delays, retried only while online
    /// - `Timeout`: configured attempts and delays
    /// - `Protocol`, `Unknown`: 3 attempts from a 5 second base delay
    pub fn from_config(config: &Config, network: &NetworkStatus) -> Self {
        let configured = RecoveryStrategy::new(
            config.max_reconnect_attempts,
            config.base_reconnect_delay(),
            config.max_reconnect_delay(),
        );
        let conservative = RecoveryStrategy::new(
            CONSERVATIVE_MAX_ATTEMPTS,
            CONSERVATIVE_BASE_DELAY,
            config.max_reconnect_delay(),
        );

        Self::uniform(conservative)
            .with(ErrorKind::Auth, RecoveryStrategy::non_recoverable())
            .with(
                ErrorKind::Network,
                configured.clone().with_precondition(network.clone()),
            )
            .with(ErrorKind::Timeout, configured)
    }

    /// Registry applying one strategy to every class.
    pub fn uniform(strategy: RecoveryStrategy) -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(strategy),
        }
    }

    /// Register the strategy for a class, replacing the previous one.
    pub fn with(mut self, kind: ErrorKind, strategy: RecoveryStrategy) -> Self {
        self.strategies.insert(kind, Arc::new(strategy));
        self
    }

    /// Strategy for a class.
    pub fn strategy_for(&self, kind: ErrorKind) -> Arc<RecoveryStrategy> {
        self.strategies
            .get(&kind)
            .unwrap_or(&self.fallback)
            .clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn registry() -> (RecoveryRegistry, NetworkStatus) {
        let network = NetworkStatus::new(true);
        let config = Config {
            max_reconnect_attempts: 7,
            base_reconnect_delay_ms: 200,
            max_reconnect_delay_ms: 8000,
            ..Config::default()
        };
        (RecoveryRegistry::from_config(&config, &network), network)
    }

    #[test]
    fn test_auth_is_non_recoverable() {
        let (registry, _) = registry();
        let strategy = registry.strategy_for(ErrorKind::Auth);
        assert_eq!(strategy.max_attempts, 0);
        assert!(!strategy.is_recoverable());
    }

    #[test]
    fn test_conservative_default() {
        let (registry, _) = registry();
        for kind in [ErrorKind::Unknown, ErrorKind::Protocol] {
            let strategy = registry.strategy_for(kind);
            assert_eq!(strategy.max_attempts, 3);
            assert_eq!(strategy.base_delay, Duration::from_millis(5000));
            assert_eq!(strategy.max_delay, Duration::from_millis(8000));
        }
    }

    #[test]
    fn test_configured_classes() {
        let (registry, _) = registry();
        for kind in [ErrorKind::Network, ErrorKind::Timeout] {
            let strategy = registry.strategy_for(kind);
            assert_eq!(strategy.max_attempts, 7);
            assert_eq!(strategy.base_delay, Duration::from_millis(200));
        }
    }

    #[tokio::test]
    async fn test_network_precondition_follows_status() {
        let (registry, network) = registry();
        let strategy = registry.strategy_for(ErrorKind::Network);

        assert!(strategy.precondition.check().await);
        network.set_online(false);
        assert!(!strategy.precondition.check().await);

        let timeout = registry.strategy_for(ErrorKind::Timeout);
        assert!(timeout.precondition.check().await);
    }

    #[tokio::test]
    async fn test_custom_registration() {
        let (registry, _) = registry();
        let registry = registry.with(
            ErrorKind::Auth,
            RecoveryStrategy::new(1, Duration::from_secs(1), Duration::from_secs(1))
                .with_precondition(|| async { false }),
        );

        let strategy = registry.strategy_for(ErrorKind::Auth);
        assert_eq!(strategy.max_attempts, 1);
        assert!(!strategy.precondition.check().await);
    }
}
