//! Network-online status shared between the host and the client.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use url::Url;

use crate::recovery::Precondition;

/// Shared online flag.
///
/// The host flips it from whatever online signal it has; the client reads it
/// when classifying failures, gates network retries on it, and leaves
/// `Suspended` when it turns back on.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus {
    /// Create with an initial value.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Current value.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the value, watchers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            log::info!("Network is {}", if online { "online" } else { "offline" });
        }
    }

    pub(crate) fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[async_trait::async_trait]
impl Precondition for NetworkStatus {
    async fn check(&self) -> bool {
        self.is_online()
    }
}

/// Derives online status from periodic HTTP requests to a known endpoint,
/// for processes that have no operating system online signal.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl ReachabilityProbe {
    /// Probe `url` with HEAD requests giving up after `timeout`.
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }

    /// true if the endpoint answered, with any status.
    pub async fn probe(&self) -> bool {
        let result = self
            .client
            .head(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(resp) => {
                log::trace!("Reachability probe got status {}", resp.status());
                true
            }
            Err(err) => {
                log::debug!("Reachability probe {} failed: {}", self.url, err);
                false
            }
        }
    }

    /// Keep `status` updated by probing every `every`.
    pub fn spawn_monitor(self, status: NetworkStatus, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                status.set_online(self.probe().await);
                tokio::time::sleep(every).await;
            }
        })
    }
}

#[async_trait::async_trait]
impl Precondition for ReachabilityProbe {
    async fn check(&self) -> bool {
        self.probe().await
    }
}
