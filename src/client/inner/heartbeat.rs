use std::time::Duration;

use futures_util::{future, FutureExt};
use tokio::time::Instant;

/// What the heartbeat wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    /// time to send a probe
    Ping,
    /// the outstanding probe went unanswered
    Expired,
}

/// Liveness probe schedule for one open channel.
///
/// Dropped together with the channel, so leaving `Connected` stops it.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    next_ping: Instant,
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let next_ping = Instant::now() + interval;
        log::trace!("Heartbeat start, first ping at {:?}", next_ping);

        Self {
            interval,
            timeout,
            next_ping,
            pong_deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the next thing to do.
    pub async fn tick(&self) -> Beat {
        let pong_timeout = if let Some(deadline) = self.pong_deadline {
            tokio::time::sleep_until(deadline).boxed()
        } else {
            future::pending().boxed()
        };

        tokio::select! {
            biased;

            _ = pong_timeout => Beat::Expired,
            _ = tokio::time::sleep_until(self.next_ping) => Beat::Ping,
        }
    }

    /// A probe went out, arm the deadline unless one is already running.
    pub fn ping_sent(&mut self) {
        let now = Instant::now();
        self.next_ping = now + self.interval;

        let deadline = *self.pong_deadline.get_or_insert(now + self.timeout);
        log::trace!("Next ping at {:?}, pong deadline {:?}", self.next_ping, deadline);
    }

    /// Any inbound traffic proves liveness, not only pongs.
    pub fn traffic(&mut self) {
        if self.pong_deadline.take().is_some() {
            log::trace!("Inbound traffic, pong deadline disarmed");
        }
    }
}
