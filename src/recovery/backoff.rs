use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::RecoveryStrategy;

const JITTER_FLOOR: f64 = 0.85;
const JITTER_SPAN: f64 = 0.3;

/// Computes reconnect delays: exponential growth capped at the strategy's
/// `max_delay`, scaled by a random factor in `[0.85, 1.15)` so many clients
/// dropped at once do not reconnect in lockstep.
#[derive(Debug)]
pub struct BackoffScheduler<R = StdRng> {
    rng: R,
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(StdRng::from_os_rng())
    }
}

impl BackoffScheduler {
    /// Scheduler with a reproducible jitter sequence.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> BackoffScheduler<R> {
    /// Scheduler drawing jitter from `rng`.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Delay before retry number `attempt` (1 based), jitter excluded.
    pub fn nominal_delay(attempt: u32, strategy: &RecoveryStrategy) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);

        strategy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(strategy.max_delay)
    }

    /// Delay before retry number `attempt` (1 based), jitter included.
    pub fn next_delay(&mut self, attempt: u32, strategy: &RecoveryStrategy) -> Duration {
        let jitter = JITTER_FLOOR + self.rng.random::<f64>() * JITTER_SPAN;
        let nominal = Self::nominal_delay(attempt, strategy);
        Duration::try_from_secs_f64(nominal.as_secs_f64() * jitter).unwrap_or(nominal)
    }
}
