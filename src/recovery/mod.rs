//! Failure classification and recovery policy.
//!
//! A raw failure is first [`classify`]d into an [`ErrorKind`], the
//! [`RecoveryRegistry`] gives the policy for that kind, and the
//! [`BackoffScheduler`] turns the policy into a concrete delay.

mod advice;
mod backoff;
mod classify;
mod strategy;

pub use advice::{recommendations, Recommendation, SuggestedAction};
pub use backoff::BackoffScheduler;
pub use classify::{classify, ConnectionError, ErrorKind, RawFailure};
pub use strategy::{Always, Precondition, RecoveryRegistry, RecoveryStrategy};
