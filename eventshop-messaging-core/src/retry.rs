// eventshop-messaging-core/src/retry.rs
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::{ErrorKind, MessagingError};

pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

pub const EXPONENTIAL_ATTEMPTS: u32 = 3;
pub const EXPONENTIAL_MIN_DELAY: Duration = Duration::from_secs(5);
pub const EXPONENTIAL_MAX_DELAY: Duration = Duration::from_secs(60 * 60);
pub const EXPONENTIAL_INCREMENT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStage {
    /// `attempts` retries spaced by a constant `delay`.
    Interval { attempts: u32, delay: Duration },
    /// `attempts` retries; retry `n` (from 0) waits
    /// `min(max_delay, min_delay + increment * (2^n - 1))`.
    Exponential {
        attempts: u32,
        min_delay: Duration,
        max_delay: Duration,
        increment: Duration,
    },
}

impl RetryStage {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Interval { attempts, .. } | Self::Exponential { attempts, .. } => *attempts,
        }
    }

    /// Delay before the `n`-th retry of this stage, `None` once the stage is spent.
    pub fn delay(&self, n: u32) -> Option<Duration> {
        if n >= self.attempts() {
            return None;
        }
        match self {
            Self::Interval { delay, .. } => Some(*delay),
            Self::Exponential {
                min_delay,
                max_delay,
                increment,
                ..
            } => {
                let factor = 2u32.checked_pow(n).map_or(u32::MAX, |p| p - 1);
                let step = increment.checked_mul(factor).unwrap_or(*max_delay);
                let delay = min_delay.checked_add(step).unwrap_or(*max_delay);
                Some(delay.min(*max_delay))
            }
        }
    }
}

/// Ordered retry stages plus the failure kinds they apply to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDescriptor {
    stages: Vec<RetryStage>,
    exempt: BTreeSet<ErrorKind>,
    handled: Option<BTreeSet<ErrorKind>>,
}

impl RetryDescriptor {
    pub fn stages(&self) -> &[RetryStage] {
        &self.stages
    }

    pub fn exempt(&self) -> &BTreeSet<ErrorKind> {
        &self.exempt
    }

    /// Explicitly handled kinds; `None` means every kind that is not exempt.
    pub fn handled(&self) -> Option<&BTreeSet<ErrorKind>> {
        self.handled.as_ref()
    }

    pub fn should_retry(&self, kind: &ErrorKind) -> bool {
        if self.exempt.contains(kind) {
            return false;
        }
        self.handled.as_ref().map_or(true, |set| set.contains(kind))
    }

    pub fn total_attempts(&self) -> u32 {
        self.stages.iter().map(RetryStage::attempts).sum()
    }

    /// Flattened delay schedule across all stages, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.stages
            .iter()
            .flat_map(|stage| (0..stage.attempts()).filter_map(move |n| stage.delay(n)))
    }
}

/// Builds the layered retry descriptor attached to every receive endpoint:
/// an interval stage configured by the caller followed by a fixed exponential
/// stage. Consumer cancellation is always exempt.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    limit: u32,
    interval: Duration,
    exempt: BTreeSet<ErrorKind>,
    handled: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_LIMIT, DEFAULT_RETRY_INTERVAL)
    }
}

impl RetryPolicyBuilder {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self {
            limit,
            interval,
            exempt: BTreeSet::new(),
            handled: BTreeSet::new(),
        }
    }

    pub fn exempt(mut self, kind: ErrorKind) -> Self {
        self.exempt.insert(kind);
        self
    }

    pub fn exempt_all(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.exempt.extend(kinds);
        self
    }

    /// Restricts retries to the given kinds. Without any call every
    /// non-exempt kind is retried.
    pub fn handle(mut self, kind: ErrorKind) -> Self {
        self.handled.insert(kind);
        self
    }

    pub fn build(self) -> RetryDescriptor {
        let mut exempt = self.exempt;
        exempt.insert(ErrorKind::CONSUMER_CANCELED);

        let handled = if self.handled.is_empty() {
            None
        } else {
            Some(self.handled.difference(&exempt).cloned().collect())
        };

        let mut stages = Vec::with_capacity(2);
        if self.limit > 0 {
            stages.push(RetryStage::Interval {
                attempts: self.limit,
                delay: self.interval,
            });
        }
        stages.push(RetryStage::Exponential {
            attempts: EXPONENTIAL_ATTEMPTS,
            min_delay: EXPONENTIAL_MIN_DELAY,
            max_delay: EXPONENTIAL_MAX_DELAY,
            increment: EXPONENTIAL_INCREMENT,
        });

        RetryDescriptor {
            stages,
            exempt,
            handled,
        }
    }
}

/// Shorthand for `RetryPolicyBuilder::new(limit, interval).exempt_all(exemptions).build()`.
pub fn build(
    limit: u32,
    interval: Duration,
    exemptions: impl IntoIterator<Item = ErrorKind>,
) -> RetryDescriptor {
    RetryPolicyBuilder::new(limit, interval)
        .exempt_all(exemptions)
        .build()
}

/// Receives retry decisions made while executing a [`RetryDescriptor`].
pub trait RetryReporter: Send + Sync {
    fn retry_scheduled(&self, endpoint: &str, retry: u32, delay: Duration, error: &MessagingError);

    /// The failure kind is exempt or not handled; surfaced without retrying.
    fn not_retried(&self, endpoint: &str, error: &MessagingError);

    fn retries_exhausted(&self, endpoint: &str, retries: u32, error: &MessagingError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryReporter;

impl RetryReporter for TracingRetryReporter {
    fn retry_scheduled(&self, endpoint: &str, retry: u32, delay: Duration, error: &MessagingError) {
        warn!(queue = %endpoint, retry, delay_ms = delay.as_millis() as u64, error = %error, "retrying message");
    }

    fn not_retried(&self, endpoint: &str, error: &MessagingError) {
        error!(queue = %endpoint, kind = %error.kind(), error = %error, "message failed without retry");
    }

    fn retries_exhausted(&self, endpoint: &str, retries: u32, error: &MessagingError) {
        error!(queue = %endpoint, retries, kind = %error.kind(), error = %error, "retries exhausted");
    }
}

/// Runs `attempt` until it succeeds, fails with a kind that is not retried, or
/// the descriptor's schedule is spent. The last error is returned after it has
/// been reported.
pub async fn run_with_retry<F, Fut>(
    descriptor: &RetryDescriptor,
    reporter: &dyn RetryReporter,
    endpoint: &str,
    mut attempt: F,
) -> Result<(), MessagingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), MessagingError>>,
{
    let mut delays = descriptor.delays();
    let mut retries = 0u32;

    loop {
        let err = match attempt().await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !descriptor.should_retry(&err.kind()) {
            reporter.not_retried(endpoint, &err);
            return Err(err);
        }

        let Some(delay) = delays.next() else {
            reporter.retries_exhausted(endpoint, retries, &err);
            return Err(err);
        };

        retries += 1;
        reporter.retry_scheduled(endpoint, retries, delay, &err);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_is_capped() {
        let stage = RetryStage::Exponential {
            attempts: 40,
            min_delay: EXPONENTIAL_MIN_DELAY,
            max_delay: EXPONENTIAL_MAX_DELAY,
            increment: EXPONENTIAL_INCREMENT,
        };
        assert_eq!(stage.delay(0), Some(Duration::from_secs(5)));
        assert_eq!(stage.delay(1), Some(Duration::from_secs(15)));
        assert_eq!(stage.delay(2), Some(Duration::from_secs(35)));
        assert_eq!(stage.delay(39), Some(EXPONENTIAL_MAX_DELAY));
        assert_eq!(stage.delay(40), None);
    }

    #[test]
    fn handled_kind_that_is_also_exempt_stays_exempt() {
        let kind = ErrorKind::from_static("timeout");
        let descriptor = RetryPolicyBuilder::default()
            .handle(kind.clone())
            .exempt(kind.clone())
            .build();

        assert!(!descriptor.should_retry(&kind));
        assert!(descriptor
            .handled()
            .is_some_and(|set| set.is_disjoint(descriptor.exempt())));
    }
}
