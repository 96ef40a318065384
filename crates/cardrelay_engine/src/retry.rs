use std::future::Future;
use std::time::Duration;

use relay_logging::relay_debug;

/// Bounded retry budget shared by readiness probing, identity acquisition
/// and interrupted-message resumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Whether the 1-based `attempt` is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Runs `op` for attempts `1..=max_attempts` until it yields `Some`,
    /// sleeping `interval` between attempts but not after the last one.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = op(attempt).await {
                return Some(value);
            }
            relay_debug!(
                "{} attempt {}/{} unsuccessful",
                label,
                attempt,
                self.max_attempts
            );
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        None
    }
}
