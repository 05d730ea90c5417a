use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Per-item exponential backoff: the n-th consecutive failure of an item waits
/// `base * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1000),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retrying an item that has already failed `failures` times
    pub fn delay(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Tracks consecutive failures per item
#[derive(Debug)]
pub(super) struct ItemRateLimiter<K> {
    backoff: Backoff,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ItemRateLimiter<K> {
    pub(super) fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            failures: HashMap::new(),
        }
    }

    /// Records a failure of `key` and returns how long to wait before retrying it
    pub(super) fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.backoff.delay(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    pub(super) fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    pub(super) fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
