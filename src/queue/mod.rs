//! A deduplicating, rate limited work queue.
//!
//! Keys added while pending are collapsed into one entry. A key added while a
//! worker is processing it is held back until that worker calls [`WorkQueue::done`],
//! so a key is never processed by two workers at the same time, and the update
//! that arrived mid-flight is not lost.

use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::*;

mod key;
mod rate_limiter;

pub use key::{meta_namespace_key, split_meta_namespace_key};
pub use rate_limiter::Backoff;

use rate_limiter::ItemRateLimiter;

/// Cloneable handle to a shared queue
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

struct QueueState<K> {
    /// Keys waiting to be handed out, in order
    queue: VecDeque<K>,
    /// Keys that need processing: everything in `queue`, plus keys re-added while processing
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    rate_limiter: ItemRateLimiter<K>,
    shutting_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    rate_limiter: ItemRateLimiter::new(backoff),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<K>> {
        // No code path panics while holding the lock, but a poisoned queue is still consistent
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "Deferring key that is already being processed");
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }

        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Adds `key` after the rate limiter says it is ok
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.state().rate_limiter.when(&key);
        debug!(?key, ?delay, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Stops tracking failures for `key`, so its next failure starts from the base delay
    pub fn forget(&self, key: &K) {
        self.state().rate_limiter.forget(key);
    }

    /// How many times `key` has been requeued by [`WorkQueue::add_rate_limited`] since it was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state().rate_limiter.num_requeues(key)
    }

    /// Waits for the next key. Returns `None` once the queue is shut down and drained.
    ///
    /// Every key returned must be passed to [`WorkQueue::done`] when processing finishes.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // pass the wakeup on so that other idle workers pick up the remaining keys
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as no longer being processed. If it was added again in the
    /// meantime it goes back on the queue.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Rejects further additions and wakes all waiting workers. Keys already
    /// queued are still handed out by [`WorkQueue::get`].
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(Backoff::default())
    }

    #[tokio::test]
    async fn add_deduplicates_pending_keys() {
        let q = queue();
        q.add("default/a".to_string());
        q.add("default/b".to_string());
        q.add("default/a".to_string());
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await.as_deref(), Some("default/a"));
        assert_eq!(q.get().await.as_deref(), Some("default/b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_processing_is_deferred_until_done() {
        let q = queue();
        q.add("default/a".to_string());
        let key = q.get().await.unwrap();

        // two updates arrive while the first sync is in flight
        q.add("default/a".to_string());
        q.add("default/a".to_string());
        assert_eq!(q.len(), 0, "in-flight key must not be handed out again");

        q.done(&key);
        assert_eq!(q.len(), 1, "exactly one additional sync is scheduled");

        let key = q.get().await.unwrap();
        assert_eq!(key, "default/a");
        q.done(&key);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn done_without_readd_does_not_requeue() {
        let q = queue();
        q.add("default/a".to_string());
        let key = q.get().await.unwrap();
        q.done(&key);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_add() {
        let q = queue();
        let getter = tokio::spawn({
            let q = q.clone();
            async move { q.get().await }
        });

        tokio::task::yield_now().await;
        q.add("default/a".to_string());

        assert_eq!(getter.await.unwrap().as_deref(), Some("default/a"));
    }

    #[tokio::test]
    async fn shut_down_drains_then_releases_getters() {
        let q = queue();
        q.add("default/a".to_string());
        q.shut_down();

        // ignored once shutting down
        q.add("default/b".to_string());

        assert_eq!(q.get().await.as_deref(), Some("default/a"));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn shut_down_wakes_blocked_getters() {
        let q = queue();
        let getters: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.get().await })
            })
            .collect();

        tokio::task::yield_now().await;
        q.shut_down();

        for getter in getters {
            assert_eq!(getter.await.unwrap(), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn add_rate_limited_backs_off_exponentially() {
        let q = queue();
        let key = "default/a".to_string();

        q.add_rate_limited(key.clone());
        assert!(q.is_empty());
        assert_eq!(q.num_requeues(&key), 1);

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(q.len(), 1);
        let got = q.get().await.unwrap();
        q.done(&got);

        // second failure waits 10ms
        q.add_rate_limited(key.clone());
        tokio::time::sleep(Duration::from_millis(6)).await;
        assert!(q.is_empty());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.num_requeues(&key), 2);

        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_add_is_dropped_after_shutdown() {
        let q = queue();
        q.add_after("default/a".to_string(), Duration::from_secs(1));
        q.shut_down();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(q.is_empty());
        assert_eq!(q.get().await, None);
    }
}
