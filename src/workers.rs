use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::*;

use crate::queue::WorkQueue;

/// Runs `workers` tasks that each take keys off `queue` and pass them to `handler`
/// until the queue is shut down and drained.
///
/// A key whose handler succeeds is forgotten by the rate limiter; one whose handler
/// fails is requeued with backoff.
pub async fn run<K, F, Fut, E>(queue: WorkQueue<K>, workers: usize, handler: F)
where
    K: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let handler = Arc::new(handler);
    let mut set = JoinSet::new();

    for id in 0..workers {
        let queue = queue.clone();
        let handler = handler.clone();
        set.spawn(
            async move {
                debug!("Worker started");
                while process_next_item(&queue, handler.as_ref()).await {}
                debug!("Worker stopped");
            }
            .instrument(info_span!("worker", id)),
        );
    }

    while let Some(res) = set.join_next().await {
        if let Err(err) = res {
            error!("Worker exited abnormally: {err}");
        }
    }
}

/// Processes a single key. Returns false once the queue has shut down.
async fn process_next_item<K, F, Fut, E>(queue: &WorkQueue<K>, handler: &F) -> bool
where
    K: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let Some(key) = queue.get().await else {
        return false;
    };

    // Run on its own task so that a panicking handler still releases the key
    match tokio::spawn(handler(key.clone())).await {
        Ok(Ok(())) => {
            queue.forget(&key);
            info!("Successfully synced '{key}'");
        }
        Ok(Err(err)) => {
            error!(
                requeues = queue.num_requeues(&key),
                "Error syncing '{key}': {err}"
            );
            queue.add_rate_limited(key.clone());
        }
        Err(err) => {
            error!("Panic while syncing '{key}': {err}");
            queue.add_rate_limited(key.clone());
        }
    }

    queue.done(&key);
    true
}
