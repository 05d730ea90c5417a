//! Turns a stream of watched ElaServices into work queue keys.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use tracing::*;

use crate::queue::{meta_namespace_key, WorkQueue};
use crate::resources::elafros::ElaService;

/// Converts `es` to its `namespace/name` key and adds it to the queue.
/// Objects without a usable key are logged and skipped.
pub fn enqueue(queue: &WorkQueue<String>, es: &ElaService) {
    match meta_namespace_key(es) {
        Ok(key) => queue.add(key),
        Err(err) => error!("Not enqueueing ElaService: {err}"),
    }
}

/// Enqueues every object the watch yields until it ends. Watch errors are logged;
/// the stream is expected to back off and recover on its own.
pub async fn enqueue_all<S, E>(notifier: S, queue: WorkQueue<String>)
where
    S: Stream<Item = Result<ElaService, E>>,
    E: Display,
{
    let mut notifier = std::pin::pin!(notifier);
    while let Some(event) = notifier.next().await {
        match event {
            Ok(es) => enqueue(&queue, &es),
            Err(err) => warn!("ElaService watch error: {err}"),
        }
    }
    debug!("ElaService watch ended");
}
