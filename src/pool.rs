//! Bounded worker pool.
//!
//! Every stage fans its unit of work out through [`run_bounded`] (or the
//! batched variant [`run_batched`]), so concurrency limits are explicit
//! per-stage configuration rather than nested thread pools.
//!
//! Cancellation is cooperative: once the token fires no new items are
//! dispatched, but in-flight tasks are awaited so nothing writes to disk
//! after the pool returns.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Run `f` over `items` with at most `limit` tasks in flight.
///
/// `on_complete(completed, total)` is called on the caller's task after
/// each item finishes. Results come back in completion order. A panicked
/// task is logged and contributes no result.
pub async fn run_bounded<T, R, F, Fut, P>(
    items: Vec<T>,
    limit: usize,
    cancel: &CancellationToken,
    mut on_complete: P,
    f: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    P: FnMut(usize, usize),
{
    let total = items.len();
    let limit = limit.max(1);
    let mut pending = items.into_iter();
    let mut tasks = JoinSet::new();
    let mut results = Vec::with_capacity(total);
    let mut completed = 0usize;

    loop {
        while tasks.len() < limit && !cancel.is_cancelled() {
            match pending.next() {
                Some(item) => {
                    tasks.spawn(f(item));
                }
                None => break,
            }
        }

        match tasks.join_next().await {
            Some(Ok(result)) => results.push(result),
            Some(Err(e)) => tracing::warn!(error = %e, "worker task failed"),
            None => break,
        }
        completed += 1;
        on_complete(completed, total);
    }

    results
}

/// Like [`run_bounded`], but dispatches `items` in batches of `batch_size`.
/// A batch fully completes before the next one starts.
pub async fn run_batched<T, R, F, Fut, P>(
    items: Vec<T>,
    batch_size: usize,
    limit: usize,
    cancel: &CancellationToken,
    mut on_complete: P,
    f: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    P: FnMut(usize, usize),
{
    let total = items.len();
    let batch_size = batch_size.max(1);
    let mut items = items.into_iter();
    let mut results = Vec::with_capacity(total);
    let mut done = 0usize;

    while !cancel.is_cancelled() {
        let batch: Vec<T> = items.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }
        let base = done;
        done += batch.len();
        let mut batch_results = run_bounded(
            batch,
            limit,
            cancel,
            |completed, _| on_complete(base + completed, total),
            &f,
        )
        .await;
        results.append(&mut batch_results);
    }

    results
}
