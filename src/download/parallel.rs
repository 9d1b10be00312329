//! Ordered, bounded-concurrency mapping over async transforms

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Concurrency used when the caller has no preference
pub const DEFAULT_PARALLELISM: usize = 5;

#[derive(Debug, Error)]
pub enum ParallelError<E> {
    #[error("parallel map was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(E),
}

/// Map `items` through `transform`, running at most `parallelism` transforms
/// at once, and return the outputs in input order.
///
/// Admission is a sliding window: every completed transform admits the next
/// unsubmitted item. The first error is returned immediately and the
/// transforms still in flight are dropped without being awaited.
/// `cancel` is checked after each completion.
pub async fn parallel_map<I, T, U, E, F, Fut>(
    items: I,
    parallelism: usize,
    cancel: &CancellationToken,
    transform: F,
) -> Result<Vec<U>, ParallelError<E>>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
{
    let mut pending = items.into_iter().enumerate();
    let total = pending.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    if cancel.is_cancelled() {
        return Err(ParallelError::Cancelled);
    }

    let mut results: Vec<Option<U>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut in_flight = FuturesUnordered::new();

    for (index, item) in pending.by_ref().take(parallelism.max(1)) {
        in_flight.push(indexed(index, transform(item)));
    }

    while let Some((index, result)) = in_flight.next().await {
        results[index] = Some(result.map_err(ParallelError::Failed)?);

        if cancel.is_cancelled() {
            return Err(ParallelError::Cancelled);
        }

        if let Some((index, item)) = pending.next() {
            in_flight.push(indexed(index, transform(item)));
        }
    }

    Ok(results.into_iter().flatten().collect())
}

async fn indexed<Fut: Future>(index: usize, future: Fut) -> (usize, Fut::Output) {
    (index, future.await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_input_runs_nothing() {
        let calls = AtomicUsize::new(0);
        let out: Vec<u32> = parallel_map(Vec::<u32>::new(), 3, &CancellationToken::new(), |x| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(x) }
        })
        .await
        .unwrap();

        assert!(out.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_and_ordered() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = parallel_map(0..10u32, 3, &CancellationToken::new(), |x| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later items finish first
                tokio::time::sleep(Duration::from_millis(u64::from(100 - x * 7))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(x * 10)
            }
        })
        .await
        .unwrap();

        assert_eq!(out, (0..10u32).map(|x| x * 10).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_error_is_returned() {
        let result = parallel_map(vec![1, 2, 3, 4], 2, &CancellationToken::new(), |x| async move {
            if x == 3 { Err(format!("bad item {}", x)) } else { Ok(x) }
        })
        .await;

        match result {
            Err(ParallelError::Failed(message)) => assert_eq!(message, "bad item 3"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_admission() {
        let cancel = CancellationToken::new();
        let started = AtomicUsize::new(0);

        let result = parallel_map(0..20, 1, &cancel, |x| {
            started.fetch_add(1, Ordering::SeqCst);
            if x == 2 {
                cancel.cancel();
            }
            async move { Ok::<_, String>(x) }
        })
        .await;

        assert!(matches!(result, Err(ParallelError::Cancelled)));
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_parallelism_still_progresses() {
        let out = parallel_map(vec!["a", "b"], 0, &CancellationToken::new(), |s| async move {
            Ok::<_, String>(s.to_uppercase())
        })
        .await
        .unwrap();

        assert_eq!(out, vec!["A", "B"]);
    }
}
