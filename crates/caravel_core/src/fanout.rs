//! Bounded parallel fan-out over async operations.
//!
//! Every orchestration phase of the control plane runs a batch of independent
//! remote calls (cloud SDK operations, HTTP requests, remote shell commands)
//! and waits for all of them. The helpers here run up to `n` operations
//! concurrently and return results paired with their inputs, in input order.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};

/// Concurrency width of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Parallelism {
    /// One in-flight operation per input.
    #[default]
    Unbounded,
    /// At most this many in-flight operations.
    Bounded(usize),
}

impl Parallelism {
    fn width(self, inputs: usize) -> usize {
        match self {
            Parallelism::Unbounded => inputs.max(1),
            Parallelism::Bounded(n) => n.clamp(1, inputs.max(1)),
        }
    }
}

/// Run `f` over every input with bounded concurrency, failing fast.
///
/// Results are returned paired with their inputs, in input order. The first
/// error aborts the fan-out; operations not yet started are never issued.
pub async fn do_parallel<T, U, E, F, Fut>(
    inputs: Vec<T>,
    limit: Parallelism,
    f: F,
) -> std::result::Result<Vec<(T, U)>, E>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = std::result::Result<U, E>>,
{
    let width = limit.width(inputs.len());
    stream::iter(inputs.into_iter().map(|input| {
        let fut = f(input.clone());
        async move { fut.await.map(|out| (input, out)) }
    }))
    .buffered(width)
    .try_collect()
    .await
}

/// Like [`do_parallel`], but runs every input to completion and returns each
/// outcome individually instead of failing fast.
///
/// Used where per-input failures are tolerated (liveness probes, firewall
/// revocation, best-effort cleanup) or where already-acquired resources must
/// be collected even when a sibling operation fails.
pub async fn do_parallel_settled<T, U, E, F, Fut>(
    inputs: Vec<T>,
    limit: Parallelism,
    f: F,
) -> Vec<(T, std::result::Result<U, E>)>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = std::result::Result<U, E>>,
{
    let width = limit.width(inputs.len());
    stream::iter(inputs.into_iter().map(|input| {
        let fut = f(input.clone());
        async move { (input, fut.await) }
    }))
    .buffered(width)
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn preserves_input_order() {
        let inputs: Vec<u64> = (0..16).collect();
        let results = do_parallel(inputs.clone(), Parallelism::Unbounded, |n| async move {
            // later inputs finish first
            tokio::time::sleep(Duration::from_millis(16 - n)).await;
            Ok::<_, std::convert::Infallible>(n * 2)
        })
        .await
        .unwrap();

        let (seen, doubled): (Vec<u64>, Vec<u64>) = results.into_iter().unzip();
        assert_eq!(seen, inputs);
        assert_eq!(doubled, inputs.iter().map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let in_flight = AtomicUsize::new(0);
        let high_water = AtomicUsize::new(0);

        do_parallel((0..32).collect(), Parallelism::Bounded(4), |_| {
            let in_flight = &in_flight;
            let high_water = &high_water;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(())
            }
        })
        .await
        .unwrap();

        assert!(high_water.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn first_error_aborts() {
        let result = do_parallel(vec![1, 2, 3], Parallelism::Bounded(1), |n| async move {
            if n == 2 {
                Err(format!("boom {n}"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap_err(), "boom 2");
    }

    #[tokio::test]
    async fn settled_collects_every_outcome() {
        let results =
            do_parallel_settled(vec![1, 2, 3], Parallelism::Unbounded, |n| async move {
                if n == 2 {
                    Err("boom")
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let results = do_parallel(Vec::<u8>::new(), Parallelism::Unbounded, |_| async move {
            Ok::<_, std::convert::Infallible>(())
        })
        .await
        .unwrap();
        assert!(results.is_empty());
    }
}
