//! Bounded-concurrency execution of independent async tasks.

use std::any::Any;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Runs tasks with at most `max_workers` in flight.
///
/// Tasks share the caller's task and interleave at await points, so they
/// need neither `Send` nor `'static`.
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Semaphore,
}

impl WorkerPool {
    /// Creates a pool. `0` means one worker per available CPU.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = if max_workers == 0 {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            max_workers
        };
        info!(max_workers, "Worker pool initialized");
        Self {
            max_workers,
            semaphore: Semaphore::new(max_workers),
        }
    }

    /// Effective concurrency bound.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every task and returns their results in input order.
    ///
    /// A task is started only after it holds a permit. Failures and panics
    /// are captured in the task's slot and never cut the batch short.
    pub async fn run<T, F, Fut>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = tasks.len();
        debug!(tasks = total, max_workers = self.max_workers, "Running tasks");

        let futures = tasks.into_iter().map(|task| async move {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| anyhow!("semaphore closed: {e}"))?;

            match AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(anyhow!("task panicked: {}", panic_message(&*payload))),
            }
        });
        let results = join_all(futures).await;

        debug!(tasks = total, "All tasks completed");
        results
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn zero_workers_defaults_to_available_parallelism() {
        let expected = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        assert_eq!(WorkerPool::new(0).max_workers(), expected);
        assert_eq!(WorkerPool::new(3).max_workers(), 3);
    }

    #[tokio::test]
    async fn never_exceeds_the_bound() {
        let pool = WorkerPool::new(3);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let tasks: Vec<_> = (0..12_u64)
            .map(|i| {
                let running = &running;
                let peak = &peak;
                move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5 + i % 4)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        let results = pool.run(tasks).await;
        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let pool = WorkerPool::new(4);
        let tasks: Vec<_> = (0..8_u64)
            .map(|i| {
                move || async move {
                    // Later tasks finish first.
                    tokio::time::sleep(Duration::from_millis(40 - i * 5)).await;
                    Ok(i * 10)
                }
            })
            .collect();

        let values: Vec<u64> = pool
            .run(tasks)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn failures_are_positional_and_do_not_stop_siblings() {
        let pool = WorkerPool::new(2);
        let completed = AtomicUsize::new(0);
        let tasks: Vec<_> = (0..6_u32)
            .map(|i| {
                let completed = &completed;
                move || async move {
                    tokio::task::yield_now().await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    if i % 3 == 1 {
                        anyhow::bail!("task {i} failed");
                    }
                    Ok(i)
                }
            })
            .collect();

        let results = pool.run(tasks).await;
        assert_eq!(completed.load(Ordering::SeqCst), 6);
        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failed, vec![1, 4]);
        assert_eq!(results[1].as_ref().unwrap_err().to_string(), "task 1 failed");
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let pool = WorkerPool::new(1);
        let tasks: Vec<_> = (1..=3_u8)
            .map(|i| {
                move || async move {
                    assert_ne!(i, 2, "boom");
                    Ok(i)
                }
            })
            .collect();

        let results = pool.run(tasks).await;
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        let err = results[1].as_ref().unwrap_err().to_string();
        assert!(err.contains("boom"), "{err}");
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_batch() {
        let pool = WorkerPool::new(2);
        let tasks: Vec<fn() -> std::future::Ready<Result<()>>> = Vec::new();
        assert!(pool.run(tasks).await.is_empty());
    }
}
