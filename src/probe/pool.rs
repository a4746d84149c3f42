//! Bounded task pool

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Runs units of work with at most `limit` in flight.
///
/// Units start in submission order as slots free up and their outputs are
/// returned in completion order. The pool holds no shared counters, so
/// several pools with different limits can run side by side.
#[derive(Debug, Clone, Copy)]
pub struct TaskPool {
    limit: usize,
}

impl TaskPool {
    /// Create a pool; a limit of zero is raised to one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drive every unit to completion.
    ///
    /// Units report their own failures through their output, so one failing
    /// unit never stops its siblings.
    pub async fn run<I, F, T>(&self, units: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T>,
    {
        stream::iter(units)
            .buffer_unordered(self.limit)
            .collect::<Vec<_>>()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_zero_limit_raised() {
        assert_eq!(TaskPool::new(0).limit(), 1);
        assert_eq!(TaskPool::new(5).limit(), 5);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let pool = TaskPool::new(5);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let units = (0..40).map(|i| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1 + (i % 3) as u64)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                i
            }
        });

        let outputs = pool.run(units).await;
        assert_eq!(outputs.len(), 40);
        assert_eq!(peak.load(Ordering::SeqCst), 5);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let pool = TaskPool::new(3);
        let units = (0..10).map(|i| async move {
            if i % 2 == 0 {
                Err(format!("unit {} failed", i))
            } else {
                Ok(i)
            }
        });

        let outputs = pool.run(units).await;
        assert_eq!(outputs.len(), 10);
        assert_eq!(outputs.iter().filter(|r| r.is_ok()).count(), 5);
    }

    #[tokio::test]
    async fn test_results_in_completion_order() {
        let pool = TaskPool::new(2);
        let units = [30u64, 1].into_iter().map(|delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay
        });

        assert_eq!(pool.run(units).await, vec![1, 30]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let pool = TaskPool::new(4);
        let outputs: Vec<()> = pool.run(Vec::<std::future::Ready<()>>::new()).await;
        assert!(outputs.is_empty());
    }
}
