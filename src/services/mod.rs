//! Shared service context and the deferred-task runner.

use crate::config::GdConfig;
use crate::pacer::InFlightRooms;
use crate::store::Store;
use crate::textgen::TextGenClient;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Upper bound on concurrently running deferred work (allocation rooms,
/// pacer turns, evaluations).
const MAX_DEFERRED_TASKS: usize = 10;

/// Fire-and-forget execution of deferred work on a bounded pool. Spawned
/// futures queue on a semaphore so long-running work (script generation,
/// pacing sleeps) cannot pile up unbounded.
#[derive(Clone)]
pub struct TaskRunner {
    semaphore: Arc<Semaphore>,
}

impl TaskRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Run a unit of work without blocking the caller.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            // Err only if the semaphore is closed, which never happens here.
            if let Ok(_permit) = semaphore.acquire_owned().await {
                fut.await;
            }
        });
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(MAX_DEFERRED_TASKS)
    }
}

/// Shared state handed to every handler and background task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<GdConfig>,
    pub store: Store,
    pub textgen: TextGenClient,
    pub rooms_in_flight: InFlightRooms,
    pub tasks: TaskRunner,
}

impl AppContext {
    pub fn new(config: GdConfig, store: Store) -> Self {
        let textgen = TextGenClient::new(&config);
        Self {
            config: Arc::new(config),
            store,
            textgen,
            rooms_in_flight: InFlightRooms::default(),
            tasks: TaskRunner::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_runner_executes_spawned_work() {
        let runner = TaskRunner::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            runner.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 5 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("deferred tasks did not all run");
    }

    #[tokio::test]
    async fn test_task_runner_bounds_concurrency() {
        let runner = TaskRunner::new(1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let active = active.clone();
            let peak = peak.clone();
            runner.spawn(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
