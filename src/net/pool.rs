//! Network thread pool and its swappable holder.
//!
//! The pool executes inbound publish/subscribe work off the wire. Stop/start
//! replace the pool instance while network handlers may still be holding the
//! previous one, so the live reference sits behind [`SwappablePool`] and
//! readers load the current value once per use rather than caching it.

use crate::stats::{self, StatsCollector};
use parking_lot::{Mutex, RwLock};
use slog::{debug, warn, Logger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const NETWORK_POOL_WORKERS: usize = 4;

/// Time the controller waits for the pool to drain before forcing shutdown.
pub const POOL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

pub type NetTask = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of workers draining a bounded task queue.
pub struct NetworkThreadPool {
    sender: Mutex<Option<mpsc::Sender<NetTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<StatsCollector>,
    logger: Logger,
}

impl NetworkThreadPool {
    /// Spawn a pool whose queue is bounded by `queue_length` (the conf's
    /// network-queue-length) with a fixed worker count.
    pub fn new(queue_length: usize, stats: Arc<StatsCollector>, logger: Logger) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<NetTask>(queue_length.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..NETWORK_POOL_WORKERS)
            .map(|worker| {
                let rx = rx.clone();
                let logger = logger.clone();
                tokio::spawn(async move {
                    loop {
                        let task = rx.lock().await.recv().await;
                        match task {
                            Some(task) => task(),
                            None => break,
                        }
                    }
                    debug!(logger, "Network pool worker exiting"; "worker" => worker);
                })
            })
            .collect();

        Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            stats,
            logger,
        })
    }

    /// Enqueue a task. Returns false (and counts the rejection) when the
    /// queue is full or the pool is shutting down.
    pub fn try_submit(&self, task: NetTask) -> bool {
        let sender = self.sender.lock();
        let accepted = match sender.as_ref() {
            Some(tx) => tx.try_send(task).is_ok(),
            None => false,
        };
        if !accepted {
            self.stats.increment(stats::NET_TASK_REJECTED);
            warn!(self.logger, "Network pool rejected task");
        }
        accepted
    }

    /// Graceful shutdown: close the queue, await worker termination up to
    /// `timeout`, then abort any workers still running. Returns the number of
    /// workers that had to be aborted.
    ///
    /// Safe to call more than once; later calls find nothing to wait for.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        drop(self.sender.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());

        let deadline = tokio::time::Instant::now() + timeout;
        let mut forced = 0usize;
        for mut handle in workers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    handle.abort();
                    forced += 1;
                }
            }
        }
        if forced > 0 {
            warn!(self.logger, "Network pool termination timed out, forcing shutdown";
                "workers_aborted" => forced);
        }
        forced
    }
}

/// Atomically swappable holder for the current pool instance.
///
/// Restart semantics (drain the old pool, install a new one) are explicit
/// `swap`/`take` operations so they can be tested directly.
#[derive(Clone, Default)]
pub struct SwappablePool {
    inner: Arc<RwLock<Option<Arc<NetworkThreadPool>>>>,
}

impl SwappablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live pool, if one is installed. Load once per use.
    pub fn current(&self) -> Option<Arc<NetworkThreadPool>> {
        self.inner.read().clone()
    }

    /// Install a new pool, returning the previous one (not yet drained).
    pub fn swap(&self, pool: Arc<NetworkThreadPool>) -> Option<Arc<NetworkThreadPool>> {
        self.inner.write().replace(pool)
    }

    /// Remove the live pool, if any.
    pub fn take(&self) -> Option<Arc<NetworkThreadPool>> {
        self.inner.write().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    #[tokio::test]
    async fn test_submitted_tasks_run() {
        let stats = Arc::new(StatsCollector::new());
        let pool = NetworkThreadPool::new(16, stats, test_logger());

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            assert!(pool.try_submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        }

        pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let stats = Arc::new(StatsCollector::new());
        let pool = NetworkThreadPool::new(4, stats.clone(), test_logger());
        pool.shutdown(Duration::from_secs(5)).await;

        assert!(!pool.try_submit(Box::new(|| {})));
        assert_eq!(stats.counter(stats::NET_TASK_REJECTED), 1);
    }

    #[tokio::test]
    async fn test_clean_shutdown_aborts_nothing() {
        let stats = Arc::new(StatsCollector::new());
        let pool = NetworkThreadPool::new(4, stats, test_logger());
        assert_eq!(pool.shutdown(Duration::from_secs(5)).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stuck_worker_is_force_aborted_after_timeout() {
        let stats = Arc::new(StatsCollector::new());
        let pool = NetworkThreadPool::new(4, stats, test_logger());

        // A task that blocks its worker until we release it.
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        assert!(pool.try_submit(Box::new(move || {
            let _ = release_rx.recv();
        })));

        // Let a worker pick the task up before closing the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let forced = tokio::time::timeout(
            Duration::from_secs(5),
            pool.shutdown(Duration::from_millis(100)),
        )
        .await
        .expect("shutdown must not hang on a stuck worker");
        assert_eq!(forced, 1);

        // Unblock the worker thread so the runtime can wind down.
        release_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_swap_returns_previous_instance() {
        let stats = Arc::new(StatsCollector::new());
        let holder = SwappablePool::new();
        assert!(holder.current().is_none());

        let first = NetworkThreadPool::new(4, stats.clone(), test_logger());
        assert!(holder.swap(first.clone()).is_none());

        let second = NetworkThreadPool::new(4, stats, test_logger());
        let previous = holder.swap(second).expect("previous pool");
        assert!(Arc::ptr_eq(&previous, &first));

        holder.take().unwrap().shutdown(Duration::from_secs(5)).await;
        previous.shutdown(Duration::from_secs(5)).await;
    }
}
