//! Bounded worker pool.
//!
//! Wraps a rayon thread pool so the thread count can change at runtime.
//! Resizing builds a new pool; jobs already queued on the old one still run
//! to completion.

use crate::core::error::ConfigError;
use parking_lot::RwLock;
use std::cell::Cell;
use std::sync::Arc;

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Worker pool shared by one core.
pub(crate) struct WorkerPool {
    pool: RwLock<Arc<rayon::ThreadPool>>,
    threads: RwLock<usize>,
}

impl WorkerPool {
    /// Create a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self, ConfigError> {
        let threads = threads.max(1);
        Ok(Self {
            pool: RwLock::new(Arc::new(Self::build(threads)?)),
            threads: RwLock::new(threads),
        })
    }

    fn build(threads: usize) -> Result<rayon::ThreadPool, ConfigError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("framegraph-worker-{}", i))
            .start_handler(|_| ON_WORKER.with(|w| w.set(true)))
            .build()
            .map_err(|e| ConfigError::ThreadPool(e.to_string()))
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        *self.threads.read()
    }

    /// Replace the pool with one of `threads` workers.
    pub fn set_threads(&self, threads: usize) -> Result<usize, ConfigError> {
        let threads = threads.max(1);
        let mut current = self.threads.write();
        if *current != threads {
            *self.pool.write() = Arc::new(Self::build(threads)?);
            log::debug!("worker pool resized from {} to {} threads", *current, threads);
            *current = threads;
        }
        Ok(threads)
    }

    /// Queue a job. Jobs start in submission order.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let pool = Arc::clone(&self.pool.read());
        pool.spawn_fifo(job);
    }

    /// Whether the current thread is a pool worker.
    pub fn on_worker_thread() -> bool {
        ON_WORKER.with(|w| w.get())
    }

    /// Run one queued job on the current worker, if any.
    ///
    /// Returns `true` if a job ran. Always `false` off the pool.
    pub fn help() -> bool {
        if !Self::on_worker_thread() {
            return false;
        }
        matches!(rayon::yield_now(), Some(rayon::Yield::Executed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_jobs_run_on_workers() {
        let pool = WorkerPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.spawn(move || {
                tx.send(WorkerPool::on_worker_thread()).unwrap();
            });
        }
        for _ in 0..4 {
            assert!(rx.recv().unwrap());
        }
        assert!(!WorkerPool::on_worker_thread());
        assert!(!WorkerPool::help());
    }

    #[test]
    fn test_resize() {
        let pool = WorkerPool::new(1).unwrap();
        assert_eq!(pool.threads(), 1);
        assert_eq!(pool.set_threads(3).unwrap(), 3);
        assert_eq!(pool.threads(), 3);
        assert_eq!(pool.set_threads(0).unwrap(), 1);

        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let c = Arc::clone(&counter);
        pool.spawn(move || {
            c.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        });
        rx.recv().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
