//! Worker pools
//!
//! Every fan-out stage of the pipeline takes a [WorkerPool]: [ThreadPool] runs
//! the tasks on as many threads as there are CPUs, [DummyPool] runs them one
//! after the other on the calling thread. Both return the results in input order
//! once every task is done.

use rayon::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to build the worker pool")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

pub trait WorkerPool: Sync {
    /// Applies `f` to every item and waits for all of the results
    fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send;
    /// Number of workers
    fn workers(&self) -> usize;
}

/// Multi-threaded pool backed by rayon
pub struct ThreadPool(rayon::ThreadPool);
impl ThreadPool {
    /// A pool with one worker per available CPU
    pub fn new() -> Result<Self, PoolError> {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(n)
    }
    pub fn with_threads(n: usize) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("ir-reduce-{i}"))
            .build()?;
        log::debug!("worker pool with {} threads", pool.current_num_threads());
        Ok(Self(pool))
    }
}
impl WorkerPool for ThreadPool {
    fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        self.0.install(|| items.into_par_iter().map(f).collect())
    }
    fn workers(&self) -> usize {
        self.0.current_num_threads()
    }
}

/// Single-threaded stand-in with the same interface
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyPool;
impl WorkerPool for DummyPool {
    fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        items.into_iter().map(f).collect()
    }
    fn workers(&self) -> usize {
        1
    }
}
