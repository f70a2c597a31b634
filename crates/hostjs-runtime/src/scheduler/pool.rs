//! Bounded background pool for work that must stay off the confined thread.
//!
//! Downloads, hashing, file writes and compiler runs go here. The pool is a
//! multi-threaded tokio runtime owned by an `Arc`; the last clone to drop shuts
//! it down in the background so that dropping never blocks (and never panics
//! when it happens inside another runtime).

use hostjs_common::{SchedulerConfig, SchedulerError};
use std::future::Future;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

struct PoolInner {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

/// Shared handle to the background pool.
#[derive(Clone)]
pub struct BackgroundPool {
    inner: Arc<PoolInner>,
}

impl BackgroundPool {
    /// Starts a pool sized by `config`.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.background_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name("hostjs-background")
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Init(format!("background pool: {}", e)))?;
        let handle = runtime.handle().clone();

        Ok(Self {
            inner: Arc::new(PoolInner {
                runtime: Mutex::new(Some(runtime)),
                handle,
            }),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    pub fn spawn_blocking<F, T>(&self, work: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner.handle.spawn_blocking(work)
    }

    /// Runs blocking `work` on the pool and waits for its result on the calling thread.
    ///
    /// The caller must not be a pool thread.
    pub fn run_blocking<F, T>(&self, work: F) -> Result<T, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.inner.handle.spawn_blocking(move || {
            let _ = tx.send(work());
        });
        rx.recv().map_err(|_| SchedulerError::PoolClosed)
    }

    /// Drives `future` to completion on the pool and waits for it on the calling thread.
    ///
    /// Usable from the confined thread even though that thread runs its own
    /// single-threaded runtime: the wait is a plain channel receive, not a nested `block_on`.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, SchedulerError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.inner.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv().map_err(|_| SchedulerError::PoolClosed)
    }

    /// Stops accepting work. In-flight blocking work is not interrupted.
    pub fn shutdown(&self) {
        let runtime = self
            .inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            tracing::debug!("Shutting down background pool");
            runtime.shutdown_background();
        }
    }
}
