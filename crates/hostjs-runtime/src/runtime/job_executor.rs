//! Promise job queue for the guest engine.
//!
//! Boa hands promise reactions, native async jobs (module loading among them)
//! and generic jobs to this queue; the engine drains it after every
//! evaluation. The queue lives on the confined thread together with the
//! context, so plain `RefCell`s are enough.
//!
//! # Execution Model
//!
//! When `run_jobs_async()` is called:
//! 1. All pending async jobs are polled concurrently using `FutureGroup`
//! 2. After each poll, promise jobs and one generic job are drained
//! 3. The loop continues until all queues are empty

use boa_engine::{
    context::Context,
    job::{GenericJob, Job, JobExecutor, NativeAsyncJob, PromiseJob},
    JsResult,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// FIFO job queues drained on the confined thread.
#[derive(Default)]
pub struct GuestJobQueue {
    /// Promise microtasks (then/catch handlers)
    promise_jobs: RefCell<VecDeque<PromiseJob>>,
    /// Native async jobs
    async_jobs: RefCell<VecDeque<NativeAsyncJob>>,
    generic_jobs: RefCell<VecDeque<GenericJob>>,
}

impl GuestJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.promise_jobs.borrow().is_empty()
            || !self.async_jobs.borrow().is_empty()
            || !self.generic_jobs.borrow().is_empty()
    }

    /// Runs at most one generic job, then every pending promise job.
    fn drain_jobs(&self, context: &mut Context) {
        let generic = self.generic_jobs.borrow_mut().pop_front();
        if let Some(generic) = generic {
            if let Err(err) = generic.call(context) {
                tracing::error!("Uncaught error in generic job: {err}");
            }
        }

        let jobs = std::mem::take(&mut *self.promise_jobs.borrow_mut());
        for job in jobs {
            if let Err(e) = job.call(context) {
                tracing::error!("Uncaught error in promise job: {e}");
            }
        }

        context.clear_kept_objects();
    }
}

impl JobExecutor for GuestJobQueue {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(job) => self.promise_jobs.borrow_mut().push_back(job),
            Job::AsyncJob(job) => self.async_jobs.borrow_mut().push_back(job),
            Job::GenericJob(g) => self.generic_jobs.borrow_mut().push_back(g),
            _ => {
                tracing::warn!("Unsupported job type enqueued, ignoring");
            }
        }
    }

    /// Drains the queues on the calling thread.
    ///
    /// The confined thread is already inside a single-threaded runtime, so
    /// the async drain is driven by a plain local executor instead of a
    /// nested tokio `block_on`.
    fn run_jobs(self: Rc<Self>, context: &mut Context) -> JsResult<()> {
        futures_lite::future::block_on(self.run_jobs_async(&RefCell::new(context)))
    }

    async fn run_jobs_async(self: Rc<Self>, context: &RefCell<&mut Context>) -> JsResult<()>
    where
        Self: Sized,
    {
        use futures_concurrency::future::FutureGroup;
        use futures_lite::{future, StreamExt};

        let mut group = FutureGroup::new();

        loop {
            for job in std::mem::take(&mut *self.async_jobs.borrow_mut()) {
                group.insert(job.call(context));
            }

            if group.is_empty()
                && self.promise_jobs.borrow().is_empty()
                && self.generic_jobs.borrow().is_empty()
            {
                return Ok(());
            }

            if let Some(Err(err)) = future::poll_once(group.next()).await.flatten() {
                tracing::error!("Uncaught error in async job: {err}");
            }

            self.drain_jobs(&mut context.borrow_mut());
            future::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{js_string, Source};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_new_queue_is_empty() {
        assert!(!GuestJobQueue::new().has_pending_jobs());
    }

    #[test]
    fn test_run_jobs_on_empty_queue() {
        let queue = Rc::new(GuestJobQueue::new());
        let mut context = Context::default();
        assert!(queue.clone().run_jobs(&mut context).is_ok());
        assert!(!queue.has_pending_jobs());
    }

    #[test]
    fn test_generic_jobs_all_run() {
        let queue = Rc::new(GuestJobQueue::new());
        let mut context = Context::default();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            let realm = context.realm().clone();
            let job = Job::GenericJob(GenericJob::new(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(boa_engine::JsValue::undefined())
                },
                realm,
            ));
            queue.clone().enqueue_job(job, &mut context);
        }
        assert!(queue.has_pending_jobs());

        queue.clone().run_jobs(&mut context).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(!queue.has_pending_jobs());
    }

    #[test]
    fn test_promise_reactions_settle_inside_context() {
        let queue = Rc::new(GuestJobQueue::new());
        let mut context = Context::builder()
            .job_executor(queue.clone())
            .build()
            .unwrap();

        context
            .eval(Source::from_bytes(
                "globalThis.seen = 0; Promise.resolve(41).then(v => { globalThis.seen = v + 1; });",
            ))
            .unwrap();
        assert!(queue.has_pending_jobs());
        context.run_jobs().unwrap();

        let seen = context
            .global_object()
            .get(js_string!("seen"), &mut context)
            .unwrap();
        assert_eq!(seen.as_number(), Some(42.0));
    }

    #[tokio::test]
    async fn test_run_inside_current_thread_runtime() {
        // block_in_place would panic here; the local executor must not.
        let queue = Rc::new(GuestJobQueue::new());
        let mut context = Context::builder()
            .job_executor(queue.clone())
            .build()
            .unwrap();
        context
            .eval(Source::from_bytes("Promise.resolve().then(() => 1);"))
            .unwrap();
        assert!(context.run_jobs().is_ok());
    }
}
