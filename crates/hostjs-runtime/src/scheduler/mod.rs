//! Task scheduler: one confined thread plus a bounded background pool.
//!
//! The guest engine context is not thread-safe, so it is created on, owned by,
//! and only ever touched from a single dedicated thread. Everything that wants
//! to use it submits a closure over `&mut S` (the confined state) and the
//! confined thread runs those closures in submission order.
//!
//! Blocking work (downloads, compiler runs) runs on the [`BackgroundPool`]; its
//! outcome is handed back by re-submitting the success or failure continuation
//! onto the confined thread, never by calling it on the pool thread.
//!
//! # Lifecycle
//!
//! ```text
//! Running --await--> AwaitRequested --in-flight hits 0--> Draining --thread exits--> Terminated
//! ```
//!
//! Every accepted task bumps an in-flight counter until it has finished
//! (successfully, with an error, or by panicking). Once the counter reaches
//! zero while an await is pending the confined thread is told to stop, exactly
//! once. Submissions in `Draining` or `Terminated` are rejected with
//! [`SchedulerError::Terminated`].

mod pool;

pub use pool::BackgroundPool;

use hostjs_common::SchedulerError;
use std::cell::RefCell;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{mpsc as std_mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// A one-shot unit of work for the confined thread.
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

type RepeatingTask<S> = Box<dyn FnMut(&mut S) + Send + 'static>;

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulerPhase {
    Running,
    AwaitRequested,
    Draining,
    Terminated,
}

enum Command<S> {
    Run(Task<S>, InFlight),
    RunDelayed(Task<S>, Duration, InFlight),
    RunRepeating(RepeatingTask<S>, Duration, InFlight),
    Shutdown,
}

struct LifecycleState {
    phase: SchedulerPhase,
    in_flight: usize,
}

struct Lifecycle {
    state: Mutex<LifecycleState>,
    terminated: Condvar,
    stop_repeating: watch::Sender<bool>,
    request_shutdown: Box<dyn Fn() + Send + Sync>,
}

impl Lifecycle {
    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `Draining` and stops the confined thread if nothing is left in flight.
    ///
    /// Must be called with the state lock held so the shutdown command is
    /// ordered after every task accepted before it.
    fn drain_if_idle(&self, state: &mut LifecycleState) {
        if state.in_flight == 0 && state.phase == SchedulerPhase::AwaitRequested {
            tracing::debug!("Scheduler idle after await, draining confined thread");
            state.phase = SchedulerPhase::Draining;
            (self.request_shutdown)();
        }
    }

    fn finish_one(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.drain_if_idle(&mut state);
    }

    fn mark_terminated(&self) {
        let mut state = self.lock();
        state.phase = SchedulerPhase::Terminated;
        self.terminated.notify_all();
    }
}

/// Keeps one task counted as in flight until dropped.
struct InFlight {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.lifecycle.finish_one();
    }
}

/// Submission side of the confined thread, cloneable into background work.
struct Handoff<S> {
    sender: mpsc::UnboundedSender<Command<S>>,
    lifecycle: Arc<Lifecycle>,
}

impl<S> Clone for Handoff<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<S> Handoff<S> {
    /// Counts a new task in flight and enqueues it, atomically with respect to shutdown.
    fn enqueue(&self, command: impl FnOnce(InFlight) -> Command<S>) -> Result<(), SchedulerError> {
        let mut state = self.lifecycle.lock();
        if state.phase >= SchedulerPhase::Draining {
            return Err(SchedulerError::Terminated);
        }
        state.in_flight += 1;
        let guard = InFlight {
            lifecycle: Arc::clone(&self.lifecycle),
        };
        let sent = self.sender.send(command(guard));
        drop(state);

        // A failed send hands the command (and its guard) back; dropping it
        // after the lock is released undoes the count.
        sent.map_err(|_| SchedulerError::Terminated)
    }

    /// Counts work that runs elsewhere (the background pool) as in flight.
    fn admit(&self) -> Result<InFlight, SchedulerError> {
        let mut state = self.lifecycle.lock();
        if state.phase >= SchedulerPhase::Draining {
            return Err(SchedulerError::Terminated);
        }
        state.in_flight += 1;
        Ok(InFlight {
            lifecycle: Arc::clone(&self.lifecycle),
        })
    }
}

/// Single-thread-confined executor over state `S`, plus its background pool.
///
/// `S` never leaves the confined thread, so it does not have to be `Send`.
pub struct TaskScheduler<S: 'static> {
    handoff: Handoff<S>,
    pool: BackgroundPool,
    confined_thread: ThreadId,
}

impl<S: 'static> TaskScheduler<S> {
    /// Spawns the confined thread and builds its state there with `init`.
    ///
    /// Returns once `init` has finished; an `init` failure is reported as
    /// [`SchedulerError::Init`] and leaves no thread behind.
    pub fn start<F, E>(name: &str, pool: BackgroundPool, init: F) -> Result<Self, SchedulerError>
    where
        F: FnOnce() -> Result<S, E> + Send + 'static,
        E: Display,
    {
        let (sender, receiver) = mpsc::unbounded_channel::<Command<S>>();
        let (stop_repeating, stop_rx) = watch::channel(false);

        let shutdown_sender = sender.clone();
        let lifecycle = Arc::new(Lifecycle {
            state: Mutex::new(LifecycleState {
                phase: SchedulerPhase::Running,
                in_flight: 0,
            }),
            terminated: Condvar::new(),
            stop_repeating,
            request_shutdown: Box::new(move || {
                let _ = shutdown_sender.send(Command::Shutdown);
            }),
        });

        let (init_tx, init_rx) = std_mpsc::channel::<Result<ThreadId, String>>();
        let thread_lifecycle = Arc::clone(&lifecycle);

        thread::Builder::new()
            .name(format!("{}-confined", name))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        thread_lifecycle.mark_terminated();
                        let _ = init_tx.send(Err(format!("confined runtime: {}", e)));
                        return;
                    }
                };

                let state = match init() {
                    Ok(state) => state,
                    Err(e) => {
                        thread_lifecycle.mark_terminated();
                        let _ = init_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(thread::current().id()));

                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, run_confined(Rc::new(RefCell::new(state)), receiver, stop_rx));
                // Dropping the set releases pending delayed/repeating tasks before the state goes.
                drop(local);
                drop(runtime);

                tracing::debug!("Confined thread terminated");
                thread_lifecycle.mark_terminated();
            })
            .map_err(|e| SchedulerError::Init(format!("failed to spawn confined thread: {}", e)))?;

        let confined_thread = match init_rx.recv() {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(SchedulerError::Init(e)),
            Err(_) => {
                return Err(SchedulerError::Init(
                    "confined thread exited during initialization".to_string(),
                ))
            }
        };

        Ok(Self {
            handoff: Handoff { sender, lifecycle },
            pool,
            confined_thread,
        })
    }

    /// Queues `task` to run on the confined thread after everything already queued.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Terminated` once the scheduler is draining.
    pub fn submit<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.handoff
            .enqueue(|guard| Command::Run(Box::new(task), guard))
    }

    /// Queues `task` to run on the confined thread once `delay` has passed.
    pub fn submit_with_delay<F>(&self, task: F, delay: Duration) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.handoff
            .enqueue(|guard| Command::RunDelayed(Box::new(task), delay, guard))
    }

    /// Runs `task` every `interval`, measured from its own previous firing.
    ///
    /// A late firing pushes the following ones back instead of bunching up to
    /// catch up with the wall clock. Repetition stops once an await has been
    /// requested so the scheduler can drain.
    pub fn submit_repeating<F>(&self, task: F, interval: Duration) -> Result<(), SchedulerError>
    where
        F: FnMut(&mut S) + Send + 'static,
    {
        self.handoff
            .enqueue(|guard| Command::RunRepeating(Box::new(task), interval, guard))
    }

    /// Runs `work` on the background pool and re-submits the matching
    /// continuation onto the confined thread.
    ///
    /// If the scheduler has shut down by the time `work` finishes, the
    /// continuation is dropped without running.
    ///
    /// # Parameters
    ///
    /// - `work`: blocking work, run on a pool thread
    /// - `on_success`: runs on the confined thread with `work`'s value
    /// - `on_failure`: runs on the confined thread with `work`'s error
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Terminated` once the scheduler is draining.
    /// Work accepted before that still gets its continuation.
    pub fn submit_async<T, E, W, OnOk, OnErr>(
        &self,
        work: W,
        on_success: OnOk,
        on_failure: OnErr,
    ) -> Result<(), SchedulerError>
    where
        W: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        OnOk: FnOnce(&mut S, T) + Send + 'static,
        OnErr: FnOnce(&mut S, E) + Send + 'static,
    {
        let guard = self.handoff.admit()?;
        let handoff = self.handoff.clone();

        self.pool.spawn_blocking(move || {
            let continuation: Task<S> = match work() {
                Ok(value) => Box::new(move |state: &mut S| on_success(state, value)),
                Err(error) => Box::new(move |state: &mut S| on_failure(state, error)),
            };
            if handoff
                .enqueue(|inner| Command::Run(continuation, inner))
                .is_err()
            {
                tracing::debug!("Confined thread closed, dropping background result");
            }
            drop(guard);
        });
        Ok(())
    }

    /// Runs `task` on the confined thread and waits for its return value.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::BlockingOnConfinedThread` when called from a task
    /// - `SchedulerError::Terminated` once the scheduler is draining
    /// - `SchedulerError::Disconnected` if `task` panicked before replying
    pub fn call<T, F>(&self, task: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_confined_thread() {
            return Err(SchedulerError::BlockingOnConfinedThread);
        }
        let (tx, rx) = std_mpsc::channel();
        self.submit(move |state| {
            let _ = tx.send(task(state));
        })?;
        rx.recv().map_err(|_| SchedulerError::Disconnected)
    }

    /// Requests shutdown and waits until the confined thread has terminated.
    ///
    /// Returns `Ok(true)` if everything in flight finished and the thread
    /// stopped before `timeout`, `Ok(false)` otherwise. Work accepted before
    /// the call (and continuations it produces) still runs.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::BlockingOnConfinedThread` when called from a task.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool, SchedulerError> {
        if self.is_confined_thread() {
            return Err(SchedulerError::BlockingOnConfinedThread);
        }
        let lifecycle = &self.handoff.lifecycle;
        let mut state = lifecycle.lock();
        if state.phase == SchedulerPhase::Running {
            state.phase = SchedulerPhase::AwaitRequested;
            lifecycle.stop_repeating.send_replace(true);
        }
        lifecycle.drain_if_idle(&mut state);

        let (state, _) = lifecycle
            .terminated
            .wait_timeout_while(state, timeout, |s| s.phase != SchedulerPhase::Terminated)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state.phase == SchedulerPhase::Terminated)
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.handoff.lifecycle.lock().phase
    }

    pub fn in_flight(&self) -> usize {
        self.handoff.lifecycle.lock().in_flight
    }

    pub fn is_confined_thread(&self) -> bool {
        thread::current().id() == self.confined_thread
    }

    pub fn pool(&self) -> &BackgroundPool {
        &self.pool
    }

    /// Stops the confined thread after whatever is already queued, without waiting.
    fn shutdown_now(&self) {
        let lifecycle = &self.handoff.lifecycle;
        let mut state = lifecycle.lock();
        if state.phase < SchedulerPhase::Draining {
            state.phase = SchedulerPhase::Draining;
            lifecycle.stop_repeating.send_replace(true);
            (lifecycle.request_shutdown)();
        }
    }
}

impl<S: 'static> Drop for TaskScheduler<S> {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

fn run_guarded<S>(state: &RefCell<S>, task: impl FnOnce(&mut S)) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&mut state.borrow_mut())));
    if outcome.is_err() {
        tracing::error!("Task panicked on the confined thread");
    }
}

async fn run_confined<S: 'static>(
    state: Rc<RefCell<S>>,
    mut receiver: mpsc::UnboundedReceiver<Command<S>>,
    stop_repeating: watch::Receiver<bool>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Run(task, guard) => {
                run_guarded(&state, task);
                drop(guard);
            }
            Command::RunDelayed(task, delay, guard) => {
                let state = Rc::clone(&state);
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(delay).await;
                    run_guarded(&state, task);
                    drop(guard);
                });
            }
            Command::RunRepeating(mut task, interval, guard) => {
                let state = Rc::clone(&state);
                let mut stop = stop_repeating.clone();
                tokio::task::spawn_local(async move {
                    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        if *stop.borrow() {
                            break;
                        }
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = stop.changed() => break,
                        }
                        run_guarded(&state, &mut task);
                    }
                    drop(guard);
                });
            }
            Command::Shutdown => break,
        }
    }
}
