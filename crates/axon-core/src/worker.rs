//! Worker pattern: a signal-aware object owning a dedicated scheduler
//! thread.
//!
//! A [`Worker`] spawns an OS thread running its own cooperative scheduler,
//! emits `started`/`stopped` lifecycle signals, runs a user-supplied entry
//! coroutine, and accepts queued background futures that execute
//! sequentially on the worker's thread. Other signal-aware objects can be
//! re-affined to the worker via [`Worker::move_to_thread`], after which
//! automatic dispatch treats them as co-located with it.
//!
//! # Example
//!
//! ```no_run
//! use axon_core::Worker;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axon_core::Result<()> {
//! let worker = Worker::builder().name("indexer").build()?;
//!
//! worker.started().connect(|_| println!("worker is up"));
//! worker.start()?;
//!
//! worker.queue_task(async {
//!     // runs on the worker's thread
//! })?;
//!
//! worker.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Entry coroutine
//!
//! The default entry activates the background queue processor and waits for
//! the stop request. Replace it for long-running work:
//!
//! ```no_run
//! use axon_core::Worker;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axon_core::Result<()> {
//! let worker = Worker::builder()
//!     .name("poller")
//!     .entry(|scope| async move {
//!         scope.start_queue();
//!         while !scope.is_stopping() {
//!             // poll something...
//!             tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!         }
//!     })
//!     .build()?;
//! worker.start()?;
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Builder;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::affinity::{Affinity, AffinityCell, AffinityToken, SignalAware};
use crate::emission::in_emission;
use crate::error::{AxonError, Result};
use crate::event_loop::LoopHandle;
use crate::signal::Signal;

/// Bounded wait applied when joining the worker thread during `stop`.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a stop request waits for the entry task to return on its own
/// before cancelling it.
const ENTRY_STOP_GRACE: Duration = Duration::from_millis(250);

/// Bounded wait for the worker thread to publish its scheduler in `start`.
const START_READY_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;
type EntryFn = Arc<dyn Fn(WorkerScope) -> BoxedTask + Send + Sync>;

/// Worker lifecycle states.
///
/// `start` is only legal from `Stopped`; `stop` acts from `Starting` and
/// `Running` and is a no-op otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No scheduler thread exists.
    Stopped,
    /// The scheduler thread has been spawned but is not serving yet.
    Starting,
    /// The scheduler thread is serving.
    Running,
    /// A stop request is in flight.
    Stopping,
}

/// One-shot, thread-safe stop request.
struct StopState {
    tripped: AtomicBool,
    notify: Notify,
}

#[derive(Clone)]
struct StopToken {
    inner: Arc<StopState>,
}

impl StopToken {
    fn new() -> Self {
        Self {
            inner: Arc::new(StopState {
                tripped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    fn trip(&self) {
        if !self.inner.tripped.swap(true, Ordering::Release) {
            self.inner.notify.notify_waiters();
        }
    }

    fn reset(&self) {
        self.inner.tripped.store(false, Ordering::Release);
    }

    fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::Acquire)
    }

    async fn tripped(&self) {
        if self.is_tripped() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_tripped() {
                return;
            }
            notified.await;
            if self.is_tripped() {
                return;
            }
        }
    }
}

/// Lifecycle fields guarded by the per-worker re-entrant lock.
struct Lifecycle {
    state: WorkerState,
    thread: Option<JoinHandle<()>>,
}

struct WorkerShared {
    affinity: AffinityCell,
    /// The worker's co-location identity; survives stop/start cycles.
    token: AffinityToken,
    lifecycle: ReentrantMutex<RefCell<Lifecycle>>,
    stop: StopToken,
    /// The live task-queue sender; unset whenever no scheduler is serving.
    task_tx: ArcSwapOption<UnboundedSender<BoxedTask>>,
    started: Signal<()>,
    stopped: Signal<()>,
}

/// Per-run state for the queue processor.
struct RunState {
    queue_rx: Mutex<Option<UnboundedReceiver<BoxedTask>>>,
    processor: Mutex<Option<tokio::task::AbortHandle>>,
}

/// Handed to the entry coroutine; observes the stop request and activates
/// the background queue.
#[derive(Clone)]
pub struct WorkerScope {
    shared: Arc<WorkerShared>,
    run: Arc<RunState>,
}

impl WorkerScope {
    /// Activate the background queue processor on the worker's scheduler.
    ///
    /// The processor takes queued futures one at a time and awaits each to
    /// completion; a panicking task is logged and the queue continues.
    /// Must be called from the entry coroutine. Calling it twice in one run
    /// logs a warning and does nothing.
    pub fn start_queue(&self) {
        let Some(mut queue) = self.run.queue_rx.lock().take() else {
            tracing::warn!(
                target: "axon_core::worker",
                "queue processor is already active"
            );
            return;
        };

        let stop = self.shared.stop.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.tripped() => break,
                    next = queue.recv() => {
                        let Some(task) = next else { break };
                        // Run to completion before taking the next item;
                        // the spawned task contains the panic.
                        let join = tokio::spawn(task);
                        if let Err(err) = join.await {
                            if err.is_panic() {
                                tracing::error!(
                                    target: "axon_core::worker",
                                    "queued task panicked"
                                );
                            }
                        }
                    }
                }
            }
        });
        *self.run.processor.lock() = Some(task.abort_handle());
    }

    /// Suspend until a stop has been requested.
    pub async fn stopping(&self) {
        self.shared.stop.tripped().await;
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.shared.stop.is_tripped()
    }
}

/// Builder for [`Worker`].
pub struct WorkerBuilder {
    name: String,
    entry: Option<EntryFn>,
}

impl WorkerBuilder {
    /// Start from the defaults: an `axon-worker` thread with the default
    /// entry coroutine.
    pub fn new() -> Self {
        Self {
            name: "axon-worker".to_string(),
            entry: None,
        }
    }

    /// Set the worker thread's name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the entry coroutine run on the worker's scheduler each start.
    ///
    /// The worker shuts down when the entry returns, so entries that
    /// should keep the worker alive must await
    /// [`WorkerScope::stopping`].
    pub fn entry<F, Fut>(mut self, entry: F) -> Self
    where
        F: Fn(WorkerScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.entry = Some(Arc::new(move |scope| Box::pin(entry(scope)) as BoxedTask));
        self
    }

    /// Build the worker.
    ///
    /// The worker is signal-aware, so construction requires a scheduler on
    /// the current thread and fails with
    /// [`AxonError::NoLoop`] otherwise.
    pub fn build(self) -> Result<Worker> {
        let record = Affinity::capture()?;
        let token = record.token();
        let affinity = AffinityCell::with(record);
        let started = Signal::from_cell(affinity.clone());
        let stopped = Signal::from_cell(affinity.clone());
        Ok(Worker {
            shared: Arc::new(WorkerShared {
                affinity,
                token,
                lifecycle: ReentrantMutex::new(RefCell::new(Lifecycle {
                    state: WorkerState::Stopped,
                    thread: None,
                })),
                stop: StopToken::new(),
                task_tx: ArcSwapOption::empty(),
                started,
                stopped,
            }),
            entry: Mutex::new(self.entry.unwrap_or_else(|| Arc::new(default_entry))),
            name: self.name,
        })
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The default entry: queue processing plus waiting for the stop request.
fn default_entry(scope: WorkerScope) -> BoxedTask {
    Box::pin(async move {
        scope.start_queue();
        scope.stopping().await;
    })
}

/// A signal-aware object owning a dedicated scheduler thread.
///
/// See the [module documentation](self) for an overview.
pub struct Worker {
    shared: Arc<WorkerShared>,
    entry: Mutex<EntryFn>,
    name: String,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// A builder with the default configuration.
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    /// A worker with the default name and entry coroutine.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Emitted on the worker's thread once its scheduler is serving.
    pub fn started(&self) -> &Signal<()> {
        &self.shared.started
    }

    /// Emitted on the worker's thread as its scheduler winds down.
    pub fn stopped(&self) -> &Signal<()> {
        &self.shared.stopped
    }

    /// The current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.lifecycle.lock().borrow().state
    }

    /// Whether the worker's scheduler is serving.
    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Replace the entry coroutine. Takes effect at the next `start`.
    pub fn set_entry<F, Fut>(&self, entry: F)
    where
        F: Fn(WorkerScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.entry.lock() = Arc::new(move |scope| Box::pin(entry(scope)) as BoxedTask);
    }

    /// Spawn the worker thread and bring up its scheduler.
    ///
    /// In the new thread: build the scheduler, publish the loop and thread
    /// into the worker's affinity record, create the task queue, emit
    /// [`started`](Self::started), schedule the entry task, and serve until
    /// stopped.
    ///
    /// Fails with [`AxonError::AlreadyStarted`] unless the worker is
    /// `Stopped`.
    pub fn start(&self) -> Result<()> {
        {
            let guard = self.shared.lifecycle.lock();
            let mut lifecycle = guard.borrow_mut();
            if lifecycle.state != WorkerState::Stopped {
                return Err(AxonError::AlreadyStarted);
            }
            lifecycle.state = WorkerState::Starting;
        }
        self.shared.stop.reset();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();
        let entry = self.entry.lock().clone();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker_main(shared, entry, ready_tx))
            .expect("failed to spawn worker thread");

        {
            let guard = self.shared.lifecycle.lock();
            guard.borrow_mut().thread = Some(handle);
        }

        // Wait for the thread to publish its scheduler so callers can rely
        // on the worker being addressable once `start` returns.
        if ready_rx.recv_timeout(START_READY_TIMEOUT).is_err() {
            tracing::warn!(
                target: "axon_core::worker",
                name = %self.name,
                "worker scheduler did not come up within {START_READY_TIMEOUT:?}"
            );
        }
        tracing::debug!(target: "axon_core::worker", name = %self.name, "worker starting");
        Ok(())
    }

    /// Request shutdown and wait for the worker thread, bounded.
    ///
    /// Idempotent: a worker that is not `Starting` or `Running` is left
    /// untouched. If the thread does not finish within the bounded wait, a
    /// warning is logged and the thread is abandoned.
    pub fn stop(&self) {
        let handle = {
            let guard = self.shared.lifecycle.lock();
            let mut lifecycle = guard.borrow_mut();
            match lifecycle.state {
                WorkerState::Starting | WorkerState::Running => {}
                WorkerState::Stopped | WorkerState::Stopping => return,
            }
            lifecycle.state = WorkerState::Stopping;
            lifecycle.thread.take()
        };

        self.shared.stop.trip();

        if let Some(handle) = handle {
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    break;
                }
                if Instant::now() >= deadline {
                    tracing::warn!(
                        target: "axon_core::worker",
                        name = %self.name,
                        "worker thread did not stop within {STOP_JOIN_TIMEOUT:?}"
                    );
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }

        let guard = self.shared.lifecycle.lock();
        guard.borrow_mut().state = WorkerState::Stopped;
        // Clear the published loop and thread; the object is no longer
        // addressable until the next start.
        self.shared.affinity.clear();
        self.shared.task_tx.store(None);
        tracing::debug!(target: "axon_core::worker", name = %self.name, "worker stopped");
    }

    /// Enqueue a future for sequential execution on the worker's thread.
    ///
    /// Thread-safe; tasks run in submission order, one at a time, once the
    /// queue processor is active. Fails with
    /// [`AxonError::WorkerNotStarted`] when the worker is not running.
    pub fn queue_task<Fut>(&self, task: Fut) -> Result<()>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self.shared.task_tx.load_full() {
            Some(sender) => sender
                .send(Box::pin(task))
                .map_err(|_| AxonError::WorkerNotStarted),
            None => Err(AxonError::WorkerNotStarted),
        }
    }

    /// Re-bind `target` to this worker's thread and scheduler.
    ///
    /// The worker's thread, loop and affinity token are copied onto the
    /// target, so automatic dispatch between the target and the worker
    /// resolves to direct calls while dispatch from elsewhere queues onto
    /// the worker's loop. Fails with [`AxonError::WorkerNotStarted`] before
    /// `start`.
    ///
    /// Must not be called from a slot executing on the target's current
    /// loop; the target must be idle while its affinity changes.
    pub fn move_to_thread(&self, target: &dyn SignalAware) -> Result<()> {
        let guard = self.shared.lifecycle.lock();
        if guard.borrow().state != WorkerState::Running {
            return Err(AxonError::WorkerNotStarted);
        }
        let affinity = self
            .shared
            .affinity
            .get()
            .ok_or(AxonError::WorkerNotStarted)?;

        if in_emission() {
            if let Some(current) = target.affinity().get() {
                if current.thread() == thread::current().id() {
                    tracing::warn!(
                        target: "axon_core::worker",
                        "move_to_thread called from a slot on the target's own loop"
                    );
                }
            }
        }

        target.affinity().set(affinity);
        Ok(())
    }
}

impl SignalAware for Worker {
    fn affinity(&self) -> &AffinityCell {
        &self.shared.affinity
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Request shutdown without blocking; the thread winds down on its
        // own once the stop token trips.
        self.shared.stop.trip();
    }
}

static_assertions::assert_impl_all!(Worker: Send, Sync);

/// Body of the worker thread: scheduler bring-up, entry supervision, and
/// the ordered shutdown sequence.
fn worker_main(
    shared: Arc<WorkerShared>,
    entry: EntryFn,
    ready_tx: crossbeam_channel::Sender<()>,
) {
    let runtime = match Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(
                target: "axon_core::worker",
                error = %err,
                "failed to build the worker scheduler"
            );
            let guard = shared.lifecycle.lock();
            guard.borrow_mut().state = WorkerState::Stopped;
            drop(ready_tx);
            return;
        }
    };

    let loop_handle = LoopHandle::install(runtime.handle().clone());
    let (task_tx, task_rx) = mpsc::unbounded_channel();

    {
        let guard = shared.lifecycle.lock();
        let mut lifecycle = guard.borrow_mut();
        // Publish the loop and thread. The token is the worker's stable
        // identity, so objects moved here earlier stay co-located across
        // restarts.
        shared.affinity.set(Affinity::new(
            thread::current().id(),
            loop_handle.clone(),
            shared.token,
        ));
        shared.task_tx.store(Some(Arc::new(task_tx)));
        // A stop that raced the spawn has already moved the state on; the
        // tripped stop token makes the run below wind down immediately.
        if lifecycle.state == WorkerState::Starting {
            lifecycle.state = WorkerState::Running;
        }
    }
    let _ = ready_tx.send(());

    let run = Arc::new(RunState {
        queue_rx: Mutex::new(Some(task_rx)),
        processor: Mutex::new(None),
    });
    let scope = WorkerScope {
        shared: shared.clone(),
        run: run.clone(),
    };

    runtime.block_on(async {
        shared.started.emit(());

        let mut entry_task = tokio::spawn(entry(scope));

        let outcome = tokio::select! {
            result = &mut entry_task => Some(result),
            _ = shared.stop.tripped() => None,
        };
        let outcome = match outcome {
            Some(result) => Some(result),
            // Stop requested; give the entry a grace period to observe it
            // before cancelling.
            None => {
                tokio::select! {
                    result = &mut entry_task => Some(result),
                    _ = tokio::time::sleep(ENTRY_STOP_GRACE) => {
                        entry_task.abort();
                        None
                    }
                }
            }
        };
        if let Some(Err(err)) = outcome {
            if err.is_panic() {
                tracing::error!(target: "axon_core::worker", "entry task panicked");
            }
        }

        // The entry may have returned on its own; shut down either way.
        shared.stop.trip();

        if let Some(processor) = run.processor.lock().take() {
            processor.abort();
        }

        shared.stopped.emit(());
        // One scheduling turn so `stopped` listeners on this loop run
        // before the scheduler halts.
        tokio::task::yield_now().await;
    });

    loop_handle.mark_stopped();
    shared.task_tx.store(None);
}
