//! Cooperative scheduler handles.
//!
//! Axon runs one single-threaded cooperative scheduler (a tokio
//! current-thread runtime) per signal-aware thread. [`LoopHandle`] is the
//! cloneable, thread-safe handle other threads use to post closures and
//! spawn tasks onto that scheduler, the cross-thread marshalling primitive
//! behind queued signal dispatch and slot adapters.
//!
//! Within one handle, posts are processed in the order they were made, so a
//! receiver observes deliveries from a single emitting thread in emission
//! order.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{AxonError, Result};

thread_local! {
    /// The canonical handle for the scheduler running on this thread.
    static CURRENT_LOOP: RefCell<Option<LoopHandle>> = const { RefCell::new(None) };
}

/// State shared by every clone of a loop handle.
struct LoopShared {
    /// Cleared when the scheduler is shut down (worker loops only; ambient
    /// schedulers are assumed live while reachable).
    running: AtomicBool,
    /// Number of dispatched closures and tasks not yet finished.
    pending: AtomicU64,
}

/// Decrements the pending-work counter when dropped, so a panicking task
/// still settles the count.
struct PendingGuard(Arc<LoopShared>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a single-threaded cooperative scheduler.
///
/// Cloning is cheap; all clones observe the same liveness and pending-work
/// state. The handle can be used from any thread; the work it accepts runs
/// on the scheduler's own thread.
#[derive(Clone)]
pub struct LoopHandle {
    handle: Handle,
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// The scheduler running on the current thread.
    ///
    /// The first capture on a thread registers the handle as that thread's
    /// canonical scheduler handle; later captures return the same one.
    /// Fails with [`AxonError::NoLoop`] when the thread runs no scheduler.
    pub fn current() -> Result<Self> {
        CURRENT_LOOP.with(|slot| {
            if let Some(existing) = slot.borrow().as_ref() {
                if existing.is_running() {
                    return Ok(existing.clone());
                }
            }
            let handle = Handle::try_current().map_err(|_| AxonError::NoLoop)?;
            let current = Self::from_handle(handle);
            *slot.borrow_mut() = Some(current.clone());
            Ok(current)
        })
    }

    fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            shared: Arc::new(LoopShared {
                running: AtomicBool::new(true),
                pending: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handle` as the current thread's scheduler.
    ///
    /// Called by workers when they bring up their own runtime, before any
    /// task can capture the loop.
    pub(crate) fn install(handle: Handle) -> Self {
        let installed = Self::from_handle(handle);
        CURRENT_LOOP.with(|slot| {
            *slot.borrow_mut() = Some(installed.clone());
        });
        installed
    }

    /// Mark the scheduler as shut down. Posts after this are dropped by the
    /// dispatcher with a warning.
    pub(crate) fn mark_stopped(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    /// Whether the scheduler still accepts work.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn pending_guard(&self) -> PendingGuard {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        PendingGuard(self.shared.clone())
    }

    /// Number of dispatched closures and tasks that have not finished yet.
    pub(crate) fn pending(&self) -> u64 {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Post a closure to run on the scheduler's thread.
    ///
    /// Thread-safe and non-blocking; closures from one posting sequence run
    /// in order. A panicking closure is contained and logged.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.pending_guard();
        self.handle.spawn(async move {
            let _guard = guard;
            if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                tracing::error!(
                    target: "axon_core::event_loop",
                    "posted closure panicked"
                );
            }
        });
    }

    /// Spawn a future as a task on the scheduler.
    pub fn spawn<Fut>(&self, future: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let guard = self.pending_guard();
        self.handle.spawn(async move {
            let _guard = guard;
            future.await
        })
    }

    /// Spawn a task whose panic is caught and logged on this scheduler.
    ///
    /// Used for fire-and-forget dispatch where no caller observes the join
    /// handle.
    pub fn spawn_logged<Fut>(&self, what: &'static str, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = self.spawn(future);
        self.handle.spawn(async move {
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::error!(
                        target: "axon_core::event_loop",
                        task = what,
                        "task panicked"
                    );
                }
            }
        });
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Suspend until no dispatch work remains on the current scheduler.
///
/// Repeatedly yields so pending queued deliveries, marshalled calls and
/// slot tasks get to run, returning once the scheduler's tracked work count
/// reaches zero. Call this at the end of a scheduler's life to let
/// in-flight deliveries settle.
pub async fn graceful_shutdown() -> Result<()> {
    let current = LoopHandle::current()?;
    loop {
        tokio::task::yield_now().await;
        if current.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    Ok(())
}
