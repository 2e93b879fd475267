//! Emission context tracking.
//!
//! While a signal is being emitted, the dispatcher has already decided on
//! which thread each slot runs. Slot adapters consult this flag so that a
//! slot invoked during an emission (directly, or from the closure a queued
//! dispatch posted to its loop) does not marshal itself a second time.
//!
//! The flag is a thread-local covering the dynamic extent of
//! [`Signal::emit`](crate::Signal::emit). Queued dispatch re-enters the
//! scope on the target thread, and tasks spawned for suspending slots hold
//! it for every poll, so the flag behaves like a task-local that dispatch
//! hands from thread to thread.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static IN_EMISSION: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside a signal emission.
///
/// Slot adapters use this to skip cross-thread marshalling; it is exposed
/// for consumers that build their own dispatch-aware helpers (the property
/// extension is one).
pub fn in_emission() -> bool {
    IN_EMISSION.with(Cell::get)
}

/// Marks the dynamic extent of an emission on the current thread.
///
/// Restores the previous value on drop so nested emissions compose.
pub(crate) struct EmissionScope {
    previous: bool,
}

impl EmissionScope {
    pub(crate) fn enter() -> Self {
        Self {
            previous: IN_EMISSION.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for EmissionScope {
    fn drop(&mut self) {
        IN_EMISSION.with(|flag| flag.set(self.previous));
    }
}

/// A future that runs every poll inside an emission scope.
///
/// Dispatch wraps the tasks it spawns for suspending slots in this, so the
/// flag is set exactly while the task is actually running on its thread and
/// never leaks to sibling tasks on the same scheduler.
pub(crate) struct ScopedFuture<F> {
    inner: F,
}

pub(crate) fn scoped<F>(inner: F) -> ScopedFuture<F>
where
    F: Future + Unpin,
{
    ScopedFuture { inner }
}

impl<F> Future for ScopedFuture<F>
where
    F: Future + Unpin,
{
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = EmissionScope::enter();
        Pin::new(&mut self.inner).poll(cx)
    }
}
