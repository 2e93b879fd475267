//! Member slot adapters.
//!
//! A member slot wraps a callable together with its owner's affinity record
//! so that calling it *directly* (not through a signal) still runs the
//! body on the owner's thread. A call from a foreign thread is marshalled
//! to the owner's scheduler and the caller observes the return value, or
//! the slot's panic, as if the call had been local.
//!
//! Dispatch made by [`Signal::emit`](crate::Signal::emit) has already
//! chosen the thread each slot runs on, so an adapter invoked inside an
//! emission skips its own marshalling (see [`crate::emission`]).
//!
//! # Example
//!
//! ```
//! use axon_core::{MemberSlot, SignalBase};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axon_core::Result<()> {
//! let base = SignalBase::new()?;
//! let double = MemberSlot::new(&base, |value: i32| value * 2);
//!
//! // On the owner thread this is a plain call; from any other thread the
//! // body would run on this scheduler and the caller would block for the
//! // result.
//! assert_eq!(double.call(21)?, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::thread;

use crate::affinity::{Affinity, AffinityCell, SignalAware};
use crate::emission::in_emission;
use crate::error::{AxonError, Result};

type BoxCallFuture<Out> = Pin<Box<dyn Future<Output = Out> + Send>>;

/// A synchronous callable bound to an owner's scheduler.
///
/// Cloning shares the underlying callable and owner record; clones compare
/// equal for disconnect matching.
pub struct MemberSlot<Args, Out> {
    owner: AffinityCell,
    func: Arc<dyn Fn(Args) -> Out + Send + Sync>,
}

impl<Args, Out> Clone for MemberSlot<Args, Out> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            func: self.func.clone(),
        }
    }
}

impl<Args, Out> MemberSlot<Args, Out>
where
    Args: Send + 'static,
    Out: Send + 'static,
{
    /// Wrap `func` as a slot owned by `owner`.
    pub fn new<F>(owner: &dyn SignalAware, func: F) -> Self
    where
        F: Fn(Args) -> Out + Send + Sync + 'static,
    {
        Self {
            owner: owner.affinity().clone(),
            func: Arc::new(func),
        }
    }

    /// Wrap `func` with no owner yet.
    ///
    /// The affinity record is initialized lazily from the thread and
    /// scheduler of the first call.
    pub fn detached<F>(func: F) -> Self
    where
        F: Fn(Args) -> Out + Send + Sync + 'static,
    {
        Self {
            owner: AffinityCell::unset(),
            func: Arc::new(func),
        }
    }

    pub(crate) fn owner_cell(&self) -> &AffinityCell {
        &self.owner
    }

    /// Identity of the wrapped callable, stable across clones.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.func) as *const () as usize
    }

    fn ensure_affinity(&self) -> Result<Affinity> {
        if let Some(affinity) = self.owner.get() {
            return Ok(affinity);
        }
        Ok(self.owner.set_if_unset(Affinity::capture()?))
    }

    /// Invoke the slot, marshalling to the owner's thread when necessary.
    ///
    /// Inside an emission, or on the owner's own thread, this is a plain
    /// call. From a foreign thread the body is posted to the owner's
    /// scheduler and the caller blocks until it completes; the return value
    /// comes back and a panic in the body resumes on the calling thread.
    ///
    /// Fails with [`AxonError::NoLoop`] when the owner's scheduler is
    /// unavailable, or when the record is unset and no scheduler runs on
    /// the calling thread to initialize it from.
    pub fn call(&self, args: Args) -> Result<Out> {
        let owner = self.ensure_affinity()?;

        if in_emission() || thread::current().id() == owner.thread() {
            return Ok((self.func)(args));
        }

        let event_loop = owner.event_loop();
        if !event_loop.is_running() {
            return Err(AxonError::NoLoop);
        }

        tracing::trace!(
            target: "axon_core::slot",
            owner_thread = ?owner.thread(),
            "marshalling direct call to owner thread"
        );

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let func = self.func.clone();
        event_loop.post(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(args)));
            let _ = reply_tx.send(outcome);
        });

        match reply_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            // The scheduler dropped the closure without running it.
            Err(_) => Err(AxonError::NoLoop),
        }
    }
}

/// A suspending callable bound to an owner's scheduler.
///
/// The asynchronous counterpart of [`MemberSlot`]: a call from a foreign
/// thread spawns the body as a task on the owner's scheduler and the
/// caller's own loop awaits its completion.
pub struct AsyncMemberSlot<Args, Out> {
    owner: AffinityCell,
    func: Arc<dyn Fn(Args) -> BoxCallFuture<Out> + Send + Sync>,
}

impl<Args, Out> Clone for AsyncMemberSlot<Args, Out> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            func: self.func.clone(),
        }
    }
}

impl<Args, Out> AsyncMemberSlot<Args, Out>
where
    Args: Send + 'static,
    Out: Send + 'static,
{
    /// Wrap the suspending `func` as a slot owned by `owner`.
    pub fn new<F, Fut>(owner: &dyn SignalAware, func: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Out> + Send + 'static,
    {
        Self {
            owner: owner.affinity().clone(),
            func: Arc::new(move |args| Box::pin(func(args)) as BoxCallFuture<Out>),
        }
    }

    /// Wrap the suspending `func` with no owner yet; see
    /// [`MemberSlot::detached`].
    pub fn detached<F, Fut>(func: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Out> + Send + 'static,
    {
        Self {
            owner: AffinityCell::unset(),
            func: Arc::new(move |args| Box::pin(func(args)) as BoxCallFuture<Out>),
        }
    }

    pub(crate) fn owner_cell(&self) -> &AffinityCell {
        &self.owner
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.func) as *const () as usize
    }

    fn ensure_affinity(&self) -> Result<Affinity> {
        if let Some(affinity) = self.owner.get() {
            return Ok(affinity);
        }
        Ok(self.owner.set_if_unset(Affinity::capture()?))
    }

    /// Invoke the slot, marshalling to the owner's scheduler when necessary.
    ///
    /// Inside an emission, or on the owner's own thread, the body runs in
    /// place. From a foreign thread the body is spawned on the owner's
    /// scheduler and awaited from here; the result comes back and a panic
    /// in the body resumes in the caller.
    pub async fn call(&self, args: Args) -> Result<Out> {
        let owner = self.ensure_affinity()?;

        if in_emission() || thread::current().id() == owner.thread() {
            return Ok((self.func)(args).await);
        }

        let event_loop = owner.event_loop().clone();
        if !event_loop.is_running() {
            return Err(AxonError::NoLoop);
        }

        tracing::trace!(
            target: "axon_core::slot",
            owner_thread = ?owner.thread(),
            "marshalling suspending call to owner scheduler"
        );

        let task = event_loop.spawn((self.func)(args));
        match task.await {
            Ok(value) => Ok(value),
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            // The owner scheduler shut down before the task ran.
            Err(_) => Err(AxonError::NoLoop),
        }
    }
}

static_assertions::assert_impl_all!(MemberSlot<i32, ()>: Send, Sync);
static_assertions::assert_impl_all!(AsyncMemberSlot<i32, ()>: Send, Sync);
