//! Thread affinity records for signal-aware objects.
//!
//! Every signal-aware object is bound to an owning thread and the
//! cooperative scheduler running on it. Dispatch compares affinity records
//! to decide whether a slot can run inline or must be posted to its owner's
//! loop, and [`Worker::move_to_thread`](crate::Worker::move_to_thread)
//! re-binds objects to a worker's thread by replacing their record.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::RwLock;

use crate::error::Result;
use crate::event_loop::LoopHandle;

/// Global counter for minting affinity tokens.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque co-location identity.
///
/// Two objects carrying equal tokens live on the same scheduler for
/// dispatch purposes. A freshly constructed object gets its own token;
/// moving an object to a worker copies the worker's token onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityToken(u64);

impl AffinityToken {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// The `(thread, loop, token)` record binding an object to its scheduler.
///
/// The three fields are always populated together; a record is replaced
/// wholesale, never partially mutated.
#[derive(Debug, Clone)]
pub struct Affinity {
    thread: ThreadId,
    event_loop: LoopHandle,
    token: AffinityToken,
}

impl Affinity {
    /// Capture the current thread and its scheduler, minting a fresh token.
    ///
    /// Fails with [`AxonError::NoLoop`](crate::AxonError::NoLoop) when no
    /// scheduler runs on the calling thread; constructing signal-aware
    /// objects outside a scheduler is a caller error.
    pub fn capture() -> Result<Self> {
        Ok(Self {
            thread: thread::current().id(),
            event_loop: LoopHandle::current()?,
            token: AffinityToken::fresh(),
        })
    }

    pub(crate) fn new(thread: ThreadId, event_loop: LoopHandle, token: AffinityToken) -> Self {
        Self {
            thread,
            event_loop,
            token,
        }
    }

    /// The owning thread.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The scheduler running on the owning thread.
    pub fn event_loop(&self) -> &LoopHandle {
        &self.event_loop
    }

    /// The co-location token.
    pub fn token(&self) -> AffinityToken {
        self.token
    }
}

/// A shared, mutable affinity record.
///
/// Signals, connections and slot adapters hold clones of the cell, so a
/// re-bind through `move_to_thread` is observed by every party that refers
/// to the object. An unset cell is the "affinity fields not yet
/// initialized" state used by lazily initialized member slots.
#[derive(Clone, Default)]
pub struct AffinityCell {
    inner: Arc<RwLock<Option<Affinity>>>,
}

impl AffinityCell {
    /// A cell with no affinity yet; slot adapters fill it in on first call.
    pub fn unset() -> Self {
        Self::default()
    }

    pub(crate) fn with(affinity: Affinity) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(affinity))),
        }
    }

    /// Snapshot of the current record, if set.
    pub fn get(&self) -> Option<Affinity> {
        self.inner.read().clone()
    }

    /// Whether the record has been populated.
    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Replace the record wholesale.
    pub(crate) fn set(&self, affinity: Affinity) {
        *self.inner.write() = Some(affinity);
    }

    /// Reset the record to unset. Used when a worker's scheduler goes away.
    pub(crate) fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Populate the record if unset, returning the record now in effect.
    ///
    /// Used by slot adapters for lazy initialization; the write lock makes
    /// concurrent first calls agree on one record.
    pub(crate) fn set_if_unset(&self, affinity: Affinity) -> Affinity {
        let mut guard = self.inner.write();
        guard.get_or_insert(affinity).clone()
    }

    /// Whether two cells refer to the same object's record.
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for AffinityCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(affinity) => f
                .debug_struct("AffinityCell")
                .field("thread", &affinity.thread())
                .field("token", &affinity.token())
                .finish(),
            None => f.write_str("AffinityCell(unset)"),
        }
    }
}

/// Implemented by everything that carries an affinity record: the base
/// struct, workers, and user objects that embed either.
pub trait SignalAware {
    /// The object's affinity record.
    fn affinity(&self) -> &AffinityCell;
}

/// The building block for signal-aware objects.
///
/// Embed a `SignalBase` in a struct and construct it on the thread (and
/// scheduler) the object's slots should run on. Signals declared on the
/// object borrow the base at construction so dispatch knows the owner's
/// affinity.
///
/// # Example
///
/// ```
/// use axon_core::{Signal, SignalBase};
///
/// struct Sensor {
///     base: SignalBase,
///     reading_changed: Signal<f64>,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> axon_core::Result<()> {
/// let base = SignalBase::new()?;
/// let reading_changed = Signal::new(&base);
/// let sensor = Sensor { base, reading_changed };
/// sensor.reading_changed.emit(21.5);
/// # Ok(())
/// # }
/// ```
pub struct SignalBase {
    cell: AffinityCell,
}

impl SignalBase {
    /// Bind to the current thread and its scheduler.
    ///
    /// Fails with [`AxonError::NoLoop`](crate::AxonError::NoLoop) when no
    /// scheduler is running on the calling thread.
    pub fn new() -> Result<Self> {
        Ok(Self {
            cell: AffinityCell::with(Affinity::capture()?),
        })
    }
}

impl SignalAware for SignalBase {
    fn affinity(&self) -> &AffinityCell {
        &self.cell
    }
}

impl std::fmt::Debug for SignalBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBase").field("cell", &self.cell).finish()
    }
}

static_assertions::assert_impl_all!(SignalBase: Send, Sync);
static_assertions::assert_impl_all!(AffinityCell: Send, Sync);
