//! Signal/slot dispatch.
//!
//! A [`Signal`] is a named broadcast point owned by a signal-aware object.
//! Slots (synchronous or suspending callables, free-standing or bound to a
//! receiver) are connected to it and invoked on emission. Per connection,
//! emission chooses between invoking the slot inline on the emitting thread
//! (direct dispatch) and posting it to the receiver's scheduler (queued
//! dispatch).
//!
//! # Connection kinds
//!
//! - **Direct**: invoke inline on the emitting thread.
//! - **Queued**: post to the receiver's scheduler.
//! - **Auto** (default): resolved at emit time. Suspending slots are always
//!   queued; synchronous slots run inline when the receiver and the signal
//!   owner share an affinity token and are queued when the tokens differ.
//!
//! # Ordering
//!
//! Connections fire in insertion order within one emission, and a receiver
//! observes emissions from a single thread in emission order. Queued
//! dispatch is fire-and-forget: the emitter never blocks and never observes
//! a slot's result or panic.
//!
//! # Example
//!
//! ```
//! use axon_core::{Signal, SignalBase};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axon_core::Result<()> {
//! let base = SignalBase::new()?;
//! let text_changed = Signal::<String>::new(&base);
//!
//! let id = text_changed.connect(|text| println!("text changed to {text}"));
//! text_changed.emit("hello".to_string());
//! text_changed.disconnect(id);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::affinity::{Affinity, AffinityCell, SignalAware};
use crate::emission::{self, EmissionScope};
use crate::event_loop::LoopHandle;
use crate::slot::{AsyncMemberSlot, MemberSlot};

/// The future type stored for suspending slots.
pub(crate) type BoxSlotFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// How a connected slot is invoked when the signal is emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Invoke the slot inline on the emitting thread.
    Direct,
    /// Post the slot to the receiver's scheduler.
    Queued,
    /// Decide per emission from the affinity records of the receiver and
    /// the signal owner. The default.
    #[default]
    Auto,
}

/// Identifies one connection on one signal.
///
/// Returned by the `connect` family and consumed by
/// [`Signal::disconnect`]. Each connection gets a distinct id even when the
/// same slot is connected twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// The stored callable of a connection.
enum SlotKind<Args> {
    Sync(Arc<dyn Fn(Args) + Send + Sync>),
    Suspending(Arc<dyn Fn(Args) -> BoxSlotFuture + Send + Sync>),
}

impl<Args> Clone for SlotKind<Args> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(f.clone()),
            Self::Suspending(f) => Self::Suspending(f.clone()),
        }
    }
}

impl<Args> SlotKind<Args> {
    fn is_suspending(&self) -> bool {
        matches!(self, Self::Suspending(_))
    }
}

/// One entry in a signal's connection list.
struct Connection<Args> {
    id: ConnectionId,
    receiver: Option<AffinityCell>,
    slot: SlotKind<Args>,
    kind: ConnectionKind,
    /// Identity of the underlying adapter for disconnect-by-slot matching.
    adapter: Option<usize>,
}

impl<Args> Clone for Connection<Args> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            receiver: self.receiver.clone(),
            slot: self.slot.clone(),
            kind: self.kind,
            adapter: self.adapter,
        }
    }
}

/// The dispatch a connection resolved to for one emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Direct,
    Queued,
}

/// Resolve the effective dispatch for one connection.
///
/// Extracted from `emit` so the decision table can be tested on its own.
fn resolve_dispatch<Args>(conn: &Connection<Args>, owner: Option<&Affinity>) -> Dispatch {
    match conn.kind {
        ConnectionKind::Direct => Dispatch::Direct,
        ConnectionKind::Queued => Dispatch::Queued,
        ConnectionKind::Auto => {
            if conn.slot.is_suspending() {
                return Dispatch::Queued;
            }
            let receiver = conn.receiver.as_ref().and_then(AffinityCell::get);
            match (receiver, owner) {
                (Some(receiver), Some(owner)) => {
                    if receiver.token() == owner.token() {
                        Dispatch::Direct
                    } else {
                        Dispatch::Queued
                    }
                }
                _ => Dispatch::Direct,
            }
        }
    }
}

/// A broadcast point carrying an ordered list of connections.
///
/// `Args` is the payload delivered to each slot; use `()` for signals
/// without one and a tuple for several values. The signal belongs to
/// exactly one owner whose affinity record drives automatic dispatch
/// resolution.
///
/// Connections hold strong references to whatever the slot captured; there
/// is no automatic disconnect when a receiver goes away.
pub struct Signal<Args> {
    owner: AffinityCell,
    connections: Mutex<Vec<Connection<Args>>>,
    next_id: AtomicU64,
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Create a signal owned by `owner`.
    pub fn new(owner: &dyn SignalAware) -> Self {
        Self::from_cell(owner.affinity().clone())
    }

    pub(crate) fn from_cell(owner: AffinityCell) -> Self {
        Self {
            owner,
            connections: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn push(
        &self,
        receiver: Option<AffinityCell>,
        slot: SlotKind<Args>,
        kind: ConnectionKind,
        adapter: Option<usize>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.lock().push(Connection {
            id,
            receiver,
            slot,
            kind,
            adapter,
        });
        id
    }

    /// Connect a synchronous free callable with [`ConnectionKind::Auto`].
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.connect_with_kind(slot, ConnectionKind::Auto)
    }

    /// Connect a synchronous free callable with an explicit kind.
    pub fn connect_with_kind<F>(&self, slot: F, kind: ConnectionKind) -> ConnectionId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.push(None, SlotKind::Sync(Arc::new(slot)), kind, None)
    }

    /// Connect a suspending free callable with [`ConnectionKind::Auto`].
    ///
    /// Automatic resolution always queues suspending slots; they run as new
    /// tasks on the target scheduler.
    pub fn connect_async<F, Fut>(&self, slot: F) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connect_async_with_kind(slot, ConnectionKind::Auto)
    }

    /// Connect a suspending free callable with an explicit kind.
    pub fn connect_async_with_kind<F, Fut>(&self, slot: F, kind: ConnectionKind) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped = Arc::new(move |args| Box::pin(slot(args)) as BoxSlotFuture);
        self.push(None, SlotKind::Suspending(wrapped), kind, None)
    }

    /// Connect a synchronous slot bound to `receiver`.
    ///
    /// The receiver's affinity record is what automatic resolution compares
    /// against the signal owner's, and what queued dispatch posts to.
    pub fn connect_member<F>(&self, receiver: &dyn SignalAware, slot: F) -> ConnectionId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.connect_member_with_kind(receiver, slot, ConnectionKind::Auto)
    }

    /// Connect a synchronous bound slot with an explicit kind.
    pub fn connect_member_with_kind<F>(
        &self,
        receiver: &dyn SignalAware,
        slot: F,
        kind: ConnectionKind,
    ) -> ConnectionId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        self.push(
            Some(receiver.affinity().clone()),
            SlotKind::Sync(Arc::new(slot)),
            kind,
            None,
        )
    }

    /// Connect a suspending slot bound to `receiver`.
    pub fn connect_member_async<F, Fut>(&self, receiver: &dyn SignalAware, slot: F) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connect_member_async_with_kind(receiver, slot, ConnectionKind::Auto)
    }

    /// Connect a suspending bound slot with an explicit kind.
    pub fn connect_member_async_with_kind<F, Fut>(
        &self,
        receiver: &dyn SignalAware,
        slot: F,
        kind: ConnectionKind,
    ) -> ConnectionId
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped = Arc::new(move |args| Box::pin(slot(args)) as BoxSlotFuture);
        self.push(
            Some(receiver.affinity().clone()),
            SlotKind::Suspending(wrapped),
            kind,
            None,
        )
    }

    /// Connect a member-slot adapter.
    ///
    /// The adapter's owner becomes the connection's receiver and its
    /// identity is kept so [`Signal::disconnect_slot`] can match it later.
    /// The adapter's return value is discarded; a failed invocation is
    /// logged.
    pub fn connect_slot<Out>(&self, adapter: &MemberSlot<Args, Out>) -> ConnectionId
    where
        Out: Send + 'static,
    {
        self.connect_slot_with_kind(adapter, ConnectionKind::Auto)
    }

    /// Connect a member-slot adapter with an explicit kind.
    pub fn connect_slot_with_kind<Out>(
        &self,
        adapter: &MemberSlot<Args, Out>,
        kind: ConnectionKind,
    ) -> ConnectionId
    where
        Out: Send + 'static,
    {
        let identity = adapter.identity();
        let receiver = adapter.owner_cell().clone();
        let adapter = adapter.clone();
        let invoke = move |args| {
            if let Err(err) = adapter.call(args) {
                tracing::warn!(
                    target: "axon_core::signal",
                    error = %err,
                    "member slot invocation failed"
                );
            }
        };
        self.push(
            Some(receiver),
            SlotKind::Sync(Arc::new(invoke)),
            kind,
            Some(identity),
        )
    }

    /// Connect a suspending member-slot adapter.
    pub fn connect_async_slot<Out>(&self, adapter: &AsyncMemberSlot<Args, Out>) -> ConnectionId
    where
        Out: Send + 'static,
    {
        self.connect_async_slot_with_kind(adapter, ConnectionKind::Auto)
    }

    /// Connect a suspending member-slot adapter with an explicit kind.
    pub fn connect_async_slot_with_kind<Out>(
        &self,
        adapter: &AsyncMemberSlot<Args, Out>,
        kind: ConnectionKind,
    ) -> ConnectionId
    where
        Out: Send + 'static,
    {
        let identity = adapter.identity();
        let receiver = adapter.owner_cell().clone();
        let adapter = adapter.clone();
        let invoke = move |args| {
            let adapter = adapter.clone();
            Box::pin(async move {
                if let Err(err) = adapter.call(args).await {
                    tracing::warn!(
                        target: "axon_core::signal",
                        error = %err,
                        "member slot invocation failed"
                    );
                }
            }) as BoxSlotFuture
        };
        self.push(
            Some(receiver),
            SlotKind::Suspending(Arc::new(invoke)),
            kind,
            Some(identity),
        )
    }

    /// Connect a slot that is disconnected when the returned guard drops.
    pub fn connect_scoped<F>(&self, slot: F) -> ConnectionGuard<'_, Args>
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        ConnectionGuard {
            signal: self,
            id: self.connect(slot),
        }
    }

    /// Remove one connection by id. Returns whether it was found.
    ///
    /// Surviving connections keep their relative order.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|conn| conn.id != id);
        connections.len() != before
    }

    /// Remove every connection made from `adapter`, returning the count.
    pub fn disconnect_slot<Out>(&self, adapter: &MemberSlot<Args, Out>) -> usize
    where
        Out: Send + 'static,
    {
        self.disconnect_adapter(adapter.identity())
    }

    /// Remove every connection made from `adapter`, returning the count.
    pub fn disconnect_async_slot<Out>(&self, adapter: &AsyncMemberSlot<Args, Out>) -> usize
    where
        Out: Send + 'static,
    {
        self.disconnect_adapter(adapter.identity())
    }

    fn disconnect_adapter(&self, identity: usize) -> usize {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|conn| conn.adapter != Some(identity));
        before - connections.len()
    }

    /// Remove every connection bound to `receiver`, returning the count.
    pub fn disconnect_receiver(&self, receiver: &dyn SignalAware) -> usize {
        let cell = receiver.affinity();
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|conn| {
            conn.receiver
                .as_ref()
                .is_none_or(|receiver_cell| !receiver_cell.same_cell(cell))
        });
        before - connections.len()
    }

    /// Remove all connections, returning how many there were.
    pub fn disconnect_all(&self) -> usize {
        let mut connections = self.connections.lock();
        let count = connections.len();
        connections.clear();
        count
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Emit the signal, delivering `args` to every connection.
    ///
    /// Iterates a snapshot of the connection list, so disconnects performed
    /// by slots during this emission take effect from the next emission on.
    /// A panicking direct slot is caught and logged; the remaining
    /// connections still fire. Queued deliveries whose target scheduler is
    /// gone are logged and skipped.
    #[tracing::instrument(skip_all, target = "axon_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        let _scope = EmissionScope::enter();
        let snapshot: Vec<Connection<Args>> = self.connections.lock().clone();
        let owner = self.owner.get();
        tracing::trace!(
            target: "axon_core::signal",
            connection_count = snapshot.len(),
            "emitting signal"
        );

        for conn in &snapshot {
            match resolve_dispatch(conn, owner.as_ref()) {
                Dispatch::Direct => self.dispatch_direct(conn, args.clone()),
                Dispatch::Queued => self.dispatch_queued(conn, args.clone()),
            }
        }
    }

    fn dispatch_direct(&self, conn: &Connection<Args>, args: Args) {
        match &conn.slot {
            SlotKind::Sync(slot) => {
                let slot = slot.clone();
                if panic::catch_unwind(AssertUnwindSafe(|| slot(args))).is_err() {
                    tracing::error!(
                        target: "axon_core::signal",
                        connection = conn.id.0,
                        kind = ?conn.kind,
                        "slot panicked during direct dispatch"
                    );
                }
            }
            SlotKind::Suspending(slot) => {
                // An explicitly direct suspending slot still needs a
                // scheduler; it runs as a task on the emitting thread's
                // loop.
                match LoopHandle::current() {
                    Ok(current) => {
                        current.spawn_logged("direct suspending slot", emission::scoped(slot(args)));
                    }
                    Err(_) => {
                        tracing::error!(
                            target: "axon_core::signal",
                            connection = conn.id.0,
                            "no scheduler on the emitting thread for a direct suspending slot"
                        );
                    }
                }
            }
        }
    }

    fn dispatch_queued(&self, conn: &Connection<Args>, args: Args) {
        let target = match &conn.receiver {
            Some(cell) => match cell.get() {
                Some(affinity) => affinity.event_loop().clone(),
                None => {
                    tracing::error!(
                        target: "axon_core::signal",
                        connection = conn.id.0,
                        "receiver has no scheduler; skipping queued dispatch"
                    );
                    return;
                }
            },
            None => match LoopHandle::current() {
                Ok(current) => current,
                Err(_) => {
                    tracing::error!(
                        target: "axon_core::signal",
                        connection = conn.id.0,
                        "no running scheduler on the emitting thread for a queued connection"
                    );
                    return;
                }
            },
        };

        if !target.is_running() {
            tracing::warn!(
                target: "axon_core::signal",
                connection = conn.id.0,
                "target scheduler is not running; delivery dropped"
            );
            return;
        }

        match &conn.slot {
            SlotKind::Sync(slot) => {
                let slot = slot.clone();
                let id = conn.id;
                target.post(move || {
                    let _scope = EmissionScope::enter();
                    if panic::catch_unwind(AssertUnwindSafe(|| slot(args))).is_err() {
                        tracing::error!(
                            target: "axon_core::signal",
                            connection = id.0,
                            "slot panicked during queued dispatch"
                        );
                    }
                });
            }
            SlotKind::Suspending(slot) => {
                target.spawn_logged("queued suspending slot", emission::scoped(slot(args)));
            }
        }
    }
}

static_assertions::assert_impl_all!(Signal<i32>: Send, Sync);

/// Disconnects its connection when dropped.
///
/// Created by [`Signal::connect_scoped`]; borrows the signal, so the
/// connection cannot outlive it.
pub struct ConnectionGuard<'a, Args: Clone + Send + 'static> {
    signal: &'a Signal<Args>,
    id: ConnectionId,
}

impl<Args: Clone + Send + 'static> ConnectionGuard<'_, Args> {
    /// The id of the guarded connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl<Args: Clone + Send + 'static> Drop for ConnectionGuard<'_, Args> {
    fn drop(&mut self) {
        self.signal.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::SignalBase;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn signal<Args: Clone + Send + 'static>() -> Signal<Args> {
        Signal::new(&SignalBase::new().unwrap())
    }

    #[tokio::test]
    async fn test_connect_emit() {
        let value_changed = signal::<i32>();
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        value_changed.connect(move |value| {
            received_clone.lock().push(value);
        });

        value_changed.emit(42);
        value_changed.emit(100);

        assert_eq!(*received.lock(), vec![42, 100]);
    }

    #[tokio::test]
    async fn test_disconnect_by_id() {
        let value_changed = signal::<i32>();
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        let id = value_changed.connect(move |value| {
            received_clone.lock().push(value);
        });

        value_changed.emit(1);
        assert!(value_changed.disconnect(id));
        assert!(!value_changed.disconnect(id));
        value_changed.emit(2);

        assert_eq!(*received.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let tick = signal::<()>();
        for _ in 0..5 {
            tick.connect(|_| {});
        }
        assert_eq!(tick.connection_count(), 5);
        assert_eq!(tick.disconnect_all(), 5);
        assert_eq!(tick.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_connections_fire_twice() {
        let tick = signal::<()>();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let count_clone = count.clone();
            tick.connect(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        tick.emit(());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_insertion_order_is_invocation_order() {
        let tick = signal::<()>();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order_clone = order.clone();
            tick.connect(move |_| order_clone.lock().push(i));
        }

        tick.emit(());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panicking_slot_does_not_abort_emission() {
        let tick = signal::<i32>();
        let received = Arc::new(Mutex::new(Vec::new()));

        let first = received.clone();
        tick.connect(move |value| first.lock().push(("first", value)));
        tick.connect(|_| panic!("subscriber failure"));
        let third = received.clone();
        tick.connect(move |value| third.lock().push(("third", value)));

        tick.emit(7);

        assert_eq!(*received.lock(), vec![("first", 7), ("third", 7)]);
    }

    #[tokio::test]
    async fn test_disconnect_during_emission_affects_next_emission_only() {
        let tick = Arc::new(signal::<()>());
        let received = Arc::new(Mutex::new(Vec::new()));

        let second_id = Arc::new(Mutex::new(None::<ConnectionId>));

        let tick_clone = tick.clone();
        let second_id_clone = second_id.clone();
        let first = received.clone();
        tick.connect(move |_| {
            first.lock().push("first");
            if let Some(id) = *second_id_clone.lock() {
                tick_clone.disconnect(id);
            }
        });

        let second = received.clone();
        *second_id.lock() = Some(tick.connect(move |_| {
            second.lock().push("second");
        }));

        // The snapshot taken at emit still contains the second slot.
        tick.emit(());
        assert_eq!(*received.lock(), vec!["first", "second"]);

        tick.emit(());
        assert_eq!(*received.lock(), vec!["first", "second", "first"]);
    }

    #[tokio::test]
    async fn test_member_same_token_runs_inline() {
        let owner = SignalBase::new().unwrap();
        let value_changed = Signal::<i32>::new(&owner);
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        value_changed.connect_member(&owner, move |value| {
            received_clone.lock().push(value);
        });

        // Same token on both sides resolves to direct dispatch, so the slot
        // has run by the time emit returns.
        value_changed.emit(42);
        assert_eq!(*received.lock(), vec![42]);
    }

    #[tokio::test]
    async fn test_member_different_token_is_queued() {
        let owner = SignalBase::new().unwrap();
        let receiver = SignalBase::new().unwrap();
        let value_changed = Signal::<i32>::new(&owner);
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        value_changed.connect_member(&receiver, move |value| {
            received_clone.lock().push(value);
        });

        value_changed.emit(42);
        // Different tokens queue even on the same scheduler; nothing has
        // run inside emit.
        assert!(received.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock(), vec![42]);
    }

    #[tokio::test]
    async fn test_explicit_queued_defers_to_loop() {
        let tick = signal::<i32>();
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        tick.connect_with_kind(
            move |value| received_clone.lock().push(value),
            ConnectionKind::Queued,
        );

        tick.emit(5);
        assert!(received.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock(), vec![5]);
    }

    #[tokio::test]
    async fn test_suspending_slot_runs_as_task() {
        let tick = signal::<i32>();
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        tick.connect_async(move |value| {
            let received = received_clone.clone();
            async move {
                tokio::task::yield_now().await;
                received.lock().push(value);
            }
        });

        tick.emit(9);
        assert!(received.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock(), vec![9]);
    }

    #[tokio::test]
    async fn test_direct_suspending_slot_spawns_on_emitting_loop() {
        let tick = signal::<i32>();
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = seen.clone();
        tick.connect_async_with_kind(
            move |value| {
                let seen = seen_clone.clone();
                async move {
                    *seen.lock() = Some((std::thread::current().id(), value));
                }
            },
            ConnectionKind::Direct,
        );

        tick.emit(3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), Some((std::thread::current().id(), 3)));
    }

    #[tokio::test]
    async fn test_queued_panics_do_not_reach_emitter() {
        let tick = signal::<()>();
        tick.connect_with_kind(|_| panic!("queued failure"), ConnectionKind::Queued);

        tick.emit(());
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Emission and the scheduler both survived.
        tick.emit(());
    }

    #[tokio::test]
    async fn test_connection_guard_disconnects_on_drop() {
        let value_changed = signal::<i32>();
        let received = Arc::new(Mutex::new(Vec::new()));

        {
            let received_clone = received.clone();
            let _guard = value_changed.connect_scoped(move |value| {
                received_clone.lock().push(value);
            });
            value_changed.emit(1);
        }

        value_changed.emit(2);
        assert_eq!(*received.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_disconnect_receiver() {
        let owner = SignalBase::new().unwrap();
        let receiver = SignalBase::new().unwrap();
        let tick = Signal::<()>::new(&owner);

        tick.connect_member(&receiver, |_| {});
        tick.connect_member(&receiver, |_| {});
        tick.connect(|_| {});

        assert_eq!(tick.disconnect_receiver(&receiver), 2);
        assert_eq!(tick.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_adapter_connection_and_disconnect() {
        let owner = SignalBase::new().unwrap();
        let receiver = SignalBase::new().unwrap();
        let value_changed = Signal::<i32>::new(&owner);

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let adapter = MemberSlot::new(&receiver, move |value: i32| {
            received_clone.lock().push(value);
        });

        // The same adapter connected twice fires twice per emission.
        value_changed.connect_slot(&adapter);
        value_changed.connect_slot(&adapter);

        value_changed.emit(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock(), vec![1, 1]);

        assert_eq!(value_changed.disconnect_slot(&adapter), 2);
        value_changed.emit(2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_async_adapter_connection() {
        let owner = SignalBase::new().unwrap();
        let receiver = SignalBase::new().unwrap();
        let value_changed = Signal::<i32>::new(&owner);

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let adapter = AsyncMemberSlot::new(&receiver, move |value: i32| {
            let received = received_clone.clone();
            async move {
                received.lock().push(value);
            }
        });

        value_changed.connect_async_slot(&adapter);
        value_changed.emit(5);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock(), vec![5]);

        assert_eq!(value_changed.disconnect_async_slot(&adapter), 1);
        assert_eq!(value_changed.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_dispatch_table() {
        let owner = SignalBase::new().unwrap();
        let colocated = SignalBase::new().unwrap();
        let owner_affinity = owner.affinity().get().unwrap();

        let sync_slot = SlotKind::Sync(Arc::new(|_: i32| {}) as Arc<dyn Fn(i32) + Send + Sync>);
        let suspending_slot = SlotKind::Suspending(Arc::new(|_: i32| {
            Box::pin(async {}) as BoxSlotFuture
        })
            as Arc<dyn Fn(i32) -> BoxSlotFuture + Send + Sync>);

        let conn = |slot: &SlotKind<i32>, receiver: Option<AffinityCell>, kind| Connection {
            id: ConnectionId(0),
            receiver,
            slot: slot.clone(),
            kind,
            adapter: None,
        };

        // Explicit kinds win.
        let explicit = conn(&sync_slot, None, ConnectionKind::Direct);
        assert_eq!(resolve_dispatch(&explicit, Some(&owner_affinity)), Dispatch::Direct);
        let explicit = conn(&sync_slot, None, ConnectionKind::Queued);
        assert_eq!(resolve_dispatch(&explicit, Some(&owner_affinity)), Dispatch::Queued);

        // Suspending slots always queue under Auto.
        let suspending = conn(&suspending_slot, None, ConnectionKind::Auto);
        assert_eq!(resolve_dispatch(&suspending, Some(&owner_affinity)), Dispatch::Queued);

        // Same token resolves direct; the owner's own cell shares it.
        let same = conn(
            &sync_slot,
            Some(owner.affinity().clone()),
            ConnectionKind::Auto,
        );
        assert_eq!(resolve_dispatch(&same, Some(&owner_affinity)), Dispatch::Direct);

        // Different tokens queue.
        let different = conn(
            &sync_slot,
            Some(colocated.affinity().clone()),
            ConnectionKind::Auto,
        );
        assert_eq!(
            resolve_dispatch(&different, Some(&owner_affinity)),
            Dispatch::Queued
        );

        // No receiver affinity falls back to direct.
        let free = conn(&sync_slot, None, ConnectionKind::Auto);
        assert_eq!(resolve_dispatch(&free, Some(&owner_affinity)), Dispatch::Direct);
        let unset = conn(&sync_slot, Some(AffinityCell::unset()), ConnectionKind::Auto);
        assert_eq!(resolve_dispatch(&unset, Some(&owner_affinity)), Dispatch::Direct);
    }
}
