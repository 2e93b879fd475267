//! Reactive property helper.
//!
//! `Property<T>` wraps a value owned by a signal-aware object and reports
//! whether a `set` actually changed it, so the caller can pair it with a
//! change signal:
//!
//! ```
//! use axon_core::{Property, Signal, SignalBase};
//!
//! struct Counter {
//!     base: SignalBase,
//!     value: Property<i32>,
//!     value_changed: Signal<i32>,
//! }
//!
//! impl Counter {
//!     fn set_value(&self, value: i32) {
//!         if self.value.set(value) {
//!             self.value_changed.emit(value);
//!         }
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axon_core::Result<()> {
//! let base = SignalBase::new()?;
//! let counter = Counter {
//!     value: Property::new(&base, 0),
//!     value_changed: Signal::new(&base),
//!     base,
//! };
//! counter.set_value(3);
//! assert_eq!(counter.value.get(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! Like a synchronous member slot, a `set` from a foreign thread outside an
//! emission is marshalled to the owner's scheduler and blocks until the
//! store completes, so the value only ever mutates on the owner's thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use crate::affinity::{AffinityCell, SignalAware};
use crate::emission::in_emission;

/// A value with change detection, bound to an owner's scheduler.
pub struct Property<T> {
    value: Arc<RwLock<T>>,
    owner: AffinityCell,
}

fn store<T: PartialEq>(slot: &RwLock<T>, value: T) -> bool {
    let mut guard = slot.write();
    if *guard == value {
        false
    } else {
        *guard = value;
        true
    }
}

impl<T> Property<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a property owned by `owner` with an initial value.
    pub fn new(owner: &dyn SignalAware, value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            owner: owner.affinity().clone(),
        }
    }

    /// A clone of the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Store `value`, returning whether it differed from the current one.
    ///
    /// Called from the owner's thread, or inside an emission, this is a
    /// plain store. From a foreign thread the store is marshalled to the
    /// owner's scheduler and this call blocks until it lands. When the
    /// owner's scheduler is gone the store happens in place with a
    /// warning.
    pub fn set(&self, value: T) -> bool {
        let Some(affinity) = self.owner.get() else {
            return store(&self.value, value);
        };
        if in_emission() || thread::current().id() == affinity.thread() {
            return store(&self.value, value);
        }

        let event_loop = affinity.event_loop();
        if !event_loop.is_running() {
            tracing::warn!(
                target: "axon_core::property",
                "owner scheduler is gone; storing property value in place"
            );
            return store(&self.value, value);
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let slot = self.value.clone();
        event_loop.post(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| store(&slot, value)));
            let _ = reply_tx.send(outcome);
        });

        match reply_rx.recv() {
            Ok(Ok(changed)) => changed,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => {
                tracing::warn!(
                    target: "axon_core::property",
                    "owner scheduler dropped a marshalled property store"
                );
                false
            }
        }
    }
}

static_assertions::assert_impl_all!(Property<i32>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::SignalBase;

    #[tokio::test]
    async fn test_get_set() {
        let base = SignalBase::new().unwrap();
        let value = Property::new(&base, 10);
        assert_eq!(value.get(), 10);

        assert!(value.set(11));
        assert_eq!(value.get(), 11);
    }

    #[tokio::test]
    async fn test_set_same_value_reports_unchanged() {
        let base = SignalBase::new().unwrap();
        let value = Property::new(&base, 10);
        assert!(!value.set(10));
        assert!(value.set(11));
        assert!(!value.set(11));
    }
}
