//! Core systems for Axon.
//!
//! This crate provides thread-affine signal/slot dispatch for event-driven
//! communication between objects:
//!
//! - **Signal/Slot System**: ordered connection lists with per-connection
//!   direct or queued dispatch, for synchronous and suspending slots
//! - **Thread Affinity**: every signal-aware object is bound to an owning
//!   thread and the cooperative scheduler running on it
//! - **Slot Marshalling**: member slots called directly from a foreign
//!   thread run on their owner's scheduler, with the caller observing the
//!   result
//! - **Workers**: dedicated scheduler threads with lifecycle signals, a
//!   sequential background task queue, and affinity transfer
//! - **Properties**: change-detecting values that mutate on their owner's
//!   thread
//!
//! # Signal/Slot Example
//!
//! ```
//! use axon_core::{Signal, SignalBase};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axon_core::Result<()> {
//! let base = SignalBase::new()?;
//! let value_changed = Signal::<i32>::new(&base);
//!
//! // Connect a slot (closure)
//! let id = value_changed.connect(|value| {
//!     println!("value changed to {value}");
//! });
//!
//! // Emit the signal
//! value_changed.emit(42);
//!
//! // Disconnect when done
//! value_changed.disconnect(id);
//! # Ok(())
//! # }
//! ```
//!
//! # Cross-Thread Example
//!
//! A receiver living on a worker's scheduler observes emissions from other
//! threads on its own thread:
//!
//! ```no_run
//! use axon_core::{Signal, SignalBase, Worker};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axon_core::Result<()> {
//! let worker = Worker::builder().name("receiver").build()?;
//! worker.start()?;
//!
//! let receiver = SignalBase::new()?;
//! worker.move_to_thread(&receiver)?;
//!
//! let sender = SignalBase::new()?;
//! let tick = Signal::<u64>::new(&sender);
//! tick.connect_member(&receiver, |n| {
//!     // runs on the worker's thread
//!     println!("tick {n}");
//! });
//!
//! tick.emit(1);
//! # Ok(())
//! # }
//! ```
//!
//! # Scheduling model
//!
//! One single-threaded cooperative scheduler runs per signal-aware thread.
//! Within a thread, control transfers only at suspension points; across
//! threads, dispatch posts closures onto the target's scheduler. Slots
//! never migrate implicitly: they run on their receiver's owning thread,
//! and `emit` itself never suspends or blocks.

#![warn(missing_docs)]

pub mod affinity;
pub mod emission;
mod error;
pub mod event_loop;
pub mod property;
pub mod signal;
pub mod slot;
pub mod worker;

pub use affinity::{Affinity, AffinityCell, AffinityToken, SignalAware, SignalBase};
pub use emission::in_emission;
pub use error::{AxonError, Result};
pub use event_loop::{LoopHandle, graceful_shutdown};
pub use property::Property;
pub use signal::{ConnectionGuard, ConnectionId, ConnectionKind, Signal};
pub use slot::{AsyncMemberSlot, MemberSlot};
pub use worker::{Worker, WorkerBuilder, WorkerScope, WorkerState};
