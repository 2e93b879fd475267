//! Direct-call marshalling of member slots across threads.

mod common;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::ThreadId;

use axon_core::{AsyncMemberSlot, AxonError, MemberSlot, Property, SignalBase};

#[test]
fn test_sync_call_marshals_to_owner_thread() {
    let (owner_loop, (slot, owner_thread)) = common::LoopThread::spawn("slot-owner", || {
        let base = SignalBase::new().unwrap();
        let slot = MemberSlot::new(&base, |value: i32| {
            (value * 2, std::thread::current().id())
        });
        (slot, std::thread::current().id())
    });

    // Calling from this thread, which runs no scheduler, blocks until
    // the body has run on the owner's thread and hands the result back.
    let (doubled, observed) = slot.call(21).unwrap();
    assert_eq!(doubled, 42);
    assert_eq!(observed, owner_thread);
    assert_ne!(observed, std::thread::current().id());

    owner_loop.stop();
}

#[test]
fn test_sync_call_propagates_panic_to_caller() {
    let (owner_loop, slot) = common::LoopThread::spawn("slot-owner", || {
        let base = SignalBase::new().unwrap();
        MemberSlot::<(), ()>::new(&base, |_| panic!("slot failure"))
    });

    let outcome = catch_unwind(AssertUnwindSafe(|| slot.call(())));
    assert!(outcome.is_err());

    owner_loop.stop();
}

#[test]
fn test_sync_call_after_owner_loop_gone() {
    let (owner_loop, slot) = common::LoopThread::spawn("slot-owner", || {
        let base = SignalBase::new().unwrap();
        MemberSlot::new(&base, |value: i32| value)
    });
    owner_loop.stop();

    assert_eq!(slot.call(1).unwrap_err(), AxonError::NoLoop);
}

#[tokio::test]
async fn test_async_call_marshals_to_owner_scheduler() {
    let (owner_loop, slot) = common::LoopThread::spawn("slot-owner", || {
        let base = SignalBase::new().unwrap();
        AsyncMemberSlot::new(&base, |value: i32| async move {
            tokio::task::yield_now().await;
            (value + 1, std::thread::current().id())
        })
    });

    // Awaited from this loop, executed on the owner's.
    let (value, observed): (i32, ThreadId) = slot.call(41).await.unwrap();
    assert_eq!(value, 42);
    assert_ne!(observed, std::thread::current().id());

    owner_loop.stop();
}

#[tokio::test]
async fn test_async_call_propagates_result_per_call() {
    let (owner_loop, slot) = common::LoopThread::spawn("slot-owner", || {
        let base = SignalBase::new().unwrap();
        AsyncMemberSlot::new(&base, |value: i32| async move { value * value })
    });

    assert_eq!(slot.call(3).await.unwrap(), 9);
    assert_eq!(slot.call(4).await.unwrap(), 16);

    owner_loop.stop();
}

#[test]
fn test_property_set_from_foreign_thread() {
    let (owner_loop, (value, owner_thread)) = common::LoopThread::spawn("prop-owner", || {
        let base = SignalBase::new().unwrap();
        (Property::new(&base, 0), std::thread::current().id())
    });
    assert_ne!(owner_thread, std::thread::current().id());

    // The store is marshalled to the owner's scheduler; this call blocks
    // until it lands.
    assert!(value.set(5));
    assert_eq!(value.get(), 5);
    assert!(!value.set(5));

    owner_loop.stop();
}
