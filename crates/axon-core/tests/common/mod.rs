//! Shared helpers for the dispatch integration tests.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::Notify;

/// A thread running its own cooperative scheduler.
///
/// `init` runs inside the scheduler, so signal-aware objects built there
/// are owned by this thread. The scheduler keeps serving queued deliveries
/// until [`stop`](LoopThread::stop).
pub struct LoopThread {
    stop: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl LoopThread {
    pub fn spawn<T, F>(name: &str, init: F) -> (Self, T)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let stop = Arc::new(Notify::new());
        let stop_signal = stop.clone();
        let (init_tx, init_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to build test scheduler");
                runtime.block_on(async move {
                    init_tx.send(init()).expect("test thread init handoff failed");
                    stop_signal.notified().await;
                    // Let in-flight deliveries land before tearing down.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                });
            })
            .expect("failed to spawn test scheduler thread");

        let value = init_rx.recv().expect("test scheduler failed to initialize");
        (
            Self {
                stop,
                thread: Some(thread),
            },
            value,
        )
    }

    /// Stop the scheduler and join its thread.
    pub fn stop(mut self) {
        self.stop.notify_one();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("test scheduler thread panicked");
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        // A test that bails early still releases the thread.
        self.stop.notify_one();
    }
}
