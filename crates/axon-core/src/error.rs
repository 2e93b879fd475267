//! Error types for Axon.

use std::fmt;

/// The main error type for dispatch and worker lifecycle operations.
///
/// Connect-time validation (null receivers, non-callable slots, invalid
/// connection kinds) is enforced by the type system and has no runtime
/// representation here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxonError {
    /// No cooperative scheduler is running on the relevant thread.
    ///
    /// Signal-aware objects must be constructed on a thread that runs a
    /// current-thread scheduler, and cross-thread slot calls require the
    /// owner's scheduler to still be live.
    NoLoop,
    /// The worker has no live scheduler thread.
    ///
    /// Returned by [`Worker::queue_task`](crate::Worker::queue_task) and
    /// [`Worker::move_to_thread`](crate::Worker::move_to_thread) before
    /// `start` or after `stop`.
    WorkerNotStarted,
    /// `start` was called on a worker that is not stopped.
    AlreadyStarted,
}

impl fmt::Display for AxonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLoop => {
                write!(
                    f,
                    "no cooperative scheduler is running on this thread; \
                     signal-aware objects require a current-thread scheduler"
                )
            }
            Self::WorkerNotStarted => {
                write!(f, "worker has not been started or has already stopped")
            }
            Self::AlreadyStarted => {
                write!(f, "worker has already been started")
            }
        }
    }
}

impl std::error::Error for AxonError {}

/// A specialized Result type for Axon operations.
pub type Result<T> = std::result::Result<T, AxonError>;
