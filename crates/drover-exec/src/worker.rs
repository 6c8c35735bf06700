//! Worker handles and the execution completion protocol.
//!
//! The scheduler treats workers as opaque remote endpoints: everything it
//! needs is a unique [`WorkerName`]. Dispatching a task yields an
//! [`ExecutionHandle`], the scheduler's half of a one-shot completion
//! channel; the execution layer holds the matching [`Completion`] and
//! fires it exactly once when the remote execution terminates.

use std::sync::{Arc, Mutex};

use drover_core::WorkerName;

use crate::failure::FailureCause;

/// An opaque remote execution endpoint.
pub trait Worker: Send + Sync {
    /// The unique name of this worker.
    fn name(&self) -> &WorkerName;
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// A synchronous dispatch failure, raised before any execution started.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// The task was cancelled before dispatch. The scheduler absorbs
    /// this silently; the task's completion arrives through its handle.
    #[error("execution cancelled before dispatch")]
    Cancelled,

    /// The transport rejected the dispatch. The scheduler marks the task
    /// failed with the carried cause and processes the completion
    /// immediately.
    #[error("dispatch failed: {cause}")]
    Failed {
        /// Why the dispatch was rejected.
        cause: FailureCause,
    },
}

/// Outcome of registering a completion callback on an [`ExecutionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The callback was stored and will run when the execution completes.
    Pending,
    /// The execution had already completed; the callback was *not*
    /// stored and the caller must process the completion itself.
    AlreadyCompleted,
}

enum ChannelState {
    /// Neither side has acted yet.
    Pending,
    /// A callback is registered, completion not yet signalled.
    Registered(Box<dyn FnOnce() + Send>),
    /// Completion signalled before a callback was registered.
    Completed,
    /// Completion signalled and the callback consumed.
    Delivered,
}

impl std::fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Registered(_) => "Registered",
            Self::Completed => "Completed",
            Self::Delivered => "Delivered",
        };
        f.write_str(s)
    }
}

/// The scheduler's half of a one-shot completion channel.
///
/// Returned by [`crate::task::Task::execute`]. Supports registering a
/// single completion callback; the callback runs on whatever thread
/// signals completion, never on the registering thread.
#[derive(Debug)]
pub struct ExecutionHandle {
    state: Arc<Mutex<ChannelState>>,
}

/// The execution layer's half of a one-shot completion channel.
///
/// Fire [`Completion::complete`] exactly once, *after* recording the
/// task's success or failure state, from any thread.
#[derive(Debug)]
pub struct Completion {
    state: Arc<Mutex<ChannelState>>,
}

impl ExecutionHandle {
    /// Creates a connected handle/completion pair.
    #[must_use]
    pub fn channel() -> (ExecutionHandle, Completion) {
        let state = Arc::new(Mutex::new(ChannelState::Pending));
        (
            ExecutionHandle {
                state: Arc::clone(&state),
            },
            Completion { state },
        )
    }

    /// Registers the one-shot completion callback.
    ///
    /// If the execution already completed, the callback is *not* invoked
    /// and [`Registration::AlreadyCompleted`] is returned instead; the
    /// caller processes the completion inline. This keeps the callback
    /// off the registering thread, which may hold locks the callback
    /// needs.
    pub fn on_complete(self, callback: Box<dyn FnOnce() + Send>) -> Registration {
        let mut state = lock_channel(&self.state);
        match *state {
            ChannelState::Pending => {
                *state = ChannelState::Registered(callback);
                Registration::Pending
            }
            ChannelState::Completed => {
                *state = ChannelState::Delivered;
                Registration::AlreadyCompleted
            }
            ChannelState::Registered(_) | ChannelState::Delivered => {
                // channel() hands out exactly one handle; a second
                // registration cannot happen through the public API.
                Registration::Pending
            }
        }
    }
}

impl Completion {
    /// Signals that the execution terminated.
    ///
    /// Invokes the registered callback on the calling thread, or records
    /// the completion for a registration that has not happened yet.
    pub fn complete(self) {
        let callback = {
            let mut state = lock_channel(&self.state);
            match std::mem::replace(&mut *state, ChannelState::Completed) {
                ChannelState::Registered(callback) => {
                    *state = ChannelState::Delivered;
                    Some(callback)
                }
                ChannelState::Pending => None,
                // complete(self) consumes the only Completion; repeated
                // signals cannot happen through the public API.
                other => {
                    *state = other;
                    None
                }
            }
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

fn lock_channel(state: &Mutex<ChannelState>) -> std::sync::MutexGuard<'_, ChannelState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
