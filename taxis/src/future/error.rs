//! Error types for the packaged call / future channel

use crate::pool::InterruptPayload;
use std::any::Any;
use thiserror::Error;

/// Misuse of the packaged call / future channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FutureError {
    /// `future()` was called more than once in the same arming
    #[error("future already retrieved for this arming")]
    AlreadyRetrieved,

    /// The callable was already invoked in the same arming
    #[error("packaged call already invoked for this arming")]
    AlreadySatisfied,

    /// `set_ready(true)` before the callable was invoked
    #[error("packaged call not yet invoked")]
    NotInvoked,
}

/// Failure of a task's functor, stored in its result cell and returned
/// by `TaskFuture::get`.
///
/// Cloneable so that an upstream failure can propagate into the cells
/// of every dependent task in the bound subgraph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskFailure {
    /// The functor observed a cooperative interrupt
    #[error("task interrupted: {reason}")]
    Interrupted {
        /// The reason passed to `interrupt`
        reason: String,
    },

    /// The functor panicked
    #[error("task panicked: {message}")]
    Panicked {
        /// The panic message, if it carried one
        message: String,
    },
}

impl TaskFailure {
    /// Maps an unwind payload to a failure: the dedicated interruption
    /// payload becomes `Interrupted`, anything else `Panicked`.
    pub(crate) fn from_unwind(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<InterruptPayload>() {
            Ok(interrupt) => Self::Interrupted { reason: interrupt.0 },
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
                    (*s).to_owned()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "task functor panicked".to_owned()
                };
                Self::Panicked { message }
            }
        }
    }
}
