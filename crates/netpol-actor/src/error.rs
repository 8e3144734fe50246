//! Error types surfaced to actor callers.

use thiserror::Error;

/// Error delivered to a caller awaiting an actor result.
///
/// `E` is the actor's own error type; `Stopped` is produced by the
/// runtime itself when the target actor is no longer processing
/// messages.
#[derive(Debug, Clone, Error)]
pub enum ActorError<E> {
    /// The actor was stopped before (or while) the message could be
    /// processed. Messages enqueued after a stop fail immediately.
    #[error("actor is stopped")]
    Stopped,

    /// The actor processed the message and it failed.
    #[error(transparent)]
    Failed(E),
}

impl<E> ActorError<E> {
    /// Returns true if this is the runtime's stopped-actor error.
    pub fn is_stopped(&self) -> bool {
        matches!(self, ActorError::Stopped)
    }

    /// Returns the actor-level error, if any.
    pub fn into_failure(self) -> Option<E> {
        match self {
            ActorError::Stopped => None,
            ActorError::Failed(e) => Some(e),
        }
    }
}
