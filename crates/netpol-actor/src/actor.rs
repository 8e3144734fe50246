//! The [`Actor`] trait and batch-failure signalling.

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a batch-level flush operation.
pub type BatchResult<E> = Result<(), BatchError<E>>;

/// Failure reported by [`Actor::finish_batch`].
#[derive(Debug, Error)]
pub enum BatchError<E> {
    /// The coalesced operation failed and the offending message is not
    /// known. The runtime halves the batch and retries each half
    /// independently until the failure is pinned to a single message.
    #[error("batched operation failed, splitting batch: {0}")]
    SplitRetry(E),

    /// The whole batch failed for a known reason; every message in it
    /// receives this error and no retry is attempted.
    #[error("batch failed: {0}")]
    Fail(E),
}

/// A unit of serialized execution with an ordered mailbox.
///
/// Implementations own their mutable state outright; the runtime
/// guarantees that `on_message` and `finish_batch` are never invoked
/// concurrently for one actor instance, and that messages are processed
/// in enqueue order.
///
/// Messages are taken by reference because the runtime may re-execute a
/// message during split-and-retry recovery; handlers must therefore be
/// safe to re-run, which the idempotent reconciliation handlers in this
/// workspace already are.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Message type accepted by this actor's mailbox.
    type Msg: Send + 'static;

    /// Value delivered to a caller awaiting a result.
    type Reply: Send + 'static;

    /// Actor-level error type. `Clone` because a batch-level failure
    /// fans a single underlying error out to every message's caller.
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    /// Name used in log output.
    fn name(&self) -> &str;

    /// Processes a single message.
    async fn on_message(&mut self, msg: &Self::Msg) -> Result<Self::Reply, Self::Error>;

    /// Called once after every message in a batch has been processed.
    ///
    /// Actors that accumulate work across `on_message` calls flush it
    /// here as a single external operation. The default does nothing.
    async fn finish_batch(&mut self, _batch: &[Self::Msg]) -> BatchResult<Self::Error> {
        Ok(())
    }
}
