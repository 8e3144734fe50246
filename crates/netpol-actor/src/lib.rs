//! Mailbox actor runtime for the policy-enforcement daemon.
//!
//! Each actor owns its state and is driven by a single tokio task, so
//! state is mutated from exactly one logical thread of control and no
//! per-entity locking is needed. Callers interact through an
//! [`ActorHandle`], which offers both a synchronous-feeling
//! [`ActorHandle::call`] (await the result) and a fire-and-forget
//! [`ActorHandle::send`].
//!
//! The runtime batches messages that are already queued when the actor
//! becomes free and runs them as a single unit of work, giving actors a
//! [`Actor::finish_batch`] hook to coalesce expensive external
//! operations (one firewall transaction for many updates). When such a
//! coalesced operation fails without identifying the offending message,
//! the actor reports [`BatchError::SplitRetry`] and the runtime halves
//! the batch and retries each half independently, recursing down to
//! single messages so every caller gets an individually-correct result.

mod actor;
mod error;
mod mailbox;

pub use actor::{Actor, BatchError, BatchResult};
pub use error::ActorError;
pub use mailbox::{spawn, ActorHandle, MAX_BATCH_SIZE};
