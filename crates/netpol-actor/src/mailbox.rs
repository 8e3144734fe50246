//! Mailbox plumbing: handles, the per-actor task, batching and
//! split-and-retry recovery.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::actor::{Actor, BatchError};
use crate::error::ActorError;

/// Upper bound on how many queued messages are drained into one batch.
pub const MAX_BATCH_SIZE: usize = 128;

type Reply<A> = Result<<A as Actor>::Reply, ActorError<<A as Actor>::Error>>;
type ReplyTx<A> = oneshot::Sender<Reply<A>>;

enum Command<A: Actor> {
    Deliver { msg: A::Msg, reply: Option<ReplyTx<A>> },
    Stop(oneshot::Sender<()>),
}

/// Handle for submitting messages to a running actor.
///
/// Cheap to clone; all clones share the same mailbox. Dropping every
/// handle closes the mailbox and the actor task exits once the queue is
/// drained.
pub struct ActorHandle<A: Actor> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Command<A>>,
}

impl<A: Actor> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

impl<A: Actor> std::fmt::Debug for ActorHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle").field("name", &self.name).finish()
    }
}

impl<A: Actor> ActorHandle<A> {
    /// Returns the actor's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a message and returns a future resolving to its result.
    ///
    /// The message is enqueued synchronously, before the returned future
    /// is first polled, so sequential `call`/`send` invocations from one
    /// task are processed in invocation order. The result (return value
    /// or error) is delivered exactly once, when the actor has processed
    /// the message.
    pub fn call(&self, msg: A::Msg) -> impl Future<Output = Reply<A>> + Send {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = self
            .tx
            .send(Command::Deliver { msg, reply: Some(reply_tx) })
            .is_ok();
        async move {
            if !queued {
                return Err(ActorError::Stopped);
            }
            // The runtime only drops a reply sender when the actor is
            // stopped with the message still queued.
            reply_rx.await.unwrap_or(Err(ActorError::Stopped))
        }
    }

    /// Enqueues a message without requesting a result.
    ///
    /// Processing errors are logged by the actor task instead of being
    /// delivered anywhere.
    pub fn send(&self, msg: A::Msg) -> Result<(), ActorError<A::Error>> {
        self.tx
            .send(Command::Deliver { msg, reply: None })
            .map_err(|_| ActorError::Stopped)
    }

    /// Stops the actor.
    ///
    /// Messages already queued ahead of the stop request are still
    /// processed; anything behind it fails with
    /// [`ActorError::Stopped`], as does every later `call`/`send`. The
    /// returned future resolves once the actor task has shut down.
    pub fn stop(&self) -> impl Future<Output = ()> + Send {
        let (ack_tx, ack_rx) = oneshot::channel();
        let queued = self.tx.send(Command::Stop(ack_tx)).is_ok();
        async move {
            if queued {
                let _ = ack_rx.await;
            }
        }
    }
}

/// Starts an actor on its own tokio task and returns its handle.
pub fn spawn<A: Actor>(actor: A) -> ActorHandle<A> {
    let name: Arc<str> = actor.name().into();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(actor, rx));
    ActorHandle { name, tx }
}

async fn run<A: Actor>(mut actor: A, mut rx: mpsc::UnboundedReceiver<Command<A>>) {
    debug!(actor = actor.name(), "actor started");
    while let Some(cmd) = rx.recv().await {
        let mut stop_ack = None;
        let mut msgs = Vec::new();
        let mut replies = Vec::new();
        match cmd {
            Command::Stop(ack) => stop_ack = Some(ack),
            Command::Deliver { msg, reply } => {
                msgs.push(msg);
                replies.push(reply);
                // Opportunistically drain whatever else is already
                // queued so the actor can coalesce the batch into one
                // unit of external work.
                while msgs.len() < MAX_BATCH_SIZE {
                    match rx.try_recv() {
                        Ok(Command::Deliver { msg, reply }) => {
                            msgs.push(msg);
                            replies.push(reply);
                        }
                        Ok(Command::Stop(ack)) => {
                            stop_ack = Some(ack);
                            break;
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        if !msgs.is_empty() {
            trace!(actor = actor.name(), batch = msgs.len(), "processing batch");
            run_batch(&mut actor, msgs, replies).await;
        }
        if let Some(ack) = stop_ack {
            shutdown(&mut actor, rx, ack);
            return;
        }
    }
    debug!(actor = actor.name(), "mailbox closed, actor exiting");
}

/// Fails everything still queued with a stopped-actor error and
/// acknowledges the stop request.
fn shutdown<A: Actor>(
    actor: &mut A,
    mut rx: mpsc::UnboundedReceiver<Command<A>>,
    ack: oneshot::Sender<()>,
) {
    rx.close();
    let mut discarded = 0usize;
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            Command::Deliver { reply, .. } => {
                discarded += 1;
                if let Some(tx) = reply {
                    let _ = tx.send(Err(ActorError::Stopped));
                }
            }
            Command::Stop(other_ack) => {
                let _ = other_ack.send(());
            }
        }
    }
    if discarded > 0 {
        warn!(actor = actor.name(), discarded, "dropped queued messages on stop");
    }
    debug!(actor = actor.name(), "actor stopped");
    let _ = ack.send(());
}

/// Processes one batch: every message in enqueue order, then the
/// actor's batch flush. On [`BatchError::SplitRetry`] the batch is
/// halved and each half re-executed, first half before second, until
/// the failure is isolated to a single message.
fn run_batch<'a, A: Actor>(
    actor: &'a mut A,
    mut msgs: Vec<A::Msg>,
    mut replies: Vec<Option<ReplyTx<A>>>,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let mut results = Vec::with_capacity(msgs.len());
        for i in 0..msgs.len() {
            results.push(actor.on_message(&msgs[i]).await);
        }
        match actor.finish_batch(&msgs).await {
            Ok(()) => {
                for (reply, result) in replies.into_iter().zip(results) {
                    if let Err(err) = &result {
                        if reply.is_none() {
                            warn!(actor = actor.name(), error = %err, "unobserved message failure");
                        }
                    }
                    if let Some(tx) = reply {
                        let _ = tx.send(result.map_err(ActorError::Failed));
                    }
                }
            }
            Err(BatchError::Fail(err)) => {
                warn!(actor = actor.name(), error = %err, batch = msgs.len(), "batch failed");
                for tx in replies.into_iter().flatten() {
                    let _ = tx.send(Err(ActorError::Failed(err.clone())));
                }
            }
            Err(BatchError::SplitRetry(err)) if msgs.len() <= 1 => {
                // Isolated to one message; report it as that message's
                // own failure.
                warn!(actor = actor.name(), error = %err, "message failed");
                for tx in replies.into_iter().flatten() {
                    let _ = tx.send(Err(ActorError::Failed(err.clone())));
                }
            }
            Err(BatchError::SplitRetry(err)) => {
                warn!(
                    actor = actor.name(),
                    error = %err,
                    batch = msgs.len(),
                    "batch failed ambiguously, splitting and retrying"
                );
                let mid = msgs.len() / 2;
                let tail_msgs = msgs.split_off(mid);
                let tail_replies = replies.split_off(mid);
                run_batch(actor, msgs, replies).await;
                run_batch(actor, tail_msgs, tail_replies).await;
            }
        }
    })
}
