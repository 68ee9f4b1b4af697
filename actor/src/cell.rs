// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor cell
//!
//! The cell is where an actor lives once it is created. It owns the actor instance, its
//! context, its lifecycle and its mailbox, and it is the only path through which behaviour is
//! invoked: messages delivered by a dispatcher end up in [`ActorCell::deliver`], which runs
//! the deferred invocation with exclusive access to the actor.
//!
//! # Failure handling
//!
//! A handler or hook that returns an error, or panics, is a failure. The cell resolves a
//! supervision directive through the stage and applies it:
//!
//! - `Resume`: run `before_resume` and keep going.
//! - `Restart`: run `before_restart`, build a fresh instance from the definition and run
//!   `before_start` again. A restarted instance that fails to start is stopped. Restarts
//!   beyond the supervisor's intensity turn into a stop.
//! - `Stop`: run the stop sequence.
//!
//! # Stop sequence
//!
//! `Stopping` is entered once. `before_stop` runs, children are asked to stop, the actor
//! leaves its stage and its parent's children, `after_stop` runs, the mailbox is closed and
//! the lifecycle reaches `Stopped`. Hook failures are logged and never abort the sequence.
//!

use crate::{
    Address, Error,
    actor::{Actor, ActorContext, Definition},
    dead_letters::{DeadLetter, DeadLetters},
    lifecycle::LifeCycle,
    mailbox::Mailbox,
    message::{Envelope, LocalMessage},
    stage::Stage,
    supervision::{RestartWindow, SupervisionDirective, Supervised, Supervisor},
};

use futures::FutureExt;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, warn};

use std::{
    any::Any,
    collections::BTreeSet,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};

/// Type-erased view of a cell, as kept by the stage directory.
pub(crate) trait ActorEntry: Send + Sync {
    fn address(&self) -> &Address;

    fn parent(&self) -> Option<&Address>;

    fn children(&self) -> Vec<Address>;

    fn add_child(&self, child: Address);

    fn remove_child(&self, child: &Address);

    fn protocol(&self) -> &str;

    /// Supervisor this actor offers to its children.
    fn supervisor(&self) -> Option<Arc<dyn Supervisor>>;

    fn is_stopped(&self) -> bool;

    /// Queues a stop request behind the messages already sent. Acknowledges at once when
    /// the actor is already stopping.
    fn request_stop(
        self: Arc<Self>,
        ack: Option<oneshot::Sender<()>>,
    ) -> Result<(), Error>;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// State only touched by the delivering thread.
struct ActorState<A: Actor> {
    actor: A,
    ctx: ActorContext<A>,
    restarts: RestartWindow,
}

/// Home of one actor.
pub(crate) struct ActorCell<A: Actor> {
    address: Address,
    parent: Option<Address>,
    protocol: String,
    definition: Definition<A>,
    state: Mutex<ActorState<A>>,
    lifecycle: LifeCycle,
    mailbox: Arc<dyn Mailbox>,
    children: SyncMutex<BTreeSet<Address>>,
    stage: Stage,
    dead_letters: DeadLetters,
}

impl<A: Actor> ActorCell<A> {
    /// Builds the cell and its first actor instance.
    pub(crate) fn new(
        address: Address,
        parent: Option<Address>,
        definition: Definition<A>,
        mailbox: Arc<dyn Mailbox>,
        stage: Stage,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let ctx = ActorContext::new(
                address.clone(),
                parent.clone(),
                stage.clone(),
                this.clone(),
            );
            Self {
                address,
                parent,
                protocol: A::protocol_name(),
                state: Mutex::new(ActorState {
                    actor: definition.instantiate(),
                    ctx,
                    restarts: RestartWindow::default(),
                }),
                definition,
                lifecycle: LifeCycle::new(),
                mailbox,
                children: SyncMutex::new(BTreeSet::new()),
                dead_letters: stage.dead_letters().clone(),
                stage,
            }
        })
    }

    pub(crate) fn address(&self) -> &Address {
        &self.address
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lifecycle.is_stopped()
    }

    pub(crate) fn dead_letters(&self) -> &DeadLetters {
        &self.dead_letters
    }

    /// Packs `envelope` into a message and sends it through the mailbox.
    pub(crate) fn send(
        self: &Arc<Self>,
        envelope: Envelope<A>,
        representation: &str,
    ) -> Result<(), Error> {
        let message = LocalMessage::new(self.clone(), envelope, representation);
        self.mailbox.send(Box::new(message))
    }

    /// Runs one message. Called by a dispatcher holding the delivery slot.
    pub(crate) async fn deliver(
        self: &Arc<Self>,
        envelope: Envelope<A>,
        representation: &str,
    ) {
        if self.lifecycle.is_stopped() {
            match envelope {
                Envelope::Stop(ack) => acknowledge(ack),
                _ => self.dead_letters.failed_delivery(DeadLetter::new(
                    &self.address,
                    representation,
                )),
            }
            return;
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match envelope {
            Envelope::Start => {
                if self.lifecycle.start() {
                    debug!("Actor {} is starting.", self.address);
                    let result =
                        guarded(state.actor.before_start(&mut state.ctx)).await;
                    if let Err(error) = result {
                        self.fail(state, error).await;
                    }
                }
            }
            Envelope::Invoke(consumer) => {
                debug!("Actor {} delivers {}.", self.address, representation);
                let result =
                    guarded(consumer(&mut state.actor, &mut state.ctx)).await;
                if let Err(error) = result {
                    self.fail(state, error).await;
                }
            }
            Envelope::Stop(ack) => {
                self.stop(state).await;
                acknowledge(ack);
            }
        }

        if state.ctx.stop_requested() && !self.lifecycle.is_stopping_or_stopped() {
            self.stop(state).await;
        }
    }

    /// Applies the supervision directive for `error`. The actor ends up running or stopped.
    async fn fail(self: &Arc<Self>, state: &mut ActorState<A>, error: Error) {
        let (directive, supervisor) = self.resolve_directive(&error);
        match directive {
            SupervisionDirective::Resume => {
                debug!("Actor {} resumes after: {}.", self.address, error);
                let result =
                    guarded(state.actor.before_resume(&mut state.ctx, &error)).await;
                if let Err(hook_error) = result {
                    error!("Actor {} failed to resume: {}.", self.address, hook_error);
                    self.stop(state).await;
                }
            }
            SupervisionDirective::Restart => {
                let strategy = supervisor
                    .map(|supervisor| supervisor.strategy())
                    .unwrap_or_default();
                if !state.restarts.admit(&strategy) {
                    warn!(
                        "Actor {} exceeded {} restarts in {:?}, stopping.",
                        self.address, strategy.intensity, strategy.period
                    );
                    self.stop(state).await;
                    return;
                }
                if let Err(restart_error) = self.restart(state, &error).await {
                    error!("Actor {} stops: {}.", self.address, restart_error);
                    self.stop(state).await;
                }
            }
            SupervisionDirective::Stop | SupervisionDirective::Escalate => {
                self.stop(state).await;
            }
        }
    }

    /// Replaces the actor with a fresh instance and starts it. A start failure is terminal.
    async fn restart(
        self: &Arc<Self>,
        state: &mut ActorState<A>,
        reason: &Error,
    ) -> Result<(), Error> {
        debug!("Actor {} restarts after: {}.", self.address, reason);
        if let Err(hook_error) =
            guarded(state.actor.before_restart(&mut state.ctx, reason)).await
        {
            warn!(
                "Actor {} failed before restart: {}.",
                self.address, hook_error
            );
        }
        state.actor = self.definition.instantiate();
        guarded(state.actor.before_start(&mut state.ctx))
            .await
            .map_err(|error| Error::Restart(error.to_string()))
    }

    /// First non-escalating answer of the supervision chain; `Stop` when the chain is
    /// exhausted.
    fn resolve_directive(
        &self,
        error: &Error,
    ) -> (SupervisionDirective, Option<Arc<dyn Supervisor>>) {
        let supervised = Supervised {
            address: self.address.clone(),
            protocol: self.protocol.clone(),
            stage: self.stage.name().to_owned(),
        };
        for supervisor in self.stage.supervisors_for(&supervised, self.parent.as_ref())
        {
            match supervisor.inform(error, &supervised) {
                SupervisionDirective::Escalate => continue,
                directive => return (directive, Some(supervisor)),
            }
        }
        warn!(
            "No supervisor handled the failure of actor {}: {}.",
            self.address, error
        );
        (SupervisionDirective::Stop, None)
    }

    /// Runs the stop sequence once; later calls return immediately.
    async fn stop(self: &Arc<Self>, state: &mut ActorState<A>) {
        if !self.lifecycle.begin_stopping() {
            return;
        }
        debug!("Actor {} is stopping.", self.address);

        if let Err(error) = guarded(state.actor.before_stop(&mut state.ctx)).await {
            error!("Actor {} failed before stop: {}.", self.address, error);
        }

        for child in self.child_addresses() {
            self.stage.request_stop(&child);
        }
        self.stage.unregister(&self.address, self.parent.as_ref());

        if let Err(error) = guarded(state.actor.after_stop(&mut state.ctx)).await {
            error!("Actor {} failed after stop: {}.", self.address, error);
        }

        self.mailbox.close();
        self.lifecycle.stopped();
        debug!("Actor {} is stopped.", self.address);
    }

    fn child_addresses(&self) -> Vec<Address> {
        self.children.lock().iter().cloned().collect()
    }
}

impl<A: Actor> ActorEntry for ActorCell<A> {
    fn address(&self) -> &Address {
        &self.address
    }

    fn parent(&self) -> Option<&Address> {
        self.parent.as_ref()
    }

    fn children(&self) -> Vec<Address> {
        self.child_addresses()
    }

    fn add_child(&self, child: Address) {
        self.children.lock().insert(child);
    }

    fn remove_child(&self, child: &Address) {
        self.children.lock().remove(child);
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn supervisor(&self) -> Option<Arc<dyn Supervisor>> {
        self.definition.supervisor.clone()
    }

    fn is_stopped(&self) -> bool {
        self.lifecycle.is_stopped()
    }

    fn request_stop(
        self: Arc<Self>,
        ack: Option<oneshot::Sender<()>>,
    ) -> Result<(), Error> {
        if self.lifecycle.is_stopping_or_stopped() {
            acknowledge(ack);
            return Ok(());
        }
        self.send(Envelope::Stop(ack), "stop()")
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn acknowledge(ack: Option<oneshot::Sender<()>>) {
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

/// Awaits `future`, turning a panic into `Error::Panicked`.
async fn guarded<F>(future: F) -> Result<(), Error>
where
    F: Future<Output = Result<(), Error>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let literal: Box<dyn Any + Send> = Box::new("literal");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(literal.as_ref()), "literal");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    fn explode() -> Result<(), Error> {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_guarded_converts_panics() {
        let ok = guarded(async { Ok(()) }).await;
        assert_eq!(ok, Ok(()));

        let failed = guarded(async { Err(Error::Functional("no".to_owned())) }).await;
        assert_eq!(failed, Err(Error::Functional("no".to_owned())));

        let panicked = guarded(async { explode() }).await;
        assert_eq!(panicked, Err(Error::Panicked("handler exploded".to_owned())));
    }
}
