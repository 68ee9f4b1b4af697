// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait, the `ActorContext` handed to behaviour while a
//! message is delivered, the `ActorRef` handle used to send messages to an actor, the `Protocol`
//! trait implemented by typed proxies, and the `Definition` that describes how to build an
//! actor.
//!

use crate::{
    Address, Error,
    cell::{ActorCell, ActorEntry},
    dead_letters::DeadLetters,
    message::Envelope,
    scheduler::Scheduler,
    stage::Stage,
    supervision::Supervisor,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use std::{
    fmt::{Debug, Formatter},
    sync::{Arc, Weak},
};

/// The `Actor` trait is the main trait that actors must implement.
///
/// An actor is a unit of state reachable only through messages. Its behaviour runs one
/// message at a time, on whichever dispatcher thread currently holds its mailbox's delivery
/// slot, so implementations never need internal locking.
///
/// Protocol behaviour is written as ordinary `async` methods on the actor type and invoked
/// through [`ActorRef::tell`] / [`ActorRef::ask`] or through a typed [`Protocol`] proxy. The
/// hooks below run under the same single-deliverer guarantee.
///
/// # Lifecycle hooks
///
/// - [`Actor::before_start`]: first delivery of every actor, and again after a restart.
/// - [`Actor::before_stop`]: before children are stopped and the actor is unregistered.
/// - [`Actor::after_stop`]: after the actor left its stage, before its mailbox is closed.
/// - [`Actor::before_restart`]: on the failed instance, before it is replaced.
/// - [`Actor::before_resume`]: when the supervisor decided to ignore a failure.
///
/// Every hook defaults to a no-op.
///
/// # Examples
///
/// ```ignore
/// use actor::{Actor, ActorContext, Error};
/// use async_trait::async_trait;
///
/// #[derive(Default)]
/// struct Counter {
///     value: u64,
/// }
///
/// impl Counter {
///     async fn increment(&mut self) -> Result<(), Error> {
///         self.value += 1;
///         Ok(())
///     }
/// }
///
/// #[async_trait]
/// impl Actor for Counter {
///     async fn before_start(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
///         tracing::debug!("Counter {} started.", ctx.address());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static {
    /// Name of the protocol this actor implements, used by supervisor bindings. Defaults to
    /// the type name without its module path.
    fn protocol_name() -> String {
        let full = std::any::type_name::<Self>();
        let plain = full.split('<').next().unwrap_or(full);
        plain.rsplit("::").next().unwrap_or(plain).to_owned()
    }

    /// Runs before the first protocol message is delivered.
    ///
    /// # Errors
    ///
    /// A returned error is handled by supervision like any handler failure.
    async fn before_start(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs when the stop sequence begins. A returned error is logged and the actor stops
    /// anyway.
    async fn before_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs once the actor left its stage. A returned error is logged.
    async fn after_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs on the failed instance before a restart replaces it.
    async fn before_restart(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        _reason: &Error,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs when the supervisor resumes the actor after `reason`.
    async fn before_resume(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        _reason: &Error,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Execution context of an actor.
///
/// The context is owned by the actor's cell and handed to behaviour and hooks together with
/// the actor state. It gives access to the actor's identity, its stage and the services of
/// the world.
///
/// # Examples
///
/// ```ignore
/// impl Parent {
///     async fn spawn_worker(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
///         let worker: ActorRef<Worker> =
///             ctx.child_actor_for(Definition::has(Worker::default).named("worker"))?;
///         self.workers.push(worker);
///         Ok(())
///     }
/// }
/// ```
pub struct ActorContext<A: Actor> {
    /// Address of the actor owning this context.
    address: Address,
    /// Address of the parent, if any.
    parent: Option<Address>,
    /// Stage hosting the actor.
    stage: Stage,
    /// Back-reference used to hand out references to the actor itself.
    cell: Weak<ActorCell<A>>,
    /// Set by [`ActorContext::stop`]; honoured when the current delivery ends.
    stop_requested: bool,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(
        address: Address,
        parent: Option<Address>,
        stage: Stage,
        cell: Weak<ActorCell<A>>,
    ) -> Self {
        Self {
            address,
            parent,
            stage,
            cell,
            stop_requested: false,
        }
    }

    /// Address of this actor.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Address of the parent actor, if any.
    pub fn parent(&self) -> Option<&Address> {
        self.parent.as_ref()
    }

    /// Stage hosting this actor.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Dead-letter sink of the world.
    pub fn dead_letters(&self) -> &DeadLetters {
        self.stage.dead_letters()
    }

    /// Scheduler of the world.
    pub fn scheduler(&self) -> &Scheduler {
        self.stage.scheduler()
    }

    /// Reference to this actor, usable to send messages to itself.
    pub fn reference(&self) -> Option<ActorRef<A>> {
        self.cell.upgrade().map(ActorRef::new)
    }

    /// Requests the stop of this actor. The stop sequence runs as soon as the current
    /// delivery returns.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Creates an actor whose parent is this actor.
    ///
    /// # Errors
    ///
    /// See [`Stage::actor_for`].
    pub fn child_actor_for<P, C>(&self, definition: Definition<C>) -> Result<P, Error>
    where
        P: Protocol<C>,
        C: Actor,
    {
        self.stage
            .create(definition, Some(self.address.clone()))
            .map(P::proxy)
    }

    /// Typed reference to the parent actor. `None` when the actor has no parent, the parent
    /// stopped or the parent is not a `P`.
    pub fn parent_ref<P: Actor>(&self) -> Option<ActorRef<P>> {
        self.parent
            .as_ref()
            .and_then(|parent| self.stage.actor_of::<P>(parent))
    }
}

/// Typed handle of an actor.
///
/// Every call packages the invocation into a message and sends it through the actor's
/// mailbox, returning before delivery happens. The handle is cheap to clone and can be
/// shared between tasks and threads.
pub struct ActorRef<A: Actor> {
    cell: Arc<ActorCell<A>>,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<A: Actor> Debug for ActorRef<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("address", self.address())
            .finish()
    }
}

impl<A: Actor> ActorRef<A> {
    pub(crate) fn new(cell: Arc<ActorCell<A>>) -> Self {
        Self { cell }
    }

    /// Address of the target actor.
    pub fn address(&self) -> &Address {
        self.cell.address()
    }

    /// True once the target reached the stopped state.
    pub fn is_stopped(&self) -> bool {
        self.cell.is_stopped()
    }

    pub(crate) fn dead_letters(&self) -> &DeadLetters {
        self.cell.dead_letters()
    }

    /// Sends a deferred invocation to the actor.
    ///
    /// `representation` names the invocation in logs and dead letters, e.g. `"withdraw(10)"`.
    /// The consumer receives exclusive access to the actor and its context when the message
    /// is delivered. An error it returns is handed to supervision, never to the sender.
    ///
    /// # Errors
    ///
    /// - `Error::Closed` when the mailbox no longer admits messages; the invocation is
    ///   recorded as a dead letter.
    /// - `Error::MailboxFull` or `Error::ResourceExhausted` when the actor's mailbox or
    ///   dispatcher is saturated.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// counter.tell("increment()", |counter, _ctx| counter.increment_boxed())?;
    ///
    /// counter.tell("add(5)", |counter, _ctx| {
    ///     Box::pin(async move {
    ///         counter.value += 5;
    ///         Ok(())
    ///     })
    /// })?;
    /// ```
    pub fn tell<F>(&self, representation: &str, consumer: F) -> Result<(), Error>
    where
        F: for<'a> FnOnce(
                &'a mut A,
                &'a mut ActorContext<A>,
            ) -> BoxFuture<'a, Result<(), Error>>
            + Send
            + 'static,
    {
        self.cell
            .send(Envelope::Invoke(Box::new(consumer)), representation)
    }

    /// Sends a deferred invocation producing a value and waits for the reply.
    ///
    /// A failing invocation returns its error to the caller and is also handed to
    /// supervision.
    ///
    /// # Errors
    ///
    /// The errors of [`ActorRef::tell`], the error returned by the invocation, and
    /// `Error::ActorStopped` when the actor stopped before answering.
    pub async fn ask<R, F>(&self, representation: &str, consumer: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(
                &'a mut A,
                &'a mut ActorContext<A>,
            ) -> BoxFuture<'a, Result<R, Error>>
            + Send
            + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.tell(representation, move |actor, ctx| {
            Box::pin(async move {
                match consumer(actor, ctx).await {
                    Ok(value) => {
                        let _ = sender.send(Ok(value));
                        Ok(())
                    }
                    Err(error) => {
                        let _ = sender.send(Err(error.clone()));
                        Err(error)
                    }
                }
            })
        })?;

        match receiver.await {
            Ok(reply) => reply,
            Err(_) if self.is_stopped() => {
                Err(Error::ActorStopped(self.address().clone()))
            }
            Err(_) => Err(Error::Receive(
                self.address().clone(),
                format!("no reply to {}", representation),
            )),
        }
    }

    /// Requests the stop of the actor without waiting for it. Messages sent before the
    /// request are delivered first.
    ///
    /// # Errors
    ///
    /// The errors of [`ActorRef::tell`].
    pub fn tell_stop(&self) -> Result<(), Error> {
        ActorEntry::request_stop(self.cell.clone(), None)
    }

    /// Requests the stop of the actor and waits until it is stopped. Stopping an actor
    /// that is already stopped succeeds.
    ///
    /// # Errors
    ///
    /// `Error::Stop` when the stop request could not be queued.
    pub async fn ask_stop(&self) -> Result<(), Error> {
        let (sender, receiver) = oneshot::channel();
        match ActorEntry::request_stop(self.cell.clone(), Some(sender)) {
            Ok(()) => {
                // A dropped acknowledgement means a concurrent stop won.
                let _ = receiver.await;
                Ok(())
            }
            Err(Error::Closed(_)) => Ok(()),
            Err(error) => Err(Error::Stop(error.to_string())),
        }
    }
}

/// Typed proxy over an actor.
///
/// A protocol proxy turns direct-looking method calls into messages. Implementations hold the
/// [`ActorRef`] and build one deferred invocation per protocol method; see
/// [`CancellableProxy`](crate::CancellableProxy).
pub trait Protocol<A: Actor>: Sized {
    /// Wraps the reference returned by actor creation.
    fn proxy(actor: ActorRef<A>) -> Self;
}

impl<A: Actor> Protocol<A> for ActorRef<A> {
    fn proxy(actor: ActorRef<A>) -> Self {
        actor
    }
}

/// Recipe of an actor: how to instantiate it and where to place it.
///
/// The instantiator captures the constructor parameters and is kept by the actor's cell,
/// so that a restart builds a fresh instance the same way.
///
/// # Examples
///
/// ```ignore
/// let definition = Definition::has(|| Account::new(100))
///     .named("account")
///     .with_mailbox("arrayQueueMailbox");
/// let account: ActorRef<Account> = world.actor_for(definition)?;
/// ```
pub struct Definition<A: Actor> {
    pub(crate) instantiator: Arc<dyn Fn() -> A + Send + Sync>,
    pub(crate) name: Option<String>,
    pub(crate) mailbox_name: Option<String>,
    pub(crate) address: Option<Address>,
    pub(crate) parent: Option<Address>,
    pub(crate) supervisor: Option<Arc<dyn Supervisor>>,
}

impl<A: Actor> Clone for Definition<A> {
    fn clone(&self) -> Self {
        Self {
            instantiator: self.instantiator.clone(),
            name: self.name.clone(),
            mailbox_name: self.mailbox_name.clone(),
            address: self.address.clone(),
            parent: self.parent.clone(),
            supervisor: self.supervisor.clone(),
        }
    }
}

impl<A: Actor> Definition<A> {
    /// Definition instantiating the actor with `instantiator`.
    pub fn has<F>(instantiator: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            instantiator: Arc::new(instantiator),
            name: None,
            mailbox_name: None,
            address: None,
            parent: None,
            supervisor: None,
        }
    }

    /// Name carried by the allocated address.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Mailbox provider to use instead of the default one.
    pub fn with_mailbox(mut self, mailbox_name: &str) -> Self {
        self.mailbox_name = Some(mailbox_name.to_owned());
        self
    }

    /// Explicit address instead of an allocated one.
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Parent instead of the stage's default parent.
    pub fn with_parent(mut self, parent: &Address) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Supervisor of the children of this actor.
    pub fn with_supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub(crate) fn instantiate(&self) -> A {
        (self.instantiator)()
    }

    /// Name the address will carry.
    pub(crate) fn actor_name(&self) -> String {
        self.name.clone().unwrap_or_else(A::protocol_name)
    }
}
