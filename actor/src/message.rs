// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Messages
//!
//! A message is the envelope of one pending invocation on a target actor. It is created by a
//! protocol proxy, travels through the target's mailbox and is consumed exactly once when a
//! dispatcher delivers it.
//!

use crate::{
    Address, Error,
    actor::{Actor, ActorContext},
    cell::ActorCell,
};

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use std::sync::Arc;

/// Type-erased envelope stored in mailboxes.
///
/// Mailboxes and dispatchers never know the concrete actor type: they only move messages
/// around and call [`Message::deliver`] once the single-deliverer slot has been claimed.
pub trait Message: Send + 'static {
    /// Address of the target actor.
    fn address(&self) -> &Address;

    /// Diagnostic representation of the invocation, e.g. `"cancel()"`.
    fn representation(&self) -> &str;

    /// Consumes the message, running the deferred invocation against its target.
    fn deliver(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Boxed message as stored in a mailbox.
pub type BoxedMessage = Box<dyn Message>;

/// Deferred invocation of protocol behaviour on an actor of type `A`.
///
/// The closure receives exclusive access to the actor and its context for the duration of
/// one delivery.
pub type Consumer<A> = Box<
    dyn for<'a> FnOnce(
            &'a mut A,
            &'a mut ActorContext<A>,
        ) -> BoxFuture<'a, Result<(), Error>>
        + Send,
>;

/// What a local message asks its target to do.
pub(crate) enum Envelope<A: Actor> {
    /// Run `before_start` and enter the running state.
    Start,
    /// Run protocol behaviour.
    Invoke(Consumer<A>),
    /// Stop the actor, optionally acknowledging completion.
    Stop(Option<oneshot::Sender<()>>),
}

/// Message addressed to an actor living in this process.
pub(crate) struct LocalMessage<A: Actor> {
    cell: Arc<ActorCell<A>>,
    envelope: Envelope<A>,
    representation: String,
}

impl<A: Actor> LocalMessage<A> {
    pub(crate) fn new(
        cell: Arc<ActorCell<A>>,
        envelope: Envelope<A>,
        representation: &str,
    ) -> Self {
        Self {
            cell,
            envelope,
            representation: representation.to_owned(),
        }
    }
}

impl<A: Actor> Message for LocalMessage<A> {
    fn address(&self) -> &Address {
        self.cell.address()
    }

    fn representation(&self) -> &str {
        &self.representation
    }

    fn deliver(self: Box<Self>) -> BoxFuture<'static, ()> {
        let LocalMessage {
            cell,
            envelope,
            representation,
        } = *self;
        Box::pin(async move { cell.deliver(envelope, &representation).await })
    }
}
