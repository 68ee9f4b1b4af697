// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cancellable
//!
//! The `Cancellable` protocol and its proxy. The proxy is the reference shape of every
//! protocol proxy: each method packs the invocation into a message, sends it through the
//! actor's mailbox and returns before the actor runs it.
//!

use crate::{
    Error,
    actor::{Actor, ActorContext, ActorRef, Protocol},
    dead_letters::DeadLetter,
};

use async_trait::async_trait;
use tracing::debug;

/// Protocol of actors whose work can be cancelled.
#[async_trait]
pub trait Cancellable: Actor {
    /// Cancels the work of the actor.
    async fn cancel(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error>;
}

/// Proxy of the [`Cancellable`] protocol.
pub struct CancellableProxy<A: Cancellable> {
    actor: ActorRef<A>,
}

impl<A: Cancellable> Clone for CancellableProxy<A> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl<A: Cancellable> Protocol<A> for CancellableProxy<A> {
    fn proxy(actor: ActorRef<A>) -> Self {
        Self { actor }
    }
}

impl<A: Cancellable> CancellableProxy<A> {
    const REPRESENTATION: &'static str = "cancel()";

    /// Requests the cancellation. True means the request was accepted, not that it
    /// completed. A stopped actor gets no message: the request becomes a dead letter and
    /// false is returned.
    pub fn cancel(&self) -> bool {
        if self.actor.is_stopped() {
            self.actor.dead_letters().failed_delivery(DeadLetter::new(
                self.actor.address(),
                Self::REPRESENTATION,
            ));
            return false;
        }
        match self
            .actor
            .tell(Self::REPRESENTATION, |actor, ctx| actor.cancel(ctx))
        {
            Ok(()) => true,
            Err(error) => {
                debug!(
                    "Cancellation of {} was not accepted: {}.",
                    self.actor.address(),
                    error
                );
                false
            }
        }
    }

    /// The proxied actor.
    pub fn actor(&self) -> &ActorRef<A> {
        &self.actor
    }
}
