// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor Runtime
//!
//! A message-driven actor runtime. Each actor owns private state, processes one message at a
//! time from its mailbox and is reachable only through a protocol proxy that turns method
//! calls into messages. Actors live in stages, form a parent/child tree and are supervised:
//! when an actor fails, a supervisor decides whether it resumes, restarts, stops or escalates
//! the failure upwards.
//!
//! ## Overview
//!
//! - **World**: root container. Owns the default stage, named stages, the dead-letter sink,
//!   the scheduler, the mailbox providers and a registry of dynamic dependencies.
//! - **Stage**: registry of actors. Allocates addresses, assigns mailboxes and stops actors
//!   children first.
//! - **Mailbox**: per-actor FIFO queue coupled to a dispatcher. Two providers are built in:
//!   [`QUEUE_MAILBOX`] (unbounded queue drained on a bounded pool of tokio tasks) and
//!   [`ARRAY_QUEUE_MAILBOX`] (bounded ring buffer drained by a dedicated thread).
//! - **Supervision**: directives chosen by [`Supervisor`] implementations, bounded by a
//!   [`SupervisionStrategy`] restart window.
//! - **Dead letters**: every message that cannot be delivered is reported to the world's
//!   [`DeadLetters`] sink.
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::{Actor, ActorContext, ActorRef, Definition, Error, World};
//! use async_trait::async_trait;
//!
//! #[derive(Default)]
//! struct Counter {
//!     value: u64,
//! }
//!
//! #[async_trait]
//! impl Actor for Counter {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let world = World::start("counting")?;
//!     let counter: ActorRef<Counter> = world.actor_for(Definition::has(Counter::default))?;
//!
//!     counter.tell("increment(5)", |counter, _ctx| {
//!         Box::pin(async move {
//!             counter.value += 5;
//!             Ok(())
//!         })
//!     })?;
//!     let value = counter
//!         .ask("value()", |counter, _ctx| Box::pin(async move { Ok(counter.value) }))
//!         .await?;
//!     assert_eq!(value, 5);
//!
//!     world.terminate().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocols
//!
//! A protocol is a trait implemented by an actor plus a proxy type implementing [`Protocol`].
//! Each proxy method packs the call into a message with a textual representation, which is
//! what dead letters and logs show. [`CancellableProxy`] is the reference proxy.
//!

mod actor;
mod address;
mod backoff;
mod cancellable;
mod cell;
mod config;
mod dead_letters;
mod dispatcher;
mod error;
mod lifecycle;
pub mod mailbox;
mod message;
mod scheduler;
mod sink;
mod stage;
mod supervision;
mod world;

//
// Core Actor Types
//

/// Trait implemented by every actor, with its lifecycle hooks.
pub use actor::Actor;

/// Context handed to an actor while it processes a message.
pub use actor::ActorContext;

/// Typed reference to an actor. Sends messages through its mailbox.
pub use actor::ActorRef;

/// Recipe to instantiate an actor: instantiator, name, mailbox, address, parent, supervisor.
pub use actor::Definition;

/// Conversion from an [`ActorRef`] to a protocol proxy.
pub use actor::Protocol;

/// Unique identity of an actor.
pub use address::Address;

/// Current phase of an actor.
pub use lifecycle::LifeCycleState;

//
// Messages
//

/// Type-erased message queued in a mailbox.
pub use message::Message;

/// Boxed [`Message`].
pub use message::BoxedMessage;

/// Invocation carried by a message.
pub use message::Consumer;

//
// Error Handling
//

/// Error type of every runtime operation.
pub use error::Error;

//
// World and Stages
//

/// Root container of an actor application.
pub use world::World;

/// Root of the supervision tree.
pub use world::PrivateRoot;

/// Default parent of user actors.
pub use world::PublicRoot;

/// Names of the default stage and of the root actors.
pub use world::{DEFAULT_STAGE, PRIVATE_ROOT_NAME, PUBLIC_ROOT_NAME};

/// Registry of actors in one scheduling domain.
pub use stage::Stage;

//
// Configuration
//

/// Runtime configuration.
pub use config::{ArrayQueueMailboxConfig, Configuration, QueueMailboxConfig};

//
// Mailboxes and Dispatchers
//

/// Mailbox contract and the built-in provider names.
pub use mailbox::{
    ARRAY_QUEUE_MAILBOX, DeliveryFlags, Mailbox, MailboxProvider, QUEUE_MAILBOX,
};

/// Built-in mailboxes, dispatchers and providers.
pub use mailbox::{
    array_queue::{ArrayQueueDispatcher, ArrayQueueMailbox, ArrayQueueMailboxProvider},
    queue::{ExecutorDispatcher, QueueMailbox, QueueMailboxProvider},
};

/// Dispatcher contract and its admission control.
pub use dispatcher::{AdmissionCounter, Dispatcher};

/// Idle backoff of polling dispatchers.
pub use backoff::{BACKOFF_CAP, BACKOFF_START, Backoff};

//
// Supervision
//

/// Supervision directives, strategies, supervisors and their bindings.
pub use supervision::{
    DirectiveSupervisor, Supervised, SupervisionDirective, SupervisionStrategy, Supervisor,
    SupervisorBinding,
};

//
// Dead Letters and Sinks
//

/// Undeliverable messages and their sink.
pub use dead_letters::{DeadLetter, DeadLetters};

/// Bridge from a broadcast channel to a subscriber.
pub use sink::{Sink, Subscriber};

//
// Scheduling
//

/// Timed signals.
pub use scheduler::{Scheduled, ScheduledTask, Scheduler};

//
// Protocols
//

/// Cancellation protocol and its proxy.
pub use cancellable::{Cancellable, CancellableProxy};
