// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Stagecraft: an actor runtime built on tokio.
//! Re-exports the `actor` crate, which provides the world, stages, mailboxes, dispatchers
//! and supervision. See the `actor` crate documentation for a guided tour.

pub use actor::{
    ARRAY_QUEUE_MAILBOX, Actor, ActorContext, ActorRef, Address, ArrayQueueMailboxConfig,
    Backoff, Cancellable, CancellableProxy, Configuration, DeadLetter, DeadLetters,
    Definition, DirectiveSupervisor, Error, LifeCycleState, Mailbox, MailboxProvider,
    Protocol, QUEUE_MAILBOX, QueueMailboxConfig, Scheduled, ScheduledTask, Scheduler,
    Sink, Stage, Subscriber, Supervised, SupervisionDirective, SupervisionStrategy,
    Supervisor, SupervisorBinding, World,
};
