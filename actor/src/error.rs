// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::Address;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor runtime.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The reply of an ask could not be received.
    #[error("An error occurred while receiving a message from {0} actor: {1}.")]
    Receive(Address, String),
    /// The mailbox of the actor no longer admits messages.
    #[error("Mailbox of actor {0} is closed.")]
    Closed(Address),
    /// The actor is stopped.
    #[error("Actor {0} is stopped.")]
    ActorStopped(Address),
    /// A bounded mailbox stayed full after every send retry.
    #[error("Mailbox of actor {0} is full.")]
    MailboxFull(Address),
    /// The dispatcher could not admit more concurrent deliveries.
    #[error("Message cannot be sent due to current system resource limitations: {0}.")]
    ResourceExhausted(String),
    /// An actor with the same address is already registered.
    #[error("Actor {0} exists.")]
    Exists(Address),
    /// No mailbox provider is registered under the name.
    #[error("No registered mailbox provider named {0}.")]
    MailboxProviderNotFound(String),
    /// No mailbox provider is marked as default.
    #[error("No registered default mailbox provider.")]
    NoDefaultMailboxProvider,
    /// An error occurred while starting an actor or the world.
    #[error("An error occurred while starting: {0}.")]
    Start(String),
    /// An error occurred while stopping an actor.
    #[error("An error occurred while stopping: {0}.")]
    Stop(String),
    /// An error occurred while restarting an actor.
    #[error("An error occurred while restarting: {0}.")]
    Restart(String),
    /// A message handler panicked.
    #[error("Message handler panicked: {0}.")]
    Panicked(String),
    /// The world, stage or scheduler has been terminated.
    #[error("{0} is terminated.")]
    Terminated(String),
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}
