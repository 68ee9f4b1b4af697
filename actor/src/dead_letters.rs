// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Dead letters
//!
//! Every message that cannot be delivered (target stopped, mailbox closed, cancellation of a
//! stopped actor) ends up here as a [`DeadLetter`]. The sink logs the record, counts it and
//! broadcasts it to the listeners registered on the world.
//!

use crate::{
    Address,
    sink::{Sink, Subscriber},
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, Receiver, Sender},
    task::JoinHandle,
};
use tracing::warn;

use std::{
    fmt::{Display, Formatter},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Capacity of the dead-letter broadcast channel.
const DEAD_LETTERS_CAPACITY: usize = 1024;

/// Record of an undeliverable or rejected message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    address: Address,
    representation: String,
}

impl DeadLetter {
    /// Creates a record for the invocation `representation` on `address`.
    pub fn new(address: &Address, representation: &str) -> Self {
        Self {
            address: address.clone(),
            representation: representation.to_owned(),
        }
    }

    /// Address of the actor the message was meant for.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Representation of the undelivered invocation.
    pub fn representation(&self) -> &str {
        &self.representation
    }
}

impl Display for DeadLetter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeadLetter[{}.{}]", self.address, self.representation)
    }
}

struct Inner {
    sender: Sender<DeadLetter>,
    count: AtomicUsize,
}

/// Dead-letter sink of a world. Cheap to clone.
#[derive(Clone)]
pub struct DeadLetters {
    inner: Arc<Inner>,
}

impl DeadLetters {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(DEAD_LETTERS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sender,
                count: AtomicUsize::new(0),
            }),
        }
    }

    /// Records a failed delivery.
    pub fn failed_delivery(&self, dead_letter: DeadLetter) {
        warn!("{}", dead_letter);
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        // No listener is not an error.
        let _ = self.inner.sender.send(dead_letter);
    }

    /// Number of dead letters recorded so far.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Subscribes to dead letters recorded from now on.
    pub fn subscribe(&self) -> Receiver<DeadLetter> {
        self.inner.sender.subscribe()
    }

    /// Runs `listener` in its own sink task. Must be called inside a tokio runtime.
    pub fn register_listener(
        &self,
        listener: impl Subscriber<DeadLetter>,
    ) -> JoinHandle<()> {
        let mut sink = Sink::new(self.subscribe(), listener);
        tokio::spawn(async move {
            sink.run().await;
        })
    }
}
