// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Dispatchers
//!
//! A dispatcher moves messages from mailboxes into actor behaviour using the process's compute
//! threads. Two strategies exist:
//!
//! - [`ExecutorDispatcher`](crate::mailbox::queue::ExecutorDispatcher) multiplexes many
//!   mailboxes over the tokio thread pool, bounded by an admission counter.
//! - [`ArrayQueueDispatcher`](crate::mailbox::array_queue::ArrayQueueDispatcher) owns one
//!   mailbox and one dedicated thread that polls it with an idle backoff.
//!
//! Both claim the mailbox's `delivering` flag before draining it, which is what keeps each
//! actor single-threaded.
//!

use crate::{Error, mailbox::Mailbox};

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Scheduling strategy for mailbox draining.
pub trait Dispatcher: Send + Sync {
    /// Stops accepting work. Cooperative: running deliveries finish.
    fn close(&self);

    /// True once [`Dispatcher::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Notifies the dispatcher that `mailbox` has pending work.
    ///
    /// # Errors
    ///
    /// `Error::ResourceExhausted` when the dispatcher cannot admit the work and is not
    /// closing.
    fn execute(&self, mailbox: Arc<dyn Mailbox>) -> Result<(), Error>;

    /// True when senders must call [`Dispatcher::execute`] after every send; false when the
    /// dispatcher finds work by itself.
    fn requires_execution_notification(&self) -> bool;
}

/// Non-blocking counting semaphore bounding concurrent drain tasks.
#[derive(Debug)]
pub struct AdmissionCounter {
    maximum: usize,
    current: AtomicUsize,
}

impl AdmissionCounter {
    /// Counter admitting at most `maximum` concurrent holders.
    pub fn new(maximum: usize) -> Self {
        Self {
            maximum,
            current: AtomicUsize::new(0),
        }
    }

    /// Upper bound of concurrent holders.
    pub fn maximum(&self) -> usize {
        self.maximum
    }

    /// Current number of holders.
    pub fn in_use(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Takes one slot without blocking. Returns false when every slot is taken.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.current.load(Ordering::SeqCst);
        while current < self.maximum {
            match self.current.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Gives one slot back.
    pub fn release(&self) {
        let _ = self.current.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |current| current.checked_sub(1),
        );
    }
}
