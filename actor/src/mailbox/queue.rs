// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Queue mailbox
//!
//! Unbounded mailbox drained on the shared tokio thread pool. Every send notifies the
//! [`ExecutorDispatcher`], which admits at most `max_concurrent_threads` drain tasks at a time.
//!

use crate::{
    Error,
    backoff::{BACKOFF_START, Backoff},
    config::QueueMailboxConfig,
    dead_letters::{DeadLetter, DeadLetters},
    dispatcher::{AdmissionCounter, Dispatcher},
    mailbox::{DeliveryFlags, Mailbox, MailboxProvider, reject_closed},
    message::BoxedMessage,
};

use crossbeam::queue::SegQueue;
use tokio::runtime::Handle;
use tracing::{debug, error};

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Largest wait between admission attempts of a deferred drain.
const DEFERRED_ADMISSION_CAP: Duration = Duration::from_millis(64);

/// Unbounded FIFO mailbox.
///
/// A send that finds the mailbox idle claims the delivery slot and asks the dispatcher for a
/// drain task before queueing the message, so a refused message is never queued. It goes to
/// dead letters and the sender gets `Error::ResourceExhausted`.
pub struct QueueMailbox {
    queue: SegQueue<BoxedMessage>,
    flags: DeliveryFlags,
    dispatcher: Arc<ExecutorDispatcher>,
    dead_letters: DeadLetters,
    this: Weak<QueueMailbox>,
}

impl QueueMailbox {
    /// Creates a mailbox drained by `dispatcher`.
    pub fn new(
        dispatcher: Arc<ExecutorDispatcher>,
        dead_letters: DeadLetters,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            queue: SegQueue::new(),
            flags: DeliveryFlags::new(),
            dispatcher,
            dead_letters,
            this: this.clone(),
        })
    }

    /// Starts a drain while holding the delivery slot. `message` is queued only once the
    /// drain is admitted.
    fn dispatch(
        &self,
        this: Arc<QueueMailbox>,
        message: Option<BoxedMessage>,
    ) -> Result<(), Error> {
        match self.dispatcher.admit(self) {
            Ok(admission) => {
                if let Some(message) = message {
                    self.queue.push(message);
                }
                self.dispatcher.start_drain(this, admission);
                Ok(())
            }
            Err(error) => {
                if let Some(message) = message {
                    self.dead_letter(message);
                }
                // Nothing drains this mailbox: whatever was queued while the slot was held
                // is refused as well.
                loop {
                    while let Some(pending) = self.queue.pop() {
                        self.dead_letter(pending);
                    }
                    self.flags.delivering(false);
                    if self.queue.is_empty() || !self.flags.delivering(true) {
                        break;
                    }
                }
                Err(error)
            }
        }
    }

    fn dead_letter(&self, message: BoxedMessage) {
        self.dead_letters.failed_delivery(DeadLetter::new(
            message.address(),
            message.representation(),
        ));
    }
}

impl Mailbox for QueueMailbox {
    fn close(&self) {
        self.flags.close();
    }

    fn is_closed(&self) -> bool {
        self.flags.is_closed()
    }

    fn is_delivering(&self) -> bool {
        self.flags.is_delivering()
    }

    fn delivering(&self, flag: bool) -> bool {
        self.flags.delivering(flag)
    }

    fn send(&self, message: BoxedMessage) -> Result<(), Error> {
        if self.is_closed() || self.dispatcher.is_closed() {
            return Err(reject_closed(&self.dead_letters, message));
        }
        let Some(this) = self.this.upgrade() else {
            return Err(reject_closed(&self.dead_letters, message));
        };
        if self.flags.delivering(true) {
            return self.dispatch(this, Some(message));
        }
        // A drain holds the slot and takes the message from the queue.
        self.queue.push(message);
        // It may have released the slot after its last look at the queue.
        if self.flags.delivering(true) {
            return self.dispatch(this, None);
        }
        Ok(())
    }

    fn receive(&self) -> Option<BoxedMessage> {
        self.queue.pop()
    }

    fn pending_messages(&self) -> usize {
        self.queue.len()
    }
}

/// Outcome of a successful admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// A slot of the admission counter is held.
    Granted,
    /// The counter was full while shutting down; the drain waits for a slot.
    Deferred,
}

/// Thread-pool dispatcher shared by every queue mailbox of a world.
pub struct ExecutorDispatcher {
    handle: Handle,
    admission: Arc<AdmissionCounter>,
    throttling_count: usize,
    shutting_down: AtomicBool,
    closed: AtomicBool,
}

impl ExecutorDispatcher {
    /// Dispatcher submitting drain tasks to `handle`.
    pub fn new(handle: Handle, config: &QueueMailboxConfig) -> Self {
        Self {
            handle,
            admission: Arc::new(AdmissionCounter::new(
                config.max_concurrent_threads(),
            )),
            throttling_count: config.throttling_count.max(1),
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Upper bound of concurrently running drain tasks.
    pub fn max_concurrent_threads(&self) -> usize {
        self.admission.maximum()
    }

    /// Drain tasks running right now.
    pub fn running(&self) -> usize {
        self.admission.in_use()
    }

    /// Enters shutdown. From now on a full admission counter no longer refuses work: the
    /// drain waits for a free slot so that pending stop requests are delivered.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// True once [`ExecutorDispatcher::begin_shutdown`] or [`Dispatcher::close`] was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst) || self.is_closed()
    }

    /// Asks for a drain task for `mailbox`, whose delivery slot the caller holds. The
    /// shutdown load after a failed acquire is the linearization point: a shutdown that
    /// happens-before it defers the drain, any later one does not.
    pub(crate) fn admit(&self, mailbox: &dyn Mailbox) -> Result<Admission, Error> {
        if self.admission.try_acquire() {
            return Ok(Admission::Granted);
        }
        if self.is_shutting_down() {
            debug!("Rejected execution deferred, dispatcher is shutting down.");
            return Ok(Admission::Deferred);
        }
        let reason = format!(
            "{} drain tasks running, {} messages pending",
            self.admission.maximum(),
            mailbox.pending_messages()
        );
        error!("Thread pool dispatcher rejected execution: {}.", reason);
        Err(Error::ResourceExhausted(reason))
    }

    /// Spawns the drain task of an admitted mailbox.
    pub(crate) fn start_drain(&self, mailbox: Arc<dyn Mailbox>, admission: Admission) {
        let counter = self.admission.clone();
        let throttling_count = self.throttling_count;
        self.handle.spawn(async move {
            if admission == Admission::Deferred {
                let mut backoff =
                    Backoff::adaptive_with(BACKOFF_START, DEFERRED_ADMISSION_CAP);
                while !counter.try_acquire() {
                    backoff.now().await;
                }
            }
            drain(mailbox, throttling_count).await;
            counter.release();
        });
    }
}

impl Dispatcher for ExecutorDispatcher {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn execute(&self, mailbox: Arc<dyn Mailbox>) -> Result<(), Error> {
        if self.is_closed() {
            return Ok(());
        }
        // Someone else is draining; it will pick up the pending messages.
        if !mailbox.delivering(true) {
            return Ok(());
        }
        match self.admit(&*mailbox) {
            Ok(admission) => {
                self.start_drain(mailbox, admission);
                Ok(())
            }
            Err(error) => {
                mailbox.delivering(false);
                Err(error)
            }
        }
    }

    fn requires_execution_notification(&self) -> bool {
        false
    }
}

/// Delivers everything pending. Entered holding the delivery slot.
async fn drain(mailbox: Arc<dyn Mailbox>, throttling_count: usize) {
    loop {
        let mut delivered = 0;
        while let Some(message) = mailbox.receive() {
            message.deliver().await;
            delivered += 1;
            if delivered % throttling_count == 0 {
                tokio::task::yield_now().await;
            }
        }
        mailbox.delivering(false);
        // A send racing with the release saw the slot taken and did not spawn a drain.
        if mailbox.pending_messages() == 0 || !mailbox.delivering(true) {
            break;
        }
    }
}

/// Provider of [`QueueMailbox`]es, all sharing one [`ExecutorDispatcher`].
pub struct QueueMailboxProvider {
    dispatcher: Arc<ExecutorDispatcher>,
}

impl QueueMailboxProvider {
    /// Provider whose dispatcher runs on `handle`.
    pub fn new(handle: Handle, config: &QueueMailboxConfig) -> Self {
        let dispatcher = ExecutorDispatcher::new(handle, config);
        debug!(
            "Queue mailbox dispatcher admits {} drain tasks.",
            dispatcher.max_concurrent_threads()
        );
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Dispatcher shared by the mailboxes of this provider.
    pub fn dispatcher(&self) -> &Arc<ExecutorDispatcher> {
        &self.dispatcher
    }
}

impl MailboxProvider for QueueMailboxProvider {
    fn provide_mailbox(
        &self,
        _hash_code: u64,
        dead_letters: &DeadLetters,
    ) -> Result<Arc<dyn Mailbox>, Error> {
        if self.dispatcher.is_closed() {
            return Err(Error::Terminated("Queue mailbox dispatcher".to_owned()));
        }
        let mailbox: Arc<dyn Mailbox> =
            QueueMailbox::new(self.dispatcher.clone(), dead_letters.clone());
        Ok(mailbox)
    }

    fn begin_shutdown(&self) {
        self.dispatcher.begin_shutdown();
    }

    fn close(&self) {
        self.dispatcher.close();
    }
}
