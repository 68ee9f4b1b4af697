// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Array queue mailbox
//!
//! Bounded mailbox owning one [`ArrayQueueDispatcher`]. The dispatcher runs a loop on its own
//! OS thread: claim the delivery slot, drain up to `throttling_count` messages, release, and
//! back off when the mailbox was empty.
//!
//! With a fixed backoff the loop polls and senders never notify it. With the adaptive
//! backoff every send wakes the loop, so a long idle delay does not add latency.
//!

use crate::{
    Address, Error,
    backoff::Backoff,
    config::ArrayQueueMailboxConfig,
    dead_letters::{DeadLetter, DeadLetters},
    dispatcher::Dispatcher,
    mailbox::{DeliveryFlags, Mailbox, MailboxProvider, reject_closed},
    message::BoxedMessage,
};

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error};

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

/// Bounded FIFO mailbox served by a dedicated thread.
pub struct ArrayQueueMailbox {
    queue: ArrayQueue<BoxedMessage>,
    flags: DeliveryFlags,
    total_send_retries: usize,
    dispatcher: Weak<ArrayQueueDispatcher>,
    dead_letters: DeadLetters,
}

impl ArrayQueueMailbox {
    /// Routes every queued message to dead letters.
    fn drain_to_dead_letters(&self) {
        while let Some(message) = self.queue.pop() {
            self.dead_letters.failed_delivery(DeadLetter::new(
                message.address(),
                message.representation(),
            ));
        }
    }

    fn full(&self, message: BoxedMessage) -> Error {
        let address: Address = message.address().clone();
        error!(
            "Mailbox of actor {} still full after {} retries.",
            address, self.total_send_retries
        );
        self.dead_letters.failed_delivery(DeadLetter::new(
            &address,
            message.representation(),
        ));
        Error::MailboxFull(address)
    }
}

impl Mailbox for ArrayQueueMailbox {
    /// Closing the mailbox also closes its dispatcher.
    fn close(&self) {
        self.flags.close();
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.close();
        }
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
        if self.is_closed() {
            return Err(reject_closed(&self.dead_letters, message));
        }
        let mut message = message;
        let mut retries = 0;
        while let Err(rejected) = self.queue.push(message) {
            if retries >= self.total_send_retries {
                return Err(self.full(rejected));
            }
            retries += 1;
            message = rejected;
            std::thread::yield_now();
        }
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            if dispatcher.requires_execution_notification() {
                dispatcher.wake();
            }
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

/// Dedicated-thread dispatcher serving exactly one [`ArrayQueueMailbox`].
pub struct ArrayQueueDispatcher {
    mailbox: Arc<ArrayQueueMailbox>,
    fixed_backoff: u64,
    throttling_count: usize,
    closed: AtomicBool,
    started: AtomicBool,
    notify: Notify,
}

impl ArrayQueueDispatcher {
    /// Creates the dispatcher and its mailbox. The loop is not running until
    /// [`ArrayQueueDispatcher::start`].
    pub fn new(
        config: &ArrayQueueMailboxConfig,
        dead_letters: DeadLetters,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            mailbox: Arc::new(ArrayQueueMailbox {
                queue: ArrayQueue::new(config.mailbox_size.max(1)),
                flags: DeliveryFlags::new(),
                total_send_retries: config.total_send_retries,
                dispatcher: this.clone(),
                dead_letters,
            }),
            fixed_backoff: config.fixed_backoff,
            throttling_count: config.throttling_count.max(1),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// The mailbox this dispatcher drains.
    pub fn mailbox(&self) -> Arc<ArrayQueueMailbox> {
        self.mailbox.clone()
    }

    /// Spawns the dispatcher thread. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>, name: &str) -> Result<(), Error> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let dispatcher = self.clone();
        std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(dispatcher.run()),
                    Err(e) => {
                        error!("Dispatcher runtime cannot be built: {}.", e);
                        dispatcher.close();
                        dispatcher.mailbox.drain_to_dead_letters();
                    }
                }
            })
            .map(|_| ())
            .map_err(|e| Error::Start(e.to_string()))
    }

    fn wake(&self) {
        self.notify.notify_one();
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::from_millis(self.fixed_backoff);
        debug!("Array queue dispatcher started.");
        while !self.is_closed() {
            if self.deliver().await {
                backoff.reset();
            } else if self.requires_execution_notification() {
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.notify.notified() => {}
                }
            } else {
                backoff.now().await;
            }
        }
        self.mailbox.drain_to_dead_letters();
        debug!("Array queue dispatcher stopped.");
    }

    /// One loop iteration. Returns true when at least one message was delivered.
    async fn deliver(&self) -> bool {
        if !self.mailbox.delivering(true) {
            return false;
        }
        let mut delivered = 0;
        while delivered < self.throttling_count {
            let Some(message) = self.mailbox.receive() else {
                break;
            };
            message.deliver().await;
            delivered += 1;
        }
        self.mailbox.delivering(false);
        delivered > 0
    }
}

impl Dispatcher for ArrayQueueDispatcher {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The dispatcher owns its mailbox; `mailbox` is ignored.
    fn execute(&self, _mailbox: Arc<dyn Mailbox>) -> Result<(), Error> {
        if !self.is_closed() {
            self.wake();
        }
        Ok(())
    }

    fn requires_execution_notification(&self) -> bool {
        self.fixed_backoff == 0
    }
}

/// Provider creating one dedicated-thread dispatcher per mailbox.
pub struct ArrayQueueMailboxProvider {
    config: ArrayQueueMailboxConfig,
    dispatchers: Mutex<Vec<Weak<ArrayQueueDispatcher>>>,
    closed: AtomicBool,
}

impl ArrayQueueMailboxProvider {
    /// Provider building mailboxes from `config`.
    pub fn new(config: ArrayQueueMailboxConfig) -> Self {
        Self {
            config,
            dispatchers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl MailboxProvider for ArrayQueueMailboxProvider {
    fn provide_mailbox(
        &self,
        hash_code: u64,
        dead_letters: &DeadLetters,
    ) -> Result<Arc<dyn Mailbox>, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Terminated("Array queue mailbox provider".to_owned()));
        }
        let dispatcher = ArrayQueueDispatcher::new(&self.config, dead_letters.clone());
        dispatcher.start(&format!("array-queue-dispatcher-{}", hash_code))?;

        let mut dispatchers = self.dispatchers.lock();
        dispatchers.retain(|dispatcher| dispatcher.strong_count() > 0);
        dispatchers.push(Arc::downgrade(&dispatcher));
        let mailbox: Arc<dyn Mailbox> = dispatcher.mailbox();
        Ok(mailbox)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for dispatcher in self.dispatchers.lock().drain(..) {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::mailbox::tests::Recorded;

    use std::time::{Duration, Instant};

    fn config(fixed_backoff: u64, mailbox_size: usize) -> ArrayQueueMailboxConfig {
        ArrayQueueMailboxConfig {
            mailbox_size,
            fixed_backoff,
            throttling_count: 4,
            total_send_retries: 3,
            default: false,
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        let started = Instant::now();
        while !condition() && started.elapsed() < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_adaptive_dispatcher_delivers_in_order() {
        let provider = ArrayQueueMailboxProvider::new(config(0, 64));
        let dead_letters = DeadLetters::new();
        let mailbox = provider.provide_mailbox(7, &dead_letters).unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for index in 0..50 {
            mailbox
                .send(Recorded::boxed(&index.to_string(), &log))
                .unwrap();
        }
        wait_for(|| log.lock().len() == 50).await;

        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(*log.lock(), expected);
        provider.close();
    }

    #[tokio::test]
    async fn test_fixed_backoff_dispatcher_polls() {
        let dispatcher = ArrayQueueDispatcher::new(&config(2, 16), DeadLetters::new());
        assert!(!dispatcher.requires_execution_notification());
        dispatcher.start("fixed-backoff-test").unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher
            .mailbox()
            .send(Recorded::boxed("late()", &log))
            .unwrap();
        wait_for(|| log.lock().len() == 1).await;

        assert_eq!(*log.lock(), vec!["late()".to_owned()]);
        dispatcher.close();
    }

    #[test]
    fn test_full_mailbox_is_rejected() {
        let dead_letters = DeadLetters::new();
        // Never started: nothing drains the queue.
        let dispatcher = ArrayQueueDispatcher::new(&config(0, 2), dead_letters.clone());
        let mailbox = dispatcher.mailbox();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        mailbox.send(Recorded::boxed("1", &log)).unwrap();
        mailbox.send(Recorded::boxed("2", &log)).unwrap();
        let result = mailbox.send(Recorded::boxed("3", &log));

        assert!(matches!(result, Err(Error::MailboxFull(_))));
        assert_eq!(mailbox.pending_messages(), 2);
        assert_eq!(dead_letters.count(), 1);
    }

    #[tokio::test]
    async fn test_closing_mailbox_stops_dispatcher_and_dead_letters_leftovers() {
        let dead_letters = DeadLetters::new();
        let dispatcher = ArrayQueueDispatcher::new(&config(0, 16), dead_letters.clone());
        let mailbox = dispatcher.mailbox();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Queue before the loop starts, then close: the loop exits on its first check.
        mailbox.send(Recorded::boxed("pending()", &log)).unwrap();
        mailbox.close();
        assert!(dispatcher.is_closed());
        dispatcher.start("closing-test").unwrap();

        wait_for(|| dead_letters.count() == 1).await;
        assert_eq!(dead_letters.count(), 1);
        assert!(log.lock().is_empty());

        let result = mailbox.send(Recorded::boxed("after()", &log));
        assert!(matches!(result, Err(Error::Closed(_))));
        assert_eq!(dead_letters.count(), 2);
    }
}
