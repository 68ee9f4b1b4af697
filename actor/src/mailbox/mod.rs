// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailboxes
//!
//! A mailbox is the per-actor queue of pending messages. It never blocks: `send` enqueues and
//! returns, `receive` returns the next message or `None`. The `delivering` flag is the single
//! serialization point of an actor: at most one thread holds it at any instant, and only the
//! holder delivers messages.
//!
//! Mailboxes are created by named [`MailboxProvider`]s kept by the world. Two providers are
//! built in:
//!
//! - `"queueMailbox"` ([`queue`]): unbounded queue drained on the shared thread pool.
//! - `"arrayQueueMailbox"` ([`array_queue`]): bounded queue drained by a dedicated thread.
//!

pub mod array_queue;
pub mod queue;

use crate::{
    Error,
    dead_letters::{DeadLetter, DeadLetters},
    message::BoxedMessage,
};

use parking_lot::RwLock;
use tracing::debug;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Name of the unbounded, thread-pool backed mailbox provider.
pub const QUEUE_MAILBOX: &str = "queueMailbox";

/// Name of the bounded, dedicated-thread backed mailbox provider.
pub const ARRAY_QUEUE_MAILBOX: &str = "arrayQueueMailbox";

/// Per-actor message queue with delivery exclusivity.
pub trait Mailbox: Send + Sync {
    /// Stops admitting messages. Pending messages can still be drained.
    fn close(&self);

    /// Monotonic: once true, stays true.
    fn is_closed(&self) -> bool;

    /// True while some thread holds the delivery slot.
    fn is_delivering(&self) -> bool;

    /// `delivering(true)` claims the delivery slot and succeeds for exactly one caller until
    /// it is released; `delivering(false)` releases it and always succeeds.
    fn delivering(&self, flag: bool) -> bool;

    /// Enqueues `message` without blocking.
    ///
    /// # Errors
    ///
    /// - `Error::Closed` when the mailbox is closed; the message goes to dead letters.
    /// - `Error::MailboxFull` when a bounded mailbox stays full; the message goes to dead
    ///   letters.
    /// - `Error::ResourceExhausted` when the dispatcher cannot admit the delivery; the
    ///   message goes to dead letters and is not queued.
    fn send(&self, message: BoxedMessage) -> Result<(), Error>;

    /// Dequeues the next message, if any. Never blocks.
    fn receive(&self) -> Option<BoxedMessage>;

    /// Number of messages waiting.
    fn pending_messages(&self) -> usize;
}

/// The `closed` and `delivering` flags shared by every mailbox implementation.
#[derive(Debug, Default)]
pub struct DeliveryFlags {
    closed: AtomicBool,
    delivering: AtomicBool,
}

impl DeliveryFlags {
    /// Open, not delivering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `closed`. Never reversed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Current value of `closed`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current value of `delivering`.
    pub fn is_delivering(&self) -> bool {
        self.delivering.load(Ordering::SeqCst)
    }

    /// Test-and-set of `delivering`; see [`Mailbox::delivering`].
    pub fn delivering(&self, flag: bool) -> bool {
        if flag {
            self.delivering
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        } else {
            self.delivering.store(false, Ordering::SeqCst);
            true
        }
    }
}

/// Routes a message refused by a closed mailbox to dead letters.
pub(crate) fn reject_closed(
    dead_letters: &DeadLetters,
    message: BoxedMessage,
) -> Error {
    let address = message.address().clone();
    dead_letters
        .failed_delivery(DeadLetter::new(&address, message.representation()));
    Error::Closed(address)
}

/// Factory of mailboxes, selected by name.
pub trait MailboxProvider: Send + Sync {
    /// Creates a mailbox, wiring it to a dispatcher.
    fn provide_mailbox(
        &self,
        hash_code: u64,
        dead_letters: &DeadLetters,
    ) -> Result<Arc<dyn Mailbox>, Error>;

    /// Tells the dispatchers that the world is shutting down. Admission refusals from now on
    /// are swallowed so that stop requests still reach their actors.
    fn begin_shutdown(&self) {}

    /// Closes the dispatchers this provider created.
    fn close(&self);
}

struct MailboxProviderInfo {
    provider: Arc<dyn MailboxProvider>,
    is_default: bool,
}

/// Name-keyed registry of mailbox providers. Exactly one provider is the default.
#[derive(Default)]
pub(crate) struct MailboxProviderKeeper {
    providers: RwLock<HashMap<String, MailboxProviderInfo>>,
}

impl MailboxProviderKeeper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `name`. A new default demotes the previous one.
    pub(crate) fn keep(
        &self,
        name: &str,
        provider: Arc<dyn MailboxProvider>,
        is_default: bool,
    ) {
        let mut providers = self.providers.write();
        if is_default {
            for info in providers.values_mut() {
                info.is_default = false;
            }
        }
        debug!("Keeping mailbox provider {} (default: {}).", name, is_default);
        providers.insert(
            name.to_owned(),
            MailboxProviderInfo {
                provider,
                is_default,
            },
        );
    }

    pub(crate) fn find_default(&self) -> Result<String, Error> {
        self.providers
            .read()
            .iter()
            .find(|(_, info)| info.is_default)
            .map(|(name, _)| name.clone())
            .ok_or(Error::NoDefaultMailboxProvider)
    }

    pub(crate) fn is_valid_name(&self, name: &str) -> bool {
        self.providers.read().contains_key(name)
    }

    pub(crate) fn assign_mailbox(
        &self,
        name: &str,
        hash_code: u64,
        dead_letters: &DeadLetters,
    ) -> Result<Arc<dyn Mailbox>, Error> {
        let provider = self
            .providers
            .read()
            .get(name)
            .map(|info| info.provider.clone())
            .ok_or_else(|| Error::MailboxProviderNotFound(name.to_owned()))?;
        provider.provide_mailbox(hash_code, dead_letters)
    }

    pub(crate) fn begin_shutdown(&self) {
        for info in self.providers.read().values() {
            info.provider.begin_shutdown();
        }
    }

    pub(crate) fn close(&self) {
        for (name, info) in self.providers.read().iter() {
            debug!("Closing mailbox provider {}.", name);
            info.provider.close();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {

    use super::*;

    use crate::Address;

    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    /// Message recording its delivery order into a shared log.
    pub(crate) struct Recorded {
        pub address: Address,
        pub representation: String,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorded {
        pub(crate) fn boxed(
            representation: &str,
            log: &Arc<Mutex<Vec<String>>>,
        ) -> BoxedMessage {
            Box::new(Recorded {
                address: Address::new(1, "recorded"),
                representation: representation.to_owned(),
                log: log.clone(),
            })
        }
    }

    impl crate::message::Message for Recorded {
        fn address(&self) -> &Address {
            &self.address
        }

        fn representation(&self) -> &str {
            &self.representation
        }

        fn deliver(self: Box<Self>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                self.log.lock().push(self.representation.clone());
            })
        }
    }

    struct NullProvider;

    impl MailboxProvider for NullProvider {
        fn provide_mailbox(
            &self,
            _hash_code: u64,
            _dead_letters: &DeadLetters,
        ) -> Result<Arc<dyn Mailbox>, Error> {
            Err(Error::Functional("null".to_owned()))
        }

        fn close(&self) {}
    }

    #[test]
    fn test_delivery_flags_mutual_exclusion() {
        let flags = DeliveryFlags::new();
        assert!(flags.delivering(true));
        assert!(!flags.delivering(true));
        assert!(flags.is_delivering());
        assert!(flags.delivering(false));
        assert!(flags.delivering(false));
        assert!(flags.delivering(true));
    }

    #[test]
    fn test_delivery_flags_exclusive_under_contention() {
        let flags = Arc::new(DeliveryFlags::new());
        let holders = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let claims = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flags = flags.clone();
                let holders = holders.clone();
                let claims = claims.clone();
                let overlapped = overlapped.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        if flags.delivering(true) {
                            if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlapped.store(true, Ordering::SeqCst);
                            }
                            claims.fetch_add(1, Ordering::SeqCst);
                            std::hint::spin_loop();
                            holders.fetch_sub(1, Ordering::SeqCst);
                            flags.delivering(false);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(!overlapped.load(Ordering::SeqCst));
        assert!(claims.load(Ordering::SeqCst) > 0);
        assert!(!flags.is_delivering());
    }

    #[test]
    fn test_delivery_flags_close_is_monotonic() {
        let flags = DeliveryFlags::new();
        assert!(!flags.is_closed());
        flags.close();
        flags.close();
        assert!(flags.is_closed());
    }

    #[test]
    fn test_keeper_has_exactly_one_default() {
        let keeper = MailboxProviderKeeper::new();
        assert_eq!(keeper.find_default(), Err(Error::NoDefaultMailboxProvider));

        keeper.keep("first", Arc::new(NullProvider), true);
        assert_eq!(keeper.find_default().unwrap(), "first");

        keeper.keep("second", Arc::new(NullProvider), true);
        assert_eq!(keeper.find_default().unwrap(), "second");

        keeper.keep("third", Arc::new(NullProvider), false);
        assert_eq!(keeper.find_default().unwrap(), "second");
        assert!(keeper.is_valid_name("first"));
        assert!(!keeper.is_valid_name("fourth"));
    }

    #[test]
    fn test_keeper_fails_loudly_on_unknown_name() {
        let keeper = MailboxProviderKeeper::new();
        let dead_letters = DeadLetters::new();
        let result = keeper.assign_mailbox("missing", 1, &dead_letters);
        assert!(matches!(
            result,
            Err(Error::MailboxProviderNotFound(name)) if name == "missing"
        ));
    }
}
