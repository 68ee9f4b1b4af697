// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Stage
//!
//! A stage is the registry of the actors living in one scheduling domain. It allocates their
//! addresses, assigns their mailboxes, keeps the parent/child relation as address lookups and
//! tears them down children first when it is stopped.
//!

use crate::{
    Address, Error,
    actor::{Actor, ActorRef, Definition, Protocol},
    address::AddressFactory,
    cell::{ActorCell, ActorEntry},
    config::Configuration,
    dead_letters::DeadLetters,
    mailbox::MailboxProviderKeeper,
    message::Envelope,
    scheduler::Scheduler,
    supervision::{Supervised, Supervisor, SupervisorRegistry},
};

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

/// Services of a world shared by all its stages.
pub(crate) struct Services {
    pub(crate) addresses: AddressFactory,
    pub(crate) mailboxes: MailboxProviderKeeper,
    pub(crate) dead_letters: DeadLetters,
    pub(crate) scheduler: Scheduler,
    pub(crate) supervisors: SupervisorRegistry,
    pub(crate) config: Configuration,
}

struct StageInner {
    name: String,
    services: Arc<Services>,
    directory: RwLock<HashMap<Address, Arc<dyn ActorEntry>>>,
    default_parent: OnceLock<Address>,
    stopped: AtomicBool,
}

/// Registry of actors in one scheduling domain. Cheap to clone.
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

impl Stage {
    pub(crate) fn new(name: &str, services: Arc<Services>) -> Self {
        Self {
            inner: Arc::new(StageInner {
                name: name.to_owned(),
                services,
                directory: RwLock::new(HashMap::new()),
                default_parent: OnceLock::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Name of the stage.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Creates an actor and returns its protocol proxy.
    ///
    /// The actor gets an address, a mailbox from the named (or default) provider and a
    /// parent (the definition's, else the stage's default parent). Its start is queued as
    /// the first message of its mailbox, so the proxy is usable at once.
    ///
    /// # Errors
    ///
    /// - `Error::Terminated` when the stage is stopped.
    /// - `Error::Exists` when the explicit address is in use.
    /// - `Error::ActorStopped` when the parent is not alive.
    /// - `Error::MailboxProviderNotFound` / `Error::NoDefaultMailboxProvider`.
    pub fn actor_for<P, A>(&self, definition: Definition<A>) -> Result<P, Error>
    where
        P: Protocol<A>,
        A: Actor,
    {
        let parent = definition
            .parent
            .clone()
            .or_else(|| self.inner.default_parent.get().cloned());
        self.create(definition, parent).map(P::proxy)
    }

    /// Live actor registered under `address`, if it is an `A`.
    pub fn actor_of<A: Actor>(&self, address: &Address) -> Option<ActorRef<A>> {
        self.entry(address)?
            .as_any()
            .downcast::<ActorCell<A>>()
            .ok()
            .map(ActorRef::new)
    }

    /// Number of registered actors.
    pub fn count(&self) -> usize {
        self.inner.directory.read().len()
    }

    /// Scheduler of the world.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.services.scheduler
    }

    /// Dead-letter sink of the world.
    pub fn dead_letters(&self) -> &DeadLetters {
        &self.inner.services.dead_letters
    }

    /// True once [`Stage::stop`] has begun.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stops every actor, children before parents, waiting up to the configured stop
    /// timeout for each one. An actor that fails to stop is logged and skipped.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Stage {} is stopping.", self.name());
        let timeout = self.inner.services.config.stop_timeout();
        for address in self.stop_order() {
            let Some(entry) = self.entry(&address) else {
                continue;
            };
            let (sender, receiver) = oneshot::channel();
            if let Err(error) = entry.request_stop(Some(sender)) {
                warn!("Actor {} cannot be stopped: {}.", address, error);
                continue;
            }
            match tokio::time::timeout(timeout, receiver).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("Actor {} did not stop within {:?}.", address, timeout)
                }
            }
        }
        debug!("Stage {} is stopped.", self.name());
    }

    pub(crate) fn set_default_parent(&self, address: Address) {
        let _ = self.inner.default_parent.set(address);
    }

    /// Registers and starts an actor under `parent`.
    pub(crate) fn create<A: Actor>(
        &self,
        definition: Definition<A>,
        parent: Option<Address>,
    ) -> Result<ActorRef<A>, Error> {
        if self.is_stopped() {
            return Err(Error::Terminated(format!("Stage {}", self.name())));
        }
        if let Some(parent) = &parent {
            match self.entry(parent) {
                Some(entry) if !entry.is_stopped() => {}
                _ => return Err(Error::ActorStopped(parent.clone())),
            }
        }

        let services = &self.inner.services;
        let address = match &definition.address {
            Some(address) => {
                if self.inner.directory.read().contains_key(address) {
                    return Err(Error::Exists(address.clone()));
                }
                services.addresses.reserve(address);
                address.clone()
            }
            None => services.addresses.unique_with(&definition.actor_name()),
        };

        let mailbox_name = match &definition.mailbox_name {
            Some(name) => name.clone(),
            None => services.mailboxes.find_default()?,
        };
        let mailbox = services.mailboxes.assign_mailbox(
            &mailbox_name,
            address.id(),
            &services.dead_letters,
        )?;

        let cell = ActorCell::new(
            address.clone(),
            parent.clone(),
            definition,
            mailbox.clone(),
            self.clone(),
        );
        {
            let mut directory = self.inner.directory.write();
            if directory.contains_key(&address) {
                mailbox.close();
                return Err(Error::Exists(address));
            }
            directory.insert(address.clone(), cell.clone());
        }
        if let Some(parent) = &parent {
            if let Some(entry) = self.entry(parent) {
                entry.add_child(address.clone());
            }
        }

        if let Err(error) = cell.send(Envelope::Start, "start()") {
            self.unregister(&address, parent.as_ref());
            mailbox.close();
            return Err(error);
        }
        debug!(
            "Actor {} is created in stage {} with mailbox {}.",
            address,
            self.name(),
            mailbox_name
        );
        Ok(ActorRef::new(cell))
    }

    /// Removes a stopping actor from the directory and from its parent's children.
    pub(crate) fn unregister(&self, address: &Address, parent: Option<&Address>) {
        self.inner.directory.write().remove(address);
        if let Some(parent) = parent {
            if let Some(entry) = self.entry(parent) {
                entry.remove_child(address);
            }
        }
        debug!("Actor {} is removed from stage {}.", address, self.name());
    }

    /// Fire-and-forget stop of the actor at `address`.
    pub(crate) fn request_stop(&self, address: &Address) {
        if let Some(entry) = self.entry(address) {
            if let Err(error) = entry.request_stop(None) {
                warn!("Actor {} cannot be stopped: {}.", address, error);
            }
        }
    }

    /// Supervision chain of an actor: common supervisors bound to this stage, then the
    /// supervisors of its ancestors, nearest first.
    pub(crate) fn supervisors_for(
        &self,
        supervised: &Supervised,
        parent: Option<&Address>,
    ) -> Vec<Arc<dyn Supervisor>> {
        let mut chain = self.inner.services.supervisors.common_for(supervised);
        let mut visited = HashSet::new();
        let mut next = parent.cloned();
        while let Some(address) = next {
            if !visited.insert(address.clone()) {
                break;
            }
            let Some(entry) = self.entry(&address) else {
                break;
            };
            if let Some(supervisor) = entry.supervisor() {
                chain.push(supervisor);
            }
            next = entry.parent().cloned();
        }
        chain
    }

    fn entry(&self, address: &Address) -> Option<Arc<dyn ActorEntry>> {
        self.inner.directory.read().get(address).cloned()
    }

    /// Post-order over the actor tree: every child precedes its parent.
    fn stop_order(&self) -> Vec<Address> {
        let directory = self.inner.directory.read();
        let mut roots: Vec<&Address> = directory
            .values()
            .filter(|entry| {
                entry
                    .parent()
                    .map_or(true, |parent| !directory.contains_key(parent))
            })
            .map(|entry| entry.address())
            .collect();
        roots.sort();

        let mut order = Vec::with_capacity(directory.len());
        let mut visited = HashSet::new();
        for root in roots {
            let mut stack = vec![(root.clone(), false)];
            while let Some((address, expanded)) = stack.pop() {
                if expanded {
                    order.push(address);
                    continue;
                }
                if !visited.insert(address.clone()) {
                    continue;
                }
                stack.push((address.clone(), true));
                if let Some(entry) = directory.get(&address) {
                    for child in entry.children().into_iter().rev() {
                        stack.push((child, false));
                    }
                }
            }
        }
        // Unreachable entries (cycles cannot exist, but a child may outlive its link).
        for address in directory.keys() {
            if !visited.contains(address) {
                order.push(address.clone());
            }
        }
        order
    }
}
