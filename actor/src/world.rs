// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # World
//!
//! The `world` module provides the `World` type, the root container of an actor application.
//! A world owns the default stage (and any stage created by name), the dead-letter sink, the
//! scheduler, the mailbox-provider keeper and a registry of dynamic dependencies.
//!
//! Starting a world bootstraps the supervision tree with two root actors: the private root,
//! which stops whatever fails below it, and the public root, the default parent of user
//! actors, which restarts them.
//!

use crate::{
    Address, Error,
    actor::{Actor, ActorRef, Definition, Protocol},
    address::AddressFactory,
    config::Configuration,
    dead_letters::DeadLetters,
    mailbox::{
        ARRAY_QUEUE_MAILBOX, Mailbox, MailboxProvider, MailboxProviderKeeper, QUEUE_MAILBOX,
        array_queue::ArrayQueueMailboxProvider, queue::QueueMailboxProvider,
    },
    scheduler::Scheduler,
    stage::{Services, Stage},
    supervision::{DirectiveSupervisor, Supervisor, SupervisorBinding, SupervisorRegistry},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::debug;

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Name of the stage every world starts with.
pub const DEFAULT_STAGE: &str = "__defaultStage";

/// Name of the private root actor.
pub const PRIVATE_ROOT_NAME: &str = "#private";

/// Name of the public root actor.
pub const PUBLIC_ROOT_NAME: &str = "#public";

/// Root of the supervision tree. Supervises the public root.
pub struct PrivateRoot;

#[async_trait]
impl Actor for PrivateRoot {}

/// Default parent of user actors.
pub struct PublicRoot;

#[async_trait]
impl Actor for PublicRoot {}

struct WorldInner {
    name: String,
    services: Arc<Services>,
    default_stage: Stage,
    stages: RwLock<HashMap<String, Stage>>,
    dynamic: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    private_root: ActorRef<PrivateRoot>,
    public_root: ActorRef<PublicRoot>,
    terminated: AtomicBool,
}

/// Root container of an actor application. Cheap to clone.
///
/// # Examples
///
/// ```ignore
/// use actor::{ActorRef, Definition, World};
///
/// let world = World::start("bank")?;
/// let account: ActorRef<Account> = world.actor_for(Definition::has(Account::default))?;
/// account.tell("deposit(10)", |account, _ctx| account.deposit(10))?;
/// world.terminate().await;
/// ```
#[derive(Clone)]
pub struct World {
    inner: Arc<WorldInner>,
}

impl World {
    /// Starts a world with the default configuration. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// `Error::Start` when there is no current tokio runtime or the root actors cannot be
    /// created.
    pub fn start(name: &str) -> Result<Self, Error> {
        Self::start_with(name, Configuration::default())
    }

    /// Starts a world with `config`. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`World::start`].
    pub fn start_with(name: &str, config: Configuration) -> Result<Self, Error> {
        let handle = Handle::try_current().map_err(|e| Error::Start(e.to_string()))?;

        let mailboxes = MailboxProviderKeeper::new();
        mailboxes.keep(
            QUEUE_MAILBOX,
            Arc::new(QueueMailboxProvider::new(handle.clone(), &config.queue_mailbox)),
            config.queue_mailbox.default,
        );
        mailboxes.keep(
            ARRAY_QUEUE_MAILBOX,
            Arc::new(ArrayQueueMailboxProvider::new(
                config.array_queue_mailbox.clone(),
            )),
            config.array_queue_mailbox.default,
        );

        let services = Arc::new(Services {
            addresses: AddressFactory::new(),
            mailboxes,
            dead_letters: DeadLetters::new(),
            scheduler: Scheduler::new(handle),
            supervisors: SupervisorRegistry::new(config.supervisors.clone()),
            config,
        });

        let default_stage = Stage::new(DEFAULT_STAGE, services.clone());
        let private_root = default_stage
            .create(
                Definition::has(|| PrivateRoot)
                    .named(PRIVATE_ROOT_NAME)
                    .with_supervisor(Arc::new(DirectiveSupervisor::private_root())),
                None,
            )
            .map_err(|e| Error::Start(e.to_string()))?;
        let public_root = default_stage
            .create(
                Definition::has(|| PublicRoot)
                    .named(PUBLIC_ROOT_NAME)
                    .with_supervisor(Arc::new(DirectiveSupervisor::public_root())),
                Some(private_root.address().clone()),
            )
            .map_err(|e| Error::Start(e.to_string()))?;
        default_stage.set_default_parent(public_root.address().clone());

        let mut stages = HashMap::new();
        stages.insert(DEFAULT_STAGE.to_owned(), default_stage.clone());

        debug!("World {} is started.", name);
        Ok(Self {
            inner: Arc::new(WorldInner {
                name: name.to_owned(),
                services,
                default_stage,
                stages: RwLock::new(stages),
                dynamic: RwLock::new(HashMap::new()),
                private_root,
                public_root,
                terminated: AtomicBool::new(false),
            }),
        })
    }

    /// Name of the world.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The default stage.
    pub fn stage(&self) -> &Stage {
        &self.inner.default_stage
    }

    /// Stage named `name`, created on first use. Stages other than the default one have no
    /// default parent.
    ///
    /// # Errors
    ///
    /// `Error::Terminated` after [`World::terminate`].
    pub fn stage_named(&self, name: &str) -> Result<Stage, Error> {
        self.check_running()?;
        let mut stages = self.inner.stages.write();
        let stage = stages
            .entry(name.to_owned())
            .or_insert_with(|| Stage::new(name, self.inner.services.clone()));
        Ok(stage.clone())
    }

    /// Creates an actor in the default stage; see [`Stage::actor_for`].
    ///
    /// # Errors
    ///
    /// `Error::Terminated` after [`World::terminate`], plus the errors of
    /// [`Stage::actor_for`].
    pub fn actor_for<P, A>(&self, definition: Definition<A>) -> Result<P, Error>
    where
        P: Protocol<A>,
        A: Actor,
    {
        self.check_running()?;
        self.inner.default_stage.actor_for(definition)
    }

    /// Dead-letter sink.
    pub fn dead_letters(&self) -> &DeadLetters {
        &self.inner.services.dead_letters
    }

    /// Scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.services.scheduler
    }

    /// Registers `dependency` under `name`, replacing any previous one.
    pub fn register_dynamic<T>(&self, name: &str, dependency: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.inner
            .dynamic
            .write()
            .insert(name.to_owned(), dependency);
    }

    /// Dependency registered under `name`. `None` when absent or not a `T`.
    pub fn resolve_dynamic<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let dependency = self.inner.dynamic.read().get(name).cloned()?;
        dependency.downcast::<T>().ok()
    }

    /// Name of the default mailbox provider.
    ///
    /// # Errors
    ///
    /// `Error::NoDefaultMailboxProvider` when none is marked default.
    pub fn find_default_mailbox_name(&self) -> Result<String, Error> {
        self.inner.services.mailboxes.find_default()
    }

    /// True when a mailbox provider is registered under `name`.
    pub fn is_valid_mailbox_name(&self, name: &str) -> bool {
        self.inner.services.mailboxes.is_valid_name(name)
    }

    /// Mailbox from the provider registered under `name`.
    ///
    /// # Errors
    ///
    /// `Error::MailboxProviderNotFound` for an unknown name, plus the provider's own errors.
    pub fn assign_mailbox(&self, name: &str, hash_code: u64) -> Result<Arc<dyn Mailbox>, Error> {
        let services = &self.inner.services;
        services
            .mailboxes
            .assign_mailbox(name, hash_code, &services.dead_letters)
    }

    /// Registers a mailbox provider. A new default demotes the previous one.
    pub fn register_mailbox_provider(
        &self,
        name: &str,
        provider: Arc<dyn MailboxProvider>,
        is_default: bool,
    ) {
        self.inner
            .services
            .mailboxes
            .keep(name, provider, is_default);
    }

    /// Registers a supervisor instance referenced by supervisor bindings.
    pub fn register_supervisor(&self, name: &str, supervisor: Arc<dyn Supervisor>) {
        self.inner.services.supervisors.register(name, supervisor);
    }

    /// Adds a common supervisor binding.
    pub fn bind_supervisor(&self, binding: SupervisorBinding) {
        self.inner.services.supervisors.bind(binding);
    }

    /// The public root, default parent of user actors.
    pub fn default_parent(&self) -> &ActorRef<PublicRoot> {
        &self.inner.public_root
    }

    /// The public root.
    pub fn public_root(&self) -> &ActorRef<PublicRoot> {
        &self.inner.public_root
    }

    /// The private root.
    pub fn private_root(&self) -> &ActorRef<PrivateRoot> {
        &self.inner.private_root
    }

    /// Address of the default parent.
    pub fn default_parent_address(&self) -> &Address {
        self.inner.public_root.address()
    }

    /// Stops every stage, then closes the scheduler and the mailbox providers. Pending
    /// messages are delivered before each actor stops. The mailbox providers enter shutdown
    /// first, so a saturated dispatcher defers stop requests instead of refusing them.
    /// Idempotent.
    pub async fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("World {} is terminating.", self.name());
        self.inner.services.mailboxes.begin_shutdown();

        let secondary: Vec<Stage> = self
            .inner
            .stages
            .read()
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_STAGE)
            .map(|(_, stage)| stage.clone())
            .collect();
        for stage in secondary {
            stage.stop().await;
        }
        self.inner.default_stage.stop().await;

        self.inner.services.scheduler.close();
        self.inner.services.mailboxes.close();
        self.inner.dynamic.write().clear();
        debug!("World {} is terminated.", self.name());
    }

    /// True from the moment [`World::terminate`] begins.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    fn check_running(&self) -> Result<(), Error> {
        if self.is_terminated() {
            return Err(Error::Terminated(format!("World {}", self.name())));
        }
        Ok(())
    }
}
