// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervision
//!
//! A supervisor decides what happens to an actor whose handler failed. It is consulted, never
//! owned, by the failing actor: first the common supervisors bound to the actor's stage and
//! protocol, then the supervisors of its ancestors, nearest first. `Escalate` hands the
//! failure to the next candidate; when no candidate is left the actor is stopped.
//!

use crate::{Address, Error};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

/// What to do with a failed actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisionDirective {
    /// Ignore the failure and keep processing messages.
    Resume,
    /// Replace the actor state with a fresh instance and run `before_start` again.
    Restart,
    /// Stop the failed actor only.
    Stop,
    /// Let the next supervisor in the chain decide.
    Escalate,
}

/// Restart limits of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionStrategy {
    /// Restarts allowed inside `period`. Negative means unlimited.
    pub intensity: i32,
    /// Sliding window the intensity is measured over.
    pub period: Duration,
}

impl SupervisionStrategy {
    /// Intensity of the default strategy.
    pub const DEFAULT_INTENSITY: i32 = 1;
    /// Period of the default strategy.
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);
    /// Intensity that never converts a restart into a stop.
    pub const FOREVER_INTENSITY: i32 = -1;

    /// Strategy with the given limits.
    pub fn new(intensity: i32, period: Duration) -> Self {
        Self { intensity, period }
    }

    /// Strategy allowing unlimited restarts.
    pub fn forever() -> Self {
        Self::new(Self::FOREVER_INTENSITY, Self::DEFAULT_PERIOD)
    }
}

impl Default for SupervisionStrategy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTENSITY, Self::DEFAULT_PERIOD)
    }
}

/// Description of the failed actor handed to a supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct Supervised {
    /// Address of the failed actor.
    pub address: Address,
    /// Protocol the actor implements.
    pub protocol: String,
    /// Stage hosting the actor.
    pub stage: String,
}

/// Failure policy for an actor subtree.
pub trait Supervisor: Send + Sync + 'static {
    /// Chooses the directive for `error` raised by `supervised`.
    fn inform(&self, error: &Error, supervised: &Supervised) -> SupervisionDirective;

    /// Restart limits applied when this supervisor answers `Restart`.
    fn strategy(&self) -> SupervisionStrategy {
        SupervisionStrategy::default()
    }
}

/// Supervisor answering the same directive for every failure.
#[derive(Debug, Clone)]
pub struct DirectiveSupervisor {
    directive: SupervisionDirective,
    strategy: SupervisionStrategy,
}

impl DirectiveSupervisor {
    /// Supervisor answering `directive` with the given restart limits.
    pub fn new(directive: SupervisionDirective, strategy: SupervisionStrategy) -> Self {
        Self {
            directive,
            strategy,
        }
    }

    /// Supervisor of the private root: stops whatever fails.
    pub fn private_root() -> Self {
        Self::new(
            SupervisionDirective::Stop,
            SupervisionStrategy::new(0, SupervisionStrategy::DEFAULT_PERIOD),
        )
    }

    /// Supervisor of the public root: restarts, at most ten times per second.
    pub fn public_root() -> Self {
        Self::new(
            SupervisionDirective::Restart,
            SupervisionStrategy::new(10, Duration::from_secs(1)),
        )
    }
}

impl Supervisor for DirectiveSupervisor {
    fn inform(&self, error: &Error, supervised: &Supervised) -> SupervisionDirective {
        warn!(
            "Actor {} failed: {}. Directive {:?}.",
            supervised.address, error, self.directive
        );
        self.directive
    }

    fn strategy(&self) -> SupervisionStrategy {
        self.strategy
    }
}

/// Binding of a named supervisor to the actors of a stage implementing a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorBinding {
    /// Stage the binding applies to.
    pub stage_name: String,
    /// Actor name the binding is narrowed to. Empty matches every actor.
    #[serde(default)]
    pub actor_name: String,
    /// Protocol the binding applies to.
    pub protocol_name: String,
    /// Name the supervisor instance is registered under.
    pub supervisor_name: String,
}

impl SupervisorBinding {
    /// Binding for every actor of `protocol_name` in `stage_name`.
    pub fn new(stage_name: &str, protocol_name: &str, supervisor_name: &str) -> Self {
        Self {
            stage_name: stage_name.to_owned(),
            actor_name: String::new(),
            protocol_name: protocol_name.to_owned(),
            supervisor_name: supervisor_name.to_owned(),
        }
    }

    /// Narrows the binding to actors named `actor_name`.
    pub fn for_actor(mut self, actor_name: &str) -> Self {
        self.actor_name = actor_name.to_owned();
        self
    }

    /// True when the binding covers `supervised`.
    pub fn matches(&self, supervised: &Supervised) -> bool {
        self.stage_name == supervised.stage
            && self.protocol_name == supervised.protocol
            && (self.actor_name.is_empty()
                || self.actor_name == supervised.address.name())
    }
}

/// Named supervisor instances and the bindings referring to them.
#[derive(Default)]
pub(crate) struct SupervisorRegistry {
    named: RwLock<HashMap<String, Arc<dyn Supervisor>>>,
    bindings: RwLock<Vec<SupervisorBinding>>,
}

impl SupervisorRegistry {
    pub(crate) fn new(bindings: Vec<SupervisorBinding>) -> Self {
        Self {
            named: RwLock::new(HashMap::new()),
            bindings: RwLock::new(bindings),
        }
    }

    pub(crate) fn register(&self, name: &str, supervisor: Arc<dyn Supervisor>) {
        self.named.write().insert(name.to_owned(), supervisor);
    }

    pub(crate) fn bind(&self, binding: SupervisorBinding) {
        self.bindings.write().push(binding);
    }

    /// Common supervisors covering `supervised`, in binding order.
    pub(crate) fn common_for(&self, supervised: &Supervised) -> Vec<Arc<dyn Supervisor>> {
        let named = self.named.read();
        self.bindings
            .read()
            .iter()
            .filter(|binding| binding.matches(supervised))
            .filter_map(|binding| {
                let supervisor = named.get(&binding.supervisor_name).cloned();
                if supervisor.is_none() {
                    warn!(
                        "Supervisor {} bound to {} is not registered.",
                        binding.supervisor_name, binding.protocol_name
                    );
                }
                supervisor
            })
            .collect()
    }
}

/// Restart timestamps of one actor, pruned to the strategy period.
#[derive(Debug, Default)]
pub(crate) struct RestartWindow {
    restarts: VecDeque<Instant>,
}

impl RestartWindow {
    /// Records a restart if `strategy` still allows one.
    pub(crate) fn admit(&mut self, strategy: &SupervisionStrategy) -> bool {
        let now = Instant::now();
        while let Some(oldest) = self.restarts.front() {
            if now.duration_since(*oldest) > strategy.period {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        if strategy.intensity >= 0 && self.restarts.len() >= strategy.intensity as usize {
            return false;
        }
        self.restarts.push_back(now);
        true
    }
}
