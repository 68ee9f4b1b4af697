// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor lifecycle
//!
//! State machine of a single actor: `Unstarted → Running → Stopping → Stopped`. Transitions
//! are performed with compare-and-swap so that concurrent observers (proxies checking whether
//! the actor is stopped) never see a state going backwards.
//!

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifeCycleState {
    /// Created and registered, `before_start` not delivered yet.
    Unstarted = 0,
    /// Delivering protocol messages.
    Running = 1,
    /// Unregistering, stopping children and running stop hooks.
    Stopping = 2,
    /// Terminal. Any further delivery attempt is a dead letter.
    Stopped = 3,
}

impl From<u8> for LifeCycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => LifeCycleState::Unstarted,
            1 => LifeCycleState::Running,
            2 => LifeCycleState::Stopping,
            _ => LifeCycleState::Stopped,
        }
    }
}

/// Lifecycle owned by exactly one actor.
#[derive(Debug)]
pub(crate) struct LifeCycle {
    state: AtomicU8,
}

impl LifeCycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(LifeCycleState::Unstarted as u8),
        }
    }

    pub(crate) fn state(&self) -> LifeCycleState {
        LifeCycleState::from(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state() == LifeCycleState::Stopped
    }

    pub(crate) fn is_stopping_or_stopped(&self) -> bool {
        matches!(
            self.state(),
            LifeCycleState::Stopping | LifeCycleState::Stopped
        )
    }

    /// `Unstarted → Running`. Returns false when the actor was not unstarted.
    pub(crate) fn start(&self) -> bool {
        self.transition(LifeCycleState::Unstarted, LifeCycleState::Running)
    }

    /// `Unstarted | Running → Stopping`. Returns false when a stop is already under way or
    /// complete, so only one caller ever runs the stop sequence.
    pub(crate) fn begin_stopping(&self) -> bool {
        self.transition(LifeCycleState::Running, LifeCycleState::Stopping)
            || self.transition(LifeCycleState::Unstarted, LifeCycleState::Stopping)
    }

    /// `Stopping → Stopped`.
    pub(crate) fn stopped(&self) {
        self.state
            .store(LifeCycleState::Stopped as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: LifeCycleState, to: LifeCycleState) -> bool {
        self.state
            .compare_exchange(
                from as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}
