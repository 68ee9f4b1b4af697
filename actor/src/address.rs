// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor address
//!
//! The `address` module provides the `Address` type, the unique and immutable identity of an
//! actor, and the `AddressFactory` that allocates them.
//!

use serde::{Deserialize, Serialize};

use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

/// Unique identity of an actor.
///
/// An `Address` pairs a numeric identifier with a human readable name. It is assigned once,
/// when the actor is created, and is never reused by the `World` that allocated it.
///
/// Equality, ordering and hashing only consider the identifier: the name is a label used for
/// logging and for supervisor bindings.
///
/// # Examples
///
/// ```ignore
/// use actor::Address;
///
/// let address = Address::new(7, "greeter");
/// assert_eq!(address.id(), 7);
/// assert_eq!(address.name(), "greeter");
/// assert_eq!(address.to_string(), "greeter#7");
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Address {
    id: u64,
    name: String,
}

impl Address {
    /// Creates an address from its parts.
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
        }
    }

    /// Numeric identifier of the actor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Human readable name of the actor.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Allocates unique addresses for one `World`.
///
/// Identifiers start at 1 and grow monotonically; an identifier handed out once is never
/// handed out again, even after the actor that owned it has stopped.
#[derive(Debug)]
pub(crate) struct AddressFactory {
    next: AtomicU64,
}

impl AddressFactory {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh address carrying `name`.
    pub(crate) fn unique_with(&self, name: &str) -> Address {
        let id = self.next.fetch_add(1, AtomicOrdering::SeqCst);
        Address::new(id, name)
    }

    /// Moves the counter past an explicitly chosen identifier so it is never allocated.
    pub(crate) fn reserve(&self, address: &Address) {
        self.next
            .fetch_max(address.id().saturating_add(1), AtomicOrdering::SeqCst);
    }
}
