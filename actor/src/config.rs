// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Configuration
//!
//! Tuning parameters of a world, already parsed. Any serde format can produce a
//! [`Configuration`]; missing fields take their defaults.
//!

use crate::supervision::SupervisorBinding;

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Settings of a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Unbounded, thread-pool backed mailboxes.
    pub queue_mailbox: QueueMailboxConfig,
    /// Bounded, dedicated-thread backed mailboxes.
    pub array_queue_mailbox: ArrayQueueMailboxConfig,
    /// Common supervisors bound to stages and protocols.
    pub supervisors: Vec<SupervisorBinding>,
    /// How long teardown waits for each actor to stop, in milliseconds.
    pub stop_timeout_ms: u64,
}

impl Configuration {
    /// Teardown wait per actor.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            queue_mailbox: QueueMailboxConfig::default(),
            array_queue_mailbox: ArrayQueueMailboxConfig::default(),
            supervisors: Vec::new(),
            stop_timeout_ms: 5000,
        }
    }
}

/// Settings of the `"queueMailbox"` provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueMailboxConfig {
    /// Threads the dispatcher may count on.
    pub available_threads: usize,
    /// Multiplier applied to `available_threads` to get the admission bound.
    pub dispatcher_factor: f32,
    /// Messages drained before the drain task yields.
    pub throttling_count: usize,
    /// Whether this provider is the default one.
    pub default: bool,
}

impl QueueMailboxConfig {
    /// `available_threads × dispatcher_factor`, at least one.
    pub fn max_concurrent_threads(&self) -> usize {
        let maximum = (self.available_threads as f32 * self.dispatcher_factor) as usize;
        maximum.max(1)
    }
}

impl Default for QueueMailboxConfig {
    fn default() -> Self {
        Self {
            available_threads: num_cpus::get().max(4),
            dispatcher_factor: 1.5,
            throttling_count: 10,
            default: true,
        }
    }
}

/// Settings of the `"arrayQueueMailbox"` provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayQueueMailboxConfig {
    /// Capacity of each mailbox.
    pub mailbox_size: usize,
    /// Idle delay in milliseconds; `0` selects the adaptive backoff.
    pub fixed_backoff: u64,
    /// Messages drained per loop iteration.
    pub throttling_count: usize,
    /// Attempts made on a full mailbox before rejecting the send.
    pub total_send_retries: usize,
    /// Whether this provider is the default one.
    pub default: bool,
}

impl Default for ArrayQueueMailboxConfig {
    fn default() -> Self {
        Self {
            mailbox_size: 1024,
            fixed_backoff: 0,
            throttling_count: 10,
            total_send_retries: 10,
            default: false,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert!(config.queue_mailbox.default);
        assert!(!config.array_queue_mailbox.default);
        assert!(config.queue_mailbox.available_threads >= 4);
        assert_eq!(config.array_queue_mailbox.mailbox_size, 1024);
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_max_concurrent_threads_is_at_least_one() {
        let config = QueueMailboxConfig {
            available_threads: 4,
            dispatcher_factor: 1.5,
            ..QueueMailboxConfig::default()
        };
        assert_eq!(config.max_concurrent_threads(), 6);

        let starved = QueueMailboxConfig {
            available_threads: 0,
            ..QueueMailboxConfig::default()
        };
        assert_eq!(starved.max_concurrent_threads(), 1);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Configuration = serde_json::from_str(
            r#"{ "array_queue_mailbox": { "fixed_backoff": 5 }, "stop_timeout_ms": 100 }"#,
        )
        .unwrap();
        assert_eq!(config.array_queue_mailbox.fixed_backoff, 5);
        assert_eq!(config.array_queue_mailbox.total_send_retries, 10);
        assert_eq!(config.stop_timeout_ms, 100);
        assert!(config.queue_mailbox.default);
    }
}
