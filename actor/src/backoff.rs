// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Idle backoff
//!
//! Delay generation for dispatcher loops that find no work. An adaptive backoff doubles its
//! delay on every idle round up to a cap and falls back to the base delay as soon as a message
//! is delivered. A fixed backoff always waits the configured delay.
//!

use ::backoff::{ExponentialBackoff, backoff::Backoff as _};

use std::time::Duration;

/// Base delay of an adaptive backoff.
pub const BACKOFF_START: Duration = Duration::from_millis(1);

/// Largest delay an adaptive backoff grows to.
pub const BACKOFF_CAP: Duration = Duration::from_millis(4096);

/// Idle delay generator owned by a single dispatcher loop.
#[derive(Debug)]
pub struct Backoff {
    strategy: Strategy,
}

#[derive(Debug)]
enum Strategy {
    Fixed(Duration),
    Adaptive(ExponentialBackoff),
}

impl Backoff {
    /// Adaptive backoff from [`BACKOFF_START`] to [`BACKOFF_CAP`].
    pub fn adaptive() -> Self {
        Self::adaptive_with(BACKOFF_START, BACKOFF_CAP)
    }

    /// Adaptive backoff with an explicit base delay and cap.
    pub fn adaptive_with(start: Duration, cap: Duration) -> Self {
        let inner = ExponentialBackoff {
            current_interval: start,
            initial_interval: start,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: cap.max(start),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        Self {
            strategy: Strategy::Adaptive(inner),
        }
    }

    /// Backoff that always waits `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: Strategy::Fixed(delay),
        }
    }

    /// Builds the backoff selected by a `fixed_backoff` setting in milliseconds, where `0`
    /// selects the adaptive strategy.
    pub fn from_millis(fixed_backoff: u64) -> Self {
        if fixed_backoff == 0 {
            Self::adaptive()
        } else {
            Self::fixed(Duration::from_millis(fixed_backoff))
        }
    }

    /// True when the delay is constant.
    pub fn is_fixed(&self) -> bool {
        matches!(self.strategy, Strategy::Fixed(_))
    }

    /// Returns the delay to wait now and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        match &mut self.strategy {
            Strategy::Fixed(delay) => *delay,
            Strategy::Adaptive(inner) => {
                let cap = inner.max_interval;
                inner.next_backoff().unwrap_or(cap).min(cap)
            }
        }
    }

    /// Waits for the current delay, then grows it.
    pub async fn now(&mut self) {
        let delay = self.next_delay();
        tokio::time::sleep(delay).await;
    }

    /// Returns to the base delay after a successful delivery.
    pub fn reset(&mut self) {
        if let Strategy::Adaptive(inner) = &mut self.strategy {
            inner.reset();
        }
    }
}
