// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Scheduler
//!
//! Timed signals for actors and anything else living in a world. Each scheduled action runs
//! in its own tokio task guarded by a child of the scheduler's cancellation token, so closing
//! the scheduler cancels every pending action at once.
//!

use crate::Error;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Receiver of scheduler signals.
///
/// Implementations usually hold an [`ActorRef`](crate::ActorRef) and turn the signal into a
/// message, so the actor handles it like any other invocation.
pub trait Scheduled<D>: Send + Sync + 'static {
    /// Called when a scheduled delay or interval elapses.
    fn interval_signal(&self, data: &D);
}

/// Handle of a scheduled action.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    token: CancellationToken,
    done: Arc<AtomicBool>,
}

impl ScheduledTask {
    /// Cancels the action. Returns true only when this call stopped a live action.
    pub fn cancel(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// True once the action was cancelled or a one-shot action fired.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Scheduler of a world. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
    token: CancellationToken,
}

impl Scheduler {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            token: CancellationToken::new(),
        }
    }

    /// Signals `scheduled` once, after `delay`.
    ///
    /// # Errors
    ///
    /// `Error::Terminated` when the scheduler is closed.
    pub fn schedule_once<D>(
        &self,
        scheduled: Arc<dyn Scheduled<D>>,
        data: D,
        delay: Duration,
    ) -> Result<ScheduledTask, Error>
    where
        D: Send + Sync + 'static,
    {
        let task = self.task()?;
        let token = task.token.clone();
        let done = task.done.clone();
        self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !done.swap(true, Ordering::SeqCst) {
                        scheduled.interval_signal(&data);
                    }
                }
            }
        });
        Ok(task)
    }

    /// Signals `scheduled` after `delay`, then every `interval` until cancelled.
    ///
    /// # Errors
    ///
    /// `Error::Terminated` when the scheduler is closed.
    pub fn schedule<D>(
        &self,
        scheduled: Arc<dyn Scheduled<D>>,
        data: D,
        delay: Duration,
        interval: Duration,
    ) -> Result<ScheduledTask, Error>
    where
        D: Send + Sync + 'static,
    {
        let task = self.task()?;
        let token = task.token.clone();
        self.handle.spawn(async move {
            let mut next = tokio::time::Instant::now() + delay;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(next) => {
                        scheduled.interval_signal(&data);
                        next += interval;
                    }
                }
            }
        });
        Ok(task)
    }

    /// Cancels every scheduled action and refuses new ones.
    pub fn close(&self) {
        debug!("Scheduler is closing.");
        self.token.cancel();
    }

    /// True once [`Scheduler::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    fn task(&self) -> Result<ScheduledTask, Error> {
        if self.is_closed() {
            return Err(Error::Terminated("Scheduler".to_owned()));
        }
        Ok(ScheduledTask {
            token: self.token.child_token(),
            done: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::sync::atomic::AtomicUsize;

    struct Counting(AtomicUsize);

    impl Scheduled<usize> for Counting {
        fn interval_signal(&self, data: &usize) {
            self.0.fetch_add(*data, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_schedule_once_fires_once() {
        let scheduler = Scheduler::new(Handle::current());
        let counting = Arc::new(Counting(AtomicUsize::new(0)));

        let task = scheduler
            .schedule_once(counting.clone(), 3_usize, Duration::from_millis(10))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(counting.0.load(Ordering::SeqCst), 3);
        assert!(task.is_done());
        assert!(!task.cancel());
    }

    #[tokio::test]
    async fn test_cancelled_task_never_fires() {
        let scheduler = Scheduler::new(Handle::current());
        let counting = Arc::new(Counting(AtomicUsize::new(0)));

        let task = scheduler
            .schedule_once(counting.clone(), 1_usize, Duration::from_millis(30))
            .unwrap();
        assert!(task.cancel());
        assert!(!task.cancel());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeating_task_until_cancelled() {
        let scheduler = Scheduler::new(Handle::current());
        let counting = Arc::new(Counting(AtomicUsize::new(0)));

        let task = scheduler
            .schedule(
                counting.clone(),
                1_usize,
                Duration::from_millis(1),
                Duration::from_millis(10),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(75)).await;
        assert!(task.cancel());
        let fired = counting.0.load(Ordering::SeqCst);
        assert!(fired >= 3);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn test_closed_scheduler_refuses_work() {
        let scheduler = Scheduler::new(Handle::current());
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let pending = scheduler
            .schedule_once(counting.clone(), 1_usize, Duration::from_millis(20))
            .unwrap();

        scheduler.close();
        assert!(scheduler.is_closed());
        let refused = scheduler.schedule_once(counting.clone(), 1_usize, Duration::ZERO);
        assert!(matches!(refused, Err(Error::Terminated(_))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
        assert!(!pending.is_done());
    }
}
