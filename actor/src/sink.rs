// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Sink and subscriber pattern implementation.
//!
//! Sinks run in separate tasks and receive records from a broadcast channel, notifying one
//! subscriber per record in arrival order. Dead-letter listeners are attached this way.

use async_trait::async_trait;
use tokio::sync::broadcast::{Receiver as EventReceiver, error::RecvError};

use tracing::{debug, warn};

use std::fmt::Debug;

/// A sink that receives records from a broadcast channel and notifies a subscriber.
///
/// # Type Parameters
///
/// * `E` - The record type that this sink will process.
///
pub struct Sink<E>
where
    E: Clone + Debug + Send + 'static,
{
    /// The subscriber that will be notified of records.
    subscriber: Box<dyn Subscriber<E>>,
    /// The broadcast receiver.
    event_receiver: EventReceiver<E>,
}

impl<E> Sink<E>
where
    E: Clone + Debug + Send + 'static,
{
    /// Creates a new Sink with the given receiver and subscriber.
    pub fn new(
        event_receiver: EventReceiver<E>,
        subscriber: impl Subscriber<E>,
    ) -> Self {
        Sink {
            subscriber: Box::new(subscriber),
            event_receiver,
        }
    }

    /// Runs the sink's processing loop until the channel is closed.
    ///
    /// A lagging receiver skips the records it missed and keeps going.
    pub async fn run(&mut self) {
        loop {
            match self.event_receiver.recv().await {
                Ok(event) => {
                    debug!("Received {:?}. Notify to the subscriber.", event);
                    self.subscriber.notify(event).await;
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Sink lagged behind, {} records skipped.", skipped);
                    continue;
                }
            }
        }
    }
}

/// Trait for types that process records delivered by a [`Sink`].
#[async_trait]
pub trait Subscriber<E>: Send + Sync + 'static
where
    E: Send + 'static,
{
    /// Called for every record received by the sink.
    async fn notify(&self, event: E);
}

#[cfg(test)]
mod tests {

    use super::*;

    use tokio::sync::{Mutex, broadcast};

    use std::sync::Arc;

    struct Collecting(Arc<Mutex<Vec<u32>>>);

    #[async_trait]
    impl Subscriber<u32> for Collecting {
        async fn notify(&self, event: u32) {
            self.0.lock().await.push(event);
        }
    }

    #[tokio::test]
    async fn test_sink_notifies_in_order_until_closed() {
        let (sender, receiver) = broadcast::channel(16);
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut sink = Sink::new(receiver, Collecting(collected.clone()));
        let task = tokio::spawn(async move { sink.run().await });

        for value in 0..5 {
            sender.send(value).unwrap();
        }
        drop(sender);
        task.await.unwrap();

        assert_eq!(*collected.lock().await, vec![0, 1, 2, 3, 4]);
    }
}
