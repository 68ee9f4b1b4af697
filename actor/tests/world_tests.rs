// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the world: bootstrap, creation, delivery, dead letters and
//! termination.

use actor::{
    ARRAY_QUEUE_MAILBOX, Actor, ActorContext, ActorRef, Configuration, DEFAULT_STAGE,
    DeadLetter, Definition, Error, Protocol, QUEUE_MAILBOX, QueueMailboxConfig, QueueMailboxProvider,
    Scheduled, Subscriber, World,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing_test::traced_test;
use uuid::Uuid;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

// Counter actor with observable stop hooks.
#[derive(Default)]
pub struct Counter {
    pub value: usize,
    pub stops: Arc<AtomicUsize>,
}

impl Counter {
    fn with_stops(stops: Arc<AtomicUsize>) -> Self {
        Self { value: 0, stops }
    }
}

#[async_trait]
impl Actor for Counter {
    async fn before_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn increment(counter: &ActorRef<Counter>) -> Result<(), Error> {
    counter.tell("increment()", |counter, _ctx| {
        Box::pin(async move {
            counter.value += 1;
            Ok(())
        })
    })
}

async fn value(counter: &ActorRef<Counter>) -> Result<usize, Error> {
    counter
        .ask("value()", |counter, _ctx| {
            Box::pin(async move { Ok(counter.value) })
        })
        .await
}

// Collects dead-letter representations.
struct Collecting(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl Subscriber<DeadLetter> for Collecting {
    async fn notify(&self, event: DeadLetter) {
        self.0.lock().push(event.representation().to_owned());
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_world_lifecycle() {
    let world = World::start("test-world").unwrap();
    assert_eq!(world.name(), "test-world");
    assert_eq!(world.stage().name(), DEFAULT_STAGE);
    assert_eq!(world.find_default_mailbox_name().unwrap(), QUEUE_MAILBOX);
    assert!(world.is_valid_mailbox_name(ARRAY_QUEUE_MAILBOX));
    assert!(!world.is_valid_mailbox_name("nowhere"));

    let stops = Arc::new(AtomicUsize::new(0));
    let counter: ActorRef<Counter> = world
        .actor_for(Definition::has({
            let stops = stops.clone();
            move || Counter::with_stops(stops.clone())
        }))
        .unwrap();
    assert_eq!(counter.address().name(), "Counter");

    for _ in 0..3 {
        increment(&counter).unwrap();
    }
    assert_eq!(value(&counter).await.unwrap(), 3);
    assert!(!counter.is_stopped());

    world.terminate().await;
    assert!(world.is_terminated());
    assert!(counter.is_stopped());
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    world.terminate().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    let late: Result<ActorRef<Counter>, Error> =
        world.actor_for(Definition::has(Counter::default));
    assert!(matches!(late, Err(Error::Terminated(_))));
}

// Protocol with a single command.
#[async_trait]
pub trait Flagging: Actor {
    async fn raise(&mut self) -> Result<(), Error>;
}

pub struct Flag {
    pub raised: Arc<AtomicUsize>,
}

#[async_trait]
impl Actor for Flag {}

#[async_trait]
impl Flagging for Flag {
    async fn raise(&mut self) -> Result<(), Error> {
        self.raised.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FlaggingProxy<A: Flagging> {
    actor: ActorRef<A>,
}

impl<A: Flagging> Protocol<A> for FlaggingProxy<A> {
    fn proxy(actor: ActorRef<A>) -> Self {
        Self { actor }
    }
}

impl<A: Flagging> FlaggingProxy<A> {
    fn raise(&self) -> Result<(), Error> {
        self.actor.tell("raise()", |actor, _ctx| actor.raise())
    }
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_protocol_proxy_end_to_end() {
    let world = World::start("test-world").unwrap();
    let raised = Arc::new(AtomicUsize::new(0));
    let flag: FlaggingProxy<Flag> = world
        .actor_for(Definition::has({
            let raised = raised.clone();
            move || Flag {
                raised: raised.clone(),
            }
        }))
        .unwrap();

    flag.raise().unwrap();
    world.terminate().await;

    assert_eq!(raised.load(Ordering::SeqCst), 1);
    assert!(flag.actor.is_stopped());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_pending_messages_are_delivered_before_termination() {
    let world = World::start("draining").unwrap();
    let counter: ActorRef<Counter> =
        world.actor_for(Definition::has(Counter::default)).unwrap();
    let seen = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let seen = seen.clone();
        counter
            .tell("increment()", move |counter, _ctx| {
                Box::pin(async move {
                    counter.value += 1;
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .unwrap();
    }
    world.terminate().await;

    assert_eq!(seen.load(Ordering::SeqCst), 100);
    assert!(counter.is_stopped());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_messages_to_stopped_actor_become_dead_letters() {
    let world = World::start("dead-letters").unwrap();
    let collected = Arc::new(Mutex::new(Vec::new()));
    let listener = world
        .dead_letters()
        .register_listener(Collecting(collected.clone()));

    let counter: ActorRef<Counter> =
        world.actor_for(Definition::has(Counter::default)).unwrap();
    counter.ask_stop().await.unwrap();
    assert!(counter.is_stopped());
    assert!(world.stage().actor_of::<Counter>(counter.address()).is_none());

    let before = world.dead_letters().count();
    let result = increment(&counter);
    assert_eq!(result, Err(Error::Closed(counter.address().clone())));
    assert_eq!(world.dead_letters().count(), before + 1);
    assert!(eventually(|| collected.lock().contains(&"increment()".to_owned())).await);

    // Stopping twice succeeds.
    counter.ask_stop().await.unwrap();

    world.terminate().await;
    listener.abort();
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_array_queue_mailbox_actor() {
    let world = World::start("array-queue").unwrap();
    let counter: ActorRef<Counter> = world
        .actor_for(Definition::has(Counter::default).with_mailbox(ARRAY_QUEUE_MAILBOX))
        .unwrap();

    for _ in 0..50 {
        increment(&counter).unwrap();
    }
    assert_eq!(value(&counter).await.unwrap(), 50);

    world.terminate().await;
    assert!(counter.is_stopped());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_dynamic_dependencies() {
    let world = World::start("dynamic").unwrap();
    let name = Uuid::new_v4().to_string();
    let id = Arc::new(Uuid::new_v4());
    world.register_dynamic(&name, id.clone());

    let resolved = world.resolve_dynamic::<Uuid>(&name).unwrap();
    assert!(Arc::ptr_eq(&resolved, &id));
    assert!(world.resolve_dynamic::<String>(&name).is_none());
    assert!(world
        .resolve_dynamic::<Uuid>(&Uuid::new_v4().to_string())
        .is_none());

    let replacement = Arc::new(Uuid::new_v4());
    world.register_dynamic(&name, replacement.clone());
    let resolved = world.resolve_dynamic::<Uuid>(&name).unwrap();
    assert!(Arc::ptr_eq(&resolved, &replacement));

    world.terminate().await;
    assert!(world.resolve_dynamic::<Uuid>(&name).is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_registered_default_mailbox_provider() {
    let world = World::start("providers").unwrap();
    let config = QueueMailboxConfig {
        available_threads: 2,
        ..QueueMailboxConfig::default()
    };
    world.register_mailbox_provider(
        "narrowQueue",
        Arc::new(QueueMailboxProvider::new(Handle::current(), &config)),
        true,
    );
    assert_eq!(world.find_default_mailbox_name().unwrap(), "narrowQueue");

    let counter: ActorRef<Counter> =
        world.actor_for(Definition::has(Counter::default)).unwrap();
    increment(&counter).unwrap();
    assert_eq!(value(&counter).await.unwrap(), 1);

    world.terminate().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_termination_stops_actors_of_a_saturated_dispatcher() {
    let world = World::start("saturated").unwrap();
    let config = QueueMailboxConfig {
        available_threads: 1,
        dispatcher_factor: 1.0,
        ..QueueMailboxConfig::default()
    };
    let provider = Arc::new(QueueMailboxProvider::new(Handle::current(), &config));
    let dispatcher = provider.dispatcher().clone();
    world.register_mailbox_provider("singleQueue", provider, false);
    assert_eq!(dispatcher.max_concurrent_threads(), 1);

    let stops = Arc::new(AtomicUsize::new(0));
    let mut counters = Vec::new();
    for _ in 0..2 {
        let counter: ActorRef<Counter> = world
            .actor_for(
                Definition::has({
                    let stops = stops.clone();
                    move || Counter::with_stops(stops.clone())
                })
                .with_mailbox("singleQueue"),
            )
            .unwrap();
        // The single slot must be free before each send.
        assert!(eventually(|| dispatcher.running() == 0).await);
        assert_eq!(value(&counter).await.unwrap(), 0);
        assert!(eventually(|| dispatcher.running() == 0).await);
        counters.push(counter);
    }

    // Keeps the only drain slot busy while the world goes down.
    counters[0]
        .tell("nap()", |_counter, _ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            })
        })
        .unwrap();
    assert!(eventually(|| dispatcher.running() == 1).await);

    world.terminate().await;
    assert!(counters.iter().all(|counter| counter.is_stopped()));
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}

// Tracks how many invocations of one actor run at the same time.
#[derive(Default)]
pub struct Reentrancy {
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub handled: usize,
}

#[async_trait]
impl Actor for Reentrancy {}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_handler_is_never_reentered_by_concurrent_producers() {
    let world = World::start("reentrancy").unwrap();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let target: ActorRef<Reentrancy> = world
        .actor_for(Definition::has({
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            move || Reentrancy {
                in_flight: in_flight.clone(),
                peak: peak.clone(),
                handled: 0,
            }
        }))
        .unwrap();

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let target = target.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    target
                        .tell("touch()", |target, _ctx| {
                            Box::pin(async move {
                                let now = target.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                target.peak.fetch_max(now, Ordering::SeqCst);
                                tokio::task::yield_now().await;
                                target.handled += 1;
                                target.in_flight.fetch_sub(1, Ordering::SeqCst);
                                Ok(())
                            })
                        })
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let handled = target
        .ask("handled()", |target, _ctx| {
            Box::pin(async move { Ok(target.handled) })
        })
        .await
        .unwrap();
    assert_eq!(handled, 400);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);

    world.terminate().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_queue_mailbox_is_not_default_when_configured_off() {
    let mut config = Configuration::default();
    config.queue_mailbox.default = false;
    config.array_queue_mailbox.default = true;
    let world = World::start_with("configured", config).unwrap();
    assert_eq!(world.find_default_mailbox_name().unwrap(), ARRAY_QUEUE_MAILBOX);

    let counter: ActorRef<Counter> =
        world.actor_for(Definition::has(Counter::default)).unwrap();
    increment(&counter).unwrap();
    assert_eq!(value(&counter).await.unwrap(), 1);

    world.terminate().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_named_stage_has_its_own_actors() {
    let world = World::start("stages").unwrap();
    let workers = world.stage_named("workers").unwrap();
    let counter: ActorRef<Counter> = workers
        .actor_for(Definition::has(Counter::default).named("worker"))
        .unwrap();

    assert_eq!(workers.count(), 1);
    assert!(world.stage().actor_of::<Counter>(counter.address()).is_none());
    assert!(workers.actor_of::<Counter>(counter.address()).is_some());

    increment(&counter).unwrap();
    assert_eq!(value(&counter).await.unwrap(), 1);

    world.terminate().await;
    assert!(counter.is_stopped());
    assert!(workers.is_stopped());
}

// Turns scheduler signals into messages.
struct Ticker(ActorRef<Counter>);

impl Scheduled<usize> for Ticker {
    fn interval_signal(&self, data: &usize) {
        let amount = *data;
        let _ = self.0.tell("add(amount)", move |counter, _ctx| {
            Box::pin(async move {
                counter.value += amount;
                Ok(())
            })
        });
    }
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_scheduled_signal_reaches_actor() {
    let world = World::start("scheduling").unwrap();
    let counter: ActorRef<Counter> =
        world.actor_for(Definition::has(Counter::default)).unwrap();

    let task = world
        .scheduler()
        .schedule_once(
            Arc::new(Ticker(counter.clone())),
            7_usize,
            Duration::from_millis(10),
        )
        .unwrap();

    let mut observed = 0;
    for _ in 0..100 {
        observed = value(&counter).await.unwrap();
        if observed == 7 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(observed, 7);
    assert!(task.is_done());

    world.terminate().await;
    assert!(world.scheduler().is_closed());
}
