//! Topic-based publish/subscribe dispatcher.
//!
//! The dispatcher decouples producers of notifications from their consumers:
//!
//! ```text
//! publish(topic, payload) → delivery queue → dispatch loop → worker pool → subscribers
//! ```
//!
//! - **Fire-and-forget**: `publish` only enqueues; it never waits for a subscriber.
//! - **Publish order**: a single dispatch loop consumes the queue, so messages reach
//!   the loop in the order they were published.
//! - **Concurrent fan-out**: each matched subscriber call runs as its own task on a
//!   fixed-size worker pool. Invocation order across subscribers is not guaranteed.
//! - **Isolation**: a subscriber that returns an error or panics is logged and
//!   counted; delivery to other subscribers and other topics continues.
//! - **Snapshots**: the subscriber list of a topic is copied under a read lock
//!   before delivery, so concurrent subscribe/unsubscribe never disturbs an
//!   in-progress fan-out.
//!
//! Topics need no registration; they exist while they have subscribers.
//!
//! ## Subscription lifetimes
//!
//! - [`Dispatcher::subscribe`] registers a strong callback that lives until
//!   [`Dispatcher::unsubscribe`] removes it.
//! - [`Dispatcher::subscribe_weak`] binds a method to a receiver held only through
//!   a `Weak`. Once the receiver is dropped the subscription is skipped at dispatch
//!   time (never invoked, never an error) and purged on the next change to the
//!   topic's subscriber list.
//! - [`Dispatcher::subscribe_scoped`] and [`Dispatcher::subscribe_channel`] return
//!   handles that unsubscribe when dropped.
//!
//! ## Stopping
//!
//! [`Dispatcher::stop`] closes the delivery queue, lets the dispatch loop drain what
//! was already published, waits for in-flight subscriber calls, and joins all
//! threads. Afterwards `publish` returns [`DispatchError::Stopped`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use seisflow_core::sync::{lock, read, write};
use seisflow_core::{PoolError, WorkerPool, panic_message};

use crate::envelope::Envelope;
use crate::subscription::{Subscription, SubscriptionHandle, SubscriptionId};

/// A subscriber callback.
///
/// Returning an error marks the delivery as failed; it is logged and never
/// reaches the publisher.
pub type Callback<P> = Arc<dyn Fn(&Envelope<P>) -> anyhow::Result<()> + Send + Sync>;

type WeakMethod<P> =
    Arc<dyn Fn(&(dyn Any + Send + Sync), &Envelope<P>) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Callback`].
///
/// Keep the returned `Arc` to unsubscribe by identity later.
pub fn callback<P, F>(f: F) -> Callback<P>
where
    P: ?Sized,
    F: Fn(&Envelope<P>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher was stopped; nothing more is accepted.
    #[error("dispatcher is stopped")]
    Stopped,
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name used for threads and logs
    pub name: String,
    /// Size of the subscriber worker pool
    pub workers: usize,
    /// How long the dispatch loop blocks before re-checking for shutdown
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            workers: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Messages accepted by `publish`
    pub published: u64,
    /// Subscriber calls that returned `Ok`
    pub delivered: u64,
    /// Subscriber calls that returned an error or panicked
    pub failed: u64,
    /// Weak subscriptions skipped because their receiver was gone
    pub skipped_dead: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped_dead: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_dead: self.skipped_dead.load(Ordering::Relaxed),
        }
    }
}

enum Target<P: ?Sized> {
    Strong(Callback<P>),
    Weak {
        receiver: Weak<dyn Any + Send + Sync>,
        method: WeakMethod<P>,
    },
}

impl<P: ?Sized + 'static> Target<P> {
    /// Resolve to a callable; `None` when a weak receiver is gone.
    ///
    /// A resolved weak target holds its receiver strongly until the call ends.
    fn resolve(&self) -> Option<Callback<P>> {
        match self {
            Target::Strong(cb) => Some(cb.clone()),
            Target::Weak { receiver, method } => {
                let receiver = receiver.upgrade()?;
                let method = method.clone();
                let cb: Callback<P> =
                    Arc::new(move |envelope: &Envelope<P>| method(&*receiver, envelope));
                Some(cb)
            }
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Target::Strong(_) => true,
            Target::Weak { receiver, .. } => receiver.strong_count() > 0,
        }
    }

    fn is_callback(&self, candidate: &Callback<P>) -> bool {
        match self {
            Target::Strong(cb) => same_allocation(Arc::as_ptr(cb), Arc::as_ptr(candidate)),
            Target::Weak { .. } => false,
        }
    }

    fn is_receiver(&self, candidate: *const ()) -> bool {
        match self {
            Target::Strong(_) => false,
            Target::Weak { receiver, .. } => {
                receiver.strong_count() > 0 && Weak::as_ptr(receiver) as *const () == candidate
            }
        }
    }
}

impl<P: ?Sized> Clone for Target<P> {
    fn clone(&self) -> Self {
        match self {
            Target::Strong(cb) => Target::Strong(cb.clone()),
            Target::Weak { receiver, method } => Target::Weak {
                receiver: receiver.clone(),
                method: method.clone(),
            },
        }
    }
}

fn same_allocation<A: ?Sized, B: ?Sized>(a: *const A, b: *const B) -> bool {
    a as *const () == b as *const ()
}

struct Entry<P: ?Sized> {
    id: SubscriptionId,
    target: Target<P>,
}

struct Outbox<P: ?Sized> {
    sender: mpsc::Sender<Envelope<P>>,
    next_sequence: u64,
}

struct Shared<P: ?Sized> {
    name: String,
    subscribers: RwLock<HashMap<String, Vec<Entry<P>>>>,
    next_subscription: AtomicU64,
    outbox: Mutex<Option<Outbox<P>>>,
    dispatch_loop: Mutex<Option<thread::JoinHandle<()>>>,
    pool: WorkerPool,
    counters: Arc<Counters>,
}

impl<P: ?Sized + Send + Sync + 'static> Shared<P> {
    fn register(&self, topic: String, target: Target<P>) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut topics = write(&self.subscribers);
        let entries = topics.entry(topic).or_default();
        entries.retain(|e| e.target.is_live());
        entries.push(Entry { id, target });
        id
    }

    /// Remove entries of `topic` matching `predicate`, purging dead weak entries.
    ///
    /// Returns how many matching entries were removed.
    fn remove_where(&self, topic: &str, predicate: impl Fn(&Entry<P>) -> bool) -> usize {
        let mut topics = write(&self.subscribers);
        let Some(entries) = topics.get_mut(topic) else {
            return 0;
        };

        let before = entries.len();
        entries.retain(|e| !predicate(e));
        let removed = before - entries.len();
        entries.retain(|e| e.target.is_live());

        if entries.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    fn snapshot(&self, topic: &str) -> Vec<(SubscriptionId, Target<P>)> {
        read(&self.subscribers)
            .get(topic)
            .map(|entries| entries.iter().map(|e| (e.id, e.target.clone())).collect())
            .unwrap_or_default()
    }

    fn deliver(&self, envelope: Envelope<P>) {
        let targets = self.snapshot(envelope.topic());
        if targets.is_empty() {
            trace!(dispatcher = %self.name, topic = %envelope.topic(), "no subscribers");
            return;
        }

        let envelope = Arc::new(envelope);
        for (id, target) in targets {
            let Some(cb) = target.resolve() else {
                self.counters.skipped_dead.fetch_add(1, Ordering::Relaxed);
                trace!(dispatcher = %self.name, topic = %envelope.topic(), subscription = %id, "skipping dead weak subscriber");
                continue;
            };

            let envelope = envelope.clone();
            let counters = self.counters.clone();
            if let Err(err) = self
                .pool
                .execute(move || invoke(id, &cb, &envelope, &counters))
            {
                warn!(dispatcher = %self.name, subscription = %id, error = %err, "could not schedule subscriber");
            }
        }
    }
}

impl<P: ?Sized> Drop for Shared<P> {
    fn drop(&mut self) {
        // Closing the queue ends the dispatch loop; the pool joins on its own drop.
        let _ = lock(&self.outbox).take();
    }
}

fn invoke<P: ?Sized>(
    id: SubscriptionId,
    cb: &Callback<P>,
    envelope: &Envelope<P>,
    counters: &Counters,
) {
    match catch_unwind(AssertUnwindSafe(|| (**cb)(envelope))) {
        Ok(Ok(())) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(err)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(topic = %envelope.topic(), subscription = %id, error = ?err, "subscriber failed");
        }
        Err(payload) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                topic = %envelope.topic(),
                subscription = %id,
                panic = %panic_message(payload.as_ref()),
                "subscriber panicked"
            );
        }
    }
}

fn dispatch_loop<P: ?Sized + Send + Sync + 'static>(
    name: &str,
    shared: Weak<Shared<P>>,
    rx: mpsc::Receiver<Envelope<P>>,
    poll_interval: Duration,
) {
    loop {
        match rx.recv_timeout(poll_interval) {
            Ok(envelope) => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.deliver(envelope);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shared.strong_count() == 0 {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(dispatcher = name, "dispatch loop exited");
}

/// Process-level publish/subscribe dispatcher.
///
/// Cheap to clone; all clones share one subscriber registry, delivery queue,
/// dispatch loop and worker pool. Construct one at the composition root and
/// hand clones to whoever publishes or subscribes.
pub struct Dispatcher<P: ?Sized + Send + Sync + 'static> {
    shared: Arc<Shared<P>>,
}

impl<P: ?Sized + Send + Sync + 'static> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: ?Sized + Send + Sync + 'static> core::fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.shared.name)
            .field("workers", &self.shared.pool.size())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl<P: ?Sized + Send + Sync + 'static> Dispatcher<P> {
    /// Start the dispatch loop and the subscriber worker pool.
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        let pool = WorkerPool::new(format!("{}-worker", config.name), config.workers)?;
        let (sender, rx) = mpsc::channel();

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            subscribers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            outbox: Mutex::new(Some(Outbox {
                sender,
                next_sequence: 1,
            })),
            dispatch_loop: Mutex::new(None),
            pool,
            counters: Arc::new(Counters::default()),
        });

        let weak = Arc::downgrade(&shared);
        let name = config.name.clone();
        let poll_interval = config.poll_interval;
        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || dispatch_loop(&name, weak, rx, poll_interval))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;
        *lock(&shared.dispatch_loop) = Some(join);

        info!(dispatcher = %config.name, workers = config.workers, "dispatcher started");
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue `payload` for delivery to the subscribers of `topic`.
    ///
    /// Returns the message's sequence number as soon as it is queued.
    pub fn publish(&self, topic: impl Into<String>, payload: Arc<P>) -> Result<u64, DispatchError> {
        let mut outbox = lock(&self.shared.outbox);
        let outbox = outbox.as_mut().ok_or(DispatchError::Stopped)?;

        let sequence = outbox.next_sequence;
        outbox
            .sender
            .send(Envelope::new(sequence, topic, payload))
            .map_err(|_| DispatchError::Stopped)?;
        outbox.next_sequence += 1;

        self.shared.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    /// Register a strong callback on `topic`.
    pub fn subscribe(&self, topic: impl Into<String>, cb: Callback<P>) -> SubscriptionId {
        self.shared.register(topic.into(), Target::Strong(cb))
    }

    /// Register a closure on `topic`.
    pub fn subscribe_fn<F>(&self, topic: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&Envelope<P>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(topic, callback(f))
    }

    /// Register `method` bound to `receiver` without keeping `receiver` alive.
    pub fn subscribe_weak<T, F>(
        &self,
        topic: impl Into<String>,
        receiver: &Arc<T>,
        method: F,
    ) -> SubscriptionId
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &Envelope<P>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(receiver);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        let method: WeakMethod<P> = Arc::new(
            move |receiver: &(dyn Any + Send + Sync), envelope: &Envelope<P>| {
                match receiver.downcast_ref::<T>() {
                    Some(receiver) => method(receiver, envelope),
                    None => Ok(()),
                }
            },
        );

        self.shared.register(
            topic.into(),
            Target::Weak {
                receiver: weak,
                method,
            },
        )
    }

    /// Register a closure that stays subscribed while the returned handle lives.
    pub fn subscribe_scoped<F>(&self, topic: impl Into<String>, f: F) -> SubscriptionHandle
    where
        F: Fn(&Envelope<P>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.subscribe(topic.clone(), callback(f));
        self.handle_for(topic, id)
    }

    /// Forward every envelope on `topic` into a channel.
    pub fn subscribe_channel(&self, topic: impl Into<String>) -> Subscription<Envelope<P>> {
        let (tx, rx) = mpsc::channel();
        let handle = self.subscribe_scoped(topic, move |envelope: &Envelope<P>| {
            tx.send(envelope.clone())
                .map_err(|_| anyhow::anyhow!("subscription receiver dropped"))
        });
        Subscription::new(rx, handle)
    }

    fn handle_for(&self, topic: String, id: SubscriptionId) -> SubscriptionHandle {
        let weak = Arc::downgrade(&self.shared);
        let release_topic = topic.clone();
        SubscriptionHandle::new(
            id,
            topic,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.remove_where(&release_topic, |e| e.id == id);
                }
            }),
        )
    }

    /// Remove every registration of `cb` (by identity) from `topic`.
    ///
    /// Returns how many registrations were removed; zero when none matched.
    pub fn unsubscribe(&self, topic: &str, cb: &Callback<P>) -> usize {
        self.shared.remove_where(topic, |e| e.target.is_callback(cb))
    }

    /// Remove every weak registration bound to `receiver` from `topic`.
    pub fn unsubscribe_receiver<T: Send + Sync + 'static>(&self, topic: &str, receiver: &Arc<T>) -> usize {
        let candidate = Arc::as_ptr(receiver) as *const ();
        self.shared.remove_where(topic, |e| e.target.is_receiver(candidate))
    }

    /// Remove a single registration.
    pub fn unsubscribe_id(&self, topic: &str, id: SubscriptionId) -> bool {
        self.shared.remove_where(topic, |e| e.id == id) > 0
    }

    /// Number of registrations on `topic` whose target is still alive.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        read(&self.shared.subscribers)
            .get(topic)
            .map(|entries| entries.iter().filter(|e| e.target.is_live()).count())
            .unwrap_or(0)
    }

    /// Topics that currently have at least one registration.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = read(&self.shared.subscribers).keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.counters.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.shared.outbox).is_none()
    }

    /// Drain queued messages, wait for in-flight subscriber calls, and halt.
    ///
    /// Idempotent. After `stop`, `publish` returns [`DispatchError::Stopped`].
    pub fn stop(&self) {
        let outbox = lock(&self.shared.outbox).take();
        if outbox.is_none() {
            return;
        }
        drop(outbox);

        let join = lock(&self.shared.dispatch_loop).take();
        if let Some(join) = join {
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
        self.shared.pool.shutdown();

        let stats = self.stats();
        info!(
            dispatcher = %self.shared.name,
            published = stats.published,
            delivered = stats.delivered,
            failed = stats.failed,
            "dispatcher stopped"
        );
    }
}

impl<P: Send + Sync + 'static> Dispatcher<P> {
    /// Publish an owned value.
    pub fn publish_value(&self, topic: impl Into<String>, value: P) -> Result<u64, DispatchError> {
        self.publish(topic, Arc::new(value))
    }
}
