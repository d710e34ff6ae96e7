//! Subscription identities and owner-scoped subscription handles.
//!
//! A subscription registered with [`crate::Dispatcher::subscribe`] lives until it
//! is explicitly removed. The handle types in this module tie a subscription
//! to the lifetime of its owner instead: dropping the handle unsubscribes.

use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of one registration on one topic.
///
/// Registering the same callback twice yields two distinct ids (and two
/// deliveries per publish).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// RAII handle to a registration; unsubscribes when dropped.
///
/// The handle does not keep the dispatcher alive. Dropping it after the
/// dispatcher is gone is a no-op.
#[must_use = "dropping the handle immediately unsubscribes"]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
    release: Option<Release>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, topic: String, release: Release) -> Self {
        Self {
            id,
            topic,
            release: Some(release),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Unsubscribe now.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Keep the subscription registered for the dispatcher's lifetime.
    pub fn detach(mut self) -> SubscriptionId {
        self.release = None;
        self.id
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl core::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// A channel-backed subscription to one topic.
///
/// Every envelope delivered on the topic is forwarded into an internal
/// channel, so a consumer thread can pull messages at its own pace.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = dispatcher.subscribe_channel("JobStatusChanged");
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(envelope) => process(envelope)?,
///         Err(RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // Dispatcher gone
///     }
/// }
/// ```
///
/// Dropping the subscription unregisters it from the dispatcher.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    handle: SubscriptionHandle,
}

impl<M> Subscription<M> {
    pub(crate) fn new(receiver: Receiver<M>, handle: SubscriptionHandle) -> Self {
        Self { receiver, handle }
    }

    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
