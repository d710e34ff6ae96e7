//! The message bus: a dispatcher carrying type-erased records.
//!
//! Publishing a record is an explicit call. [`MessageBus::emit`] is the
//! factory form: it builds a record with a fresh header and publishes it in one
//! step, so the publish stays visible at the call site.
//!
//! A record is published once per topic in its type's topic list, so a
//! `JobStatusChanged` reaches subscribers of `JobStatusChanged`, `JobEvent`,
//! `Event` and `Base`.

use std::sync::Arc;
use std::sync::mpsc;

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::envelope::Envelope;
use crate::message::{Message, MessageHeader, Record, downcast_arc};
use crate::subscription::{Subscription, SubscriptionId};

pub type MessageBus = Dispatcher<dyn Record>;

impl Dispatcher<dyn Record> {
    /// Publish `message` on every topic of its type.
    ///
    /// Returns the shared record so callers can keep it without cloning.
    pub fn publish_message<M: Message>(&self, message: M) -> Result<Arc<M>, DispatchError> {
        let message = Arc::new(message);
        let record: Arc<dyn Record> = message.clone();
        self.publish_record(record)?;
        Ok(message)
    }

    /// Publish an already type-erased record on every topic of its type.
    pub fn publish_record(&self, record: Arc<dyn Record>) -> Result<(), DispatchError> {
        for topic in record.topics() {
            self.publish(topic, record.clone())?;
        }
        Ok(())
    }

    /// Build a record with a fresh header carrying `text` and publish it.
    pub fn emit<M, F>(&self, text: impl Into<String>, build: F) -> Result<Arc<M>, DispatchError>
    where
        M: Message,
        F: FnOnce(MessageHeader) -> M,
    {
        self.publish_message(build(MessageHeader::new(text)))
    }

    /// Subscribe to records of type `M` on its own topic.
    pub fn subscribe_message<M, F>(&self, f: F) -> SubscriptionId
    where
        M: Message,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_fn(M::NAME, move |envelope: &Envelope<dyn Record>| {
            match envelope.payload().downcast_ref::<M>() {
                Some(message) => f(message),
                None => Err(unexpected::<M>(envelope)),
            }
        })
    }

    /// Receive records of type `M` through a channel.
    pub fn subscribe_message_channel<M: Message>(&self) -> Subscription<Arc<M>> {
        let (tx, rx) = mpsc::channel();
        let handle = self.subscribe_scoped(M::NAME, move |envelope: &Envelope<dyn Record>| {
            let message = downcast_arc::<M>(envelope.shared_payload().clone())
                .ok_or_else(|| unexpected::<M>(envelope))?;
            tx.send(message)
                .map_err(|_| anyhow::anyhow!("subscription receiver dropped"))
        });
        Subscription::new(rx, handle)
    }
}

fn unexpected<M: Message>(envelope: &Envelope<dyn Record>) -> anyhow::Error {
    anyhow::anyhow!(
        "expected {} on topic {}, got {}",
        M::NAME,
        envelope.topic(),
        envelope.payload().type_name()
    )
}
