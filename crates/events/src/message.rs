//! Message records and the topic naming convention.
//!
//! Any value published through the [`crate::MessageBus`] is a record:
//! - **immutable** (treat it as a fact or a request)
//! - **identified** by a time-ordered [`MessageId`] whose timestamp is the
//!   record's creation time
//! - **named**: its topic is its own type name, followed by the names of the
//!   record families it belongs to, so subscribers can listen narrowly (one
//!   record type) or broadly (every event, every record)

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use seisflow_core::MessageId;

use crate::codec::CodecError;

/// Names of the record families every message type can belong to.
pub mod topics {
    /// Every record is published on this topic.
    pub const BASE: &str = "Base";
    pub const EVENT: &str = "Event";
    pub const COMMAND: &str = "Command";
    pub const PAYLOAD: &str = "Payload";
}

/// Fields shared by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    /// Free-text description, empty by default.
    #[serde(default)]
    pub message: String,
    /// Id of the record that started the flow this record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,
    /// Id of the record that directly caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<MessageId>,
}

impl MessageHeader {
    pub fn new(message: impl Into<String>) -> Self {
        let id = MessageId::new();
        Self {
            id,
            timestamp: id.timestamp().unwrap_or_else(Utc::now),
            message: message.into(),
            correlation_id: None,
            causation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation(mut self, causation_id: MessageId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Continue the flow of `cause`: correlate with its flow and record it as the cause.
    pub fn caused_by(self, cause: &MessageHeader) -> Self {
        let correlation = cause.correlation_id.unwrap_or(cause.id);
        self.with_correlation(correlation).with_causation(cause.id)
    }
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self::new("")
    }
}

/// A concrete, serializable record type.
///
/// Prefer the [`impl_message!`](crate::impl_message) macro over implementing
/// this by hand.
pub trait Message: Serialize + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// The type's own topic.
    const NAME: &'static str;

    /// Families this type belongs to, nearest first, ending with [`topics::BASE`].
    const ANCESTORS: &'static [&'static str];

    fn header(&self) -> &MessageHeader;

    /// Every topic a record of this type is published on, own name first.
    fn all_topics() -> Vec<&'static str> {
        std::iter::once(Self::NAME)
            .chain(Self::ANCESTORS.iter().copied())
            .collect()
    }
}

/// Implement [`Message`] for a struct with a `header: MessageHeader` field.
///
/// ```ignore
/// impl_message!(JobStatusChanged => ["JobEvent", topics::EVENT]);
/// ```
///
/// [`topics::BASE`] is appended to the ancestor list automatically.
#[macro_export]
macro_rules! impl_message {
    ($ty:ident => [$($ancestor:expr),* $(,)?]) => {
        impl $crate::message::Message for $ty {
            const NAME: &'static str = stringify!($ty);
            const ANCESTORS: &'static [&'static str] =
                &[$($ancestor,)* $crate::message::topics::BASE];

            fn header(&self) -> &$crate::message::MessageHeader {
                &self.header
            }
        }
    };
}

/// Object-safe view of any [`Message`], as carried by the bus.
///
/// Subscribers on a family topic receive records of many types; they can read
/// the header and type name, serialize the record, or downcast it.
pub trait Record: Any + core::fmt::Debug + Send + Sync {
    fn header(&self) -> &MessageHeader;
    fn type_name(&self) -> &'static str;
    fn topics(&self) -> Vec<&'static str>;
    fn to_json(&self) -> Result<serde_json::Value, CodecError>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Message> Record for M {
    fn header(&self) -> &MessageHeader {
        Message::header(self)
    }

    fn type_name(&self) -> &'static str {
        M::NAME
    }

    fn topics(&self) -> Vec<&'static str> {
        M::all_topics()
    }

    fn to_json(&self) -> Result<serde_json::Value, CodecError> {
        serde_json::to_value(self).map_err(CodecError::Encode)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl dyn Record {
    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

/// Downcast a shared record to its concrete type.
pub fn downcast_arc<M: Message>(record: Arc<dyn Record>) -> Option<Arc<M>> {
    record.into_any().downcast::<M>().ok()
}
