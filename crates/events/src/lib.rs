//! `seisflow-events`: in-process publish/subscribe.
//!
//! - [`Dispatcher`]: topic registry, asynchronous delivery and bounded fan-out
//! - [`MessageBus`]: a dispatcher carrying type-erased message records
//! - [`message`]: record headers, the topic naming convention, [`Record`]
//! - [`codec`]: JSON encoding for records crossing a process boundary

pub mod bus;
pub mod codec;
pub mod dispatcher;
pub mod envelope;
pub mod message;
pub mod subscription;

pub use bus::MessageBus;
pub use codec::CodecError;
pub use dispatcher::{Callback, DispatchError, Dispatcher, DispatcherConfig, DispatcherStats, callback};
pub use envelope::Envelope;
pub use message::{Message, MessageHeader, Record, downcast_arc, topics};
pub use subscription::{Subscription, SubscriptionHandle, SubscriptionId};
