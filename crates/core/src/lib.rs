//! `seisflow-core`: shared building blocks for the orchestration engine.
//!
//! Identifiers, the error model, wall-clock formatting, and the two
//! concurrency primitives (`Gate`, `WorkerPool`) that the dispatcher and the
//! job scheduler are built on. No business knowledge lives here.

pub mod error;
pub mod id;
pub mod pool;
pub mod sync;
pub mod time;

pub use error::{CoreError, CoreResult};
pub use id::{JobId, MessageId, ServiceId};
pub use pool::{PoolError, WorkerPool, panic_message};
pub use sync::Gate;
pub use time::{format_hms, span};
