//! `seisflow-infra`: job orchestration on top of the message bus.
//!
//! - [`jobs`]: the job state machine, the bounded scheduler and its registry
//! - [`journal`]: an append-only log of every published record
//! - [`config`]: environment-driven runtime configuration
//! - [`runtime`]: the composition root wiring all of the above

pub mod config;
pub mod jobs;
pub mod journal;
pub mod runtime;

pub use config::{ConfigError, RuntimeConfig};
pub use jobs::{
    ErrorDetail, Job, JobCompletion, JobMetrics, JobStatus, JobStep, Service, ServiceConfig,
    ServiceError, ServiceMetrics, ServiceRegistry, ServiceStatus, StepPart,
};
pub use journal::{JournalEntry, JournalError, MessageJournal};
pub use runtime::{Runtime, RuntimeError};

#[cfg(test)]
mod integration_tests;
