//! Job orchestration: reversible step sequences and the schedulers that run them.
//!
//! ## Components
//!
//! - `Job`: ordered (action, undo) steps with pause/resume/cancel and rollback
//! - `Service`: bounded FIFO queue feeding a fixed-size worker pool
//! - `ServiceRegistry`: at most one live service per name
//! - `messages`: status and metrics records published on the message bus

pub mod job;
pub mod messages;
pub mod registry;
pub mod service;
pub mod types;

pub use job::{Job, JobCallback, JobMetricsCallback};
pub use messages::{JobMetricsReported, JobStatusChanged, ServiceMetricsReported, ServiceStatusChanged};
pub use registry::ServiceRegistry;
pub use service::{
    JobCompletion, Service, ServiceCallback, ServiceConfig, ServiceError, ServiceMetrics,
    ServiceMetricsCallback, ServiceStatus,
};
pub use types::{ErrorDetail, JobMetrics, JobStatus, JobStep, StepFailure, StepPart};
