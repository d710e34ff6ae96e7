//! Records published on the message bus by jobs and services.
//!
//! Topic lists (own name first):
//! - `JobStatusChanged`, `JobMetricsReported` → `JobEvent`, `Event`, `Base`
//! - `ServiceStatusChanged`, `ServiceMetricsReported` → `ServiceEvent`, `Event`, `Base`

use serde::{Deserialize, Serialize};

use seisflow_core::{JobId, ServiceId};
use seisflow_events::{MessageHeader, impl_message, topics};

use super::service::{ServiceMetrics, ServiceStatus};
use super::types::{JobMetrics, JobStatus};

pub const JOB_EVENT: &str = "JobEvent";
pub const SERVICE_EVENT: &str = "ServiceEvent";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusChanged {
    pub header: MessageHeader,
    pub job_id: JobId,
    pub job_name: String,
    pub status: JobStatus,
    pub metrics: JobMetrics,
}

impl_message!(JobStatusChanged => [JOB_EVENT, topics::EVENT]);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetricsReported {
    pub header: MessageHeader,
    pub metrics: JobMetrics,
}

impl_message!(JobMetricsReported => [JOB_EVENT, topics::EVENT]);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusChanged {
    pub header: MessageHeader,
    pub service_id: ServiceId,
    pub service_name: String,
    pub status: ServiceStatus,
}

impl_message!(ServiceStatusChanged => [SERVICE_EVENT, topics::EVENT]);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetricsReported {
    pub header: MessageHeader,
    pub metrics: ServiceMetrics,
}

impl_message!(ServiceMetricsReported => [SERVICE_EVENT, topics::EVENT]);
