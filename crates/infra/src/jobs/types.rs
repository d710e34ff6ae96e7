//! Core job types: steps, statuses, error details and metrics snapshots.

use std::any::type_name;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use seisflow_core::{JobId, panic_message};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Built, not yet handed to a service
    Created,
    /// Waiting in a service queue
    Pending,
    /// Executing steps
    Running,
    /// Halted at the next step boundary until resumed
    Paused,
    /// Every step succeeded
    Completed,
    /// A step failed; completed steps were rolled back
    Failed,
    /// Cancelled by a caller; completed steps were rolled back
    Cancelled,
    /// Notification emitted after each successful step; never stored as a status
    ProgressUpdated,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::ProgressUpdated => "PROGRESS_UPDATED",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step function reported when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub error_type: String,
    pub message: String,
    pub stack_trace: String,
}

type StepFn = Arc<dyn Fn() -> Result<(), StepFailure> + Send + Sync>;

/// One side (forward action or undo) of a step.
///
/// The function takes no input and signals failure only through its result
/// (or by panicking). Everything it needs is captured by the closure.
#[derive(Clone)]
pub struct StepPart {
    name: String,
    description: String,
    function_name: &'static str,
    function: StepFn,
}

impl StepPart {
    pub fn new<F, E>(name: impl Into<String>, description: impl Into<String>, function: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static,
    {
        let function: StepFn = Arc::new(move || {
            function().map_err(|err| StepFailure {
                error_type: type_name::<E>().to_string(),
                message: err.to_string(),
                stack_trace: format!("{err:?}"),
            })
        });

        Self {
            name: name.into(),
            description: description.into(),
            function_name: type_name::<F>(),
            function,
        }
    }

    /// A part that does nothing; for steps with nothing to undo.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, "no-op", || Ok::<(), std::convert::Infallible>(()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn function_name(&self) -> &'static str {
        self.function_name
    }

    /// Run the function; a panic is reported as a failure of type `panic`.
    pub(crate) fn invoke(&self) -> Result<(), StepFailure> {
        match catch_unwind(AssertUnwindSafe(|| (self.function)())) {
            Ok(result) => result,
            Err(payload) => Err(StepFailure {
                error_type: "panic".to_string(),
                message: panic_message(payload.as_ref()),
                stack_trace: String::new(),
            }),
        }
    }
}

impl core::fmt::Debug for StepPart {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StepPart")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("function_name", &self.function_name)
            .finish()
    }
}

/// A forward action and the undo that reverses it.
#[derive(Debug, Clone)]
pub struct JobStep {
    pub action: StepPart,
    pub undo: StepPart,
}

impl JobStep {
    pub fn new(action: StepPart, undo: StepPart) -> Self {
        Self { action, undo }
    }

    /// A step whose effect needs no compensation.
    pub fn irreversible(action: StepPart) -> Self {
        let undo = StepPart::noop(format!("undo {}", action.name()));
        Self { action, undo }
    }
}

/// A captured step or rollback failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// 0-based index of the failing step
    pub step_index: usize,
    pub step_name: String,
    pub function_name: String,
    pub error_type: String,
    /// Human-readable message naming the failing step
    pub message: String,
    pub stack_trace: String,
}

impl ErrorDetail {
    pub(crate) fn capture(step_index: usize, part: &StepPart, failure: StepFailure) -> Self {
        Self {
            step_index,
            step_name: part.name().to_string(),
            function_name: part.function_name().to_string(),
            error_type: failure.error_type,
            message: format!(
                "step {} '{}' failed: {}",
                step_index + 1,
                part.name(),
                failure.message
            ),
            stack_trace: failure.stack_trace,
        }
    }
}

/// Point-in-time view of a job, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    /// 1-based position of the running (or last attempted) step; 0 before start
    pub current_step: usize,
    pub current_step_name: Option<String>,
    pub current_step_description: Option<String>,
    pub current_step_function: Option<String>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub rolled_back_steps: usize,
    /// Percentage of completed steps, two decimals
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Time since start, while the job has not ended
    pub uptime: Option<Duration>,
    /// Start to end, once ended
    pub elapsed_time: Option<Duration>,
    /// Estimated remaining time, only while running
    pub eta: Option<Duration>,
    pub last_step_duration: Option<Duration>,
    pub uptime_hms: String,
    pub elapsed_time_hms: String,
    pub eta_hms: String,
    pub error: Option<ErrorDetail>,
    pub rollback_error: Option<ErrorDetail>,
}

/// `completed / total * 100`, rounded to two decimals.
pub fn progress_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = completed as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Linear extrapolation of the remaining time from the time spent so far.
///
/// `current_step` is 1-based; returns `None` before the first step.
pub fn estimate_remaining(uptime: Duration, total_steps: usize, current_step: usize) -> Option<Duration> {
    if current_step == 0 {
        return None;
    }
    let spent = uptime.as_secs_f64();
    let projected = spent * total_steps as f64 / current_step as f64;
    Some(Duration::from_secs_f64((projected - spent).max(0.0)))
}
