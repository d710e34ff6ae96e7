//! The job state machine.
//!
//! A [`Job`] owns an ordered list of [`JobStep`]s and runs them strictly one
//! after another on the thread that calls [`Job::run`]. Other threads control
//! it through [`Job::pause`], [`Job::resume`] and [`Job::cancel`]; both take
//! effect at the next step boundary, never inside a step.
//!
//! ```text
//! CREATED ─mark_pending→ PENDING ─run→ RUNNING ─┬→ COMPLETED
//!    │                     │            ↑   │   ├→ FAILED     (rollback)
//!    │                     │       resume   pause└→ CANCELLED (rollback)
//!    │                     │            │   ↓
//!    └──────cancel─────────┴──────→ CANCELLED ← PAUSED
//! ```
//!
//! When a job ends FAILED or CANCELLED, the undo of every completed step runs in
//! reverse order. The first undo failure aborts the rollback and is recorded next
//! to (not instead of) the forward failure.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use seisflow_core::sync::lock;
use seisflow_core::{CoreError, CoreResult, Gate, JobId, format_hms, panic_message, span};
use seisflow_events::MessageBus;

use super::messages::{JobMetricsReported, JobStatusChanged};
use super::types::{ErrorDetail, JobMetrics, JobStatus, JobStep, estimate_remaining, progress_percent};

/// Invoked synchronously on a status transition, with the job itself.
pub type JobCallback = Arc<dyn Fn(&Job) + Send + Sync>;

/// Invoked with a metrics snapshot on every service metrics tick.
pub type JobMetricsCallback = Arc<dyn Fn(&JobMetrics) + Send + Sync>;

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    current_step_index: usize,
    completed_steps: usize,
    rolled_back_steps: usize,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_step_duration: Option<Duration>,
    failure: Option<ErrorDetail>,
    rollback_failure: Option<ErrorDetail>,
}

/// A unit of work made of reversible steps.
///
/// Share it as `Arc<Job>`: one thread runs it while others observe or control it.
pub struct Job {
    id: JobId,
    name: String,
    steps: Vec<JobStep>,
    state: Mutex<JobState>,
    gate: Gate,
    cancel_requested: AtomicBool,
    callbacks: Mutex<HashMap<JobStatus, Vec<JobCallback>>>,
    metrics_callback: Mutex<Option<JobMetricsCallback>>,
    bus: OnceLock<MessageBus>,
}

impl core::fmt::Debug for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("status", &self.status())
            .finish()
    }
}

impl Job {
    /// Build a job in CREATED status. A job needs at least one step.
    pub fn new(name: impl Into<String>, steps: Vec<JobStep>) -> CoreResult<Self> {
        let name = name.into();
        if steps.is_empty() {
            return Err(CoreError::validation(format!("job '{name}' has no steps")));
        }

        Ok(Self {
            id: JobId::new(),
            name,
            steps,
            state: Mutex::new(JobState {
                status: JobStatus::Created,
                current_step_index: 0,
                completed_steps: 0,
                rolled_back_steps: 0,
                start_time: None,
                end_time: None,
                last_step_duration: None,
                failure: None,
                rollback_failure: None,
            }),
            gate: Gate::opened(),
            cancel_requested: AtomicBool::new(false),
            callbacks: Mutex::new(HashMap::new()),
            metrics_callback: Mutex::new(None),
            bus: OnceLock::new(),
        })
    }

    /// Publish status changes and metrics reports on `bus`.
    pub fn with_bus(self, bus: MessageBus) -> Self {
        let _ = self.bus.set(bus);
        self
    }

    /// Attach a bus unless one is already attached.
    pub fn attach_bus(&self, bus: &MessageBus) {
        let _ = self.bus.set(bus.clone());
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[JobStep] {
        &self.steps
    }

    pub fn status(&self) -> JobStatus {
        lock(&self.state).status
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// The forward failure, if a step failed.
    pub fn failure(&self) -> Option<ErrorDetail> {
        lock(&self.state).failure.clone()
    }

    /// The compensation failure, if an undo failed during rollback.
    pub fn rollback_failure(&self) -> Option<ErrorDetail> {
        lock(&self.state).rollback_failure.clone()
    }

    /// Register `callback` for transitions into `status`.
    ///
    /// Callbacks run in registration order on the thread making the transition.
    pub fn on_status(&self, status: JobStatus, callback: JobCallback) {
        lock(&self.callbacks).entry(status).or_default().push(callback);
    }

    pub fn on_status_fn<F>(&self, status: JobStatus, f: F)
    where
        F: Fn(&Job) + Send + Sync + 'static,
    {
        self.on_status(status, Arc::new(f));
    }

    pub fn on_metrics<F>(&self, f: F)
    where
        F: Fn(&JobMetrics) + Send + Sync + 'static,
    {
        *lock(&self.metrics_callback) = Some(Arc::new(f));
    }

    /// CREATED → PENDING. Marking a pending job again is a no-op.
    pub fn mark_pending(&self) -> CoreResult<()> {
        if self.enter_pending()? {
            self.announce(JobStatus::Pending);
        }
        Ok(())
    }

    /// Status change half of [`Job::mark_pending`]; returns whether it changed.
    pub(crate) fn enter_pending(&self) -> CoreResult<bool> {
        let mut state = lock(&self.state);
        match state.status {
            JobStatus::Created => {
                state.status = JobStatus::Pending;
                Ok(true)
            }
            JobStatus::Pending => Ok(false),
            other => Err(CoreError::illegal_transition("job", other, "mark pending")),
        }
    }

    /// Execute the steps in order on the calling thread.
    ///
    /// Returns the final status. A failing step is not an error of `run`: it ends
    /// the job FAILED and is recorded in [`Job::failure`].
    pub fn run(&self) -> CoreResult<JobStatus> {
        {
            let mut state = lock(&self.state);
            match state.status {
                JobStatus::Created | JobStatus::Pending => {}
                other => return Err(CoreError::illegal_transition("job", other, "run")),
            }
            state.status = JobStatus::Running;
            state.start_time = Some(Utc::now());
        }
        info!(job_id = %self.id, job = %self.name, steps = self.steps.len(), "job started");
        self.announce(JobStatus::Running);

        for (index, step) in self.steps.iter().enumerate() {
            if !self.enter_step(index) {
                debug!(job_id = %self.id, step = index + 1, "cancellation observed at step boundary");
                break;
            }

            let started = Instant::now();
            let outcome = step.action.invoke();
            let took = started.elapsed();

            match outcome {
                Ok(()) => {
                    {
                        let mut state = lock(&self.state);
                        state.completed_steps += 1;
                        state.last_step_duration = Some(took);
                    }
                    debug!(job_id = %self.id, step = index + 1, name = %step.action.name(), "step completed");
                    self.announce(JobStatus::ProgressUpdated);
                }
                Err(failure) => {
                    let detail = ErrorDetail::capture(index, &step.action, failure);
                    warn!(
                        job_id = %self.id,
                        step = index + 1,
                        error_type = %detail.error_type,
                        error = %detail.message,
                        "step failed"
                    );
                    {
                        let mut state = lock(&self.state);
                        state.last_step_duration = Some(took);
                        state.failure = Some(detail);
                        state.status = JobStatus::Failed;
                    }
                    self.rollback();
                    lock(&self.state).end_time = Some(Utc::now());
                    self.announce(JobStatus::Failed);
                    return Ok(JobStatus::Failed);
                }
            }
        }

        // Decided under the state lock so a concurrent cancel cannot be overwritten.
        let cancelled = {
            let mut state = lock(&self.state);
            let cancelled = self.is_cancel_requested();
            if !cancelled {
                state.status = JobStatus::Completed;
                state.end_time = Some(Utc::now());
            }
            cancelled
        };

        if cancelled {
            // CANCELLED was set and announced by `cancel`.
            self.rollback();
            lock(&self.state).end_time = Some(Utc::now());
            info!(job_id = %self.id, "job cancelled");
            return Ok(JobStatus::Cancelled);
        }

        info!(job_id = %self.id, job = %self.name, "job completed");
        self.announce(JobStatus::Completed);
        Ok(JobStatus::Completed)
    }

    /// RUNNING → PAUSED; the step in progress finishes first.
    pub fn pause(&self) -> CoreResult<()> {
        {
            let mut state = lock(&self.state);
            match state.status {
                JobStatus::Running => state.status = JobStatus::Paused,
                JobStatus::Paused => return Ok(()),
                other => return Err(CoreError::illegal_transition("job", other, "pause")),
            }
            self.gate.close();
        }
        debug!(job_id = %self.id, "job paused");
        self.announce(JobStatus::Paused);
        Ok(())
    }

    /// PAUSED → RUNNING.
    pub fn resume(&self) -> CoreResult<()> {
        {
            let mut state = lock(&self.state);
            if state.status != JobStatus::Paused {
                return Err(CoreError::illegal_transition("job", state.status, "resume"));
            }
            state.status = JobStatus::Running;
            self.gate.open();
        }
        debug!(job_id = %self.id, "job resumed");
        self.announce(JobStatus::Running);
        Ok(())
    }

    /// Request cancellation; the run loop stops at the next step boundary.
    ///
    /// Cancelling a cancelled job is a no-op; a finished job cannot be cancelled.
    pub fn cancel(&self) -> CoreResult<()> {
        {
            let mut state = lock(&self.state);
            match state.status {
                JobStatus::Cancelled => return Ok(()),
                JobStatus::Completed | JobStatus::Failed => {
                    return Err(CoreError::illegal_transition("job", state.status, "cancel"));
                }
                JobStatus::Created | JobStatus::Pending => {
                    state.end_time = Some(Utc::now());
                }
                _ => {}
            }
            state.status = JobStatus::Cancelled;
            self.cancel_requested.store(true, Ordering::SeqCst);
            self.gate.open();
        }
        info!(job_id = %self.id, "job cancellation requested");
        self.announce(JobStatus::Cancelled);
        Ok(())
    }

    pub fn metrics(&self) -> JobMetrics {
        self.metrics_at(Utc::now())
    }

    /// Metrics as they would read at `now`.
    pub fn metrics_at(&self, now: DateTime<Utc>) -> JobMetrics {
        let state = lock(&self.state);
        let total_steps = self.steps.len();

        let current_step = if state.start_time.is_some() {
            state.current_step_index + 1
        } else {
            0
        };
        let current = state
            .start_time
            .and_then(|_| self.steps.get(state.current_step_index));

        let uptime = match (state.start_time, state.end_time) {
            (Some(start), None) => Some(span(start, now)),
            _ => None,
        };
        let elapsed_time = match (state.start_time, state.end_time) {
            (Some(start), Some(end)) => Some(span(start, end)),
            _ => None,
        };
        let eta = match (state.status, uptime) {
            (JobStatus::Running, Some(uptime)) => estimate_remaining(uptime, total_steps, current_step),
            _ => None,
        };

        JobMetrics {
            job_id: self.id,
            name: self.name.clone(),
            status: state.status,
            current_step,
            current_step_name: current.map(|s| s.action.name().to_string()),
            current_step_description: current.map(|s| s.action.description().to_string()),
            current_step_function: current.map(|s| s.action.function_name().to_string()),
            total_steps,
            completed_steps: state.completed_steps,
            rolled_back_steps: state.rolled_back_steps,
            progress: progress_percent(state.completed_steps, total_steps),
            start_time: state.start_time,
            end_time: state.end_time,
            uptime,
            elapsed_time,
            eta,
            last_step_duration: state.last_step_duration,
            uptime_hms: format_hms(uptime),
            elapsed_time_hms: format_hms(elapsed_time),
            eta_hms: format_hms(eta),
            error: state.failure.clone(),
            rollback_error: state.rollback_failure.clone(),
        }
    }

    /// Push a metrics snapshot to the metrics callback and the bus.
    pub fn report_metrics(&self) {
        let metrics = self.metrics();
        let callback = lock(&self.metrics_callback).clone();
        if let Some(callback) = callback {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&metrics))) {
                error!(job_id = %self.id, panic = %panic_message(payload.as_ref()), "job metrics callback panicked");
            }
        }
        if let Some(bus) = self.bus.get() {
            if let Err(err) = bus.emit("job metrics", |header| JobMetricsReported { header, metrics }) {
                debug!(job_id = %self.id, error = %err, "job metrics not published");
            }
        }
    }

    /// Wait at the boundary before step `index`; `false` once cancelled.
    ///
    /// The pause and cancel checks and the step claim happen under one state
    /// lock, so a `pause` that returned has always stopped the next step.
    fn enter_step(&self, index: usize) -> bool {
        loop {
            self.gate.wait();
            let mut state = lock(&self.state);
            if self.is_cancel_requested() {
                return false;
            }
            if state.status == JobStatus::Paused {
                continue;
            }
            state.current_step_index = index;
            return true;
        }
    }

    /// Undo completed steps in reverse order; the first undo failure stops it.
    fn rollback(&self) {
        let completed = lock(&self.state).completed_steps;
        if completed == 0 {
            return;
        }
        info!(job_id = %self.id, steps = completed, "rolling back completed steps");

        for index in (0..completed).rev() {
            let undo = &self.steps[index].undo;
            match undo.invoke() {
                Ok(()) => lock(&self.state).rolled_back_steps += 1,
                Err(failure) => {
                    let detail = ErrorDetail::capture(index, undo, failure);
                    error!(
                        job_id = %self.id,
                        step = index + 1,
                        error_type = %detail.error_type,
                        error = %detail.message,
                        "rollback failed; remaining steps are left in place"
                    );
                    lock(&self.state).rollback_failure = Some(detail);
                    return;
                }
            }
        }
    }

    /// Run the callbacks registered for `status` and publish the change.
    ///
    /// Never called with the state lock held.
    pub(crate) fn announce(&self, status: JobStatus) {
        let callbacks = lock(&self.callbacks).get(&status).cloned().unwrap_or_default();
        for callback in callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(self))) {
                error!(
                    job_id = %self.id,
                    status = %status,
                    panic = %panic_message(payload.as_ref()),
                    "job status callback panicked"
                );
            }
        }

        if let Some(bus) = self.bus.get() {
            let result = bus.emit(format!("job {status}"), |header| JobStatusChanged {
                header,
                job_id: self.id,
                job_name: self.name.clone(),
                status,
                metrics: self.metrics(),
            });
            if let Err(err) = result {
                debug!(job_id = %self.id, error = %err, "job status not published");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::jobs::types::StepPart;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_step(log: &Log, index: usize) -> JobStep {
        let forward = log.clone();
        let backward = log.clone();
        JobStep::new(
            StepPart::new(format!("step {index}"), "records its index", move || {
                lock(&forward).push(format!("do {index}"));
                Ok::<(), anyhow::Error>(())
            }),
            StepPart::new(format!("undo {index}"), "records its index", move || {
                lock(&backward).push(format!("undo {index}"));
                Ok::<(), anyhow::Error>(())
            }),
        )
    }

    fn failing_step(log: &Log, index: usize) -> JobStep {
        let backward = log.clone();
        JobStep::new(
            StepPart::new(format!("step {index}"), "always fails", move || {
                Err::<(), _>(anyhow::anyhow!("bad header in segy file"))
            }),
            StepPart::new(format!("undo {index}"), "must never run", move || {
                lock(&backward).push(format!("undo {index}"));
                Ok::<(), anyhow::Error>(())
            }),
        )
    }

    fn entries(log: &Log) -> Vec<String> {
        lock(log).clone()
    }

    #[test]
    fn empty_job_is_rejected() {
        let err = Job::new("empty", Vec::new()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn steps_run_in_order_and_complete() {
        let log: Log = Arc::default();
        let job = Job::new("ordered", (0..3).map(|i| recording_step(&log, i)).collect()).unwrap();

        assert_eq!(job.run().unwrap(), JobStatus::Completed);
        assert_eq!(entries(&log), vec!["do 0", "do 1", "do 2"]);

        let metrics = job.metrics();
        assert_eq!(metrics.status, JobStatus::Completed);
        assert_eq!(metrics.completed_steps, 3);
        assert_eq!(metrics.progress, 100.0);
        assert!(metrics.end_time.unwrap() >= metrics.start_time.unwrap());
        assert!(metrics.uptime.is_none());
        assert!(metrics.eta.is_none());
        assert!(metrics.elapsed_time.is_some());
        assert_eq!(metrics.eta_hms, "--:--:--");
    }

    #[test]
    fn failure_rolls_back_completed_steps_in_reverse() {
        let log: Log = Arc::default();
        let steps = vec![
            recording_step(&log, 0),
            recording_step(&log, 1),
            failing_step(&log, 2),
            recording_step(&log, 3),
        ];
        let job = Job::new("rollback", steps).unwrap();

        assert_eq!(job.run().unwrap(), JobStatus::Failed);
        assert_eq!(entries(&log), vec!["do 0", "do 1", "undo 1", "undo 0"]);

        let failure = job.failure().unwrap();
        assert_eq!(failure.step_index, 2);
        assert_eq!(failure.step_name, "step 2");
        assert!(failure.message.contains("bad header in segy file"));
        assert!(job.rollback_failure().is_none());
        assert_eq!(job.metrics().rolled_back_steps, 2);
    }

    #[test]
    fn undo_failure_is_kept_next_to_the_step_failure() {
        let log: Log = Arc::default();
        let broken_undo = JobStep::new(
            StepPart::new("step 0", "", || Ok::<(), String>(())),
            StepPart::new("undo 0", "", || Err::<(), _>("volume locked".to_string())),
        );
        let steps = vec![broken_undo, recording_step(&log, 1), failing_step(&log, 2)];
        let job = Job::new("partial rollback", steps).unwrap();

        assert_eq!(job.run().unwrap(), JobStatus::Failed);
        assert_eq!(entries(&log), vec!["do 1", "undo 1"]);

        let metrics = job.metrics();
        assert_eq!(metrics.error.unwrap().step_index, 2);
        let rollback = metrics.rollback_error.unwrap();
        assert_eq!(rollback.step_index, 0);
        assert!(rollback.message.contains("volume locked"));
        assert_eq!(metrics.rolled_back_steps, 1);
    }

    #[test]
    fn status_callbacks_fire_in_registration_order() {
        let log: Log = Arc::default();
        let job = Job::new("callbacks", vec![recording_step(&log, 0), recording_step(&log, 1)]).unwrap();

        let seen: Log = Arc::default();
        for tag in ["first", "second"] {
            let seen = seen.clone();
            job.on_status_fn(JobStatus::Completed, move |job| {
                lock(&seen).push(format!("{tag} {}", job.status()));
            });
        }
        let progress = seen.clone();
        job.on_status_fn(JobStatus::ProgressUpdated, move |job| {
            lock(&progress).push(format!("progress {}", job.metrics().completed_steps));
        });

        job.mark_pending().unwrap();
        job.run().unwrap();

        assert_eq!(
            entries(&seen),
            vec!["progress 1", "progress 2", "first COMPLETED", "second COMPLETED"]
        );
    }

    #[test]
    fn panicking_callback_does_not_break_the_job() {
        let log: Log = Arc::default();
        let job = Job::new("noisy", vec![recording_step(&log, 0)]).unwrap();
        job.on_status_fn(JobStatus::Running, |_| panic!("observer bug"));

        assert_eq!(job.run().unwrap(), JobStatus::Completed);
    }

    #[test]
    fn illegal_transitions_are_reported() {
        let log: Log = Arc::default();
        let job = Job::new("strict", vec![recording_step(&log, 0)]).unwrap();

        assert!(job.resume().is_err());
        assert!(job.pause().is_err());
        job.mark_pending().unwrap();
        job.mark_pending().unwrap();

        job.run().unwrap();
        assert!(job.run().is_err());
        assert!(job.cancel().is_err());
        assert!(job.mark_pending().is_err());
    }

    #[test]
    fn cancel_before_run_prevents_execution() {
        let log: Log = Arc::default();
        let job = Job::new("never", vec![recording_step(&log, 0)]).unwrap();

        job.cancel().unwrap();
        job.cancel().unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.run().is_err());
        assert!(entries(&log).is_empty());
    }

    /// A step that signals when it starts and blocks until released.
    fn gated_step(log: &Log, index: usize, started: mpsc::Sender<usize>, release: mpsc::Receiver<()>) -> JobStep {
        let forward = log.clone();
        let backward = log.clone();
        let release = Mutex::new(release);
        JobStep::new(
            StepPart::new(format!("step {index}"), "waits for release", move || {
                let _ = started.send(index);
                let _ = lock(&release).recv_timeout(Duration::from_secs(5));
                lock(&forward).push(format!("do {index}"));
                Ok::<(), anyhow::Error>(())
            }),
            StepPart::new(format!("undo {index}"), "", move || {
                lock(&backward).push(format!("undo {index}"));
                Ok::<(), anyhow::Error>(())
            }),
        )
    }

    #[test]
    fn pause_waits_for_the_step_boundary() {
        let log: Log = Arc::default();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let job = Arc::new(
            Job::new(
                "pausable",
                vec![gated_step(&log, 0, started_tx, release_rx), recording_step(&log, 1)],
            )
            .unwrap(),
        );

        let runner = {
            let job = job.clone();
            thread::spawn(move || job.run())
        };

        assert_eq!(started_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
        job.pause().unwrap();
        job.pause().unwrap();
        release_tx.send(()).unwrap();

        // step 0 finishes, step 1 must not start while paused
        thread::sleep(Duration::from_millis(100));
        assert_eq!(entries(&log), vec!["do 0"]);
        assert_eq!(job.status(), JobStatus::Paused);

        job.resume().unwrap();
        assert_eq!(runner.join().unwrap().unwrap(), JobStatus::Completed);
        assert_eq!(entries(&log), vec!["do 0", "do 1"]);
    }

    #[test]
    fn cancel_mid_run_stops_at_boundary_and_rolls_back() {
        let log: Log = Arc::default();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let job = Arc::new(
            Job::new(
                "cancellable",
                vec![
                    recording_step(&log, 0),
                    gated_step(&log, 1, started_tx, release_rx),
                    recording_step(&log, 2),
                ],
            )
            .unwrap(),
        );

        let cancelled = Arc::new(Mutex::new(0));
        let counter = cancelled.clone();
        job.on_status_fn(JobStatus::Cancelled, move |_| *lock(&counter) += 1);

        let runner = {
            let job = job.clone();
            thread::spawn(move || job.run())
        };

        assert_eq!(started_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        job.cancel().unwrap();
        release_tx.send(()).unwrap();

        assert_eq!(runner.join().unwrap().unwrap(), JobStatus::Cancelled);
        assert_eq!(entries(&log), vec!["do 0", "do 1", "undo 1", "undo 0"]);
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(*lock(&cancelled), 1);
        assert!(job.metrics().end_time.is_some());
    }

    #[test]
    fn cancel_releases_a_paused_job() {
        let log: Log = Arc::default();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let job = Arc::new(
            Job::new(
                "paused then cancelled",
                vec![gated_step(&log, 0, started_tx, release_rx), recording_step(&log, 1)],
            )
            .unwrap(),
        );

        let runner = {
            let job = job.clone();
            thread::spawn(move || job.run())
        };

        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        job.pause().unwrap();
        release_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        job.cancel().unwrap();

        assert_eq!(runner.join().unwrap().unwrap(), JobStatus::Cancelled);
        assert_eq!(entries(&log), vec!["do 0", "undo 0"]);
    }

    #[test]
    fn step_failing_after_cancel_ends_failed() {
        let log: Log = Arc::default();
        let (started_tx, started_rx) = mpsc::channel::<usize>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let failing_after_release = JobStep::irreversible(StepPart::new("flaky", "", move || {
            let _ = started_tx.send(1);
            let _ = lock(&release_rx).recv_timeout(Duration::from_secs(5));
            Err::<(), _>("lost connection".to_string())
        }));
        let job = Arc::new(
            Job::new("cancel then fail", vec![recording_step(&log, 0), failing_after_release]).unwrap(),
        );

        let runner = {
            let job = job.clone();
            thread::spawn(move || job.run())
        };

        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        job.cancel().unwrap();
        release_tx.send(()).unwrap();

        assert_eq!(runner.join().unwrap().unwrap(), JobStatus::Failed);
        assert_eq!(entries(&log), vec!["do 0", "undo 0"]);
        assert!(job.failure().is_some());
    }

    #[test]
    fn metrics_while_running_report_eta_and_current_step() {
        let log: Log = Arc::default();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let job = Arc::new(
            Job::new(
                "observable",
                vec![
                    recording_step(&log, 0),
                    gated_step(&log, 1, started_tx, release_rx),
                    recording_step(&log, 2),
                    recording_step(&log, 3),
                ],
            )
            .unwrap(),
        );

        let runner = {
            let job = job.clone();
            thread::spawn(move || job.run())
        };
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let start = job.metrics().start_time.unwrap();
        let metrics = job.metrics_at(start + chrono::Duration::seconds(20));
        assert_eq!(metrics.status, JobStatus::Running);
        assert_eq!(metrics.current_step, 2);
        assert_eq!(metrics.current_step_name.as_deref(), Some("step 1"));
        assert_eq!(metrics.completed_steps, 1);
        assert_eq!(metrics.progress, 25.0);
        assert_eq!(metrics.uptime, Some(Duration::from_secs(20)));
        assert_eq!(metrics.eta, Some(Duration::from_secs(20)));
        assert_eq!(metrics.uptime_hms, "00:00:20");
        assert_eq!(metrics.elapsed_time_hms, "--:--:--");

        release_tx.send(()).unwrap();
        assert_eq!(runner.join().unwrap().unwrap(), JobStatus::Completed);
    }

    #[test]
    fn metrics_callback_receives_snapshot() {
        let log: Log = Arc::default();
        let job = Job::new("reported", vec![recording_step(&log, 0)]).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        job.on_metrics(move |metrics| {
            let _ = lock(&tx).send(metrics.status);
        });

        job.report_metrics();
        assert_eq!(rx.try_recv().unwrap(), JobStatus::Created);
    }

    #[test]
    fn accepted_cancel_is_never_overwritten_by_completion() {
        for _ in 0..300 {
            let log: Log = Arc::default();
            let job = Arc::new(Job::new("racing", vec![recording_step(&log, 0)]).unwrap());

            let (progressed_tx, progressed_rx) = mpsc::channel();
            let progressed_tx = Mutex::new(progressed_tx);
            job.on_status_fn(JobStatus::ProgressUpdated, move |_| {
                let _ = lock(&progressed_tx).send(());
            });
            let completed = Arc::new(Mutex::new(0));
            let counter = completed.clone();
            job.on_status_fn(JobStatus::Completed, move |_| *lock(&counter) += 1);

            let canceller = {
                let job = job.clone();
                thread::spawn(move || {
                    progressed_rx.recv_timeout(Duration::from_secs(2)).is_ok() && job.cancel().is_ok()
                })
            };

            let outcome = job.run().unwrap();
            let cancel_accepted = canceller.join().unwrap();

            if cancel_accepted {
                assert_eq!(outcome, JobStatus::Cancelled);
                assert_eq!(job.status(), JobStatus::Cancelled);
                assert_eq!(*lock(&completed), 0);
                assert_eq!(entries(&log), vec!["do 0", "undo 0"]);
            } else {
                assert_eq!(outcome, JobStatus::Completed);
                assert_eq!(*lock(&completed), 1);
            }
        }
    }

    #[test]
    fn pause_at_the_boundary_holds_the_next_step() {
        let log: Log = Arc::default();
        let job = Arc::new(
            Job::new("held", vec![recording_step(&log, 0), recording_step(&log, 1)]).unwrap(),
        );
        // pause lands after step 0 completes, before step 1 is claimed
        job.on_status_fn(JobStatus::ProgressUpdated, |job| {
            if job.metrics().completed_steps == 1 {
                job.pause().unwrap();
            }
        });

        let runner = {
            let job = job.clone();
            thread::spawn(move || job.run())
        };

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while job.status() != JobStatus::Paused && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(job.status(), JobStatus::Paused);
        assert_eq!(entries(&log), vec!["do 0"]);

        job.resume().unwrap();
        assert_eq!(runner.join().unwrap().unwrap(), JobStatus::Completed);
        assert_eq!(entries(&log), vec!["do 0", "do 1"]);
    }
}
