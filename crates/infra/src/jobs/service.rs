//! Bounded-concurrency job scheduler.
//!
//! ## Design
//!
//! - Submitted jobs wait in a FIFO queue of at most `max_queue_size` ids;
//!   submitting into a full queue is rejected with [`ServiceError::QueueFull`]
//! - A single queue loop dispatches jobs to a pool of `max_workers` threads and
//!   never has more than `max_workers` jobs active
//! - Pausing the service gates the queue loop only; dispatched jobs keep running
//! - `stop` is terminal: queued jobs never run, in-flight jobs are drained and
//!   paused in-flight jobs are cancelled
//! - An optional tick pushes job and service metrics to callbacks and the bus
//!
//! All waits are bounded by `poll_interval` so background threads observe
//! `stop` promptly. The background threads only hold the service weakly; dropping
//! every [`Service`] handle without `stop` winds them down too.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use seisflow_core::sync::lock;
use seisflow_core::{
    CoreError, Gate, JobId, PoolError, ServiceId, WorkerPool, format_hms, panic_message, span,
};
use seisflow_events::MessageBus;

use super::job::Job;
use super::messages::{ServiceMetricsReported, ServiceStatusChanged};
use super::types::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} is running and cannot be removed")]
    JobActive(JobId),
    #[error("service is stopped")]
    Stopped,
    #[error("service '{0}' is already running")]
    AlreadyRunning(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Service lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Created => "CREATED",
            ServiceStatus::Running => "RUNNING",
            ServiceStatus::Paused => "PAUSED",
            ServiceStatus::Stopped => "STOPPED",
            ServiceStatus::Failed => "FAILED",
        }
    }
}

impl core::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Name used for threads, logs and the service registry
    pub name: String,
    /// Maximum concurrently running jobs
    pub max_workers: usize,
    /// Maximum jobs waiting in the queue
    pub max_queue_size: usize,
    /// Upper bound of every wait in the background loops
    pub poll_interval: Duration,
    /// Period of the metrics tick; `None` disables it
    pub metrics_interval: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "service".to_string(),
            max_workers: 4,
            max_queue_size: 20,
            poll_interval: Duration::from_millis(100),
            metrics_interval: Some(Duration::from_secs(1)),
        }
    }
}

impl ServiceConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Option<Duration>) -> Self {
        self.metrics_interval = interval;
        self
    }
}

/// Service metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub service_id: ServiceId,
    pub name: String,
    pub status: ServiceStatus,
    pub queue_size: usize,
    pub active_workers: usize,
    pub max_workers: usize,
    pub max_queue_size: usize,
    pub uptime: Duration,
    pub uptime_hms: String,
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_rejected: u64,
}

/// Completion handle of a dispatched job.
#[derive(Debug, Clone, Default)]
pub struct JobCompletion {
    inner: Arc<(Mutex<Option<JobStatus>>, Condvar)>,
}

impl JobCompletion {
    fn complete(&self, status: JobStatus) {
        let (slot, done) = &*self.inner;
        *lock(slot) = Some(status);
        done.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.inner.0).is_some()
    }

    /// Final status, once the job has finished.
    pub fn status(&self) -> Option<JobStatus> {
        *lock(&self.inner.0)
    }

    /// Block until the job finishes.
    pub fn wait(&self) -> JobStatus {
        let (slot, done) = &*self.inner;
        let guard = done
            .wait_while(lock(slot), |status| status.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        (*guard).unwrap_or(JobStatus::Failed)
    }

    /// Block up to `timeout`; `None` if the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobStatus> {
        let (slot, done) = &*self.inner;
        let (guard, _) = done
            .wait_timeout_while(lock(slot), timeout, |status| status.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Invoked synchronously on a service status transition.
pub type ServiceCallback = Arc<dyn Fn(&Service) + Send + Sync>;

/// Invoked with the service metrics on every tick.
pub type ServiceMetricsCallback = Arc<dyn Fn(&ServiceMetrics) + Send + Sync>;

struct Tracked {
    job: Arc<Job>,
    completion: Option<JobCompletion>,
}

#[derive(Default)]
struct Registry {
    queue: VecDeque<JobId>,
    jobs: HashMap<JobId, Tracked>,
    active: HashSet<JobId>,
    running_on: HashMap<JobId, ThreadId>,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

struct Dispatch {
    id: JobId,
    job: Arc<Job>,
    completion: JobCompletion,
}

struct ServiceInner {
    id: ServiceId,
    config: ServiceConfig,
    started_at: OnceLock<DateTime<Utc>>,
    status: Mutex<ServiceStatus>,
    registry: Mutex<Registry>,
    slots: Condvar,
    submit: Mutex<()>,
    gate: Gate,
    stopping: AtomicBool,
    stop_signal: Gate,
    pool: WorkerPool,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    callbacks: Mutex<HashMap<ServiceStatus, Vec<ServiceCallback>>>,
    metrics_callback: Mutex<Option<ServiceMetricsCallback>>,
    counters: Counters,
    bus: Option<MessageBus>,
}

/// A named job scheduler.
///
/// Cheap to clone; clones are handles to the same scheduler.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl core::fmt::Debug for Service {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Service {
    /// Build a service in CREATED status. Nothing runs until [`Service::start`].
    pub fn new(config: ServiceConfig, bus: Option<MessageBus>) -> Result<Self, ServiceError> {
        if config.max_queue_size == 0 {
            return Err(CoreError::validation("max_queue_size must be at least 1").into());
        }
        let pool = WorkerPool::new(format!("{}-job", config.name), config.max_workers)?;

        Ok(Self {
            inner: Arc::new(ServiceInner {
                id: ServiceId::new(),
                config,
                started_at: OnceLock::new(),
                status: Mutex::new(ServiceStatus::Created),
                registry: Mutex::new(Registry::default()),
                slots: Condvar::new(),
                submit: Mutex::new(()),
                gate: Gate::opened(),
                stopping: AtomicBool::new(false),
                stop_signal: Gate::closed(),
                pool,
                threads: Mutex::new(Vec::new()),
                callbacks: Mutex::new(HashMap::new()),
                metrics_callback: Mutex::new(None),
                counters: Counters::default(),
                bus,
            }),
        })
    }

    /// CREATED → RUNNING: spawn the queue loop and the metrics tick.
    pub fn start(&self) -> Result<(), ServiceError> {
        {
            let mut status = lock(&self.inner.status);
            if *status != ServiceStatus::Created {
                return Err(CoreError::illegal_transition("service", *status, "start").into());
            }
            *status = ServiceStatus::Running;
        }
        let _ = self.inner.started_at.set(Utc::now());

        let mut threads = Vec::new();
        let name = self.inner.config.name.clone();
        let weak = Arc::downgrade(&self.inner);
        threads.push(
            thread::Builder::new()
                .name(format!("{name}-queue"))
                .spawn(move || queue_loop(weak, name))
                .map_err(|e| PoolError::Spawn(e.to_string()))?,
        );
        if let Some(interval) = self.inner.config.metrics_interval {
            let name = self.inner.config.name.clone();
            let weak = Arc::downgrade(&self.inner);
            threads.push(
                thread::Builder::new()
                    .name(format!("{name}-metrics"))
                    .spawn(move || metrics_loop(weak, name, interval))
                    .map_err(|e| PoolError::Spawn(e.to_string()))?,
            );
        }
        lock(&self.inner.threads).extend(threads);

        info!(
            service = %self.inner.config.name,
            max_workers = self.inner.config.max_workers,
            max_queue_size = self.inner.config.max_queue_size,
            "service started"
        );
        self.inner.announce(ServiceStatus::Running);
        Ok(())
    }

    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn status(&self) -> ServiceStatus {
        *lock(&self.inner.status)
    }

    pub fn on_status(&self, status: ServiceStatus, callback: ServiceCallback) {
        lock(&self.inner.callbacks).entry(status).or_default().push(callback);
    }

    pub fn on_status_fn<F>(&self, status: ServiceStatus, f: F)
    where
        F: Fn(&Service) + Send + Sync + 'static,
    {
        self.on_status(status, Arc::new(f));
    }

    pub fn on_metrics<F>(&self, f: F)
    where
        F: Fn(&ServiceMetrics) + Send + Sync + 'static,
    {
        *lock(&self.inner.metrics_callback) = Some(Arc::new(f));
    }

    /// Queue `job` for execution and mark it PENDING.
    ///
    /// Rejected with [`ServiceError::QueueFull`] when `max_queue_size` jobs are
    /// already waiting; the job is then left untouched.
    pub fn submit_job(&self, job: Arc<Job>) -> Result<JobId, ServiceError> {
        let inner = &self.inner;
        if inner.is_stopping() {
            return Err(ServiceError::Stopped);
        }
        let id = job.id();

        // Only submitters grow the queue, so capacity checked here still holds below.
        let _submit = lock(&inner.submit);
        {
            let registry = lock(&inner.registry);
            if registry.queue.len() >= inner.config.max_queue_size {
                inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(service = %inner.config.name, job_id = %id, capacity = inner.config.max_queue_size, "job rejected: queue full");
                return Err(ServiceError::QueueFull {
                    capacity: inner.config.max_queue_size,
                });
            }
            if registry.jobs.contains_key(&id) {
                return Err(CoreError::conflict(format!("job {id} was already submitted")).into());
            }
        }

        if let Some(bus) = &inner.bus {
            job.attach_bus(bus);
        }
        job.mark_pending()?;

        {
            let mut registry = lock(&inner.registry);
            registry.queue.push_back(id);
            registry.jobs.insert(
                id,
                Tracked {
                    job,
                    completion: None,
                },
            );
        }
        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        inner.slots.notify_all();
        debug!(service = %inner.config.name, job_id = %id, "job queued");
        Ok(id)
    }

    /// The job and, once dispatched, its completion handle.
    pub fn get_job(&self, id: JobId) -> Option<(Arc<Job>, Option<JobCompletion>)> {
        lock(&self.inner.registry)
            .jobs
            .get(&id)
            .map(|tracked| (tracked.job.clone(), tracked.completion.clone()))
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        lock(&self.inner.registry).jobs.keys().copied().collect()
    }

    /// Forget a job that is not currently executing.
    pub fn remove_job(&self, id: JobId) -> Result<Arc<Job>, ServiceError> {
        let mut registry = lock(&self.inner.registry);
        if registry.active.contains(&id) {
            return Err(ServiceError::JobActive(id));
        }
        let tracked = registry.jobs.remove(&id).ok_or(ServiceError::NotFound(id))?;
        registry.queue.retain(|queued| *queued != id);
        debug!(service = %self.inner.config.name, job_id = %id, "job removed");
        Ok(tracked.job)
    }

    pub fn is_job_running(&self, id: JobId) -> bool {
        lock(&self.inner.registry).active.contains(&id)
    }

    /// RUNNING → PAUSED. Dispatched jobs keep running.
    pub fn pause(&self) -> Result<(), ServiceError> {
        {
            let mut status = lock(&self.inner.status);
            match *status {
                ServiceStatus::Running => *status = ServiceStatus::Paused,
                ServiceStatus::Paused => return Ok(()),
                other => return Err(CoreError::illegal_transition("service", other, "pause").into()),
            }
            self.inner.gate.close();
        }
        info!(service = %self.inner.config.name, "service paused");
        self.inner.announce(ServiceStatus::Paused);
        Ok(())
    }

    /// PAUSED → RUNNING.
    pub fn resume(&self) -> Result<(), ServiceError> {
        {
            let mut status = lock(&self.inner.status);
            if *status != ServiceStatus::Paused {
                return Err(CoreError::illegal_transition("service", *status, "resume").into());
            }
            *status = ServiceStatus::Running;
            self.inner.gate.open();
        }
        info!(service = %self.inner.config.name, "service resumed");
        self.inner.announce(ServiceStatus::Running);
        Ok(())
    }

    /// Stop for good: queued jobs never run, in-flight jobs are waited for.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopping()
    }

    pub fn metrics(&self) -> ServiceMetrics {
        self.inner.metrics()
    }

    /// Run one metrics tick now.
    pub fn report_metrics(&self) {
        self.inner.tick();
    }
}

impl ServiceInner {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn handle(self: &Arc<Self>) -> Service {
        Service {
            inner: self.clone(),
        }
    }

    fn stop(self: &Arc<Self>) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let changed = {
            let mut status = lock(&self.status);
            if *status == ServiceStatus::Failed {
                false
            } else {
                *status = ServiceStatus::Stopped;
                true
            }
        };

        self.stop_signal.open();
        self.gate.open();
        self.slots.notify_all();

        let current = thread::current().id();
        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for join in threads {
            if join.thread().id() != current {
                let _ = join.join();
            }
        }
        self.drain_in_flight(current);
        self.pool.shutdown();

        let queued = lock(&self.registry).queue.len();
        info!(service = %self.config.name, abandoned = queued, "service stopped");
        if changed {
            self.announce(ServiceStatus::Stopped);
        }
    }

    /// Wait for dispatched jobs to finish, cancelling any that sit paused.
    ///
    /// A job running on `current` (stop called from inside it) is not waited for.
    fn drain_in_flight(&self, current: ThreadId) {
        let mut registry = lock(&self.registry);
        loop {
            let in_flight: Vec<Arc<Job>> = registry
                .active
                .iter()
                .filter(|id| registry.running_on.get(*id) != Some(&current))
                .filter_map(|id| registry.jobs.get(id).map(|t| t.job.clone()))
                .collect();
            if in_flight.is_empty() {
                return;
            }
            drop(registry);

            for job in in_flight.iter().filter(|job| job.status() == JobStatus::Paused) {
                if job.cancel().is_ok() {
                    info!(service = %self.config.name, job_id = %job.id(), "paused job cancelled by stop");
                }
            }

            let (guard, _) = self
                .slots
                .wait_timeout(lock(&self.registry), self.config.poll_interval)
                .unwrap_or_else(PoisonError::into_inner);
            registry = guard;
        }
    }

    fn fail(self: &Arc<Self>, reason: &str) {
        {
            let mut status = lock(&self.status);
            if *status == ServiceStatus::Failed || *status == ServiceStatus::Stopped {
                return;
            }
            *status = ServiceStatus::Failed;
        }
        error!(service = %self.config.name, reason, "service failed");
        self.announce(ServiceStatus::Failed);
    }

    /// Take the next runnable job, waiting at most one poll interval.
    fn next_dispatch(&self) -> Option<Dispatch> {
        let mut registry = lock(&self.registry);
        let ready = |r: &Registry| r.active.len() < self.config.max_workers && !r.queue.is_empty();
        if !ready(&registry) {
            let (guard, _) = self
                .slots
                .wait_timeout_while(registry, self.config.poll_interval, |r| {
                    !ready(r) && !self.is_stopping()
                })
                .unwrap_or_else(PoisonError::into_inner);
            registry = guard;
            if !ready(&registry) || self.is_stopping() {
                return None;
            }
        }

        let registry = &mut *registry;
        while let Some(id) = registry.queue.pop_front() {
            let Some(tracked) = registry.jobs.get_mut(&id) else {
                continue;
            };
            let job = tracked.job.clone();

            if job.status() == JobStatus::Cancelled {
                let completion = JobCompletion::default();
                completion.complete(JobStatus::Cancelled);
                tracked.completion = Some(completion);
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(service = %self.config.name, job_id = %id, "skipping job cancelled while queued");
                continue;
            }

            let completion = JobCompletion::default();
            tracked.completion = Some(completion.clone());
            registry.active.insert(id);
            return Some(Dispatch { id, job, completion });
        }
        None
    }

    /// Put a dispatch the pool refused back at the head of the queue.
    fn requeue(&self, dispatch: &Dispatch) {
        let mut registry = lock(&self.registry);
        registry.active.remove(&dispatch.id);
        registry.queue.push_front(dispatch.id);
        if let Some(tracked) = registry.jobs.get_mut(&dispatch.id) {
            tracked.completion = None;
        }
    }

    fn run_job(&self, dispatch: Dispatch) {
        let Dispatch { id, job, completion } = dispatch;
        lock(&self.registry).running_on.insert(id, thread::current().id());
        debug!(service = %self.config.name, job_id = %id, "job dispatched");

        let status = match catch_unwind(AssertUnwindSafe(|| job.run())) {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                warn!(service = %self.config.name, job_id = %id, error = %err, "job could not run");
                job.status()
            }
            Err(payload) => {
                error!(service = %self.config.name, job_id = %id, panic = %panic_message(payload.as_ref()), "job run panicked");
                JobStatus::Failed
            }
        };

        match status {
            JobStatus::Completed => self.counters.completed.fetch_add(1, Ordering::Relaxed),
            JobStatus::Cancelled => self.counters.cancelled.fetch_add(1, Ordering::Relaxed),
            _ => self.counters.failed.fetch_add(1, Ordering::Relaxed),
        };

        {
            let mut registry = lock(&self.registry);
            registry.active.remove(&id);
            registry.running_on.remove(&id);
        }
        completion.complete(status);
        self.slots.notify_all();
    }

    fn metrics(&self) -> ServiceMetrics {
        let (queue_size, active_workers) = {
            let registry = lock(&self.registry);
            (registry.queue.len(), registry.active.len())
        };
        let uptime = self.started_at.get().map(|start| span(*start, Utc::now()));

        ServiceMetrics {
            service_id: self.id,
            name: self.config.name.clone(),
            status: *lock(&self.status),
            queue_size,
            active_workers,
            max_workers: self.config.max_workers,
            max_queue_size: self.config.max_queue_size,
            uptime: uptime.unwrap_or_default(),
            uptime_hms: format_hms(uptime),
            jobs_submitted: self.counters.submitted.load(Ordering::Relaxed),
            jobs_completed: self.counters.completed.load(Ordering::Relaxed),
            jobs_failed: self.counters.failed.load(Ordering::Relaxed),
            jobs_cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            jobs_rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Report every active job's metrics, then the service's own.
    fn tick(&self) {
        let active: Vec<Arc<Job>> = {
            let registry = lock(&self.registry);
            registry
                .active
                .iter()
                .filter_map(|id| registry.jobs.get(id).map(|t| t.job.clone()))
                .collect()
        };
        for job in active {
            job.report_metrics();
        }

        let metrics = self.metrics();
        let callback = lock(&self.metrics_callback).clone();
        if let Some(callback) = callback {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&metrics))) {
                error!(service = %self.config.name, panic = %panic_message(payload.as_ref()), "service metrics callback panicked");
            }
        }
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.emit("service metrics", |header| ServiceMetricsReported { header, metrics }) {
                debug!(service = %self.config.name, error = %err, "service metrics not published");
            }
        }
    }

    fn announce(self: &Arc<Self>, status: ServiceStatus) {
        let callbacks = lock(&self.callbacks).get(&status).cloned().unwrap_or_default();
        if !callbacks.is_empty() {
            let service = self.handle();
            for callback in callbacks {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&service))) {
                    error!(
                        service = %self.config.name,
                        status = %status,
                        panic = %panic_message(payload.as_ref()),
                        "service status callback panicked"
                    );
                }
            }
        }

        if let Some(bus) = &self.bus {
            let result = bus.emit(format!("service {status}"), |header| ServiceStatusChanged {
                header,
                service_id: self.id,
                service_name: self.config.name.clone(),
                status,
            });
            if let Err(err) = result {
                debug!(service = %self.config.name, error = %err, "service status not published");
            }
        }
    }
}

fn queue_loop(weak: Weak<ServiceInner>, name: String) {
    while let Some(inner) = weak.upgrade() {
        if inner.is_stopping() {
            break;
        }
        if !inner.gate.wait_timeout(inner.config.poll_interval) {
            continue;
        }
        let Some(dispatch) = inner.next_dispatch() else {
            continue;
        };

        let id = dispatch.id;
        let worker = inner.clone();
        let requeue = Arc::new(Mutex::new(Some(dispatch)));
        let task = requeue.clone();
        let submitted = inner.pool.execute(move || {
            if let Some(dispatch) = lock(&task).take() {
                worker.run_job(dispatch);
            }
        });

        if let Err(err) = submitted {
            if let Some(dispatch) = lock(&requeue).take() {
                inner.requeue(&dispatch);
            }
            if !inner.is_stopping() {
                warn!(service = %name, job_id = %id, error = %err, "worker pool refused job");
                inner.fail("worker pool refused work");
                break;
            }
        }
    }
    debug!(service = %name, "queue loop exited");
}

fn metrics_loop(weak: Weak<ServiceInner>, name: String, interval: Duration) {
    while let Some(inner) = weak.upgrade() {
        // the stop signal opens on `stop`
        if inner.stop_signal.wait_timeout(interval) {
            break;
        }
        inner.tick();
    }
    debug!(service = %name, "metrics loop exited");
}
