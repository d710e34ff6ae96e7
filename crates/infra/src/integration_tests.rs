//! End-to-end tests across the message bus, the scheduler and the runtime.
//!
//! Each test wires real components together (no mocks) and asserts on what an
//! outside observer sees: final job status, undo calls, bus traffic, journal lines.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    use seisflow_core::sync::lock;
    use seisflow_events::{Dispatcher, DispatcherConfig, Envelope, MessageBus, Record, topics};

    use crate::config::RuntimeConfig;
    use crate::jobs::messages::JOB_EVENT;
    use crate::jobs::{
        Job, JobStatus, JobStatusChanged, JobStep, Service, ServiceConfig, ServiceError,
        ServiceStatus, ServiceStatusChanged, StepPart,
    };
    use crate::journal::MessageJournal;
    use crate::runtime::Runtime;

    const WAIT: Duration = Duration::from_secs(5);

    // ========================================================================
    // Fixtures
    // ========================================================================

    /// Single delivery worker so subscribers observe publication order.
    fn ordered_bus() -> MessageBus {
        Dispatcher::new(
            DispatcherConfig::default()
                .with_name("test-bus")
                .with_workers(1)
                .with_poll_interval(Duration::from_millis(10)),
        )
        .unwrap()
    }

    fn service_config(name: &str) -> ServiceConfig {
        ServiceConfig::default()
            .with_name(name)
            .with_max_workers(2)
            .with_max_queue_size(4)
            .with_poll_interval(Duration::from_millis(10))
            .with_metrics_interval(None)
    }

    fn started(config: ServiceConfig, bus: Option<MessageBus>) -> Service {
        let service = Service::new(config, bus).unwrap();
        service.start().unwrap();
        service
    }

    type Trace = Arc<Mutex<Vec<String>>>;

    /// A step whose action and undo append `do:<name>` / `undo:<name>` to `trace`.
    fn traced_step(name: &str, trace: &Trace, fail: bool) -> JobStep {
        let action_trace = trace.clone();
        let action_name = name.to_string();
        let undo_trace = trace.clone();
        let undo_name = name.to_string();

        JobStep::new(
            StepPart::new(name, format!("process {name}"), move || {
                lock(&action_trace).push(format!("do:{action_name}"));
                if fail {
                    Err(format!("{action_name} exploded"))
                } else {
                    Ok(())
                }
            }),
            StepPart::new(format!("undo {name}"), "", move || {
                lock(&undo_trace).push(format!("undo:{undo_name}"));
                Ok::<(), String>(())
            }),
        )
    }

    /// Block until the service has finished running `job`, rollback included.
    fn finish(service: &Service, job: &Job) -> Option<JobStatus> {
        let id = job.id();
        let dispatched = eventually(|| service.get_job(id).is_some_and(|(_, done)| done.is_some()));
        if !dispatched {
            return None;
        }
        let (_, completion) = service.get_job(id)?;
        completion?.wait_timeout(WAIT)
    }

    fn eventually(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    // ========================================================================
    // Job lifecycle through a service
    // ========================================================================

    #[test]
    fn three_step_job_completes_in_order() {
        let service = started(service_config("happy"), None);
        let trace: Trace = Arc::default();
        let job = Arc::new(
            Job::new(
                "happy-path",
                (0..3).map(|i| traced_step(&i.to_string(), &trace, false)).collect(),
            )
            .unwrap(),
        );

        service.submit_job(job.clone()).unwrap();
        assert_eq!(finish(&service, &job), Some(JobStatus::Completed));

        assert_eq!(*lock(&trace), vec!["do:0", "do:1", "do:2"]);
        let metrics = job.metrics();
        assert_eq!(metrics.completed_steps, 3);
        assert_eq!(metrics.progress, 100.0);
        assert!(metrics.end_time.unwrap() >= metrics.start_time.unwrap());
        assert!(metrics.error.is_none());

        service.stop();
    }

    #[test]
    fn failing_step_rolls_back_only_completed_steps() {
        let service = started(service_config("failing"), None);
        let trace: Trace = Arc::default();
        let job = Arc::new(
            Job::new(
                "fails-at-second",
                vec![
                    traced_step("load", &trace, false),
                    traced_step("filter", &trace, true),
                    traced_step("store", &trace, false),
                ],
            )
            .unwrap(),
        );

        service.submit_job(job.clone()).unwrap();
        assert_eq!(finish(&service, &job), Some(JobStatus::Failed));

        assert_eq!(*lock(&trace), vec!["do:load", "do:filter", "undo:load"]);
        let failure = job.failure().unwrap();
        assert_eq!(failure.step_index, 1);
        assert_eq!(failure.step_name, "filter");
        assert!(failure.message.contains("filter exploded"), "{}", failure.message);
        assert!(job.rollback_failure().is_none());

        assert!(eventually(|| service.metrics().jobs_failed == 1));
        service.stop();
    }

    #[test]
    fn progress_is_reported_after_each_step() {
        let service = started(service_config("progress"), None);
        let seen: Arc<Mutex<Vec<f64>>> = Arc::default();
        let job = Arc::new(
            Job::new(
                "four-steps",
                (0..4)
                    .map(|i| JobStep::irreversible(StepPart::new(format!("s{i}"), "", || Ok::<(), String>(()))))
                    .collect(),
            )
            .unwrap(),
        );
        let sink = seen.clone();
        job.on_status_fn(JobStatus::ProgressUpdated, move |job| {
            lock(&sink).push(job.metrics().progress);
        });

        service.submit_job(job.clone()).unwrap();
        assert_eq!(finish(&service, &job), Some(JobStatus::Completed));

        assert_eq!(*lock(&seen), vec![25.0, 50.0, 75.0, 100.0]);
        service.stop();
    }

    // ========================================================================
    // Scheduler limits
    // ========================================================================

    #[test]
    fn queue_rejects_one_past_capacity_while_paused() {
        let service = started(service_config("backpressure"), None);
        service.pause().unwrap();

        let capacity = service.config().max_queue_size;
        let jobs: Vec<Arc<Job>> = (0..=capacity)
            .map(|i| {
                Arc::new(
                    Job::new(format!("j{i}"), vec![JobStep::irreversible(StepPart::noop("noop"))])
                        .unwrap(),
                )
            })
            .collect();

        for job in &jobs[..capacity] {
            service.submit_job(job.clone()).unwrap();
        }
        let overflow = service.submit_job(jobs[capacity].clone()).unwrap_err();
        assert!(matches!(overflow, ServiceError::QueueFull { capacity: c } if c == capacity));
        assert_eq!(jobs[capacity].status(), JobStatus::Created);
        assert_eq!(service.metrics().jobs_rejected, 1);

        service.resume().unwrap();
        for job in &jobs[..capacity] {
            assert_eq!(finish(&service, &job), Some(JobStatus::Completed));
        }
        service.stop();
    }

    #[test]
    fn concurrency_never_exceeds_max_workers() {
        let config = service_config("bounded").with_max_queue_size(16);
        let max_workers = config.max_workers;
        let service = started(config, None);

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Arc<Job>> = (0..max_workers * 2)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                Arc::new(
                    Job::new(
                        format!("sleep-{i}"),
                        vec![JobStep::irreversible(StepPart::new("sleep", "", move || {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(40));
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok::<(), String>(())
                        }))],
                    )
                    .unwrap(),
                )
            })
            .collect();

        for job in &jobs {
            service.submit_job(job.clone()).unwrap();
        }
        for job in &jobs {
            assert_eq!(finish(&service, &job), Some(JobStatus::Completed));
        }

        assert!(peak.load(Ordering::SeqCst) <= max_workers);
        assert_eq!(service.metrics().jobs_completed, (max_workers * 2) as u64);
        service.stop();
    }

    // ========================================================================
    // Bus traffic
    // ========================================================================

    #[test]
    fn job_transitions_are_published_on_the_bus() {
        let bus = ordered_bus();
        let statuses = bus.subscribe_message_channel::<JobStatusChanged>();
        let service = started(service_config("published"), Some(bus.clone()));

        let job = Arc::new(
            Job::new("two-steps", vec![
                JobStep::irreversible(StepPart::noop("a")),
                JobStep::irreversible(StepPart::noop("b")),
            ])
            .unwrap(),
        );
        service.submit_job(job.clone()).unwrap();
        assert_eq!(finish(&service, &job), Some(JobStatus::Completed));

        let mut seen = Vec::new();
        while let Ok(message) = statuses.recv_timeout(Duration::from_millis(500)) {
            assert_eq!(message.job_id, job.id());
            let done = message.status == JobStatus::Completed;
            seen.push(message.status);
            if done {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::ProgressUpdated,
                JobStatus::ProgressUpdated,
                JobStatus::Completed,
            ]
        );

        service.stop();
        bus.stop();
    }

    #[test]
    fn family_topics_see_job_and_service_records() {
        let bus = ordered_bus();
        let job_family = bus.subscribe_channel(JOB_EVENT);
        let everything = bus.subscribe_channel(topics::BASE);
        let service = started(service_config("families"), Some(bus.clone()));

        let job = Arc::new(
            Job::new("one-step", vec![JobStep::irreversible(StepPart::noop("only"))]).unwrap(),
        );
        service.submit_job(job.clone()).unwrap();
        assert_eq!(finish(&service, &job), Some(JobStatus::Completed));
        service.stop();
        bus.stop();

        let job_records: Vec<Envelope<dyn Record>> = job_family.try_iter_all();
        assert!(!job_records.is_empty());
        assert!(job_records.iter().all(|e| e.payload().is::<JobStatusChanged>()));

        let all: Vec<Envelope<dyn Record>> = everything.try_iter_all();
        let service_statuses: Vec<ServiceStatus> = all
            .iter()
            .filter_map(|e| e.payload().downcast_ref::<ServiceStatusChanged>())
            .map(|m| m.status)
            .collect();
        assert!(service_statuses.contains(&ServiceStatus::Running));
        assert!(service_statuses.contains(&ServiceStatus::Stopped));
        assert!(all.len() > job_records.len());
    }

    /// Drain helper for channel subscriptions in these tests.
    trait DrainAll<M> {
        fn try_iter_all(&self) -> Vec<M>;
    }

    impl<M> DrainAll<M> for seisflow_events::Subscription<M> {
        fn try_iter_all(&self) -> Vec<M> {
            let mut out = Vec::new();
            while let Ok(message) = self.try_recv() {
                out.push(message);
            }
            out
        }
    }

    #[test]
    fn dropped_weak_receiver_stops_receiving() {
        struct Monitor {
            hits: Arc<AtomicUsize>,
        }

        let bus = ordered_bus();
        let hits = Arc::new(AtomicUsize::new(0));
        let monitor = Arc::new(Monitor { hits: hits.clone() });
        bus.subscribe_weak(JOB_EVENT, &monitor, |monitor: &Monitor, _envelope| {
            monitor.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let service = started(service_config("weak"), Some(bus.clone()));

        let first = Arc::new(Job::new("first", vec![JobStep::irreversible(StepPart::noop("x"))]).unwrap());
        service.submit_job(first.clone()).unwrap();
        assert_eq!(finish(&service, &first), Some(JobStatus::Completed));
        // PENDING, RUNNING, PROGRESS_UPDATED, COMPLETED
        assert!(eventually(|| hits.load(Ordering::SeqCst) == 4));

        drop(monitor);
        assert_eq!(bus.subscriber_count(JOB_EVENT), 0);

        let second = Arc::new(Job::new("second", vec![JobStep::irreversible(StepPart::noop("y"))]).unwrap());
        service.submit_job(second.clone()).unwrap();
        assert_eq!(finish(&service, &second), Some(JobStatus::Completed));
        service.stop();
        bus.stop();

        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert!(bus.stats().skipped_dead > 0);
    }

    // ========================================================================
    // Runtime
    // ========================================================================

    #[test]
    fn runtime_journals_every_job_record() {
        let dir = std::env::temp_dir().join(format!("seisflow-it-{}", seisflow_core::MessageId::new()));
        let mut config = RuntimeConfig {
            journal_dir: Some(dir.clone()),
            ..RuntimeConfig::default()
        };
        config.dispatcher.poll_interval = Duration::from_millis(10);
        config.service = config
            .service
            .with_poll_interval(Duration::from_millis(10))
            .with_metrics_interval(None);

        let runtime = Runtime::new(config).unwrap();
        let service = runtime.service("stacking").unwrap();
        let journal_path = runtime.journal().unwrap().path().to_path_buf();

        let (tx, rx) = mpsc::channel();
        let job = Arc::new(
            Job::new("stack", vec![JobStep::irreversible(StepPart::noop("sum traces"))]).unwrap(),
        );
        job.on_status_fn(JobStatus::Completed, move |job| {
            let _ = tx.send(job.id());
        });
        let id = service.submit_job(job.clone()).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), id);

        runtime.shutdown();

        let entries = MessageJournal::read_entries(&journal_path).unwrap();
        let job_lines: Vec<_> = entries
            .iter()
            .filter(|e| e.name == "JobStatusChanged" && e.data["job_id"] == serde_json::json!(id))
            .collect();
        assert!(job_lines.iter().any(|e| e.data["status"] == "completed"));
        assert!(entries.iter().any(|e| e.name == "ServiceStatusChanged"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
