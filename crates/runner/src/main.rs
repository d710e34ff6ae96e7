use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;

use seisflow_infra::jobs::{JobStatusChanged, ServiceStatusChanged};
use seisflow_infra::{Job, JobStatus, JobStep, Runtime, StepPart};

/// 1-based step at which the demonstration job should fail, if any.
const DEMO_FAIL_STEP: &str = "SEISFLOW_DEMO_FAIL_STEP";

fn main() -> anyhow::Result<()> {
    seisflow_observability::init();

    let runtime = Runtime::from_env().context("failed to build runtime")?;
    let bus = runtime.bus();

    bus.subscribe_message::<JobStatusChanged, _>(|changed| {
        tracing::info!(
            job = %changed.job_name,
            status = %changed.status,
            progress = changed.metrics.progress,
            eta = %changed.metrics.eta_hms,
            "job status"
        );
        Ok(())
    });
    bus.subscribe_message::<ServiceStatusChanged, _>(|changed| {
        tracing::info!(service = %changed.service_name, status = %changed.status, "service status");
        Ok(())
    });

    let fail_step = std::env::var(DEMO_FAIL_STEP)
        .ok()
        .map(|raw| raw.trim().parse::<usize>())
        .transpose()
        .with_context(|| format!("{DEMO_FAIL_STEP} must be a step number"))?;

    let service = runtime.service("processing").context("failed to start service")?;
    let job = Arc::new(demo_job(fail_step)?);
    let id = service.submit_job(job.clone())?;

    let status = loop {
        if let Some((_, Some(completion))) = service.get_job(id) {
            break completion.wait();
        }
        thread::sleep(service.config().poll_interval);
    };

    if status == JobStatus::Failed {
        if let Some(failure) = job.failure() {
            tracing::warn!(error = %failure.message, error_type = %failure.error_type, "demonstration job failed");
        }
    }
    tracing::info!(job_id = %id, status = %status, metrics = ?service.metrics(), "demonstration finished");

    runtime.shutdown();
    Ok(())
}

/// A small seismic processing flow with a compensating action per step.
fn demo_job(fail_step: Option<usize>) -> anyhow::Result<Job> {
    let stages = [
        ("read survey", "load trace headers from the survey archive"),
        ("apply gain", "spherical divergence correction"),
        ("stack", "CMP stack of the corrected gathers"),
        ("write volume", "write the stacked volume to disk"),
    ];

    let steps = stages
        .iter()
        .enumerate()
        .map(|(index, (name, description))| {
            let fails = fail_step == Some(index + 1);
            let label = name.to_string();
            let undo_label = name.to_string();
            JobStep::new(
                StepPart::new(*name, *description, move || {
                    thread::sleep(Duration::from_millis(200));
                    if fails {
                        anyhow::bail!("{label} could not complete");
                    }
                    Ok(())
                }),
                StepPart::new(format!("revert {name}"), "discard partial output", move || {
                    tracing::info!(step = %undo_label, "reverting");
                    Ok::<(), anyhow::Error>(())
                }),
            )
        })
        .collect();

    Ok(Job::new("demo-stack", steps)?)
}
