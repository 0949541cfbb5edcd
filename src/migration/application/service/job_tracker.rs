//! Polls asynchronous control-plane jobs to completion.

use crate::core::{
    domain::{
        error::OpsResult,
        model::async_job::{CommandOutcome, JobId, JobStatus},
        value_object::HostAddress,
    },
    infrastructure::{
        config::Timing,
        control_plane::ControlPlane,
        hypervisor::{Hypervisor, JobProgress},
    },
};
use std::sync::Arc;
use tokio::time::{Instant, sleep};

/// Where to sample hypervisor-side progress while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressProbe {
    /// Host running the job.
    pub host: HostAddress,
    /// Hypervisor domain of the workload.
    pub domain: String,
    /// Disk target for block jobs; `None` samples the domain's migration job.
    pub disk: Option<String>,
}

/// Turns raw progress samples into a percentage that never goes backwards.
#[derive(Debug, Default)]
pub struct ProgressMeter {
    last: u8,
}

impl ProgressMeter {
    /// Records a sample and returns the percentage to report.
    pub fn observe(&mut self, progress: JobProgress) -> u8 {
        self.last = self.last.max(progress.percent());
        self.last
    }

    #[must_use]
    pub fn last(&self) -> u8 {
        self.last
    }
}

/// Blocks on job handles until they reach a terminal status.
///
/// Transient control-plane errors (see [`OpsError::is_transient`]) are retried up to
/// `transient_retry_budget` times per job. Exhausting the budget is reported as a job
/// failure (`Ok(false)`), never as an error; any other error propagates immediately.
///
/// [`OpsError::is_transient`]: crate::core::domain::error::OpsError::is_transient
#[derive(Clone)]
pub struct JobTracker {
    control_plane: Arc<dyn ControlPlane>,
    hypervisor: Option<Arc<dyn Hypervisor>>,
    timing: Timing,
}

impl JobTracker {
    pub fn new(control_plane: Arc<dyn ControlPlane>, timing: Timing) -> Self {
        Self {
            control_plane,
            hypervisor: None,
            timing,
        }
    }

    /// Enables progress sampling through `hypervisor`.
    #[must_use]
    pub fn with_hypervisor(mut self, hypervisor: Arc<dyn Hypervisor>) -> Self {
        self.hypervisor = Some(hypervisor);
        self
    }

    /// Waits for a command to finish. Returns `true` only if its job succeeded.
    pub async fn wait(&self, outcome: &CommandOutcome) -> OpsResult<bool> {
        match outcome.job_id() {
            Some(job) => self.track(job, None).await,
            None => Ok(true),
        }
    }

    /// Like [`JobTracker::wait`], logging the migration progress sampled on the source host.
    pub async fn wait_with_progress(
        &self,
        outcome: &CommandOutcome,
        probe: &ProgressProbe,
    ) -> OpsResult<bool> {
        match outcome.job_id() {
            Some(job) => self.track(job, Some(probe)).await,
            None => Ok(true),
        }
    }

    async fn track(&self, job: &JobId, probe: Option<&ProgressProbe>) -> OpsResult<bool> {
        let mut transient_errors = 0;
        let mut meter = ProgressMeter::default();

        loop {
            match self.control_plane.job_status(job).await {
                Ok(JobStatus::Succeeded) => {
                    tracing::debug!(job = %job, "job succeeded");
                    return Ok(true);
                }
                Ok(JobStatus::Failed(reason)) => {
                    tracing::warn!(
                        job = %job,
                        reason = reason.as_deref().unwrap_or("unknown"),
                        "job failed"
                    );
                    return Ok(false);
                }
                Ok(JobStatus::Pending) => {
                    if let Some(probe) = probe {
                        self.sample(probe, &mut meter).await;
                    }
                }
                Err(e) if e.is_transient() => {
                    transient_errors += 1;
                    if transient_errors >= self.timing.transient_retry_budget {
                        tracing::warn!(
                            job = %job,
                            attempts = transient_errors,
                            "giving up on job after repeated transient errors"
                        );
                        return Ok(false);
                    }
                    tracing::warn!(
                        job = %job,
                        attempt = transient_errors,
                        error = %e,
                        "retrying job poll"
                    );
                }
                Err(e) => return Err(e),
            }
            sleep(self.timing.job_poll_interval).await;
        }
    }

    /// Waits for a volume migration by watching the volume itself.
    ///
    /// The job may be reported complete before storage has settled, so after an initial
    /// delay for the job to start this polls the volume until it is `Ready` again. Returns
    /// `false` if that does not happen within the configured timeout.
    pub async fn wait_for_volume(
        &self,
        outcome: &CommandOutcome,
        volume_id: &str,
        probe: Option<&ProgressProbe>,
    ) -> OpsResult<bool> {
        if outcome.job_id().is_some() {
            sleep(self.timing.volume_start_delay).await;
        }
        let deadline = Instant::now() + self.timing.volume_ready_timeout;
        let mut transient_errors = 0;
        let mut meter = ProgressMeter::default();

        loop {
            match self.control_plane.volume(volume_id).await {
                Ok(volume) if volume.is_ready() => return Ok(true),
                Ok(volume) => {
                    tracing::debug!(volume = %volume.name, state = ?volume.state, "volume not ready yet");
                    if let Some(probe) = probe {
                        self.sample(probe, &mut meter).await;
                    }
                }
                Err(e) if e.is_transient() => {
                    transient_errors += 1;
                    if transient_errors >= self.timing.transient_retry_budget {
                        tracing::warn!(volume_id, "giving up on volume after repeated transient errors");
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    volume_id,
                    timeout_secs = self.timing.volume_ready_timeout.as_secs(),
                    "volume did not become ready in time"
                );
                return Ok(false);
            }
            sleep(self.timing.volume_poll_interval).await;
        }
    }

    async fn sample(&self, probe: &ProgressProbe, meter: &mut ProgressMeter) {
        let Some(hypervisor) = &self.hypervisor else {
            return;
        };
        let sampled = match &probe.disk {
            Some(disk) => {
                hypervisor
                    .block_job_status(&probe.host, &probe.domain, disk)
                    .await
            }
            None => {
                hypervisor
                    .migration_job_stats(&probe.host, &probe.domain)
                    .await
            }
        };
        match sampled {
            Ok(Some(progress)) => {
                let before = meter.last();
                let pct = meter.observe(progress);
                if pct != before {
                    tracing::info!(progress = pct, domain = %probe.domain, "{}% done", pct);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "could not sample progress"),
        }
    }
}
