//! Evacuates every workload from a host, one workload at a time.

use crate::{
    core::{
        domain::{
            error::OpsResult,
            model::{
                host::{Host, HostCandidate, ResourceState},
                operation_context::OperationContext,
                workload::{MaintenancePolicy, Workload, WorkloadListing},
            },
        },
        infrastructure::control_plane::ControlPlane,
    },
    migration::application::{
        response::drain_report::DrainReport,
        service::{
            job_tracker::{JobTracker, ProgressProbe},
            target_selector::TargetSelector,
        },
    },
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::Instrument;

/// What happened to one workload during a drain.
#[derive(Debug, Clone, PartialEq)]
enum Evacuation {
    Migrated,
    Restarted,
    /// Stopped; has to be started again once maintenance is over.
    Deferred(Workload),
    Failed,
}

#[derive(Clone)]
pub struct HostDrainCoordinator {
    control_plane: Arc<dyn ControlPlane>,
    tracker: JobTracker,
    selector: TargetSelector,
}

impl HostDrainCoordinator {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        tracker: JobTracker,
        selector: TargetSelector,
    ) -> Self {
        Self {
            control_plane,
            tracker,
            selector,
        }
    }

    /// Drains `host`, optionally sending every live-migrated workload to `target`.
    ///
    /// A failure on one workload is counted and the drain moves on to the next; only a
    /// failure to enumerate the host's workloads is returned as an error.
    pub async fn drain(
        &self,
        ctx: &OperationContext,
        host: &Host,
        target: Option<&Host>,
    ) -> OpsResult<DrainReport> {
        let ctx = ctx.for_host(&host.name);
        let workloads = self.discover(host).await?;
        let mut report = DrainReport::new(&host.name, workloads.len());

        if workloads.is_empty() {
            tracing::warn!(host = %host.name, "no workloads to drain");
            return Ok(report);
        }
        tracing::info!(
            host = %host.name,
            total = report.total,
            target = target.map(|t| t.name.as_str()).unwrap_or("any"),
            "draining host"
        );

        for workload in workloads {
            let wctx = ctx.for_workload(&workload.name);
            let outcome = self
                .evacuate(&wctx, host, target, workload)
                .instrument(wctx.span())
                .await;
            match outcome {
                Evacuation::Migrated | Evacuation::Restarted => report.succeeded += 1,
                Evacuation::Deferred(workload) => {
                    report.succeeded += 1;
                    report.pending_restart.push(workload);
                }
                Evacuation::Failed => report.failed += 1,
            }
        }

        tracing::info!(
            host = %host.name,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            pending_restart = report.pending_restart.len(),
            "drain finished"
        );
        Ok(report)
    }

    /// Disables `host` so nothing is placed back on it, then drains it.
    ///
    /// The host is left disabled. Stopped workloads are started again right away, and
    /// only those whose start is refused come back as pending restart.
    pub async fn evacuate_host(
        &self,
        ctx: &OperationContext,
        host: &Host,
        target: Option<&Host>,
    ) -> OpsResult<DrainReport> {
        let mut host = host.clone();
        if !host.is_disabled() {
            if ctx.dry_run {
                tracing::info!(dry_run = true, host = %host.name, "would disable host");
            } else {
                self.control_plane.disable_host(&host.id).await?;
                host.resource_state = ResourceState::Disabled;
                tracing::info!(host = %host.name, "host disabled");
            }
        }
        self.drain(ctx, &host, target).await
    }

    /// Every workload on the host across all listings, without duplicates.
    async fn discover(&self, host: &Host) -> OpsResult<Vec<Workload>> {
        let mut seen = HashSet::new();
        let mut workloads = Vec::new();
        for listing in WorkloadListing::ALL {
            for workload in self.control_plane.workloads_on_host(&host.id, listing).await? {
                if seen.insert(workload.id.clone()) {
                    workloads.push(workload);
                }
            }
        }
        Ok(workloads)
    }

    async fn evacuate(
        &self,
        ctx: &OperationContext,
        host: &Host,
        target: Option<&Host>,
        workload: Workload,
    ) -> Evacuation {
        if !workload.state.is_stable() {
            tracing::warn!(state = ?workload.state, "workload is in a transitional state, skipping");
            return Evacuation::Failed;
        }
        let result = match workload.maintenance_policy {
            MaintenancePolicy::ShutdownAndStart => {
                self.shutdown_and_start(ctx, host, workload).await
            }
            MaintenancePolicy::LiveMigrate => {
                self.live_migrate(ctx, host, target, &workload).await
            }
        };
        result.unwrap_or_else(|e| {
            tracing::error!(error = %e, "could not evacuate workload");
            Evacuation::Failed
        })
    }

    async fn shutdown_and_start(
        &self,
        ctx: &OperationContext,
        host: &Host,
        workload: Workload,
    ) -> OpsResult<Evacuation> {
        if ctx.dry_run {
            tracing::info!(dry_run = true, "would stop workload and start it again");
            return Ok(Evacuation::Restarted);
        }

        let stop = self.control_plane.stop_workload(&workload).await?;
        if !self.tracker.wait(&stop).await? {
            tracing::warn!("stop failed");
            return Ok(Evacuation::Failed);
        }
        tracing::info!("workload stopped");

        if !host.is_disabled() {
            tracing::info!("host still enabled, start deferred until maintenance is over");
            return Ok(Evacuation::Deferred(workload));
        }

        // Some storage backends refuse to start a workload while its host is disabled
        let started = match self.control_plane.start_workload(&workload).await {
            Ok(start) => self.tracker.wait(&start).await.unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "start rejected");
                false
            }
        };
        if started {
            tracing::info!("workload started again");
            Ok(Evacuation::Restarted)
        } else {
            tracing::warn!("start failed, deferred until maintenance is over");
            Ok(Evacuation::Deferred(workload))
        }
    }

    async fn live_migrate(
        &self,
        ctx: &OperationContext,
        host: &Host,
        target: Option<&Host>,
        workload: &Workload,
    ) -> OpsResult<Evacuation> {
        let (candidates, pinned) = match target {
            Some(target) => (vec![HostCandidate::pinned(target.clone())], true),
            None => (self.control_plane.migration_candidates(workload).await?, false),
        };

        let Some(destination) = self
            .selector
            .select(workload, candidates, &host.cluster_id, pinned)
        else {
            tracing::warn!("no suitable migration target");
            return Ok(Evacuation::Failed);
        };

        if ctx.dry_run {
            tracing::info!(dry_run = true, destination = %destination.name, "would migrate workload");
            return Ok(Evacuation::Migrated);
        }

        tracing::info!(destination = %destination.name, "migrating workload");
        let migration = self
            .control_plane
            .migrate_workload(workload, &destination.id)
            .await?;
        let probe = ProgressProbe {
            host: host.address(),
            domain: workload.domain_name().to_string(),
            disk: None,
        };
        if self.tracker.wait_with_progress(&migration, &probe).await? {
            tracing::info!(destination = %destination.name, "workload migrated");
            Ok(Evacuation::Migrated)
        } else {
            tracing::warn!(destination = %destination.name, "migration failed");
            Ok(Evacuation::Failed)
        }
    }
}
