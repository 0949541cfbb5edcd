//! Rolling maintenance of a cluster, one host at a time.
//!
//! Each host is disabled, drained, put through its reboot action, waited for until it is
//! back on the network and its hypervisor answers, and enabled again before the next host
//! is touched. Workloads that had to be stopped are started once their host is back.

use crate::{
    core::{
        domain::{
            error::{OpsError, OpsResult},
            model::{host::Host, operation_context::OperationContext, workload::Workload},
        },
        infrastructure::{
            config::Timing, control_plane::ControlPlane, hypervisor::Hypervisor,
            remote_shell::RemoteShell,
        },
    },
    maintenance::application::{
        request::maintenance_request::{MaintenanceRequest, RebootAction},
        response::maintenance_report::{
            HostMaintenanceRecord, MaintenanceReport, SkipReason, SkippedHost,
        },
    },
    migration::application::service::{host_drain::HostDrainCoordinator, job_tracker::JobTracker},
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{Instant, sleep};
use tracing::Instrument;

/// Reboot in the background so the remote shell returns before the connection drops.
const REBOOT: &str = "nohup sh -c 'sleep 5; reboot' >/dev/null 2>&1 &";
const HALT: &str = "nohup sh -c 'sleep 5; halt -p' >/dev/null 2>&1 &";
const FORCE_RESET: &str = "echo 1 > /proc/sys/kernel/sysrq; \
    nohup sh -c 'sleep 5; echo b > /proc/sysrq-trigger' >/dev/null 2>&1 &";
const PXE_NEXT_BOOT: &str = "ipmitool chassis bootdev pxe";

/// Splits the cluster's hosts into the ones to process, in name order, and the skipped ones.
fn partition_hosts(
    mut hosts: Vec<Host>,
    request: &MaintenanceRequest,
    proxy_id: Option<&str>,
) -> (Vec<Host>, Vec<SkippedHost>) {
    hosts.sort_by(|a, b| a.name.cmp(&b.name));
    let mut selected = Vec::new();
    let mut skipped = Vec::new();

    for host in hosts {
        let reason = if proxy_id == Some(host.id.as_str()) {
            Some(SkipReason::Proxy)
        } else if !request.only_hosts.is_empty() && !request.only_hosts.contains(&host.name) {
            Some(SkipReason::NotSelected)
        } else if request.ignore_hosts.contains(&host.name) {
            Some(SkipReason::Ignored)
        } else if request.skip_os_version.is_some()
            && host.hypervisor_version == request.skip_os_version
        {
            Some(SkipReason::AlreadyOnVersion)
        } else {
            None
        };
        match reason {
            Some(reason) => skipped.push(SkippedHost {
                host: host.name,
                reason,
            }),
            None => selected.push(host),
        }
    }
    (selected, skipped)
}

pub struct ClusterMaintenanceDriver {
    control_plane: Arc<dyn ControlPlane>,
    shell: Arc<dyn RemoteShell>,
    hypervisor: Arc<dyn Hypervisor>,
    drain: HostDrainCoordinator,
    tracker: JobTracker,
    timing: Timing,
}

impl ClusterMaintenanceDriver {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        shell: Arc<dyn RemoteShell>,
        hypervisor: Arc<dyn Hypervisor>,
        drain: HostDrainCoordinator,
        tracker: JobTracker,
        timing: Timing,
    ) -> Self {
        Self {
            control_plane,
            shell,
            hypervisor,
            drain,
            tracker,
            timing,
        }
    }

    /// Runs maintenance over the cluster named in `request`.
    ///
    /// Any error aborts the run and leaves the current host as it is (typically disabled);
    /// hosts already processed stay enabled.
    pub async fn run(
        &self,
        ctx: &OperationContext,
        request: &MaintenanceRequest,
    ) -> OpsResult<MaintenanceReport> {
        let ctx = ctx.for_cluster(&request.cluster);
        self.run_inner(&ctx, request).instrument(ctx.span()).await
    }

    async fn run_inner(
        &self,
        ctx: &OperationContext,
        request: &MaintenanceRequest,
    ) -> OpsResult<MaintenanceReport> {
        check_scripts(request).await?;
        let cluster = self.control_plane.cluster_by_name(&request.cluster).await?;

        let proxy = match &request.proxy_host {
            Some(name) => {
                let proxy = self.control_plane.host_by_name(name).await?;
                if proxy.cluster_id != cluster.id {
                    return Err(OpsError::Precondition(format!(
                        "proxy host {} is not in cluster {}",
                        proxy.name, cluster.name
                    )));
                }
                Some(proxy)
            }
            None => None,
        };

        let hosts = self.control_plane.cluster_hosts(&cluster.id).await?;
        let (selected, skipped) =
            partition_hosts(hosts, request, proxy.as_ref().map(|p| p.id.as_str()));
        for skip in &skipped {
            tracing::info!(host = %skip.host, reason = ?skip.reason, "skipping host");
        }
        tracing::info!(
            action = %request.action,
            hosts = selected.len(),
            proxy = proxy.as_ref().map(|p| p.name.as_str()).unwrap_or("-"),
            "starting rolling maintenance"
        );

        let mut report = MaintenanceReport {
            cluster: cluster.name.clone(),
            skipped,
            ..MaintenanceReport::default()
        };
        let mut last_done: Option<Host> = None;

        for host in selected {
            let hctx = ctx.for_host(&host.name);
            let (record, done) = self
                .maintain_host(&hctx, host, request, proxy.as_ref(), last_done.as_ref())
                .instrument(hctx.span())
                .await?;
            report.processed.push(record);
            if proxy.is_none() {
                last_done = Some(done);
            }
        }

        tracing::info!(
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            "rolling maintenance finished"
        );
        Ok(report)
    }

    /// The full cycle for one host. Returns the record and the host as it is afterwards.
    async fn maintain_host(
        &self,
        ctx: &OperationContext,
        host: Host,
        request: &MaintenanceRequest,
        proxy: Option<&Host>,
        last_done: Option<&Host>,
    ) -> OpsResult<(HostMaintenanceRecord, Host)> {
        let mut record = HostMaintenanceRecord {
            host: host.name.clone(),
            ..HostMaintenanceRecord::default()
        };
        tracing::info!("starting host maintenance");

        self.run_hook(ctx, &host, request.pre_drain_script.as_deref(), "pre-drain")
            .await?;
        self.disable(ctx, &host).await?;
        if let Some(tags) = &request.host_tags {
            if ctx.dry_run {
                tracing::info!(dry_run = true, tags, "would set host tags");
            } else {
                tracing::info!(tags, "setting host tags");
                self.control_plane.update_host_tags(&host.id, tags).await?;
            }
        }

        let host = if ctx.dry_run {
            host
        } else {
            let current = self.control_plane.host(&host.id).await?;
            if !current.is_up() {
                return Err(OpsError::Precondition(format!(
                    "host {} is {:?}, not Up",
                    current.name, current.operational_state
                )));
            }
            current
        };

        let pending = self
            .drain_until_empty(ctx, &host, proxy, last_done, &mut record)
            .await?;

        self.run_hook(ctx, &host, request.post_drain_script.as_deref(), "post-drain")
            .await?;
        self.perform_action(ctx, &host, request).await?;
        if request.action.restarts_host() {
            self.wait_for_return(ctx, &host).await?;
        }
        self.run_hook(
            ctx,
            &host,
            request.post_reboot_script.as_deref(),
            "post-reboot",
        )
        .await?;

        if ctx.dry_run {
            tracing::info!(dry_run = true, "would enable host");
        } else {
            tracing::info!("enabling host");
            self.control_plane.enable_host(&host.id).await?;
        }
        let host = self.wait_for_agent(ctx, host).await?;

        self.restart(ctx, &pending, &mut record).await;

        if let Some(proxy) = proxy {
            self.return_from_proxy(ctx, proxy, &host, &mut record)
                .await?;
        }

        tracing::info!(
            drain_attempts = record.drain_attempts,
            restarted = record.restarted.len(),
            restart_failed = record.restart_failed.len(),
            "host maintenance finished"
        );
        Ok((record, host))
    }

    async fn disable(&self, ctx: &OperationContext, host: &Host) -> OpsResult<()> {
        if host.is_disabled() {
            tracing::info!("host already disabled");
            return Ok(());
        }
        if ctx.dry_run {
            tracing::info!(dry_run = true, "would disable host");
            return Ok(());
        }
        tracing::info!("disabling host");
        self.control_plane.disable_host(&host.id).await
    }

    /// Drains until no workload fails, within the configured number of attempts.
    ///
    /// A proxy stays pinned on every attempt; the previous host, used as a fallback
    /// target, is dropped after its first failed attempt. Returns the workloads stopped
    /// along the way.
    async fn drain_until_empty(
        &self,
        ctx: &OperationContext,
        host: &Host,
        proxy: Option<&Host>,
        last_done: Option<&Host>,
        record: &mut HostMaintenanceRecord,
    ) -> OpsResult<Vec<Workload>> {
        let mut target = proxy.or(last_done);
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        loop {
            record.drain_attempts += 1;
            let drained = self.drain.drain(ctx, host, target).await?;
            record.drained += drained.succeeded;
            for workload in drained.pending_restart {
                if seen.insert(workload.id.clone()) {
                    pending.push(workload);
                }
            }

            if drained.failed == 0 {
                return Ok(pending);
            }
            if ctx.dry_run {
                tracing::warn!(failed = drained.failed, "drain would leave workloads behind");
                return Ok(pending);
            }
            if record.drain_attempts >= self.timing.drain_retry_limit {
                return Err(OpsError::Precondition(format!(
                    "host {} still has {} workloads after {} drain attempts",
                    host.name, drained.failed, record.drain_attempts
                )));
            }
            if let Some(pinned) = target.take() {
                tracing::warn!(target = %pinned.name, "dropping pinned target for the next attempt");
            }
            tracing::warn!(
                failed = drained.failed,
                attempt = record.drain_attempts,
                delay_secs = self.timing.drain_retry_delay.as_secs(),
                "drain incomplete, retrying"
            );
            sleep(self.timing.drain_retry_delay).await;
        }
    }

    async fn perform_action(
        &self,
        ctx: &OperationContext,
        host: &Host,
        request: &MaintenanceRequest,
    ) -> OpsResult<()> {
        let action = request.action;
        if action == RebootAction::FirmwareUpgrade {
            self.run_hook(ctx, host, request.firmware_script.as_deref(), "firmware")
                .await?;
        }
        let command = match action {
            RebootAction::Reboot | RebootAction::FirmwareUpgrade => REBOOT.to_string(),
            RebootAction::Halt => HALT.to_string(),
            RebootAction::ForceReset => FORCE_RESET.to_string(),
            RebootAction::PxeReboot => format!("{} && {}", PXE_NEXT_BOOT, REBOOT),
            RebootAction::SkipReboot => {
                tracing::info!("skipping reboot");
                return Ok(());
            }
        };
        if ctx.dry_run {
            tracing::info!(dry_run = true, %action, "would restart host");
            return Ok(());
        }

        tracing::info!(%action, "restarting host");
        let address = host.address();
        self.shell
            .run(&address, &command, true)
            .await?
            .check(&address)?;
        Ok(())
    }

    /// Waits for the host to drop off the network, then to come back with a working hypervisor.
    async fn wait_for_return(&self, ctx: &OperationContext, host: &Host) -> OpsResult<()> {
        if ctx.dry_run {
            tracing::info!(dry_run = true, "would wait for the host to go down and come back");
            return Ok(());
        }
        let address = host.address();
        let deadline = Instant::now() + self.timing.reboot_timeout;

        while self.shell.is_reachable(&address).await {
            if Instant::now() >= deadline {
                return Err(OpsError::Unreachable(format!(
                    "host {} never went down",
                    host.name
                )));
            }
            tracing::debug!("host still reachable");
            sleep(self.timing.reachability_interval).await;
        }
        tracing::info!("host is down");

        loop {
            if self.shell.is_reachable(&address).await
                && self.hypervisor.is_responsive(&address).await
            {
                tracing::info!("host is back");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OpsError::Unreachable(format!(
                    "host {} did not come back within {}s",
                    host.name,
                    self.timing.reboot_timeout.as_secs()
                )));
            }
            tracing::debug!("waiting for host to come back");
            sleep(self.timing.reachability_interval).await;
        }
    }

    async fn wait_for_agent(&self, ctx: &OperationContext, host: Host) -> OpsResult<Host> {
        if ctx.dry_run {
            return Ok(host);
        }
        let deadline = Instant::now() + self.timing.state_wait_timeout;
        loop {
            let current = self.control_plane.host(&host.id).await?;
            if current.is_up() {
                tracing::info!("management agent is up");
                return Ok(current);
            }
            if Instant::now() >= deadline {
                return Err(OpsError::Unreachable(format!(
                    "agent on {} still {:?}",
                    current.name, current.operational_state
                )));
            }
            tracing::debug!(state = ?current.operational_state, "waiting for management agent");
            sleep(self.timing.state_poll_interval).await;
        }
    }

    /// Starts stopped workloads again. Failures are recorded, not returned.
    async fn restart(
        &self,
        ctx: &OperationContext,
        pending: &[Workload],
        record: &mut HostMaintenanceRecord,
    ) {
        for workload in pending {
            if ctx.dry_run {
                tracing::info!(dry_run = true, workload = %workload.name, "would start workload");
                record.restarted.push(workload.name.clone());
                continue;
            }
            let started = match self.control_plane.start_workload(workload).await {
                Ok(outcome) => self.tracker.wait(&outcome).await,
                Err(e) => Err(e),
            };
            match started {
                Ok(true) => {
                    tracing::info!(workload = %workload.name, "workload started");
                    record.restarted.push(workload.name.clone());
                }
                Ok(false) => {
                    tracing::error!(workload = %workload.name, "workload did not start");
                    record.restart_failed.push(workload.name.clone());
                }
                Err(e) => {
                    tracing::error!(workload = %workload.name, error = %e, "could not start workload");
                    record.restart_failed.push(workload.name.clone());
                }
            }
        }
    }

    /// Moves everything on the proxy onto the freshly maintained host.
    async fn return_from_proxy(
        &self,
        ctx: &OperationContext,
        proxy: &Host,
        host: &Host,
        record: &mut HostMaintenanceRecord,
    ) -> OpsResult<()> {
        let pctx = ctx.for_host(&proxy.name);
        let returned = self.drain.drain(&pctx, proxy, Some(host)).await?;
        if returned.failed > 0 {
            tracing::warn!(
                proxy = %proxy.name,
                failed = returned.failed,
                "some workloads stayed on the proxy"
            );
        }
        record.returned_from_proxy = returned.succeeded;
        self.restart(&pctx, &returned.pending_restart, record).await;
        Ok(())
    }

    /// Copies a local script to `/tmp` on the host and runs it with privilege.
    async fn run_hook(
        &self,
        ctx: &OperationContext,
        host: &Host,
        script: Option<&Path>,
        stage: &str,
    ) -> OpsResult<()> {
        let Some(script) = script else {
            return Ok(());
        };
        let remote = remote_script_path(script)?;
        if ctx.dry_run {
            tracing::info!(dry_run = true, stage, script = %script.display(), "would run script");
            return Ok(());
        }

        tracing::info!(stage, script = %script.display(), "running script");
        let address = host.address();
        self.shell.copy_file(&address, script, &remote).await?;
        let output = self
            .shell
            .run(&address, &format!("chmod +x {0} && {0}", remote), true)
            .await?
            .check(&address)?;
        if !output.stdout.trim().is_empty() {
            tracing::debug!(stage, output = %output.stdout.trim(), "script output");
        }
        Ok(())
    }
}

fn remote_script_path(script: &Path) -> OpsResult<String> {
    script
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| format!("/tmp/{}", name))
        .ok_or_else(|| OpsError::Config(format!("not a script file: {}", script.display())))
}

/// Every script the run will need exists locally, before any host is touched.
async fn check_scripts(request: &MaintenanceRequest) -> OpsResult<()> {
    if request.action == RebootAction::FirmwareUpgrade && request.firmware_script.is_none() {
        return Err(OpsError::Config(
            "firmware upgrade needs a firmware script".to_string(),
        ));
    }
    let scripts = [
        &request.pre_drain_script,
        &request.post_drain_script,
        &request.post_reboot_script,
        &request.firmware_script,
    ];
    for script in scripts.into_iter().flatten() {
        let metadata = tokio::fs::metadata(script).await.map_err(|e| {
            OpsError::Config(format!("cannot read script {}: {}", script.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(OpsError::Config(format!(
                "script {} is not a file",
                script.display()
            )));
        }
        remote_script_path(script)?;
    }
    Ok(())
}
