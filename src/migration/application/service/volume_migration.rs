//! Moves workloads and volumes across clusters and storage tiers.
//!
//! A workload's compute can only follow its root volume to hosts that reach the root
//! volume's pool. Zone-wide pools are reachable from every cluster of the zone, so
//! cluster-scoped volumes are first bridged through a zone-wide pool, compute is migrated,
//! and the bridged volumes are then settled on a cluster-scoped pool of the destination.
//! When no zone-wide pool can hold them, compute and volumes move in one combined call.

use crate::{
    core::{
        domain::{
            error::{OpsError, OpsResult},
            model::{
                async_job::CommandOutcome,
                host::Host,
                operation_context::OperationContext,
                storage_pool::{PoolScope, StoragePool},
                volume::Volume,
                workload::{Workload, WorkloadState},
            },
        },
        infrastructure::{
            config::DatastoreConfig, control_plane::ControlPlane, datastore::Datastore,
            hypervisor::Hypervisor,
        },
    },
    migration::application::{
        request::{
            migrate_volume_request::MigrateVolumeRequest,
            migrate_workload_request::MigrateWorkloadRequest,
        },
        response::migration_report::{Relocation, WorkloadMigrationReport},
        service::{
            job_tracker::{JobTracker, ProgressProbe},
            target_selector::TargetSelector,
        },
    },
};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

/// Offering names recorded in the datastore when a volume changes tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierOfferings {
    pub zone_disk: Option<String>,
    pub cluster_disk: Option<String>,
    pub zone_service: Option<String>,
    pub cluster_service: Option<String>,
}

impl From<&DatastoreConfig> for TierOfferings {
    fn from(config: &DatastoreConfig) -> Self {
        Self {
            zone_disk: config.zone_disk_offering.clone(),
            cluster_disk: config.cluster_disk_offering.clone(),
            zone_service: config.zone_service_offering.clone(),
            cluster_service: config.cluster_service_offering.clone(),
        }
    }
}

impl TierOfferings {
    fn for_volume(&self, volume: &Volume, scope: PoolScope) -> Option<&str> {
        let offering = match (volume.is_root(), scope) {
            (true, PoolScope::Zone) => &self.zone_service,
            (true, PoolScope::Cluster) => &self.cluster_service,
            (false, PoolScope::Zone) => &self.zone_disk,
            (false, PoolScope::Cluster) => &self.cluster_disk,
            (_, PoolScope::Host) => return None,
        };
        offering.as_deref()
    }
}

/// A volume together with the pool it currently sits on.
#[derive(Debug, Clone)]
struct Placed {
    volume: Volume,
    pool: StoragePool,
}

/// The volumes of a workload partitioned by the scope of their pools.
#[derive(Debug)]
struct Layout {
    root: Placed,
    cluster_data: Vec<Placed>,
    zone_data: Vec<Placed>,
}

impl Layout {
    /// Partitions `volumes`; host-local volumes cannot be live migrated and are refused.
    fn classify(volumes: Vec<Placed>) -> OpsResult<Self> {
        let mut root = None;
        let mut cluster_data = Vec::new();
        let mut zone_data = Vec::new();

        for placed in volumes {
            if placed.pool.scope == PoolScope::Host {
                return Err(OpsError::Precondition(format!(
                    "volume {} is on host-local pool {}",
                    placed.volume.name, placed.pool.name
                )));
            }
            if placed.volume.is_root() {
                root = Some(placed);
            } else if placed.pool.scope == PoolScope::Cluster {
                cluster_data.push(placed);
            } else {
                zone_data.push(placed);
            }
        }

        let root = root
            .ok_or_else(|| OpsError::Precondition("workload has no root volume".to_string()))?;
        Ok(Self {
            root,
            cluster_data,
            zone_data,
        })
    }

    fn with_scope(&self, scope: PoolScope) -> impl Iterator<Item = &Placed> {
        std::iter::once(&self.root)
            .chain(&self.cluster_data)
            .chain(&self.zone_data)
            .filter(move |p| p.pool.scope == scope)
    }

    fn all(&self) -> impl Iterator<Item = &Placed> {
        std::iter::once(&self.root)
            .chain(&self.cluster_data)
            .chain(&self.zone_data)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Move {
    volume: Volume,
    to: StoragePool,
}

#[derive(Debug, PartialEq)]
enum ComputeMove {
    Plain,
    /// Compute and these volumes in one call.
    WithVolumes(Vec<Move>),
}

/// Ordered steps of a cross-cluster migration.
#[derive(Debug)]
struct Plan {
    /// Temporary relocations to zone-wide pools, before compute moves.
    bridge: Vec<Move>,
    compute: ComputeMove,
    /// Final relocations to cluster-scoped pools of the destination, after compute moves.
    settle: Vec<Move>,
}

fn fits(pool: &StoragePool, volume: &Volume) -> bool {
    pool.is_available() && pool.has_tags(&volume.tags)
}

/// A random cluster-scoped pool of the destination that can hold `volume`.
fn final_pool<R: Rng + ?Sized>(
    cluster_pools: &[StoragePool],
    volume: &Volume,
    rng: &mut R,
) -> OpsResult<StoragePool> {
    let fitting: Vec<&StoragePool> = cluster_pools.iter().filter(|p| fits(p, volume)).collect();
    fitting.choose(rng).map(|p| (*p).clone()).ok_or_else(|| {
        OpsError::Precondition(format!(
            "no cluster-scoped pool in the destination can hold volume {}",
            volume.name
        ))
    })
}

fn plan_moves<R: Rng + ?Sized>(
    layout: &Layout,
    same_cluster: bool,
    zone_pools: &[StoragePool],
    cluster_pools: &[StoragePool],
    zone_to_cluster: bool,
    rng: &mut R,
) -> OpsResult<Plan> {
    // Cluster-scoped volumes are only unreachable when compute leaves their cluster
    let stranded: Vec<&Placed> = if same_cluster {
        Vec::new()
    } else {
        layout.with_scope(PoolScope::Cluster).collect()
    };

    let mut bridge = Vec::new();
    let mut settle = Vec::new();
    let mut compute = ComputeMove::Plain;

    if !stranded.is_empty() {
        let bridged: Option<Vec<Move>> = stranded
            .iter()
            .map(|placed| {
                zone_pools
                    .iter()
                    .find(|pool| fits(pool, &placed.volume))
                    .map(|pool| Move {
                        volume: placed.volume.clone(),
                        to: pool.clone(),
                    })
            })
            .collect();

        match bridged {
            Some(moves) => {
                bridge = moves;
                for placed in &stranded {
                    settle.push(Move {
                        volume: placed.volume.clone(),
                        to: final_pool(cluster_pools, &placed.volume, rng)?,
                    });
                }
            }
            None => {
                let moves = stranded
                    .iter()
                    .map(|placed| {
                        Ok(Move {
                            volume: placed.volume.clone(),
                            to: final_pool(cluster_pools, &placed.volume, rng)?,
                        })
                    })
                    .collect::<OpsResult<Vec<Move>>>()?;
                compute = ComputeMove::WithVolumes(moves);
            }
        }
    }

    if zone_to_cluster {
        for placed in layout.with_scope(PoolScope::Zone) {
            settle.push(Move {
                volume: placed.volume.clone(),
                to: final_pool(cluster_pools, &placed.volume, rng)?,
            });
        }
    }

    Ok(Plan {
        bridge,
        compute,
        settle,
    })
}

/// Sequences volume moves so that compute migrations always find their storage.
#[derive(Clone)]
pub struct VolumeMigrationOrchestrator {
    control_plane: Arc<dyn ControlPlane>,
    hypervisor: Arc<dyn Hypervisor>,
    datastore: Option<Arc<dyn Datastore>>,
    offerings: TierOfferings,
    tracker: JobTracker,
    selector: TargetSelector,
}

impl VolumeMigrationOrchestrator {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        hypervisor: Arc<dyn Hypervisor>,
        tracker: JobTracker,
        selector: TargetSelector,
    ) -> Self {
        Self {
            control_plane,
            hypervisor,
            datastore: None,
            offerings: TierOfferings::default(),
            tracker,
            selector,
        }
    }

    /// Enables size reconciliation and tier offering updates.
    #[must_use]
    pub fn with_datastore(mut self, datastore: Arc<dyn Datastore>, offerings: TierOfferings) -> Self {
        self.datastore = Some(datastore);
        self.offerings = offerings;
        self
    }

    /// Moves a running workload into another cluster.
    ///
    /// Preconditions (workload running, no workload or volume snapshots, every volume
    /// `Ready`, no host-local volume) are checked before anything is changed. A failed
    /// step ends the migration with `succeeded == false`; steps already done are kept.
    pub async fn migrate_workload_to_cluster(
        &self,
        ctx: &OperationContext,
        request: &MigrateWorkloadRequest,
    ) -> OpsResult<WorkloadMigrationReport> {
        let ctx = ctx
            .for_cluster(&request.cluster)
            .for_workload(&request.workload);
        self.migrate_workload_inner(&ctx, request)
            .instrument(ctx.span())
            .await
    }

    async fn migrate_workload_inner(
        &self,
        ctx: &OperationContext,
        request: &MigrateWorkloadRequest,
    ) -> OpsResult<WorkloadMigrationReport> {
        let workload = self.control_plane.workload_by_name(&request.workload).await?;
        let cluster = self.control_plane.cluster_by_name(&request.cluster).await?;
        let mut report = WorkloadMigrationReport {
            workload: workload.name.clone(),
            ..WorkloadMigrationReport::default()
        };

        let volumes = self.check_workload(&workload).await?;
        let mut placed = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let pool = self.control_plane.storage_pool(&volume.pool_id).await?;
            placed.push(Placed { volume, pool });
        }
        let layout = Layout::classify(placed)?;

        let source_id = workload
            .host_id
            .as_deref()
            .ok_or_else(|| OpsError::Precondition("workload is not placed on a host".to_string()))?;
        let source = self.control_plane.host(source_id).await?;

        let hosts = self.control_plane.cluster_hosts(&cluster.id).await?;
        let destination = self
            .selector
            .select_with_capacity(&workload, hosts, &cluster.id)
            .await?
            .ok_or_else(|| {
                OpsError::Precondition(format!("no host in {} can take the workload", cluster.name))
            })?;

        let zone_pools = self.control_plane.zone_storage_pools(&cluster.zone_id).await?;
        let cluster_pools = self.control_plane.cluster_storage_pools(&cluster.id).await?;
        let plan = {
            let mut rng = rand::thread_rng();
            plan_moves(
                &layout,
                source.cluster_id == cluster.id,
                &zone_pools,
                &cluster_pools,
                request.zone_to_cluster,
                &mut rng,
            )?
        };
        tracing::info!(
            destination = %destination.name,
            bridge = plan.bridge.len(),
            combined = matches!(plan.compute, ComputeMove::WithVolumes(_)),
            settle = plan.settle.len(),
            "migration planned"
        );

        let volumes: Vec<Volume> = layout.all().map(|p| p.volume.clone()).collect();
        let disks = self.reconcile_sizes(ctx, &source, &workload, &volumes).await?;
        let mut placements: HashMap<String, StoragePool> = layout
            .all()
            .map(|p| (p.volume.id.clone(), p.pool.clone()))
            .collect();

        for step in &plan.bridge {
            let probe = probe_for(&source, &workload, &disks, &step.volume);
            if !self
                .relocate_step(ctx, &workload, step, &mut placements, probe, &mut report)
                .await?
            {
                return Ok(report);
            }
        }

        if !self
            .move_compute(ctx, &workload, &source, &destination, &plan.compute)
            .await?
        {
            return Ok(report);
        }
        if let ComputeMove::WithVolumes(moves) = &plan.compute {
            for step in moves {
                let from = placements.insert(step.volume.id.clone(), step.to.clone());
                report.relocations.push(relocation(&step.volume, from.as_ref(), &step.to));
            }
        }
        report.destination = Some(destination.name.clone());

        for step in &plan.settle {
            let probe = probe_for(&destination, &workload, &disks, &step.volume);
            if !self
                .relocate_step(ctx, &workload, step, &mut placements, probe, &mut report)
                .await?
            {
                return Ok(report);
            }
        }

        report.succeeded = true;
        tracing::info!(
            destination = %destination.name,
            relocations = report.relocations.len(),
            "workload migrated"
        );
        Ok(report)
    }

    /// Moves one volume to a named pool. Returns `false` if the move failed.
    pub async fn migrate_volume(
        &self,
        ctx: &OperationContext,
        request: &MigrateVolumeRequest,
    ) -> OpsResult<bool> {
        let volume = self.control_plane.volume(&request.volume_id).await?;
        let ctx = ctx.for_workload(&volume.name);
        async {
            let target = self.control_plane.storage_pool_by_name(&request.pool).await?;
            if volume.pool_id == target.id {
                tracing::info!(pool = %target.name, "volume already on target pool, nothing to do");
                return Ok(true);
            }
            if !volume.is_ready() {
                return Err(OpsError::Precondition(format!(
                    "volume {} is {:?}, not Ready",
                    volume.name, volume.state
                )));
            }
            if !self.control_plane.volume_snapshots(&volume.id).await?.is_empty() {
                return Err(OpsError::Precondition(format!(
                    "volume {} has snapshots",
                    volume.name
                )));
            }
            let source = self.control_plane.storage_pool(&volume.pool_id).await?;
            if source.scope == PoolScope::Host || target.scope == PoolScope::Host {
                return Err(OpsError::Precondition(
                    "volumes on host-local pools cannot be migrated".to_string(),
                ));
            }

            let attached = match &volume.workload_id {
                Some(id) => Some(self.control_plane.workload(id).await?),
                None => None,
            };
            let running = attached
                .as_ref()
                .filter(|w| w.state == WorkloadState::Running);

            let mut probe = None;
            if let Some(workload) = running {
                if let Some(host_id) = &workload.host_id {
                    let host = self.control_plane.host(host_id).await?;
                    let disks = self
                        .reconcile_sizes(&ctx, &host, workload, std::slice::from_ref(&volume))
                        .await?;
                    probe = probe_for(&host, workload, &disks, &volume);
                }
            }

            self.relocate(
                &ctx,
                &volume,
                attached.as_ref().map(|w| w.id.as_str()),
                &source,
                &target,
                running.is_some(),
                probe,
            )
            .await
        }
        .instrument(ctx.span())
        .await
    }

    /// Running, snapshot-free, all volumes `Ready`. Returns the volumes.
    async fn check_workload(&self, workload: &Workload) -> OpsResult<Vec<Volume>> {
        if workload.state != WorkloadState::Running {
            return Err(OpsError::Precondition(format!(
                "workload {} is {:?}, not Running",
                workload.name, workload.state
            )));
        }
        if !self
            .control_plane
            .workload_snapshots(&workload.id)
            .await?
            .is_empty()
        {
            return Err(OpsError::Precondition(format!(
                "workload {} has snapshots",
                workload.name
            )));
        }
        let volumes = self.control_plane.volumes(&workload.id).await?;
        for volume in &volumes {
            if !volume.is_ready() {
                return Err(OpsError::Precondition(format!(
                    "volume {} is {:?}, not Ready",
                    volume.name, volume.state
                )));
            }
            if !self
                .control_plane
                .volume_snapshots(&volume.id)
                .await?
                .is_empty()
            {
                return Err(OpsError::Precondition(format!(
                    "volume {} has snapshots",
                    volume.name
                )));
            }
        }
        Ok(volumes)
    }

    /// Corrects recorded sizes that differ from what the hypervisor sees.
    ///
    /// Returns the guest device of each volume found on the hypervisor.
    async fn reconcile_sizes(
        &self,
        ctx: &OperationContext,
        host: &Host,
        workload: &Workload,
        volumes: &[Volume],
    ) -> OpsResult<HashMap<String, String>> {
        if ctx.dry_run {
            tracing::info!(dry_run = true, "would reconcile recorded volume sizes");
            return Ok(HashMap::new());
        }

        let disks = self
            .hypervisor
            .disk_topology(&host.address(), workload.domain_name())
            .await?;
        let mut devices = HashMap::new();

        for volume in volumes {
            let Some(disk) = volume
                .path
                .as_deref()
                .and_then(|path| disks.iter().find(|d| d.backs(path)))
            else {
                tracing::debug!(volume = %volume.name, "volume not found on the hypervisor");
                continue;
            };
            devices.insert(volume.id.clone(), disk.target.clone());

            let Some(datastore) = &self.datastore else {
                if volume.size != disk.capacity {
                    tracing::warn!(
                        volume = %volume.name,
                        recorded = volume.size,
                        live = disk.capacity,
                        "size mismatch but no datastore configured to correct it"
                    );
                }
                continue;
            };
            let recorded = datastore.get_volume_size(&volume.id).await?;
            if recorded != disk.capacity {
                tracing::info!(
                    volume = %volume.name,
                    recorded,
                    live = disk.capacity,
                    "correcting recorded volume size"
                );
                datastore
                    .update_volume_size(&volume.id, disk.capacity)
                    .await?;
            }
        }
        Ok(devices)
    }

    async fn relocate_step(
        &self,
        ctx: &OperationContext,
        workload: &Workload,
        step: &Move,
        placements: &mut HashMap<String, StoragePool>,
        probe: Option<ProgressProbe>,
        report: &mut WorkloadMigrationReport,
    ) -> OpsResult<bool> {
        let Some(from) = placements.get(&step.volume.id).cloned() else {
            return Err(OpsError::Precondition(format!(
                "volume {} has no known pool",
                step.volume.name
            )));
        };
        if from.id == step.to.id {
            return Ok(true);
        }
        let moved = self
            .relocate(
                ctx,
                &step.volume,
                Some(&workload.id),
                &from,
                &step.to,
                true,
                probe,
            )
            .await?;
        if moved {
            report
                .relocations
                .push(relocation(&step.volume, Some(&from), &step.to));
            placements.insert(step.volume.id.clone(), step.to.clone());
        } else {
            tracing::error!(
                volume = %step.volume.name,
                pool = %step.to.name,
                "volume relocation failed, aborting migration"
            );
        }
        Ok(moved)
    }

    /// One relocation: tier offering, live migration, wait until the volume settles.
    #[allow(clippy::too_many_arguments)]
    async fn relocate(
        &self,
        ctx: &OperationContext,
        volume: &Volume,
        workload_id: Option<&str>,
        from: &StoragePool,
        to: &StoragePool,
        live: bool,
        probe: Option<ProgressProbe>,
    ) -> OpsResult<bool> {
        if from.id == to.id {
            tracing::info!(volume = %volume.name, pool = %to.name, "volume already on target pool");
            return Ok(true);
        }
        if from.scope != to.scope {
            self.update_tier_offering(ctx, volume, workload_id, to.scope)
                .await?;
        }
        if ctx.dry_run {
            tracing::info!(
                dry_run = true,
                volume = %volume.name,
                from = %from.name,
                to = %to.name,
                "would migrate volume"
            );
            return Ok(true);
        }

        tracing::info!(volume = %volume.name, from = %from.name, to = %to.name, live, "migrating volume");
        let outcome = self
            .control_plane
            .migrate_volume(&volume.id, &to.id, live)
            .await?;
        if !self
            .tracker
            .wait_for_volume(&outcome, &volume.id, probe.as_ref())
            .await?
        {
            return Ok(false);
        }

        // A failed job leaves the volume Ready on its old pool
        let settled = self.control_plane.volume(&volume.id).await?;
        if settled.pool_id != to.id {
            tracing::warn!(
                volume = %volume.name,
                pool = %settled.pool_name,
                "volume is ready but not on the target pool"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn update_tier_offering(
        &self,
        ctx: &OperationContext,
        volume: &Volume,
        workload_id: Option<&str>,
        scope: PoolScope,
    ) -> OpsResult<()> {
        let Some(datastore) = &self.datastore else {
            tracing::warn!(volume = %volume.name, "no datastore configured, offering left unchanged");
            return Ok(());
        };
        let Some(offering) = self.offerings.for_volume(volume, scope) else {
            tracing::warn!(volume = %volume.name, %scope, "no offering configured for tier, left unchanged");
            return Ok(());
        };
        if ctx.dry_run {
            tracing::info!(dry_run = true, volume = %volume.name, offering, "would change offering");
            return Ok(());
        }

        tracing::info!(volume = %volume.name, offering, "changing offering for new tier");
        match (volume.is_root(), workload_id) {
            (true, Some(workload_id)) => {
                datastore
                    .update_service_offering(workload_id, offering)
                    .await
            }
            (true, None) => {
                tracing::warn!(volume = %volume.name, "detached root volume, offering left unchanged");
                Ok(())
            }
            (false, _) => {
                datastore
                    .update_storage_tier_offering(&volume.id, offering)
                    .await
            }
        }
    }

    async fn move_compute(
        &self,
        ctx: &OperationContext,
        workload: &Workload,
        source: &Host,
        destination: &Host,
        compute: &ComputeMove,
    ) -> OpsResult<bool> {
        if ctx.dry_run {
            tracing::info!(
                dry_run = true,
                destination = %destination.name,
                combined = matches!(compute, ComputeMove::WithVolumes(_)),
                "would migrate workload"
            );
            return Ok(true);
        }

        tracing::info!(destination = %destination.name, "migrating workload");
        let outcome: CommandOutcome = match compute {
            ComputeMove::Plain => {
                self.control_plane
                    .migrate_workload(workload, &destination.id)
                    .await?
            }
            ComputeMove::WithVolumes(moves) => {
                let pairs = moves
                    .iter()
                    .map(|m| (m.volume.id.clone(), m.to.id.clone()))
                    .collect();
                self.control_plane
                    .migrate_workload_with_volumes(workload, &destination.id, pairs)
                    .await?
            }
        };
        let probe = ProgressProbe {
            host: source.address(),
            domain: workload.domain_name().to_string(),
            disk: None,
        };
        let migrated = self.tracker.wait_with_progress(&outcome, &probe).await?;
        if !migrated {
            tracing::error!(destination = %destination.name, "compute migration failed");
        }
        Ok(migrated)
    }
}

fn probe_for(
    host: &Host,
    workload: &Workload,
    disks: &HashMap<String, String>,
    volume: &Volume,
) -> Option<ProgressProbe> {
    disks.get(&volume.id).map(|disk| ProgressProbe {
        host: host.address(),
        domain: workload.domain_name().to_string(),
        disk: Some(disk.clone()),
    })
}

fn relocation(volume: &Volume, from: Option<&StoragePool>, to: &StoragePool) -> Relocation {
    Relocation {
        volume: volume.name.clone(),
        from_pool: from
            .map(|p| p.name.clone())
            .unwrap_or_else(|| volume.pool_name.clone()),
        to_pool: to.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::model::async_job::{JobId, JobStatus};
    use crate::core::domain::model::cluster::Cluster;
    use crate::core::domain::model::volume::{Snapshot, VolumeState, VolumeType};
    use crate::core::infrastructure::config::Timing;
    use crate::core::infrastructure::control_plane::MockControlPlane;
    use crate::core::infrastructure::datastore::MockDatastore;
    use crate::core::infrastructure::hypervisor::{DiskInfo, MockHypervisor};
    use crate::tests::fixtures::{self, GIB};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Mutex;

    /// A small cloud: source cluster c1, destination cluster c2, one zone.
    struct Cloud {
        source_cluster: Cluster,
        dest_cluster: Cluster,
        source_host: Host,
        dest_host: Host,
        workload: Workload,
        pools: Vec<StoragePool>,
        volumes: Vec<Volume>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Cloud {
        fn new() -> Self {
            let source_cluster = fixtures::cluster("c1");
            let dest_cluster = fixtures::cluster("c2");
            let source_host = fixtures::host("kvm01", &source_cluster);
            let dest_host = fixtures::host("kvm10", &dest_cluster);
            let workload = fixtures::workload("web01", &source_host);
            let pools = vec![
                fixtures::pool("c1-pool", PoolScope::Cluster, Some(&source_cluster)),
                fixtures::pool("c2-pool", PoolScope::Cluster, Some(&dest_cluster)),
                fixtures::pool("zone-pool", PoolScope::Zone, None),
                fixtures::pool("local", PoolScope::Host, None),
            ];
            Self {
                source_cluster,
                dest_cluster,
                source_host,
                dest_host,
                workload,
                pools,
                volumes: Vec::new(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn pool(&self, name: &str) -> StoragePool {
            self.pools.iter().find(|p| p.name == name).unwrap().clone()
        }

        fn with_volume(mut self, name: &str, volume_type: VolumeType, pool: &str) -> Self {
            let pool = self.pool(pool);
            let volume = fixtures::attached(fixtures::volume(name, volume_type, &pool), &self.workload);
            self.volumes.push(volume);
            self
        }

        fn without_zone_pool(mut self) -> Self {
            self.pools.retain(|p| p.scope != PoolScope::Zone);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// A control plane whose volume moves take effect immediately.
        fn control_plane(&self) -> MockControlPlane {
            let mut cp = MockControlPlane::new();
            let live: Arc<Mutex<HashMap<String, Volume>>> = Arc::new(Mutex::new(
                self.volumes.iter().map(|v| (v.id.clone(), v.clone())).collect(),
            ));

            let workload = self.workload.clone();
            cp.expect_workload_by_name()
                .returning(move |_| Ok(workload.clone()));
            let workload = self.workload.clone();
            cp.expect_workload().returning(move |_| Ok(workload.clone()));
            let clusters = vec![self.source_cluster.clone(), self.dest_cluster.clone()];
            cp.expect_cluster_by_name().returning(move |name| {
                Ok(clusters.iter().find(|c| c.name == name).unwrap().clone())
            });
            let hosts = vec![self.source_host.clone(), self.dest_host.clone()];
            let by_id = hosts.clone();
            cp.expect_host()
                .returning(move |id| Ok(by_id.iter().find(|h| h.id == id).unwrap().clone()));
            cp.expect_cluster_hosts().returning(move |cluster_id| {
                Ok(hosts
                    .iter()
                    .filter(|h| h.cluster_id == cluster_id)
                    .cloned()
                    .collect())
            });
            cp.expect_workload_snapshots().returning(|_| Ok(Vec::new()));
            cp.expect_volume_snapshots().returning(|_| Ok(Vec::new()));
            let volumes = self.volumes.clone();
            cp.expect_volumes().returning(move |_| Ok(volumes.clone()));

            let pools = self.pools.clone();
            cp.expect_storage_pool()
                .returning(move |id| Ok(pools.iter().find(|p| p.id == id).unwrap().clone()));
            let pools = self.pools.clone();
            cp.expect_storage_pool_by_name().returning(move |name| {
                Ok(pools.iter().find(|p| p.name == name).unwrap().clone())
            });
            let pools = self.pools.clone();
            cp.expect_zone_storage_pools().returning(move |_| {
                Ok(pools
                    .iter()
                    .filter(|p| p.scope == PoolScope::Zone)
                    .cloned()
                    .collect())
            });
            let pools = self.pools.clone();
            cp.expect_cluster_storage_pools().returning(move |cluster_id| {
                Ok(pools
                    .iter()
                    .filter(|p| p.cluster_id.as_deref() == Some(cluster_id))
                    .cloned()
                    .collect())
            });

            let state = live.clone();
            cp.expect_volume()
                .returning(move |id| Ok(state.lock().unwrap().get(id).unwrap().clone()));
            let state = live.clone();
            let calls = self.calls.clone();
            cp.expect_migrate_volume()
                .returning(move |volume_id, pool_id, _| {
                    calls
                        .lock()
                        .unwrap()
                        .push(format!("volume {} -> {}", volume_id, pool_id));
                    if let Some(v) = state.lock().unwrap().get_mut(volume_id) {
                        v.pool_id = pool_id.to_string();
                    }
                    Ok(CommandOutcome::Submitted(JobId::new("volume-job")))
                });
            let calls = self.calls.clone();
            cp.expect_migrate_workload().returning(move |_, host_id| {
                calls.lock().unwrap().push(format!("compute -> {}", host_id));
                Ok(CommandOutcome::Submitted(JobId::new("compute-job")))
            });
            let calls = self.calls.clone();
            cp.expect_migrate_workload_with_volumes()
                .returning(move |_, host_id, pairs| {
                    let volumes: Vec<String> =
                        pairs.iter().map(|(v, p)| format!("{}={}", v, p)).collect();
                    calls.lock().unwrap().push(format!(
                        "compute+volumes -> {} [{}]",
                        host_id,
                        volumes.join(",")
                    ));
                    Ok(CommandOutcome::Submitted(JobId::new("combined-job")))
                });
            cp.expect_job_status()
                .returning(|_| Ok(JobStatus::Succeeded));
            cp
        }

        fn hypervisor(&self) -> MockHypervisor {
            let mut hypervisor = MockHypervisor::new();
            let disks: Vec<DiskInfo> = self
                .volumes
                .iter()
                .enumerate()
                .map(|(i, v)| DiskInfo {
                    target: format!("vd{}", (b'a' + i as u8) as char),
                    source: format!("/mnt/{}/{}", v.pool_id, v.path.clone().unwrap()),
                    capacity: v.size,
                })
                .collect();
            hypervisor
                .expect_disk_topology()
                .returning(move |_, _| Ok(disks.clone()));
            hypervisor
                .expect_block_job_status()
                .returning(|_, _, _| Ok(None));
            hypervisor
                .expect_migration_job_stats()
                .returning(|_, _| Ok(None));
            hypervisor
        }
    }

    fn orchestrator(
        control_plane: MockControlPlane,
        hypervisor: MockHypervisor,
    ) -> VolumeMigrationOrchestrator {
        let control_plane: Arc<dyn ControlPlane> = Arc::new(control_plane);
        let hypervisor: Arc<dyn Hypervisor> = Arc::new(hypervisor);
        let tracker = JobTracker::new(control_plane.clone(), Timing::immediate())
            .with_hypervisor(hypervisor.clone());
        let selector = TargetSelector::new(control_plane.clone(), Some(1024));
        VolumeMigrationOrchestrator::new(control_plane, hypervisor, tracker, selector)
    }

    fn request(zone_to_cluster: bool) -> MigrateWorkloadRequest {
        MigrateWorkloadRequest {
            workload: "web01".to_string(),
            cluster: "c2".to_string(),
            zone_to_cluster,
        }
    }

    #[tokio::test]
    async fn test_zone_root_without_data_disks_moves_compute_only() {
        let cloud = Cloud::new().with_volume("root", VolumeType::Root, "zone-pool");
        let report = orchestrator(cloud.control_plane(), cloud.hypervisor())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await
            .unwrap();

        assert!(report.succeeded);
        assert_eq!(report.destination.as_deref(), Some("kvm10"));
        assert!(report.relocations.is_empty());
        assert_eq!(cloud.calls(), vec!["compute -> id-kvm10"]);
    }

    #[tokio::test]
    async fn test_cluster_root_is_bridged_through_zone_pool() {
        let cloud = Cloud::new().with_volume("root", VolumeType::Root, "c1-pool");
        let report = orchestrator(cloud.control_plane(), cloud.hypervisor())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await
            .unwrap();

        assert!(report.succeeded);
        assert_eq!(
            cloud.calls(),
            vec![
                "volume id-root -> id-zone-pool",
                "compute -> id-kvm10",
                "volume id-root -> id-c2-pool",
            ]
        );
        assert_eq!(report.relocations.len(), 2);
        assert_eq!(report.relocations[0].from_pool, "c1-pool");
        assert_eq!(report.relocations[1].to_pool, "c2-pool");
    }

    #[tokio::test]
    async fn test_mixed_tiers_bridge_cluster_disks_only() {
        let cloud = Cloud::new()
            .with_volume("root", VolumeType::Root, "zone-pool")
            .with_volume("data-c", VolumeType::DataDisk, "c1-pool")
            .with_volume("data-z", VolumeType::DataDisk, "zone-pool");
        let report = orchestrator(cloud.control_plane(), cloud.hypervisor())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await
            .unwrap();

        assert!(report.succeeded);
        assert_eq!(
            cloud.calls(),
            vec![
                "volume id-data-c -> id-zone-pool",
                "compute -> id-kvm10",
                "volume id-data-c -> id-c2-pool",
            ]
        );
    }

    #[tokio::test]
    async fn test_zone_to_cluster_settles_zone_volumes_too() {
        let cloud = Cloud::new()
            .with_volume("root", VolumeType::Root, "zone-pool")
            .with_volume("data-z", VolumeType::DataDisk, "zone-pool");
        let report = orchestrator(cloud.control_plane(), cloud.hypervisor())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(true))
            .await
            .unwrap();

        assert!(report.succeeded);
        assert_eq!(
            cloud.calls(),
            vec![
                "compute -> id-kvm10",
                "volume id-root -> id-c2-pool",
                "volume id-data-z -> id-c2-pool",
            ]
        );
    }

    #[tokio::test]
    async fn test_without_zone_pool_compute_and_volumes_move_together() {
        let cloud = Cloud::new()
            .without_zone_pool()
            .with_volume("root", VolumeType::Root, "c1-pool")
            .with_volume("data-c", VolumeType::DataDisk, "c1-pool");
        let report = orchestrator(cloud.control_plane(), cloud.hypervisor())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await
            .unwrap();

        assert!(report.succeeded);
        assert_eq!(
            cloud.calls(),
            vec!["compute+volumes -> id-kvm10 [id-root=id-c2-pool,id-data-c=id-c2-pool]"]
        );
        assert_eq!(report.relocations.len(), 2);
    }

    #[tokio::test]
    async fn test_host_local_data_disk_fails_before_any_mutation() {
        let cloud = Cloud::new()
            .with_volume("root", VolumeType::Root, "zone-pool")
            .with_volume("scratch", VolumeType::DataDisk, "local");
        let result = orchestrator(cloud.control_plane(), cloud.hypervisor())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await;

        assert!(matches!(result, Err(OpsError::Precondition(_))));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_block_migration() {
        let cloud = Cloud::new().with_volume("root", VolumeType::Root, "zone-pool");
        let mut control_plane = cloud.control_plane();
        control_plane.checkpoint();
        let workload = cloud.workload.clone();
        control_plane
            .expect_workload_by_name()
            .returning(move |_| Ok(workload.clone()));
        control_plane
            .expect_cluster_by_name()
            .returning(|name| Ok(fixtures::cluster(name)));
        control_plane.expect_workload_snapshots().returning(|_| {
            Ok(vec![Snapshot {
                id: "snap-1".to_string(),
                name: "before-upgrade".to_string(),
            }])
        });
        control_plane.expect_migrate_workload().never();
        control_plane.expect_migrate_volume().never();

        let result = orchestrator(control_plane, MockHypervisor::new())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await;
        assert!(matches!(result, Err(OpsError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_failed_bridge_aborts_before_compute() {
        // The volume job completes but the volume never leaves its pool
        let cloud = Cloud::new().with_volume("root", VolumeType::Root, "c1-pool");
        let mut control_plane = MockControlPlane::new();
        let workload = cloud.workload.clone();
        control_plane
            .expect_workload_by_name()
            .returning(move |_| Ok(workload.clone()));
        let dest = cloud.dest_cluster.clone();
        control_plane
            .expect_cluster_by_name()
            .returning(move |_| Ok(dest.clone()));
        control_plane.expect_workload_snapshots().returning(|_| Ok(Vec::new()));
        control_plane.expect_volume_snapshots().returning(|_| Ok(Vec::new()));
        let volumes = cloud.volumes.clone();
        control_plane
            .expect_volumes()
            .returning(move |_| Ok(volumes.clone()));
        let pools = cloud.pools.clone();
        control_plane
            .expect_storage_pool()
            .returning(move |id| Ok(pools.iter().find(|p| p.id == id).unwrap().clone()));
        let source_host = cloud.source_host.clone();
        control_plane
            .expect_host()
            .returning(move |_| Ok(source_host.clone()));
        let dest_host = cloud.dest_host.clone();
        control_plane
            .expect_cluster_hosts()
            .returning(move |_| Ok(vec![dest_host.clone()]));
        let zone = cloud.pool("zone-pool");
        control_plane
            .expect_zone_storage_pools()
            .returning(move |_| Ok(vec![zone.clone()]));
        let c2 = cloud.pool("c2-pool");
        control_plane
            .expect_cluster_storage_pools()
            .returning(move |_| Ok(vec![c2.clone()]));
        let unmoved = cloud.volumes[0].clone();
        control_plane
            .expect_volume()
            .returning(move |_| Ok(unmoved.clone()));
        control_plane
            .expect_migrate_volume()
            .times(1)
            .returning(|_, _, _| Ok(CommandOutcome::Submitted(JobId::new("volume-job"))));
        control_plane.expect_migrate_workload().never();

        let report = orchestrator(control_plane, cloud.hypervisor())
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await
            .unwrap();
        assert!(!report.succeeded);
        assert!(report.relocations.is_empty());
        assert_eq!(report.destination, None);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_mutating() {
        let cloud = Cloud::new().with_volume("root", VolumeType::Root, "c1-pool");
        let mut hypervisor = MockHypervisor::new();
        hypervisor.expect_disk_topology().never();

        let report = orchestrator(cloud.control_plane(), hypervisor)
            .migrate_workload_to_cluster(&OperationContext::new(true), &request(false))
            .await
            .unwrap();

        assert!(report.succeeded);
        assert_eq!(report.relocations.len(), 2);
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sizes_are_reconciled_and_offerings_updated() {
        let cloud = Cloud::new().with_volume("root", VolumeType::Root, "c1-pool");
        let mut hypervisor = cloud.hypervisor();
        hypervisor.checkpoint();
        let root = cloud.volumes[0].clone();
        hypervisor.expect_disk_topology().times(1).returning(move |_, _| {
            Ok(vec![DiskInfo {
                target: "vda".to_string(),
                source: format!("/mnt/pool/{}", root.path.clone().unwrap()),
                capacity: 25 * GIB,
            }])
        });
        hypervisor
            .expect_block_job_status()
            .returning(|_, _, _| Ok(None));
        hypervisor
            .expect_migration_job_stats()
            .returning(|_, _| Ok(None));

        let mut datastore = MockDatastore::new();
        datastore
            .expect_get_volume_size()
            .returning(|_| Ok(20 * GIB));
        datastore
            .expect_update_volume_size()
            .withf(|id, size| id == "id-root" && *size == 25 * GIB)
            .times(1)
            .returning(|_, _| Ok(()));
        datastore
            .expect_update_service_offering()
            .withf(|workload, offering| workload == "id-web01" && offering == "zone-root")
            .times(1)
            .returning(|_, _| Ok(()));
        datastore
            .expect_update_service_offering()
            .withf(|workload, offering| workload == "id-web01" && offering == "cluster-root")
            .times(1)
            .returning(|_, _| Ok(()));

        let offerings = TierOfferings {
            zone_service: Some("zone-root".to_string()),
            cluster_service: Some("cluster-root".to_string()),
            ..TierOfferings::default()
        };
        let report = orchestrator(cloud.control_plane(), hypervisor)
            .with_datastore(Arc::new(datastore), offerings)
            .migrate_workload_to_cluster(&OperationContext::new(false), &request(false))
            .await
            .unwrap();
        assert!(report.succeeded);
    }

    #[tokio::test]
    async fn test_volume_already_on_target_pool_is_a_no_op() {
        let cloud = Cloud::new().with_volume("data", VolumeType::DataDisk, "zone-pool");
        let mut control_plane = cloud.control_plane();
        control_plane.checkpoint();
        let volume = cloud.volumes[0].clone();
        control_plane
            .expect_volume()
            .returning(move |_| Ok(volume.clone()));
        let zone = cloud.pool("zone-pool");
        control_plane
            .expect_storage_pool_by_name()
            .returning(move |_| Ok(zone.clone()));
        control_plane.expect_migrate_volume().never();

        let moved = orchestrator(control_plane, MockHypervisor::new())
            .migrate_volume(
                &OperationContext::new(false),
                &MigrateVolumeRequest {
                    volume_id: "id-data".to_string(),
                    pool: "zone-pool".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(moved);
    }

    #[tokio::test]
    async fn test_migrate_volume_moves_attached_volume_live() {
        let cloud = Cloud::new().with_volume("data", VolumeType::DataDisk, "c1-pool");
        let moved = orchestrator(cloud.control_plane(), cloud.hypervisor())
            .migrate_volume(
                &OperationContext::new(false),
                &MigrateVolumeRequest {
                    volume_id: "id-data".to_string(),
                    pool: "zone-pool".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(moved);
        assert_eq!(cloud.calls(), vec!["volume id-data -> id-zone-pool"]);
    }

    #[tokio::test]
    async fn test_migrate_volume_requires_ready_state() {
        let cloud = Cloud::new().with_volume("data", VolumeType::DataDisk, "c1-pool");
        let mut control_plane = cloud.control_plane();
        control_plane.checkpoint();
        let volume = Volume {
            state: VolumeState::Migrating,
            ..cloud.volumes[0].clone()
        };
        control_plane
            .expect_volume()
            .returning(move |_| Ok(volume.clone()));
        let zone = cloud.pool("zone-pool");
        control_plane
            .expect_storage_pool_by_name()
            .returning(move |_| Ok(zone.clone()));
        control_plane.expect_migrate_volume().never();

        let result = orchestrator(control_plane, MockHypervisor::new())
            .migrate_volume(
                &OperationContext::new(false),
                &MigrateVolumeRequest {
                    volume_id: "id-data".to_string(),
                    pool: "zone-pool".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(OpsError::Precondition(_))));
    }

    #[test]
    fn test_plan_picks_destination_pools_matching_tags() {
        let cloud = Cloud::new().with_volume("root", VolumeType::Root, "c1-pool");
        let mut root = cloud.volumes[0].clone();
        root.tags = vec!["ssd".to_string()];
        let layout = Layout::classify(vec![Placed {
            volume: root,
            pool: cloud.pool("c1-pool"),
        }])
        .unwrap();

        let mut ssd = fixtures::pool("c2-ssd", PoolScope::Cluster, Some(&cloud.dest_cluster));
        ssd.tags = vec!["ssd".to_string()];
        let mut zone_ssd = fixtures::pool("zone-ssd", PoolScope::Zone, None);
        zone_ssd.tags = vec!["ssd".to_string()];
        let cluster_pools = vec![cloud.pool("c2-pool"), ssd];
        let zone_pools = vec![cloud.pool("zone-pool"), zone_ssd];

        let mut rng = StdRng::seed_from_u64(7);
        let plan = plan_moves(&layout, false, &zone_pools, &cluster_pools, false, &mut rng).unwrap();
        assert_eq!(plan.bridge[0].to.name, "zone-ssd");
        assert_eq!(plan.compute, ComputeMove::Plain);
        assert_eq!(plan.settle[0].to.name, "c2-ssd");
    }

    #[test]
    fn test_plan_within_same_cluster_moves_nothing() {
        let cloud = Cloud::new();
        let root = fixtures::volume("root", VolumeType::Root, &cloud.pool("c1-pool"));
        let layout = Layout::classify(vec![Placed {
            volume: root,
            pool: cloud.pool("c1-pool"),
        }])
        .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let plan = plan_moves(&layout, true, &[], &[], false, &mut rng).unwrap();
        assert!(plan.bridge.is_empty());
        assert!(plan.settle.is_empty());
        assert_eq!(plan.compute, ComputeMove::Plain);
    }

    #[test]
    fn test_plan_fails_without_destination_pool() {
        let cloud = Cloud::new();
        let root = fixtures::volume("root", VolumeType::Root, &cloud.pool("c1-pool"));
        let layout = Layout::classify(vec![Placed {
            volume: root,
            pool: cloud.pool("c1-pool"),
        }])
        .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let result = plan_moves(&layout, false, &[cloud.pool("zone-pool")], &[], false, &mut rng);
        assert!(matches!(result, Err(OpsError::Precondition(_))));
    }
}
