//! The control plane as seen by the orchestration services.
//!
//! [`ControlPlane`] is the seam the services depend on; [`HttpControlPlane`] implements it
//! on top of [`ApiClient`]. Lookups that find nothing return `OpsError::NotFound`.

use crate::core::{
    domain::{
        error::{OpsError, OpsResult, ResourceKind},
        model::{
            async_job::{CommandOutcome, JobId, JobStatus},
            cluster::Cluster,
            host::{Host, HostCandidate},
            storage_pool::{PoolScope, StoragePool},
            volume::{Snapshot, Volume},
            workload::{Workload, WorkloadKind, WorkloadListing},
        },
    },
    infrastructure::api_client::ApiClient,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Reads and mutations the orchestration layer needs from the control plane.
///
/// Mutations return a [`CommandOutcome`]; asynchronous ones must be polled with
/// [`ControlPlane::job_status`] (see the job tracker).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn host(&self, id: &str) -> OpsResult<Host>;
    async fn host_by_name(&self, name: &str) -> OpsResult<Host>;
    async fn cluster_by_name(&self, name: &str) -> OpsResult<Cluster>;
    async fn cluster_hosts(&self, cluster_id: &str) -> OpsResult<Vec<Host>>;

    /// Zone-wide pools of a zone.
    async fn zone_storage_pools(&self, zone_id: &str) -> OpsResult<Vec<StoragePool>>;
    /// Cluster-scoped pools of a cluster.
    async fn cluster_storage_pools(&self, cluster_id: &str) -> OpsResult<Vec<StoragePool>>;
    async fn storage_pool(&self, id: &str) -> OpsResult<StoragePool>;
    async fn storage_pool_by_name(&self, name: &str) -> OpsResult<StoragePool>;

    /// Workloads of one listing family currently placed on a host.
    async fn workloads_on_host(
        &self,
        host_id: &str,
        listing: WorkloadListing,
    ) -> OpsResult<Vec<Workload>>;
    async fn workload_by_name(&self, name: &str) -> OpsResult<Workload>;
    async fn workload(&self, id: &str) -> OpsResult<Workload>;

    /// Volumes attached to a workload, in device order.
    async fn volumes(&self, workload_id: &str) -> OpsResult<Vec<Volume>>;
    async fn volume(&self, id: &str) -> OpsResult<Volume>;
    async fn workload_snapshots(&self, workload_id: &str) -> OpsResult<Vec<Snapshot>>;
    async fn volume_snapshots(&self, volume_id: &str) -> OpsResult<Vec<Snapshot>>;

    /// Memory of a service offering in MB.
    async fn service_offering_memory(&self, offering_id: &str) -> OpsResult<u64>;

    /// Hosts the control plane considers for migrating `workload`.
    async fn migration_candidates(&self, workload: &Workload) -> OpsResult<Vec<HostCandidate>>;

    async fn disable_host(&self, host_id: &str) -> OpsResult<()>;
    async fn enable_host(&self, host_id: &str) -> OpsResult<()>;
    async fn update_host_tags(&self, host_id: &str, tags: &str) -> OpsResult<()>;

    async fn start_workload(&self, workload: &Workload) -> OpsResult<CommandOutcome>;
    async fn stop_workload(&self, workload: &Workload) -> OpsResult<CommandOutcome>;
    async fn migrate_workload(
        &self,
        workload: &Workload,
        host_id: &str,
    ) -> OpsResult<CommandOutcome>;
    /// Migrates compute together with the given `(volume id, pool id)` pairs.
    async fn migrate_workload_with_volumes(
        &self,
        workload: &Workload,
        host_id: &str,
        volume_pools: Vec<(String, String)>,
    ) -> OpsResult<CommandOutcome>;
    async fn migrate_volume(
        &self,
        volume_id: &str,
        pool_id: &str,
        live: bool,
    ) -> OpsResult<CommandOutcome>;

    async fn job_status(&self, job_id: &JobId) -> OpsResult<JobStatus>;
}

#[derive(Deserialize)]
struct HostList {
    #[serde(default)]
    host: Vec<Host>,
}

#[derive(Deserialize)]
struct CandidateList {
    #[serde(default)]
    host: Vec<HostCandidate>,
}

#[derive(Deserialize)]
struct DedicatedHostList {
    #[serde(rename = "dedicatedhost", default)]
    dedicated_hosts: Vec<DedicatedHost>,
}

#[derive(Deserialize)]
struct DedicatedHost {
    #[serde(rename = "hostid")]
    host_id: String,
    #[serde(rename = "affinitygroupid")]
    affinity_group_id: String,
}

#[derive(Deserialize)]
struct ClusterList {
    #[serde(default)]
    cluster: Vec<Cluster>,
}

#[derive(Deserialize)]
struct StoragePoolList {
    #[serde(rename = "storagepool", default)]
    pools: Vec<StoragePool>,
}

#[derive(Deserialize)]
struct VirtualMachineList {
    #[serde(rename = "virtualmachine", default)]
    workloads: Vec<Workload>,
}

#[derive(Deserialize)]
struct RouterList {
    #[serde(rename = "router", default)]
    workloads: Vec<Workload>,
}

#[derive(Deserialize)]
struct SystemVmList {
    #[serde(rename = "systemvm", default)]
    workloads: Vec<Workload>,
}

#[derive(Deserialize)]
struct VolumeList {
    #[serde(rename = "volume", default)]
    volumes: Vec<Volume>,
}

#[derive(Deserialize)]
struct VmSnapshotList {
    #[serde(rename = "vmSnapshot", default)]
    snapshots: Vec<Snapshot>,
}

#[derive(Deserialize)]
struct VolumeSnapshotList {
    #[serde(rename = "snapshot", default)]
    snapshots: Vec<Snapshot>,
}

#[derive(Deserialize)]
struct ServiceOfferingList {
    #[serde(rename = "serviceoffering", default)]
    offerings: Vec<ServiceOffering>,
}

#[derive(Deserialize)]
struct ServiceOffering {
    #[serde(default)]
    memory: u64,
}

#[derive(Deserialize)]
struct JobHandle {
    #[serde(rename = "jobid")]
    job_id: Option<String>,
}

#[derive(Deserialize)]
struct JobResult {
    #[serde(rename = "jobstatus")]
    status: u8,
    #[serde(rename = "jobresult", default)]
    result: Option<Value>,
}

/// [`ControlPlane`] over the JSON API.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Arc<ApiClient>,
}

impl HttpControlPlane {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    async fn list_hosts(&self, params: &[(&str, String)]) -> OpsResult<Vec<Host>> {
        let mut params = params.to_vec();
        params.push(("type", "Routing".to_string()));
        let list: HostList = self.client.call("listHosts", &params).await?;
        self.with_dedication(list.host).await
    }

    /// Fills in `dedication_group`, which host listings do not carry.
    async fn with_dedication(&self, mut hosts: Vec<Host>) -> OpsResult<Vec<Host>> {
        if hosts.is_empty() {
            return Ok(hosts);
        }
        let list: DedicatedHostList = self.client.call("listDedicatedHosts", &[]).await?;
        let groups: HashMap<String, String> = list
            .dedicated_hosts
            .into_iter()
            .map(|d| (d.host_id, d.affinity_group_id))
            .collect();
        for host in &mut hosts {
            if host.dedication_group.is_none() {
                host.dedication_group = groups.get(&host.id).cloned();
            }
        }
        Ok(hosts)
    }

    async fn list_pools(&self, params: &[(&str, String)]) -> OpsResult<Vec<StoragePool>> {
        let list: StoragePoolList = self.client.call("listStoragePools", params).await?;
        Ok(list.pools)
    }

    async fn list_virtual_machines(&self, params: &[(&str, String)]) -> OpsResult<Vec<Workload>> {
        let list: VirtualMachineList = self.client.call("listVirtualMachines", params).await?;
        Ok(list.workloads)
    }

    async fn list_volumes(&self, params: &[(&str, String)]) -> OpsResult<Vec<Volume>> {
        let mut params = params.to_vec();
        params.push(("listall", "true".to_string()));
        let list: VolumeList = self.client.call("listVolumes", &params).await?;
        Ok(list.volumes)
    }

    async fn submit(&self, command: &str, params: &[(&str, String)]) -> OpsResult<CommandOutcome> {
        let handle: JobHandle = self.client.call(command, params).await?;
        Ok(match handle.job_id {
            Some(id) => CommandOutcome::Submitted(JobId::new(id)),
            None => CommandOutcome::Completed,
        })
    }

    async fn update_host(&self, host_id: &str, field: &str, value: &str) -> OpsResult<()> {
        let _: Value = self
            .client
            .call(
                "updateHost",
                &[("id", host_id.to_string()), (field, value.to_string())],
            )
            .await?;
        Ok(())
    }
}

/// The lookup commands match names loosely; keep exact matches only.
fn exact<T>(items: Vec<T>, name: &str, item_name: impl Fn(&T) -> &str) -> Option<T> {
    items.into_iter().find(|item| item_name(item) == name)
}

fn with_kind(mut workloads: Vec<Workload>, kind: WorkloadKind) -> Vec<Workload> {
    for workload in &mut workloads {
        workload.kind = kind;
    }
    workloads
}

fn job_error_text(result: Option<Value>) -> Option<String> {
    result?
        .get("errortext")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn host(&self, id: &str) -> OpsResult<Host> {
        self.list_hosts(&[("id", id.to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OpsError::not_found(ResourceKind::Host, id))
    }

    async fn host_by_name(&self, name: &str) -> OpsResult<Host> {
        let hosts = self.list_hosts(&[("name", name.to_string())]).await?;
        exact(hosts, name, |h| h.name.as_str())
            .ok_or_else(|| OpsError::not_found(ResourceKind::Host, name))
    }

    async fn cluster_by_name(&self, name: &str) -> OpsResult<Cluster> {
        let list: ClusterList = self
            .client
            .call("listClusters", &[("name", name.to_string())])
            .await?;
        exact(list.cluster, name, |c| c.name.as_str())
            .ok_or_else(|| OpsError::not_found(ResourceKind::Cluster, name))
    }

    async fn cluster_hosts(&self, cluster_id: &str) -> OpsResult<Vec<Host>> {
        self.list_hosts(&[("clusterid", cluster_id.to_string())])
            .await
    }

    async fn zone_storage_pools(&self, zone_id: &str) -> OpsResult<Vec<StoragePool>> {
        let pools = self
            .list_pools(&[
                ("zoneid", zone_id.to_string()),
                ("scope", "ZONE".to_string()),
            ])
            .await?;
        Ok(pools
            .into_iter()
            .filter(|p| p.scope == PoolScope::Zone)
            .collect())
    }

    async fn cluster_storage_pools(&self, cluster_id: &str) -> OpsResult<Vec<StoragePool>> {
        let pools = self
            .list_pools(&[("clusterid", cluster_id.to_string())])
            .await?;
        Ok(pools
            .into_iter()
            .filter(|p| p.scope == PoolScope::Cluster)
            .collect())
    }

    async fn storage_pool(&self, id: &str) -> OpsResult<StoragePool> {
        self.list_pools(&[("id", id.to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OpsError::not_found(ResourceKind::StoragePool, id))
    }

    async fn storage_pool_by_name(&self, name: &str) -> OpsResult<StoragePool> {
        let pools = self.list_pools(&[("name", name.to_string())]).await?;
        exact(pools, name, |p| p.name.as_str())
            .ok_or_else(|| OpsError::not_found(ResourceKind::StoragePool, name))
    }

    async fn workloads_on_host(
        &self,
        host_id: &str,
        listing: WorkloadListing,
    ) -> OpsResult<Vec<Workload>> {
        let mut params = vec![("hostid", host_id.to_string())];
        if listing.is_project_scoped() {
            params.push(("projectid", "-1".to_string()));
        }
        let workloads = match listing.kind() {
            WorkloadKind::VirtualMachine => {
                params.push(("listall", "true".to_string()));
                self.list_virtual_machines(&params).await?
            }
            WorkloadKind::Router => {
                params.push(("listall", "true".to_string()));
                let list: RouterList = self.client.call("listRouters", &params).await?;
                list.workloads
            }
            WorkloadKind::SystemVm => {
                let list: SystemVmList = self.client.call("listSystemVms", &params).await?;
                list.workloads
            }
        };
        Ok(with_kind(workloads, listing.kind()))
    }

    async fn workload_by_name(&self, name: &str) -> OpsResult<Workload> {
        let mut params = vec![
            ("name", name.to_string()),
            ("listall", "true".to_string()),
        ];
        let workloads = self.list_virtual_machines(&params).await?;
        if let Some(found) = exact(workloads, name, |w| w.name.as_str()) {
            return Ok(found);
        }
        params.push(("projectid", "-1".to_string()));
        exact(self.list_virtual_machines(&params).await?, name, |w| w.name.as_str())
            .ok_or_else(|| OpsError::not_found(ResourceKind::Workload, name))
    }

    async fn workload(&self, id: &str) -> OpsResult<Workload> {
        self.list_virtual_machines(&[("id", id.to_string()), ("listall", "true".to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OpsError::not_found(ResourceKind::Workload, id))
    }

    async fn volumes(&self, workload_id: &str) -> OpsResult<Vec<Volume>> {
        let mut volumes = self
            .list_volumes(&[("virtualmachineid", workload_id.to_string())])
            .await?;
        volumes.sort_by_key(|v| v.device_id.unwrap_or(u32::MAX));
        Ok(volumes)
    }

    async fn volume(&self, id: &str) -> OpsResult<Volume> {
        self.list_volumes(&[("id", id.to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OpsError::not_found(ResourceKind::Volume, id))
    }

    async fn workload_snapshots(&self, workload_id: &str) -> OpsResult<Vec<Snapshot>> {
        let list: VmSnapshotList = self
            .client
            .call(
                "listVMSnapshot",
                &[
                    ("virtualmachineid", workload_id.to_string()),
                    ("listall", "true".to_string()),
                ],
            )
            .await?;
        Ok(list.snapshots)
    }

    async fn volume_snapshots(&self, volume_id: &str) -> OpsResult<Vec<Snapshot>> {
        let list: VolumeSnapshotList = self
            .client
            .call(
                "listSnapshots",
                &[
                    ("volumeid", volume_id.to_string()),
                    ("listall", "true".to_string()),
                ],
            )
            .await?;
        Ok(list.snapshots)
    }

    async fn service_offering_memory(&self, offering_id: &str) -> OpsResult<u64> {
        let list: ServiceOfferingList = self
            .client
            .call("listServiceOfferings", &[("id", offering_id.to_string())])
            .await?;
        list.offerings
            .into_iter()
            .next()
            .map(|o| o.memory)
            .ok_or_else(|| OpsError::not_found(ResourceKind::ServiceOffering, offering_id))
    }

    async fn migration_candidates(&self, workload: &Workload) -> OpsResult<Vec<HostCandidate>> {
        let list: CandidateList = self
            .client
            .call(
                "findHostsForMigration",
                &[("virtualmachineid", workload.id.clone())],
            )
            .await?;
        let (hosts, flags): (Vec<Host>, Vec<(bool, bool)>) = list
            .host
            .into_iter()
            .map(|c| (c.host, (c.suitable, c.requires_storage_motion)))
            .unzip();
        let hosts = self.with_dedication(hosts).await?;
        Ok(hosts
            .into_iter()
            .zip(flags)
            .map(|(host, (suitable, requires_storage_motion))| HostCandidate {
                host,
                suitable,
                requires_storage_motion,
            })
            .collect())
    }

    async fn disable_host(&self, host_id: &str) -> OpsResult<()> {
        self.update_host(host_id, "allocationstate", "Disable").await
    }

    async fn enable_host(&self, host_id: &str) -> OpsResult<()> {
        self.update_host(host_id, "allocationstate", "Enable").await
    }

    async fn update_host_tags(&self, host_id: &str, tags: &str) -> OpsResult<()> {
        self.update_host(host_id, "hosttags", tags).await
    }

    async fn start_workload(&self, workload: &Workload) -> OpsResult<CommandOutcome> {
        let command = match workload.kind {
            WorkloadKind::VirtualMachine => "startVirtualMachine",
            WorkloadKind::Router => "startRouter",
            WorkloadKind::SystemVm => "startSystemVm",
        };
        self.submit(command, &[("id", workload.id.clone())]).await
    }

    async fn stop_workload(&self, workload: &Workload) -> OpsResult<CommandOutcome> {
        let command = match workload.kind {
            WorkloadKind::VirtualMachine => "stopVirtualMachine",
            WorkloadKind::Router => "stopRouter",
            WorkloadKind::SystemVm => "stopSystemVm",
        };
        self.submit(command, &[("id", workload.id.clone())]).await
    }

    async fn migrate_workload(
        &self,
        workload: &Workload,
        host_id: &str,
    ) -> OpsResult<CommandOutcome> {
        // Routers and system VMs share one migration command
        let command = match workload.kind {
            WorkloadKind::VirtualMachine => "migrateVirtualMachine",
            WorkloadKind::Router | WorkloadKind::SystemVm => "migrateSystemVm",
        };
        self.submit(
            command,
            &[
                ("virtualmachineid", workload.id.clone()),
                ("hostid", host_id.to_string()),
            ],
        )
        .await
    }

    async fn migrate_workload_with_volumes(
        &self,
        workload: &Workload,
        host_id: &str,
        volume_pools: Vec<(String, String)>,
    ) -> OpsResult<CommandOutcome> {
        let keys: Vec<(String, String)> = (0..volume_pools.len())
            .map(|i| (format!("migrateto[{}].volume", i), format!("migrateto[{}].pool", i)))
            .collect();
        let mut params = vec![
            ("virtualmachineid", workload.id.clone()),
            ("hostid", host_id.to_string()),
        ];
        for ((volume_key, pool_key), (volume_id, pool_id)) in keys.iter().zip(volume_pools) {
            params.push((volume_key.as_str(), volume_id));
            params.push((pool_key.as_str(), pool_id));
        }
        self.submit("migrateVirtualMachineWithVolume", &params).await
    }

    async fn migrate_volume(
        &self,
        volume_id: &str,
        pool_id: &str,
        live: bool,
    ) -> OpsResult<CommandOutcome> {
        self.submit(
            "migrateVolume",
            &[
                ("volumeid", volume_id.to_string()),
                ("storageid", pool_id.to_string()),
                ("livemigrate", live.to_string()),
            ],
        )
        .await
    }

    async fn job_status(&self, job_id: &JobId) -> OpsResult<JobStatus> {
        let result: JobResult = self
            .client
            .call("queryAsyncJobResult", &[("jobid", job_id.as_str().to_string())])
            .await?;
        Ok(JobStatus::from_code(
            result.status,
            job_error_text(result.result),
        ))
    }
}
