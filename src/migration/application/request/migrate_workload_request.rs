/// Move a running workload, compute and storage, into another cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateWorkloadRequest {
    /// Name of the workload.
    pub workload: String,
    /// Name of the destination cluster.
    pub cluster: String,
    /// Also move zone-scoped volumes down to cluster-scoped pools of the destination.
    pub zone_to_cluster: bool,
}
