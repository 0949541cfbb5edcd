use serde::Serialize;

/// One volume move performed (or planned, in dry-run) during a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relocation {
    pub volume: String,
    pub from_pool: String,
    pub to_pool: String,
}

/// Outcome of moving a workload to another cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadMigrationReport {
    pub workload: String,
    /// Name of the host the workload now runs on.
    pub destination: Option<String>,
    pub relocations: Vec<Relocation>,
    pub succeeded: bool,
}
