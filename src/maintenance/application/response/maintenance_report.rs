use serde::Serialize;

/// Why a host of the cluster was left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotSelected,
    Ignored,
    AlreadyOnVersion,
    /// The host is the proxy and is cycled only through its own workloads moving back.
    Proxy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedHost {
    pub host: String,
    pub reason: SkipReason,
}

/// What maintenance did to one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostMaintenanceRecord {
    pub host: String,
    /// Number of drain attempts, including the final successful one.
    pub drain_attempts: u32,
    pub drained: usize,
    /// Workloads started again after the host came back.
    pub restarted: Vec<String>,
    /// Workloads whose start was rejected or failed after the host came back.
    pub restart_failed: Vec<String>,
    /// Workloads moved back from the proxy host onto this one.
    pub returned_from_proxy: usize,
}

/// Outcome of a rolling maintenance run over one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub cluster: String,
    pub processed: Vec<HostMaintenanceRecord>,
    pub skipped: Vec<SkippedHost>,
}
