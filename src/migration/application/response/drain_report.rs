use crate::core::domain::model::workload::Workload;
use serde::Serialize;

/// Outcome of one drain of one host.
///
/// When the drain completes normally `succeeded + failed == total`, where `total` is the
/// number of workloads found on the host when the drain started.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    pub host: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Workloads that were stopped and still have to be started once the host is back.
    pub pending_restart: Vec<Workload>,
}

impl DrainReport {
    pub fn new(host: impl Into<String>, total: usize) -> Self {
        Self {
            host: host.into(),
            total,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
