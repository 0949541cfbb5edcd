//! Per-operation context threaded explicitly through every orchestration call.

use tracing::Span;

/// Identifies what an operation is acting on and whether it may mutate anything.
///
/// Each orchestration layer derives a narrower context (`for_host`, `for_workload`)
/// from the one it received; nothing is stored globally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    /// When set, mutating steps are logged and reported as successful without
    /// contacting the control plane, the hypervisor or the remote shell.
    pub dry_run: bool,
    pub cluster: Option<String>,
    pub host: Option<String>,
    pub workload: Option<String>,
}

impl OperationContext {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_cluster(&self, cluster: impl Into<String>) -> Self {
        Self {
            cluster: Some(cluster.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn for_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn for_workload(&self, workload: impl Into<String>) -> Self {
        Self {
            workload: Some(workload.into()),
            ..self.clone()
        }
    }

    /// A tracing span carrying this context as structured fields.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "op",
            dry_run = self.dry_run,
            cluster = self.cluster.as_deref().unwrap_or("-"),
            host = self.host.as_deref().unwrap_or("-"),
            workload = self.workload.as_deref().unwrap_or("-"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_narrowing_keeps_parent_fields() {
        let ctx = OperationContext::new(true)
            .for_cluster("cluster-a")
            .for_host("kvm01")
            .for_workload("web01");

        assert!(ctx.dry_run);
        assert_eq!(ctx.cluster.as_deref(), Some("cluster-a"));
        assert_eq!(ctx.host.as_deref(), Some("kvm01"));
        assert_eq!(ctx.workload.as_deref(), Some("web01"));
    }
}
