//! Picks a destination host for a workload.
//!
//! The policy is first-fit over candidates ordered by allocated memory: candidates are
//! sorted ascending (stable, so ties keep their input order), run through a chain of
//! rejection rules, and the first survivor wins.

use crate::core::{
    domain::{
        error::{OpsError, OpsResult, ResourceKind},
        model::{
            host::{Host, HostCandidate},
            workload::Workload,
        },
    },
    infrastructure::control_plane::ControlPlane,
};
use std::fmt;
use std::sync::Arc;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Why a candidate was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RequiresStorageMotion,
    Unsuitable,
    OutsideCluster,
    DedicationMismatch,
    DedicatedToOtherGroup,
    NotAvailable,
    CurrentHost,
    InsufficientMemory,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::RequiresStorageMotion => "requires storage motion",
            Rejection::Unsuitable => "flagged unsuitable for migration",
            Rejection::OutsideCluster => "not in the required cluster",
            Rejection::DedicationMismatch => "not dedicated to the workload's group",
            Rejection::DedicatedToOtherGroup => "dedicated to another group",
            Rejection::NotAvailable => "disabled or not up",
            Rejection::CurrentHost => "already hosts the workload",
            Rejection::InsufficientMemory => "not enough free memory",
        };
        f.write_str(reason)
    }
}

/// Constraints a destination has to meet.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    /// Cluster the destination must belong to.
    pub cluster_id: &'a str,
    /// The caller forced this target; storage motion is acceptable.
    pub pinned: bool,
    /// Memory the workload needs, in bytes. Only checked when set.
    pub required_memory: Option<u64>,
}

/// Checks one candidate against the placement rules.
pub fn check_candidate(
    workload: &Workload,
    candidate: &HostCandidate,
    placement: &Placement<'_>,
) -> Result<(), Rejection> {
    let host = &candidate.host;
    if candidate.requires_storage_motion && !placement.pinned {
        return Err(Rejection::RequiresStorageMotion);
    }
    if !candidate.suitable {
        return Err(Rejection::Unsuitable);
    }
    if host.cluster_id != placement.cluster_id {
        return Err(Rejection::OutsideCluster);
    }
    match (workload.dedication_group(), host.dedication_group.as_deref()) {
        (Some(required), actual) if actual != Some(required) => {
            return Err(Rejection::DedicationMismatch);
        }
        (None, Some(_)) => return Err(Rejection::DedicatedToOtherGroup),
        _ => {}
    }
    if let Some(required) = placement.required_memory {
        if host.free_memory() < required {
            return Err(Rejection::InsufficientMemory);
        }
    }
    Ok(())
}

/// Orders candidates and returns the first one that passes [`check_candidate`].
pub fn select(
    workload: &Workload,
    mut candidates: Vec<HostCandidate>,
    placement: &Placement<'_>,
) -> Option<Host> {
    candidates.sort_by_key(|c| c.host.memory_allocated);
    candidates.into_iter().find_map(|candidate| {
        match check_candidate(workload, &candidate, placement) {
            Ok(()) => Some(candidate.host),
            Err(reason) => {
                tracing::debug!(
                    workload = %workload.name,
                    host = %candidate.host.name,
                    %reason,
                    "rejected migration target"
                );
                None
            }
        }
    })
}

/// Selection that also knows how to size a workload.
#[derive(Clone)]
pub struct TargetSelector {
    control_plane: Arc<dyn ControlPlane>,
    fallback_memory_mb: Option<u64>,
}

impl TargetSelector {
    pub fn new(control_plane: Arc<dyn ControlPlane>, fallback_memory_mb: Option<u64>) -> Self {
        Self {
            control_plane,
            fallback_memory_mb,
        }
    }

    /// Selection among candidates produced by the control plane (or a pinned target).
    ///
    /// No capacity check: the control plane already applied one to its candidates.
    pub fn select(
        &self,
        workload: &Workload,
        candidates: Vec<HostCandidate>,
        cluster_id: &str,
        pinned: bool,
    ) -> Option<Host> {
        select(
            workload,
            candidates,
            &Placement {
                cluster_id,
                pinned,
                required_memory: None,
            },
        )
    }

    /// Cluster-wide selection over plain hosts, checking free memory.
    ///
    /// Hosts that are disabled, not up or already running the workload are skipped.
    pub async fn select_with_capacity(
        &self,
        workload: &Workload,
        hosts: Vec<Host>,
        cluster_id: &str,
    ) -> OpsResult<Option<Host>> {
        let required_mb = self.required_memory_mb(workload).await?;
        let candidates = hosts
            .into_iter()
            .filter(|host| {
                let reason = if host.is_disabled() || !host.is_up() {
                    Some(Rejection::NotAvailable)
                } else if workload.host_id.as_deref() == Some(host.id.as_str()) {
                    Some(Rejection::CurrentHost)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    tracing::debug!(host = %host.name, %reason, "rejected migration target");
                }
                reason.is_none()
            })
            .map(|host| HostCandidate {
                host,
                suitable: true,
                requires_storage_motion: false,
            })
            .collect();

        Ok(select(
            workload,
            candidates,
            &Placement {
                cluster_id,
                pinned: false,
                required_memory: Some(required_mb.saturating_mul(BYTES_PER_MB)),
            },
        ))
    }

    /// Memory the workload needs in MB: its own field, else its service offering's.
    async fn required_memory_mb(&self, workload: &Workload) -> OpsResult<u64> {
        if let Some(memory) = workload.memory {
            return Ok(memory);
        }
        let lookup = match &workload.service_offering_id {
            Some(offering) => self.control_plane.service_offering_memory(offering).await,
            None => Err(OpsError::not_found(
                ResourceKind::ServiceOffering,
                format!("offering of {}", workload.name),
            )),
        };
        match (lookup, self.fallback_memory_mb) {
            (Ok(memory), _) => Ok(memory),
            (Err(e), Some(fallback)) => {
                tracing::warn!(
                    workload = %workload.name,
                    error = %e,
                    fallback_mb = fallback,
                    "could not read service offering, assuming fallback memory"
                );
                Ok(fallback)
            }
            (Err(e), None) => Err(e),
        }
    }
}
