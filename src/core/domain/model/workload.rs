//! Domain model for workloads: user VMs, virtual routers and system VMs.

use crate::core::domain::value_object::serde_helpers;
use serde::{Deserialize, Serialize};
use std::fmt;

const EXPLICIT_DEDICATION: &str = "ExplicitDedication";

/// Which family of control-plane commands manages a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum WorkloadKind {
    #[default]
    VirtualMachine,
    Router,
    SystemVm,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::VirtualMachine => f.write_str("vm"),
            WorkloadKind::Router => f.write_str("router"),
            WorkloadKind::SystemVm => f.write_str("systemvm"),
        }
    }
}

/// The listings a host drain has to enumerate to find every workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadListing {
    VirtualMachines,
    ProjectVirtualMachines,
    Routers,
    ProjectRouters,
    SystemVms,
}

impl WorkloadListing {
    pub const ALL: [WorkloadListing; 5] = [
        WorkloadListing::VirtualMachines,
        WorkloadListing::ProjectVirtualMachines,
        WorkloadListing::Routers,
        WorkloadListing::ProjectRouters,
        WorkloadListing::SystemVms,
    ];

    #[must_use]
    pub fn kind(self) -> WorkloadKind {
        match self {
            WorkloadListing::VirtualMachines | WorkloadListing::ProjectVirtualMachines => {
                WorkloadKind::VirtualMachine
            }
            WorkloadListing::Routers | WorkloadListing::ProjectRouters => WorkloadKind::Router,
            WorkloadListing::SystemVms => WorkloadKind::SystemVm,
        }
    }

    #[must_use]
    pub fn is_project_scoped(self) -> bool {
        matches!(
            self,
            WorkloadListing::ProjectVirtualMachines | WorkloadListing::ProjectRouters
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum WorkloadState {
    Running,
    Stopped,
    Starting,
    Stopping,
    Migrating,
    Error,
    Destroyed,
    Expunging,
    #[serde(other)]
    Unknown,
}

impl WorkloadState {
    /// Stable states are the only ones a migration may start from.
    #[must_use]
    pub fn is_stable(self) -> bool {
        matches!(self, WorkloadState::Running | WorkloadState::Stopped)
    }
}

/// How a workload is treated when its host goes into maintenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum MaintenancePolicy {
    #[default]
    LiveMigrate,
    ShutdownAndStart,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AffinityGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub group_type: String,
}

impl AffinityGroup {
    #[must_use]
    pub fn is_explicit_dedication(&self) -> bool {
        self.group_type == EXPLICIT_DEDICATION
    }
}

/// A workload scheduled on a host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Workload {
    pub id: String,
    pub name: String,
    /// Hypervisor-side domain name (e.g. `i-2-345-VM`).
    #[serde(rename = "instancename", default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(skip)]
    pub kind: WorkloadKind,
    #[serde(rename = "hostid", default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(rename = "hostname", default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    pub state: WorkloadState,
    #[serde(rename = "maintenancepolicy", default)]
    pub maintenance_policy: MaintenancePolicy,
    /// Memory in MB, when the listing reports it.
    #[serde(default, deserialize_with = "serde_helpers::lenient_opt_u64")]
    pub memory: Option<u64>,
    #[serde(
        rename = "serviceofferingid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_offering_id: Option<String>,
    #[serde(rename = "affinitygroup", default)]
    pub affinity_groups: Vec<AffinityGroup>,
    #[serde(rename = "projectid", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl Workload {
    /// Returns the explicit dedication group this workload is bound to, if any.
    #[must_use]
    pub fn dedication_group(&self) -> Option<&str> {
        self.affinity_groups
            .iter()
            .find(|group| group.is_explicit_dedication())
            .map(|group| group.id.as_str())
    }

    /// Name used on the hypervisor, falling back to the control-plane name.
    #[must_use]
    pub fn domain_name(&self) -> &str {
        self.instance_name.as_deref().unwrap_or(&self.name)
    }
}
