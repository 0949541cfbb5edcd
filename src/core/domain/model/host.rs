//! Domain model for hypervisor hosts as returned by `listHosts`.

use crate::core::domain::value_object::{HostAddress, serde_helpers};
use serde::{Deserialize, Serialize};

/// Allocation state of a host: whether the scheduler may place workloads on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResourceState {
    Enabled,
    Disabled,
    /// Any maintenance or error state the control plane reports.
    #[serde(other)]
    Unknown,
}

/// Connection state of the host's management agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OperationalState {
    Up,
    Down,
    Disconnected,
    /// Transitional states such as `Connecting` or `Alert`.
    #[serde(other)]
    Unknown,
}

/// A hypervisor host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Host {
    /// Host identifier.
    pub id: String,
    /// Host name as registered with the control plane.
    pub name: String,
    /// The cluster this host belongs to.
    #[serde(rename = "clusterid")]
    pub cluster_id: String,
    #[serde(rename = "clustername", default)]
    pub cluster_name: String,
    #[serde(rename = "resourcestate")]
    pub resource_state: ResourceState,
    #[serde(rename = "state")]
    pub operational_state: OperationalState,
    /// Total memory in bytes.
    #[serde(
        rename = "memorytotal",
        default,
        deserialize_with = "serde_helpers::lenient_u64"
    )]
    pub memory_total: u64,
    /// Memory allocated to workloads in bytes.
    #[serde(
        rename = "memoryallocated",
        default,
        deserialize_with = "serde_helpers::lenient_u64"
    )]
    pub memory_allocated: u64,
    /// Management IP address.
    #[serde(rename = "ipaddress", default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Version of the hypervisor / host operating system.
    #[serde(
        rename = "hypervisorversion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hypervisor_version: Option<String>,
    #[serde(rename = "hosttags", default, skip_serializing_if = "Option::is_none")]
    pub host_tags: Option<String>,
    /// Affinity group this host is dedicated to, if any.
    #[serde(
        rename = "dedicationgroupid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dedication_group: Option<String>,
}

impl Host {
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.resource_state == ResourceState::Disabled
    }

    #[must_use]
    pub fn is_up(&self) -> bool {
        self.operational_state == OperationalState::Up
    }

    /// Unallocated memory in bytes.
    #[must_use]
    pub fn free_memory(&self) -> u64 {
        self.memory_total.saturating_sub(self.memory_allocated)
    }

    /// Address used for the remote execution channel: the IP if known and well formed,
    /// else the name.
    #[must_use]
    pub fn address(&self) -> HostAddress {
        self.ip_address
            .as_deref()
            .and_then(|ip| HostAddress::parse(ip).ok())
            .unwrap_or_else(|| HostAddress::new_unchecked(self.name.as_str()))
    }
}

/// A migration candidate as produced by `findHostsForMigration`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HostCandidate {
    #[serde(flatten)]
    pub host: Host,
    /// `false` when the control plane considers the host unsuitable for this workload.
    #[serde(rename = "suitableformigration", default)]
    pub suitable: bool,
    /// `true` when moving to this host would also move storage.
    #[serde(rename = "requiresStorageMotion", default)]
    pub requires_storage_motion: bool,
}

impl HostCandidate {
    /// Wraps a host the caller chose explicitly.
    #[must_use]
    pub fn pinned(host: Host) -> Self {
        Self {
            host,
            suitable: true,
            requires_storage_motion: false,
        }
    }
}
