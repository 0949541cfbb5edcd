//! Domain model for volumes as returned by `listVolumes`.

use crate::core::domain::value_object::serde_helpers;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeType {
    Root,
    #[serde(rename = "DATADISK")]
    DataDisk,
}

/// Lifecycle state of a volume. Only `Ready` volumes may be migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum VolumeState {
    Ready,
    Allocated,
    Migrating,
    Creating,
    Destroy,
    #[serde(other)]
    Unknown,
}

/// A disk attached to a workload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub volume_type: VolumeType,
    /// Identifier of the storage pool holding the volume.
    #[serde(rename = "storageid", default)]
    pub pool_id: String,
    /// Name of the storage pool holding the volume.
    #[serde(rename = "storage", default)]
    pub pool_name: String,
    pub state: VolumeState,
    /// Size in bytes as recorded by the control plane.
    #[serde(default, deserialize_with = "serde_helpers::lenient_u64")]
    pub size: u64,
    /// Backing file name on the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "deviceid", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    /// Storage tags of the volume's disk offering.
    #[serde(
        rename = "storagetags",
        default,
        deserialize_with = "serde_helpers::comma_separated"
    )]
    pub tags: Vec<String>,
    /// Workload the volume is attached to, if any.
    #[serde(
        rename = "virtualmachineid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub workload_id: Option<String>,
}

impl Volume {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.volume_type == VolumeType::Root
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == VolumeState::Ready
    }
}

/// A point-in-time snapshot of a workload or of a volume.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub name: String,
}
