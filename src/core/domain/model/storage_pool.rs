//! Domain model for primary storage pools.

use crate::core::domain::value_object::serde_helpers;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sharing scope of a storage pool, in ascending order of reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolScope {
    /// Local to one host. Volumes here cannot be live migrated.
    Host,
    /// Shared by the hosts of one cluster.
    Cluster,
    /// Shared by every cluster of a zone.
    Zone,
}

impl fmt::Display for PoolScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolScope::Host => f.write_str("host"),
            PoolScope::Cluster => f.write_str("cluster"),
            PoolScope::Zone => f.write_str("zone"),
        }
    }
}

/// A primary storage pool.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoragePool {
    pub id: String,
    pub name: String,
    pub scope: PoolScope,
    /// Owning cluster for cluster-scoped pools.
    #[serde(rename = "clusterid", default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(rename = "zoneid", default)]
    pub zone_id: String,
    /// Placement tags.
    #[serde(default, deserialize_with = "serde_helpers::comma_separated")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl StoragePool {
    /// Returns `true` if this pool carries every tag in `required`.
    #[must_use]
    pub fn has_tags(&self, required: &[String]) -> bool {
        required.iter().all(|tag| self.tags.contains(tag))
    }

    /// Returns `true` if the pool accepts new volumes (`Up` or unreported).
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.as_deref().is_none_or(|state| state == "Up")
    }
}
