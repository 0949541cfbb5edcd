//! Domain model for clusters.

use serde::{Deserialize, Serialize};

/// A cluster of hosts sharing cluster-scoped storage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(rename = "zoneid", default)]
    pub zone_id: String,
    #[serde(rename = "zonename", default, skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
}
