//! Auxiliary relational datastore of the control plane.
//!
//! Only a handful of bookkeeping corrections go through here: recorded volume sizes and
//! the offerings attached to volumes and workloads when they change storage tier.

use crate::core::domain::error::{OpsError, OpsResult, ResourceKind};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Recorded size of a volume in bytes.
    async fn get_volume_size(&self, volume_id: &str) -> OpsResult<u64>;
    async fn update_volume_size(&self, volume_id: &str, size: u64) -> OpsResult<()>;
    /// Points a workload and its root volume at the named service offering.
    async fn update_service_offering(&self, workload_id: &str, offering_name: &str)
    -> OpsResult<()>;
    /// Points a data volume at the named disk offering.
    async fn update_storage_tier_offering(
        &self,
        volume_id: &str,
        offering_name: &str,
    ) -> OpsResult<()>;
}

/// [`Datastore`] backed by the control plane's MySQL database.
#[derive(Debug, Clone)]
pub struct SqlDatastore {
    pool: MySqlPool,
}

impl SqlDatastore {
    /// Creates a pool that connects on first use.
    pub fn connect_lazy(url: &str) -> OpsResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Id of a live offering by name. Service offerings share their id with a disk offering.
    async fn offering_id(&self, name: &str, kind: ResourceKind) -> OpsResult<i64> {
        let query = match kind {
            ResourceKind::ServiceOffering => {
                "SELECT s.id FROM service_offering s JOIN disk_offering d ON d.id = s.id \
                 WHERE d.name = ? AND d.removed IS NULL LIMIT 1"
            }
            _ => "SELECT id FROM disk_offering WHERE name = ? AND removed IS NULL LIMIT 1",
        };
        sqlx::query_scalar::<_, i64>(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OpsError::not_found(kind, name))
    }
}

#[async_trait]
impl Datastore for SqlDatastore {
    async fn get_volume_size(&self, volume_id: &str) -> OpsResult<u64> {
        let size: Option<i64> = sqlx::query_scalar("SELECT size FROM volumes WHERE uuid = ?")
            .bind(volume_id)
            .fetch_optional(&self.pool)
            .await?;
        let size = size.ok_or_else(|| OpsError::not_found(ResourceKind::Volume, volume_id))?;
        u64::try_from(size)
            .map_err(|_| OpsError::Datastore(format!("negative size recorded for {}", volume_id)))
    }

    async fn update_volume_size(&self, volume_id: &str, size: u64) -> OpsResult<()> {
        let size = i64::try_from(size)
            .map_err(|_| OpsError::Datastore(format!("size {} out of range", size)))?;
        let result = sqlx::query("UPDATE volumes SET size = ? WHERE uuid = ?")
            .bind(size)
            .bind(volume_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(OpsError::not_found(ResourceKind::Volume, volume_id));
        }
        Ok(())
    }

    async fn update_service_offering(
        &self,
        workload_id: &str,
        offering_name: &str,
    ) -> OpsResult<()> {
        let offering_id = self.offering_id(offering_name, ResourceKind::ServiceOffering).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE vm_instance SET service_offering_id = ? WHERE uuid = ?")
            .bind(offering_id)
            .bind(workload_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE volumes v JOIN vm_instance i ON i.id = v.instance_id \
             SET v.disk_offering_id = ? WHERE i.uuid = ? AND v.volume_type = 'ROOT'",
        )
        .bind(offering_id)
        .bind(workload_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_storage_tier_offering(
        &self,
        volume_id: &str,
        offering_name: &str,
    ) -> OpsResult<()> {
        let offering_id = self.offering_id(offering_name, ResourceKind::DiskOffering).await?;
        sqlx::query("UPDATE volumes SET disk_offering_id = ? WHERE uuid = ?")
            .bind(offering_id)
            .bind(volume_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
