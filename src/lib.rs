mod auth;
mod core;
mod maintenance;
mod migration;

#[cfg(test)]
mod tests;

pub use crate::core::domain::error::{
    OpsError, OpsResult, ResourceKind, TransientKind, ValidationError,
};
pub use crate::core::domain::model::operation_context::OperationContext;
pub use crate::core::infrastructure::config::{AppConfig, Timing};
pub use crate::maintenance::application::{
    request::maintenance_request::{MaintenanceRequest, RebootAction},
    response::maintenance_report::{
        HostMaintenanceRecord, MaintenanceReport, SkipReason, SkippedHost,
    },
};
pub use crate::migration::application::{
    request::{
        drain_request::DrainRequest, migrate_volume_request::MigrateVolumeRequest,
        migrate_workload_request::MigrateWorkloadRequest,
    },
    response::{
        drain_report::DrainReport,
        migration_report::{Relocation, WorkloadMigrationReport},
    },
};

use crate::{
    core::infrastructure::{
        api_client::ApiClient,
        control_plane::{ControlPlane, HttpControlPlane},
        datastore::{Datastore, SqlDatastore},
        hypervisor::{Hypervisor, VirshHypervisor},
        remote_shell::{RemoteShell, SshShell},
    },
    maintenance::application::service::cluster_maintenance::ClusterMaintenanceDriver,
    migration::application::service::{
        host_drain::HostDrainCoordinator,
        job_tracker::JobTracker,
        target_selector::TargetSelector,
        volume_migration::{TierOfferings, VolumeMigrationOrchestrator},
    },
};
use std::sync::Arc;

/// Entry point for cluster maintenance against a control plane.
///
/// The client is created in dry-run mode unless told otherwise: every mutating step is
/// logged and reported as successful without being sent anywhere.
///
/// # Examples
///
/// ```no_run
/// use stackops::{AppConfig, DrainRequest, OpsResult, StackOpsClient};
///
/// #[tokio::main]
/// async fn main() -> OpsResult<()> {
///     let config = AppConfig::load(None)?;
///     let client = StackOpsClient::builder()
///         .config(config)
///         .dry_run(false)
///         .build()?;
///
///     client.login().await?;
///     let report = client
///         .drain_host(&DrainRequest {
///             host: "kvm01".to_string(),
///             target: None,
///         })
///         .await?;
///     println!("{}/{} migrated", report.succeeded, report.total);
///     Ok(())
/// }
/// ```
pub struct StackOpsClient {
    api: Option<Arc<ApiClient>>,
    control_plane: Arc<dyn ControlPlane>,
    drain: HostDrainCoordinator,
    volumes: VolumeMigrationOrchestrator,
    maintenance: ClusterMaintenanceDriver,
    dry_run: bool,
}

/// Builder for [`StackOpsClient`].
pub struct StackOpsClientBuilder {
    config: Option<AppConfig>,
    dry_run: bool,
    timing: Option<Timing>,
    control_plane: Option<Arc<dyn ControlPlane>>,
    shell: Option<Arc<dyn RemoteShell>>,
    hypervisor: Option<Arc<dyn Hypervisor>>,
    datastore: Option<Arc<dyn Datastore>>,
}

impl Default for StackOpsClientBuilder {
    fn default() -> Self {
        Self {
            config: None,
            dry_run: true,
            timing: None,
            control_plane: None,
            shell: None,
            hypervisor: None,
            datastore: None,
        }
    }
}

impl StackOpsClientBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Overrides the waits and budgets from the configuration.
    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }

    #[cfg(test)]
    pub(crate) fn control_plane(mut self, control_plane: Arc<dyn ControlPlane>) -> Self {
        self.control_plane = Some(control_plane);
        self
    }

    #[cfg(test)]
    pub(crate) fn shell(mut self, shell: Arc<dyn RemoteShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    #[cfg(test)]
    pub(crate) fn hypervisor(mut self, hypervisor: Arc<dyn Hypervisor>) -> Self {
        self.hypervisor = Some(hypervisor);
        self
    }

    #[cfg(test)]
    pub(crate) fn datastore(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Wires the client together.
    ///
    /// # Errors
    /// Returns `OpsError::Validation` if no configuration was given or it is invalid,
    /// `OpsError::Connection` if the HTTP client cannot be built and
    /// `OpsError::Datastore` if the datastore URL cannot be parsed.
    pub fn build(self) -> OpsResult<StackOpsClient> {
        let config = self.config.ok_or_else(|| ValidationError::Field {
            field: "config".to_string(),
            message: "Configuration is required".to_string(),
        })?;

        let (api, control_plane) = match self.control_plane {
            Some(control_plane) => (None, control_plane),
            None => {
                config.validate()?;
                let connection = config.control_plane.connection()?;
                let api = Arc::new(ApiClient::new(
                    connection,
                    config.control_plane.client_settings(),
                )?);
                let control_plane: Arc<dyn ControlPlane> =
                    Arc::new(HttpControlPlane::new(api.clone()));
                (Some(api), control_plane)
            }
        };

        let shell: Arc<dyn RemoteShell> = match self.shell {
            Some(shell) => shell,
            None => Arc::new(SshShell::new(config.ssh.clone())),
        };
        let hypervisor: Arc<dyn Hypervisor> = match self.hypervisor {
            Some(hypervisor) => hypervisor,
            None => Arc::new(VirshHypervisor::new(shell.clone())),
        };
        let datastore: Option<Arc<dyn Datastore>> = match (self.datastore, &config.datastore.url) {
            (Some(datastore), _) => Some(datastore),
            (None, Some(url)) => Some(Arc::new(SqlDatastore::connect_lazy(url)?)),
            (None, None) => None,
        };
        let timing = self.timing.unwrap_or_else(|| config.timing.timing());

        let tracker =
            JobTracker::new(control_plane.clone(), timing).with_hypervisor(hypervisor.clone());
        let selector = TargetSelector::new(
            control_plane.clone(),
            config.selection.fallback_memory_mb(),
        );
        let drain =
            HostDrainCoordinator::new(control_plane.clone(), tracker.clone(), selector.clone());
        let mut volumes = VolumeMigrationOrchestrator::new(
            control_plane.clone(),
            hypervisor.clone(),
            tracker.clone(),
            selector,
        );
        if let Some(datastore) = datastore {
            volumes = volumes.with_datastore(datastore, TierOfferings::from(&config.datastore));
        }
        let maintenance = ClusterMaintenanceDriver::new(
            control_plane.clone(),
            shell,
            hypervisor,
            drain.clone(),
            tracker,
            timing,
        );

        Ok(StackOpsClient {
            api,
            control_plane,
            drain,
            volumes,
            maintenance,
            dry_run: self.dry_run,
        })
    }
}

impl StackOpsClient {
    pub fn builder() -> StackOpsClientBuilder {
        StackOpsClientBuilder::default()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Opens a session with the control plane.
    ///
    /// Calls log in on their own when needed; this surfaces bad credentials early.
    pub async fn login(&self) -> OpsResult<()> {
        match &self.api {
            Some(api) => api.login().await,
            None => Ok(()),
        }
    }

    /// Returns true if the client holds a session that has not expired.
    pub async fn is_authenticated(&self) -> bool {
        match &self.api {
            Some(api) => api.is_authenticated().await,
            None => true,
        }
    }

    fn context(&self) -> OperationContext {
        OperationContext::new(self.dry_run)
    }

    /// Disables one host and evacuates every workload from it.
    ///
    /// The host stays disabled afterwards. Workloads reported in `pending_restart` were
    /// stopped and refused to start again.
    pub async fn drain_host(&self, request: &DrainRequest) -> OpsResult<DrainReport> {
        let host = self.control_plane.host_by_name(&request.host).await?;
        let target = match &request.target {
            Some(name) => Some(self.control_plane.host_by_name(name).await?),
            None => None,
        };
        self.drain
            .evacuate_host(&self.context(), &host, target.as_ref())
            .await
    }

    /// Moves a running workload, with its storage, into another cluster.
    pub async fn migrate_workload_to_cluster(
        &self,
        request: &MigrateWorkloadRequest,
    ) -> OpsResult<WorkloadMigrationReport> {
        self.volumes
            .migrate_workload_to_cluster(&self.context(), request)
            .await
    }

    /// Moves one volume to a named storage pool. Returns `false` if the move failed.
    pub async fn migrate_volume(&self, request: &MigrateVolumeRequest) -> OpsResult<bool> {
        self.volumes.migrate_volume(&self.context(), request).await
    }

    /// Puts every selected host of a cluster through maintenance, one at a time.
    pub async fn rolling_maintenance(
        &self,
        request: &MaintenanceRequest,
    ) -> OpsResult<MaintenanceReport> {
        self.maintenance.run(&self.context(), request).await
    }
}
