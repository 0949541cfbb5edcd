use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use stackops::{
    AppConfig, DrainRequest, MaintenanceRequest, MigrateVolumeRequest, MigrateWorkloadRequest,
    RebootAction, StackOpsClient,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackops")]
#[command(version)]
#[command(about = "Maintenance operations for virtualization clusters")]
struct Cli {
    /// Configuration file; `stackops.toml` in the working directory is used if present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Carry out the changes. Without this flag every command is a dry run.
    #[arg(long, global = true)]
    exec: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Disable a host and migrate or restart every workload away from it
    DrainHost {
        #[arg(long)]
        host: String,
        /// Send every workload to this host
        #[arg(long)]
        target: Option<String>,
    },
    /// Move a running VM, compute and storage, to another cluster
    MigrateVmToCluster {
        #[arg(long)]
        vm: String,
        #[arg(long)]
        cluster: String,
        /// Also move zone-wide volumes onto cluster storage of the destination
        #[arg(long)]
        zone_to_cluster: bool,
    },
    /// Move one volume to another storage pool
    MigrateVolume {
        #[arg(long)]
        volume_id: String,
        #[arg(long)]
        pool: String,
    },
    /// Drain and restart every host of a cluster, one at a time
    RollingReboot {
        #[arg(long)]
        cluster: String,
        #[arg(long, value_enum, default_value_t = Action::Reboot)]
        action: Action,
        /// Only process these hosts
        #[arg(long, value_delimiter = ',')]
        only_hosts: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        ignore_hosts: Vec<String>,
        /// Skip hosts already running this hypervisor version
        #[arg(long)]
        skip_os_version: Option<String>,
        /// Spare host that holds the workloads of the host being processed
        #[arg(long)]
        proxy_host: Option<String>,
        #[arg(long)]
        host_tags: Option<String>,
        #[arg(long)]
        pre_drain_script: Option<PathBuf>,
        #[arg(long)]
        post_drain_script: Option<PathBuf>,
        #[arg(long)]
        post_reboot_script: Option<PathBuf>,
        #[arg(long)]
        firmware_script: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    Reboot,
    Halt,
    ForceReset,
    FirmwareUpgrade,
    PxeReboot,
    SkipReboot,
}

impl From<Action> for RebootAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Reboot => RebootAction::Reboot,
            Action::Halt => RebootAction::Halt,
            Action::ForceReset => RebootAction::ForceReset,
            Action::FirmwareUpgrade => RebootAction::FirmwareUpgrade,
            Action::PxeReboot => RebootAction::PxeReboot,
            Action::SkipReboot => RebootAction::SkipReboot,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let client = StackOpsClient::builder()
        .config(config)
        .dry_run(!cli.exec)
        .build()?;
    if client.is_dry_run() {
        tracing::info!("dry run, pass --exec to apply changes");
    }
    client.login().await.context("logging in")?;

    match cli.command {
        Commands::DrainHost { host, target } => {
            let report = client.drain_host(&DrainRequest { host, target }).await?;
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} of {} workloads could not be moved", report.failed, report.total);
            }
            if !report.pending_restart.is_empty() {
                bail!(
                    "{} workloads were stopped and could not be started again",
                    report.pending_restart.len()
                );
            }
        }
        Commands::MigrateVmToCluster {
            vm,
            cluster,
            zone_to_cluster,
        } => {
            let report = client
                .migrate_workload_to_cluster(&MigrateWorkloadRequest {
                    workload: vm,
                    cluster,
                    zone_to_cluster,
                })
                .await?;
            print_json(&report)?;
            if !report.succeeded {
                bail!("migration of {} did not complete", report.workload);
            }
        }
        Commands::MigrateVolume { volume_id, pool } => {
            let moved = client
                .migrate_volume(&MigrateVolumeRequest {
                    volume_id: volume_id.clone(),
                    pool,
                })
                .await?;
            if !moved {
                bail!("volume {} was not moved", volume_id);
            }
            tracing::info!(volume_id, "volume migrated");
        }
        Commands::RollingReboot {
            cluster,
            action,
            only_hosts,
            ignore_hosts,
            skip_os_version,
            proxy_host,
            host_tags,
            pre_drain_script,
            post_drain_script,
            post_reboot_script,
            firmware_script,
        } => {
            let report = client
                .rolling_maintenance(&MaintenanceRequest {
                    cluster,
                    action: action.into(),
                    only_hosts,
                    ignore_hosts,
                    skip_os_version,
                    proxy_host,
                    host_tags,
                    pre_drain_script,
                    post_drain_script,
                    post_reboot_script,
                    firmware_script,
                })
                .await?;
            print_json(&report)?;
        }
    }
    Ok(())
}
