use std::fmt;
use std::path::PathBuf;

/// What to do with a host once it has been drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RebootAction {
    #[default]
    Reboot,
    /// Power the host off; it is expected back once an operator powers it on.
    Halt,
    /// Immediate reset through the kernel's sysrq trigger.
    ForceReset,
    /// Run the configured firmware upgrade script, then reboot.
    FirmwareUpgrade,
    /// Boot from the network on the next start, then reboot.
    PxeReboot,
    /// Apply tags and scripts only.
    SkipReboot,
}

impl RebootAction {
    /// Whether the host goes through a power cycle that has to be waited for.
    #[must_use]
    pub fn restarts_host(self) -> bool {
        self != RebootAction::SkipReboot
    }
}

impl fmt::Display for RebootAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebootAction::Reboot => "reboot",
            RebootAction::Halt => "halt",
            RebootAction::ForceReset => "force-reset",
            RebootAction::FirmwareUpgrade => "firmware-upgrade",
            RebootAction::PxeReboot => "pxe-reboot",
            RebootAction::SkipReboot => "skip-reboot",
        };
        f.write_str(name)
    }
}

/// Put every host of a cluster through maintenance, one host at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceRequest {
    /// Name of the cluster.
    pub cluster: String,
    pub action: RebootAction,
    /// When non-empty, only these hosts are processed.
    pub only_hosts: Vec<String>,
    pub ignore_hosts: Vec<String>,
    /// Hosts already reporting this hypervisor version are skipped.
    pub skip_os_version: Option<String>,
    /// Spare host that takes the workloads of every drained host.
    pub proxy_host: Option<String>,
    /// Tags applied to each host while it is disabled.
    pub host_tags: Option<String>,
    pub pre_drain_script: Option<PathBuf>,
    pub post_drain_script: Option<PathBuf>,
    pub post_reboot_script: Option<PathBuf>,
    /// Required by [`RebootAction::FirmwareUpgrade`].
    pub firmware_script: Option<PathBuf>,
}
