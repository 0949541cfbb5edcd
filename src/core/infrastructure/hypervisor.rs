//! Read-only queries against a host's hypervisor management interface.

use crate::core::{
    domain::{
        error::{OpsError, OpsResult},
        value_object::HostAddress,
    },
    infrastructure::remote_shell::RemoteShell,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A disk attached to a running domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    /// Guest device name, e.g. `vda`.
    pub target: String,
    /// Backing file or device path.
    pub source: String,
    /// Size in bytes as seen by the hypervisor.
    pub capacity: u64,
}

impl DiskInfo {
    /// Whether the backing path ends with the given volume path.
    #[must_use]
    pub fn backs(&self, volume_path: &str) -> bool {
        self.source.rsplit('/').next() == Some(volume_path) || self.source.ends_with(volume_path)
    }
}

/// Bytes processed versus bytes to process for a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub processed: u64,
    pub total: u64,
}

impl JobProgress {
    /// Completion percentage; `0` while the total is unknown.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = self.processed.saturating_mul(100) / self.total;
        pct.min(100) as u8
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Disks attached to `domain` with their backing files and sizes.
    async fn disk_topology(&self, host: &HostAddress, domain: &str) -> OpsResult<Vec<DiskInfo>>;

    /// Progress of the migration job running for `domain`, if any.
    async fn migration_job_stats(
        &self,
        host: &HostAddress,
        domain: &str,
    ) -> OpsResult<Option<JobProgress>>;

    /// Progress of the block job running on one disk of `domain`, if any.
    async fn block_job_status(
        &self,
        host: &HostAddress,
        domain: &str,
        disk: &str,
    ) -> OpsResult<Option<JobProgress>>;

    /// Whether the management daemon on the host answers.
    async fn is_responsive(&self, host: &HostAddress) -> bool;
}

/// [`Hypervisor`] driving `virsh` through a [`RemoteShell`].
#[derive(Clone)]
pub struct VirshHypervisor {
    shell: Arc<dyn RemoteShell>,
}

impl VirshHypervisor {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self { shell }
    }

    async fn virsh(&self, host: &HostAddress, args: &str) -> OpsResult<String> {
        let output = self
            .shell
            .run(host, &format!("virsh {}", args), true)
            .await?
            .check(host)?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl Hypervisor for VirshHypervisor {
    async fn disk_topology(&self, host: &HostAddress, domain: &str) -> OpsResult<Vec<DiskInfo>> {
        let listing = self
            .virsh(host, &format!("domblklist {} --details", domain))
            .await?;
        let mut disks = Vec::new();
        for (target, source) in parse_domblklist(&listing) {
            let info = self
                .virsh(host, &format!("domblkinfo {} {}", domain, target))
                .await?;
            let capacity = parse_capacity(&info).ok_or_else(|| OpsError::Remote {
                host: host.to_string(),
                message: format!("no capacity reported for {} on {}", target, domain),
            })?;
            disks.push(DiskInfo {
                target,
                source,
                capacity,
            });
        }
        Ok(disks)
    }

    async fn migration_job_stats(
        &self,
        host: &HostAddress,
        domain: &str,
    ) -> OpsResult<Option<JobProgress>> {
        let info = self.virsh(host, &format!("domjobinfo {}", domain)).await?;
        Ok(parse_domjobinfo(&info))
    }

    async fn block_job_status(
        &self,
        host: &HostAddress,
        domain: &str,
        disk: &str,
    ) -> OpsResult<Option<JobProgress>> {
        let info = self
            .virsh(host, &format!("blockjob {} {} --info", domain, disk))
            .await?;
        Ok(parse_blockjob(&info))
    }

    async fn is_responsive(&self, host: &HostAddress) -> bool {
        matches!(
            self.shell.run(host, "virsh version", true).await,
            Ok(output) if output.success()
        )
    }
}

/// `(target, source)` pairs of the disk devices in `virsh domblklist --details`.
fn parse_domblklist(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [_, "disk", target, source] if *source != "-" => {
                    Some((target.to_string(), source.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// The `Capacity:` line of `virsh domblkinfo`, in bytes.
fn parse_capacity(output: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("Capacity:")?;
        value.trim().parse().ok()
    })
}

/// Processed and total data of the active job in `virsh domjobinfo`.
fn parse_domjobinfo(output: &str) -> Option<JobProgress> {
    let mut processed = None;
    let mut total = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Job type" if value.trim() == "None" => return None,
            "Data processed" => processed = parse_size(value),
            "Data total" => total = parse_size(value),
            _ => {}
        }
    }
    Some(JobProgress {
        processed: processed?,
        total: total.unwrap_or(0),
    })
}

/// `virsh blockjob --info` prints `Block Copy: [ 45 %]` while a job runs.
fn parse_blockjob(output: &str) -> Option<JobProgress> {
    let start = output.find('[')?;
    let end = output[start..].find('%')? + start;
    let pct: f64 = output[start + 1..end].trim().parse().ok()?;
    Some(JobProgress {
        processed: pct.round() as u64,
        total: 100,
    })
}

/// Parses sizes such as `1.250 GiB` or `512 B`.
fn parse_size(value: &str) -> Option<u64> {
    let mut parts = value.split_whitespace();
    let amount: f64 = parts.next()?.parse().ok()?;
    let multiplier: u64 = match parts.next().unwrap_or("B") {
        "B" => 1,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        _ => return None,
    };
    Some((amount * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::infrastructure::remote_shell::{CommandOutput, MockRemoteShell};

    const DOMBLKLIST: &str = " Type   Device   Target   Source
------------------------------------------------------------------
 file   disk     vda      /mnt/6f0b1c2e/0d2f3a4b-root
 file   disk     vdb      /mnt/6f0b1c2e/9a8b7c6d-data
 file   cdrom    hdc      -
";

    const DOMJOBINFO: &str = "Job type:         Unbounded
Operation:        Outgoing migration
Time elapsed:     5123         ms
Data processed:   1.500 GiB
Data remaining:   2.500 GiB
Data total:       4.000 GiB
";

    #[test]
    fn test_parse_domblklist_skips_empty_cdrom() {
        let disks = parse_domblklist(DOMBLKLIST);
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].0, "vda");
        assert_eq!(disks[1].1, "/mnt/6f0b1c2e/9a8b7c6d-data");
    }

    #[test]
    fn test_parse_domjobinfo() {
        let progress = parse_domjobinfo(DOMJOBINFO).unwrap();
        assert_eq!(progress.processed, 3 << 29);
        assert_eq!(progress.total, 4 << 30);
        assert_eq!(progress.percent(), 37);

        assert_eq!(parse_domjobinfo("Job type:         None\n"), None);
    }

    #[test]
    fn test_parse_blockjob() {
        let progress = parse_blockjob("Block Copy: [ 45 %]").unwrap();
        assert_eq!(progress.percent(), 45);
        assert_eq!(parse_blockjob("No current block job for vda"), None);
    }

    #[test]
    fn test_percent_without_total_is_zero() {
        let progress = JobProgress {
            processed: 10,
            total: 0,
        };
        assert_eq!(progress.percent(), 0);
    }

    #[test]
    fn test_disk_backs_volume_path() {
        let disk = DiskInfo {
            target: "vdb".to_string(),
            source: "/mnt/6f0b1c2e/9a8b7c6d-data".to_string(),
            capacity: 0,
        };
        assert!(disk.backs("9a8b7c6d-data"));
        assert!(!disk.backs("0d2f3a4b-root"));
    }

    #[tokio::test]
    async fn test_disk_topology_reads_capacities() {
        let mut shell = MockRemoteShell::new();
        shell.expect_run().returning(|_, command, _| {
            let stdout = if command.contains("domblklist") {
                DOMBLKLIST.to_string()
            } else if command.ends_with("vda") {
                "Capacity:       21474836480\nAllocation:     1048576\n".to_string()
            } else {
                "Capacity:       10737418240\n".to_string()
            };
            Ok(CommandOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            })
        });

        let hypervisor = VirshHypervisor::new(Arc::new(shell));
        let host = HostAddress::new_unchecked("10.0.0.11");
        let disks = hypervisor.disk_topology(&host, "i-2-10-VM").await.unwrap();

        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].capacity, 21474836480);
        assert_eq!(disks[1].capacity, 10737418240);
    }

    #[tokio::test]
    async fn test_unresponsive_when_virsh_fails() {
        let mut shell = MockRemoteShell::new();
        shell.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "failed to connect to the hypervisor".to_string(),
            })
        });

        let hypervisor = VirshHypervisor::new(Arc::new(shell));
        assert!(
            !hypervisor
                .is_responsive(&HostAddress::new_unchecked("kvm01"))
                .await
        );
    }
}
