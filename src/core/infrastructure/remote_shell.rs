//! Remote execution channel to hypervisor hosts.

use crate::core::{
    domain::{
        error::{OpsError, OpsResult},
        value_object::HostAddress,
    },
    infrastructure::config::SshConfig,
};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

/// Exit status and captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turns a non-zero exit into `OpsError::Remote`.
    pub fn check(self, host: &HostAddress) -> OpsResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(OpsError::Remote {
                host: host.to_string(),
                message: format!("exit code {}: {}", self.exit_code, self.stderr.trim()),
            })
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `command` on `host`, through `sudo` when `privileged` is set.
    async fn run(
        &self,
        host: &HostAddress,
        command: &str,
        privileged: bool,
    ) -> OpsResult<CommandOutput>;

    /// Copies a local file to `remote_path` on `host`.
    async fn copy_file(&self, host: &HostAddress, local: &Path, remote_path: &str)
    -> OpsResult<()>;

    /// Whether the host accepts connections on its remote execution port.
    async fn is_reachable(&self, host: &HostAddress) -> bool;
}

/// [`RemoteShell`] through the system `ssh` and `scp` binaries.
#[derive(Debug, Clone)]
pub struct SshShell {
    config: SshConfig,
}

impl SshShell {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args
    }

    fn target(&self, host: &HostAddress) -> String {
        format!("{}@{}", self.config.user, host)
    }
}

fn remote_command(command: &str, privileged: bool) -> String {
    if privileged {
        format!("sudo sh -c '{}'", command.replace('\'', r"'\''"))
    } else {
        command.to_string()
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(
        &self,
        host: &HostAddress,
        command: &str,
        privileged: bool,
    ) -> OpsResult<CommandOutput> {
        tracing::debug!(host = %host, command, privileged, "remote command");
        let output = Command::new("ssh")
            .args(self.common_options())
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg(self.target(host))
            .arg(remote_command(command, privileged))
            .output()
            .await
            .map_err(|e| OpsError::Remote {
                host: host.to_string(),
                message: format!("failed to spawn ssh: {}", e),
            })?;

        Ok(CommandOutput {
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn copy_file(
        &self,
        host: &HostAddress,
        local: &Path,
        remote_path: &str,
    ) -> OpsResult<()> {
        tracing::debug!(host = %host, local = %local.display(), remote_path, "copying file");
        let output = Command::new("scp")
            .args(self.common_options())
            .arg("-P")
            .arg(self.config.port.to_string())
            .arg(local)
            .arg(format!("{}:{}", self.target(host), remote_path))
            .output()
            .await
            .map_err(|e| OpsError::Remote {
                host: host.to_string(),
                message: format!("failed to spawn scp: {}", e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(OpsError::Remote {
                host: host.to_string(),
                message: format!(
                    "scp of {} failed: {}",
                    local.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }

    async fn is_reachable(&self, host: &HostAddress) -> bool {
        let connect = TcpStream::connect((host.as_str(), self.config.port));
        matches!(
            tokio::time::timeout(self.connect_timeout(), connect).await,
            Ok(Ok(_))
        )
    }
}
