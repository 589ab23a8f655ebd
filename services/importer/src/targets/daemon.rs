//! Driving the tgt daemon through `tgt-admin` and its systemd unit.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use super::TargetDaemonError;

/// Settings for the tgt daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TgtAdminConfig {
    /// Path to the `tgt-admin` executable.
    pub tgt_admin_path: PathBuf,

    /// Prefix commands with `sudo -n`.
    pub use_sudo: bool,

    /// Systemd unit of the daemon.
    pub service_name: String,

    /// Bound on waiting for the service to become active.
    pub ready_timeout: Duration,

    /// Bound on a single `tgt-admin` invocation.
    pub command_timeout: Duration,
}

impl Default for TgtAdminConfig {
    fn default() -> Self {
        Self {
            tgt_admin_path: PathBuf::from("/usr/sbin/tgt-admin"),
            use_sudo: false,
            service_name: "tgt".to_string(),
            ready_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// The network-boot block target daemon.
#[async_trait]
pub trait TargetDaemon: Send + Sync {
    /// Wait (boundedly) until the daemon accepts configuration.
    async fn ensure_ready(&self) -> Result<(), TargetDaemonError>;

    /// Reconcile the daemon's targets with the descriptor at `descriptor`.
    async fn update(&self, descriptor: &Path) -> Result<(), TargetDaemonError>;
}

/// A service whose state can be queried and started.
#[async_trait]
pub trait ServiceMonitor: Send + Sync {
    async fn is_active(&self) -> Result<bool, TargetDaemonError>;
    async fn start(&self) -> Result<(), TargetDaemonError>;
}

/// A systemd unit controlled with `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdService {
    name: String,
    use_sudo: bool,
}

impl SystemdService {
    pub fn new(name: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            name: name.into(),
            use_sudo,
        }
    }
}

#[async_trait]
impl ServiceMonitor for SystemdService {
    async fn is_active(&self) -> Result<bool, TargetDaemonError> {
        let output = run(false, Path::new("systemctl"), &["is-active", "--quiet", &self.name]).await?;
        Ok(output.status.success())
    }

    async fn start(&self) -> Result<(), TargetDaemonError> {
        info!(service = %self.name, "Starting target daemon service");
        let output = run(self.use_sudo, Path::new("systemctl"), &["start", &self.name]).await?;
        check_status("systemctl start", &output)
    }
}

/// `tgt-admin` against a systemd-managed tgt daemon.
pub struct TgtAdmin {
    config: TgtAdminConfig,
    service: Arc<dyn ServiceMonitor>,
}

impl TgtAdmin {
    pub fn new(config: TgtAdminConfig) -> Self {
        let service = Arc::new(SystemdService::new(&config.service_name, config.use_sudo));
        Self::with_service(config, service)
    }

    pub fn with_service(config: TgtAdminConfig, service: Arc<dyn ServiceMonitor>) -> Self {
        Self { config, service }
    }

    async fn wait_active(&self) -> Result<(), TargetDaemonError> {
        let poll = Duration::from_millis(500).min(self.config.ready_timeout);
        let deadline = Instant::now() + self.config.ready_timeout;

        if self.service.is_active().await? {
            return Ok(());
        }
        self.service.start().await?;

        loop {
            if self.service.is_active().await? {
                debug!(service = %self.config.service_name, "Target daemon service active");
                return Ok(());
            }
            if Instant::now() + poll > deadline {
                return Err(TargetDaemonError::NotReady {
                    service: self.config.service_name.clone(),
                    waited: self.config.ready_timeout,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[async_trait]
impl TargetDaemon for TgtAdmin {
    async fn ensure_ready(&self) -> Result<(), TargetDaemonError> {
        match timeout(self.config.ready_timeout, self.wait_active()).await {
            Ok(result) => result,
            Err(_) => Err(TargetDaemonError::NotReady {
                service: self.config.service_name.clone(),
                waited: self.config.ready_timeout,
            }),
        }
    }

    async fn update(&self, descriptor: &Path) -> Result<(), TargetDaemonError> {
        let conf = descriptor.to_string_lossy().into_owned();
        let args = ["--conf", conf.as_str(), "--update", "ALL"];

        let output = timeout(
            self.config.command_timeout,
            run(self.config.use_sudo, &self.config.tgt_admin_path, &args),
        )
        .await
        .map_err(|_| TargetDaemonError::Timeout {
            command: "tgt-admin".to_string(),
            waited: self.config.command_timeout,
        })??;

        check_status("tgt-admin", &output)?;
        info!(descriptor = %descriptor.display(), "Target daemon updated");
        Ok(())
    }
}

async fn run(use_sudo: bool, program: &Path, args: &[&str]) -> Result<Output, TargetDaemonError> {
    let mut command = if use_sudo {
        let mut c = Command::new("sudo");
        c.arg("-n").arg(program);
        c
    } else {
        Command::new(program)
    };
    command.args(args).kill_on_drop(true);

    debug!(program = %program.display(), args = ?args, sudo = use_sudo, "Running command");
    command
        .output()
        .await
        .map_err(|source| TargetDaemonError::Spawn {
            program: program.display().to_string(),
            source,
        })
}

fn check_status(command: &str, output: &Output) -> Result<(), TargetDaemonError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(TargetDaemonError::CommandFailed {
        command: command.to_string(),
        code: output.status.code(),
        stderr: stderr.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct CountingService {
        active_after: u32,
        polls: AtomicU32,
        starts: AtomicU32,
    }

    #[async_trait]
    impl ServiceMonitor for CountingService {
        async fn is_active(&self) -> Result<bool, TargetDaemonError> {
            Ok(self.polls.fetch_add(1, Ordering::SeqCst) >= self.active_after)
        }

        async fn start(&self) -> Result<(), TargetDaemonError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(active_after: u32) -> Arc<CountingService> {
        Arc::new(CountingService {
            active_after,
            polls: AtomicU32::new(0),
            starts: AtomicU32::new(0),
        })
    }

    fn config(tgt_admin_path: PathBuf) -> TgtAdminConfig {
        TgtAdminConfig {
            tgt_admin_path,
            ready_timeout: Duration::from_millis(200),
            command_timeout: Duration::from_secs(5),
            ..TgtAdminConfig::default()
        }
    }

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("tgt-admin");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_active_service_is_not_started() {
        let svc = service(0);
        let daemon = TgtAdmin::with_service(config(PathBuf::from("/bin/true")), svc.clone());

        daemon.ensure_ready().await.unwrap();
        assert_eq!(svc.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inactive_service_is_started() {
        let svc = service(1);
        let daemon = TgtAdmin::with_service(config(PathBuf::from("/bin/true")), svc.clone());

        daemon.ensure_ready().await.unwrap();
        assert_eq!(svc.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_never_ready_times_out() {
        let svc = service(u32::MAX);
        let daemon = TgtAdmin::with_service(config(PathBuf::from("/bin/true")), svc);

        assert!(matches!(
            daemon.ensure_ready().await,
            Err(TargetDaemonError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_passes_descriptor() {
        let dir = TempDir::new().unwrap();
        let record = dir.path().join("args");
        let tool = script(&dir, &format!("echo \"$@\" > {}", record.display()));
        let daemon = TgtAdmin::with_service(config(tool), service(0));

        daemon.update(Path::new("/srv/snap/maas.tgt")).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(record).unwrap().trim(),
            "--conf /srv/snap/maas.tgt --update ALL"
        );
    }

    #[tokio::test]
    async fn test_update_rejected() {
        let dir = TempDir::new().unwrap();
        let tool = script(&dir, "echo 'target busy' >&2; exit 22");
        let daemon = TgtAdmin::with_service(config(tool), service(0));

        match daemon.update(Path::new("/srv/snap/maas.tgt")).await {
            Err(TargetDaemonError::CommandFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(22));
                assert_eq!(stderr, "target busy");
            }
            other => panic!("expected command failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let daemon = TgtAdmin::with_service(
            config(PathBuf::from("/nonexistent/tgt-admin")),
            service(0),
        );
        assert!(matches!(
            daemon.update(Path::new("/srv/snap/maas.tgt")).await,
            Err(TargetDaemonError::Spawn { .. })
        ));
    }
}
