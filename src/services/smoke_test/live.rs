//! 实时环境检查
//!
//! 顺序有依赖：连通性 → 系统 → 容器运行时/初始化标记 → 发布包 → 磁盘 → 软件包
//! → 数据库可达性。任何一项失败立即返回 `Precondition`，不做重试。

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::{archive, CheckedConfig, DatabaseMode, ReleaseArchive, ValidatedConfig};
use crate::config::OrchestratorSettings;
use crate::error::{DeployError, DeployResult};
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::db_client::{DbTarget, MAINTENANCE_DATABASE};

pub struct LiveChecks<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> LiveChecks<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    pub async fn run(&self, checked: CheckedConfig) -> DeployResult<ValidatedConfig> {
        self.check_connectivity(&checked).await?;
        self.check_os().await?;
        let initialized = self.check_container_runtime(&checked).await?;
        let archive = self.check_archive(&checked).await?;
        self.check_disk(&checked, &archive).await?;
        self.check_packages().await?;

        let validated = ValidatedConfig {
            checked,
            archive,
            runtime_checks_deferred: !initialized,
        };

        if initialized {
            self.runtime_checks(&validated).await?;
        } else {
            warn!(
                server = %validated.server(),
                "Host has not been initialized yet, container runtime checks deferred until after init"
            );
        }

        info!(app = %validated.app_name(), tag = %validated.tag(), "Smoke test passed");
        Ok(validated)
    }

    async fn check_connectivity(&self, config: &CheckedConfig) -> DeployResult<()> {
        let output = self.executor.run("echo ok").await.map_err(|e| {
            DeployError::precondition(format!("Cannot reach {} over SSH: {}", config.server(), e))
        })?;
        if output.trim() != "ok" {
            return Err(DeployError::precondition(format!(
                "Unexpected SSH handshake output from {}: '{}'",
                config.server(),
                output
            )));
        }
        Ok(())
    }

    async fn check_os(&self) -> DeployResult<()> {
        let output = self
            .executor
            .run("cat /etc/os-release")
            .await
            .map_err(|e| DeployError::precondition(format!("Cannot read /etc/os-release: {}", e)))?;

        let id = os_release_id(&output).unwrap_or_default();
        if !id.eq_ignore_ascii_case(&self.settings.expected_os) {
            return Err(DeployError::precondition(format!(
                "Target OS is '{}', expected '{}'",
                if id.is_empty() { "unknown" } else { id.as_str() },
                self.settings.expected_os
            )));
        }
        Ok(())
    }

    /// 返回主机是否已初始化；已初始化但没有 docker 视为失败
    async fn check_container_runtime(&self, config: &CheckedConfig) -> DeployResult<bool> {
        let layout = config.layout(self.settings);
        let marker = self
            .executor
            .run(&format!("test -f {} && echo yes || echo no", quote(&layout.init_marker())))
            .await
            .map_err(|e| DeployError::precondition(format!("Cannot check init marker: {}", e)))?;
        if marker.trim() != "yes" {
            return Ok(false);
        }

        let docker = self
            .executor
            .run("command -v docker >/dev/null 2>&1 && echo yes || echo no")
            .await
            .map_err(|e| DeployError::precondition(format!("Cannot check docker: {}", e)))?;
        if docker.trim() != "yes" {
            return Err(DeployError::precondition(
                "Host is initialized but docker is not installed".to_string(),
            ));
        }
        Ok(true)
    }

    async fn check_archive(&self, config: &CheckedConfig) -> DeployResult<ReleaseArchive> {
        let path = self.settings.archive_path(config.tag().as_str());
        let extra: Vec<String> = match config.database_mode() {
            DatabaseMode::Local { compose_file, .. } => vec![compose_file.clone()],
            DatabaseMode::Remote => Vec::new(),
        };
        let archive = archive::inspect(&path, config.tag(), &extra).await?;
        info!(
            archive = %archive.path.display(),
            size = archive.size,
            "Release archive is well-formed"
        );
        Ok(archive)
    }

    async fn check_disk(
        &self,
        config: &CheckedConfig,
        archive: &ReleaseArchive,
    ) -> DeployResult<()> {
        let layout = config.layout(self.settings);
        let command = format!(
            "d={}; while [ ! -d \"$d\" ]; do d=$(dirname \"$d\"); done; df -Pk \"$d\" | tail -1 | awk '{{print $4}}'",
            quote(layout.app_dir())
        );
        let output = self
            .executor
            .run(&command)
            .await
            .map_err(|e| {
                DeployError::precondition(format!("Cannot determine free disk space: {}", e))
            })?;

        let available = output
            .trim()
            .parse::<u64>()
            .map(|kib| kib.saturating_mul(1024))
            .map_err(|_| DeployError::precondition(format!("Unexpected df output: '{}'", output)))?;
        let required = self.settings.required_disk_bytes(archive.size);

        if available < required {
            return Err(DeployError::precondition(format!(
                "Not enough disk space on {}: {} bytes available, {} bytes required",
                config.server(),
                available,
                required
            )));
        }
        Ok(())
    }

    async fn check_packages(&self) -> DeployResult<()> {
        let mut missing = self.missing_packages().await?;
        if missing.is_empty() {
            return Ok(());
        }

        warn!(packages = ?missing, "Installing missing host packages");
        let names: Vec<String> = missing.iter().map(|p| quote(p)).collect();
        self.executor
            .run(&format!(
                "sudo apt-get update -qq && sudo DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                names.join(" ")
            ))
            .await
            .map_err(|e| {
                let packages = missing.join(", ");
                DeployError::precondition(format!("Installing {} failed: {}", packages, e))
            })?;

        missing = self.missing_packages().await?;
        if !missing.is_empty() {
            return Err(DeployError::precondition(format!(
                "Required packages still missing after install: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    async fn missing_packages(&self) -> DeployResult<Vec<String>> {
        if self.settings.required_packages.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = self.settings.required_packages.iter().map(|p| quote(p)).collect();
        let output = self
            .executor
            .run(&format!(
                "for p in {}; do command -v \"$p\" >/dev/null 2>&1 || echo \"$p\"; done",
                names.join(" ")
            ))
            .await
            .map_err(|e| DeployError::precondition(format!("Cannot check host packages: {}", e)))?;
        Ok(output.split_whitespace().map(str::to_string).collect())
    }

    /// 依赖容器运行时的检查：数据库可达性
    pub async fn runtime_checks(&self, config: &ValidatedConfig) -> DeployResult<()> {
        match config.database_mode() {
            DatabaseMode::Remote => {
                let mut seen = BTreeSet::new();
                let connections = [
                    config.backend_db(),
                    config.stateful_backend_db(),
                    config.keycloak_db(),
                ];
                for connection in connections {
                    let key = (connection.host.clone(), connection.port, connection.user.clone());
                    if !seen.insert(key) {
                        continue;
                    }
                    let target = DbTarget::remote(connection, &self.settings.db_client_image);
                    let output = target
                        .query(self.executor, MAINTENANCE_DATABASE, "SELECT 1")
                        .await
                        .map_err(|e| {
                            DeployError::precondition(format!(
                                "Database server {} is not reachable: {}",
                                target.describe(),
                                e
                            ))
                        })?;
                    if output.trim() != "1" {
                        return Err(DeployError::precondition(format!(
                            "Database server {} answered '{}' to SELECT 1",
                            target.describe(),
                            output
                        )));
                    }
                }
            }
            DatabaseMode::Local { .. } => {
                self.executor
                    .run("docker info --format '{{.ServerVersion}}'")
                    .await
                    .map_err(|e| {
                        DeployError::precondition(format!("Docker daemon is not usable: {}", e))
                    })?;
            }
        }
        Ok(())
    }
}

/// 解析 os-release 的 `ID=` 行
fn os_release_id(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("ID="))
        .map(|value| value.trim_matches(|c| c == '"' || c == '\'').to_string())
        .next()
}
