//! Deploy Orchestrator - 单主机发布编排
//!
//! 把一个带标签的发布包部署到一台远程主机：冒烟测试、部署锁、
//! `active` 链接切换、数据库准备、Keycloak 身份迁移（失败回滚）。

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

pub use config::{load_deploy_config, OrchestratorSettings};
pub use domain::config::DeployConfig;
pub use error::{DeployError, DeployResult};
pub use services::deploy::{DeployReport, DeploymentOrchestrator};
pub use services::smoke_test::{SmokeTest, ValidatedConfig};

use tracing::info;

use crate::domain::tag::DeployTag;
use crate::infra::SshExecutor;
use crate::services::lock::{DeploymentLock, RemoteLockFile};

/// 目标主机的 SSH 执行器
pub fn ssh_executor(server: &str, settings: &OrchestratorSettings) -> SshExecutor {
    SshExecutor::new(
        server,
        settings.ssh_user.clone(),
        settings.ssh_port,
        settings.command_timeout,
    )
}

/// 只做冒烟测试
pub async fn validate(
    config: &DeployConfig,
    settings: &OrchestratorSettings,
) -> DeployResult<ValidatedConfig> {
    let executor = ssh_executor(&config.deploy_server, settings);
    SmokeTest::new(&executor, settings).run(config).await
}

/// 冒烟测试通过后执行部署
pub async fn deploy(
    config: &DeployConfig,
    settings: &OrchestratorSettings,
) -> DeployResult<DeployReport> {
    let executor = ssh_executor(&config.deploy_server, settings);
    let validated = SmokeTest::new(&executor, settings).run(config).await?;
    DeploymentOrchestrator::new(&executor, settings)
        .deploy(&validated)
        .await
}

/// 人工释放部署锁（仅当锁仍属于 `tag`）
pub async fn unlock(
    server: &str,
    tag: &str,
    settings: &OrchestratorSettings,
) -> DeployResult<bool> {
    let tag = DeployTag::parse(tag).map_err(|e| DeployError::config(e.to_string()))?;
    if server.trim().is_empty() {
        return Err(DeployError::config("DEPLOY_SERVER is required"));
    }

    info!(server = %server, tag = %tag, lock = %settings.lock.path, "Releasing deploy lock");
    let executor = ssh_executor(server, settings);
    let file = RemoteLockFile::new(&executor, settings.lock.path.clone());
    Ok(DeploymentLock::new(&file, &settings.lock).release(&tag).await?)
}
