//! Docker / Compose 命令
//!
//! Compose 命令总是在发布目录内执行，叠加 `基础 + 环境 + 可选本地数据库` 三层文件；
//! 容器状态轮询使用墙钟截止时间，超时与"进入了错误终态"分别报错。

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::WaitPolicy;
use crate::error::{DeployError, DeployResult};
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::smoke_test::{CheckedConfig, DatabaseMode};

/// 某个发布目录下的 compose 项目
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compose {
    project: String,
    release_dir: String,
    files: Vec<String>,
}

impl Compose {
    pub fn for_release(config: &CheckedConfig, release_dir: &str) -> Self {
        let mut files = vec![
            "docker-compose.yml".to_string(),
            format!("docker-compose.{}.yml", config.environment()),
        ];
        if let DatabaseMode::Local { compose_file, .. } = config.database_mode() {
            files.push(compose_file.clone());
        }
        Self {
            project: config.app_name().to_string(),
            release_dir: release_dir.to_string(),
            files,
        }
    }

    /// `cd <release> && docker compose -p <app> -f ... <args>`
    pub fn command(&self, args: &str) -> String {
        let files: Vec<String> = self.files.iter().map(|f| format!("-f {}", quote(f))).collect();
        format!(
            "cd {} && docker compose -p {} {} {}",
            quote(&self.release_dir),
            quote(&self.project),
            files.join(" "),
            args
        )
    }
}

/// 期望的容器状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
}

impl ContainerState {
    fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
        }
    }
}

enum Observation {
    Reached,
    Pending,
    Failed,
}

fn observe(desired: ContainerState, status: &str) -> Observation {
    match (desired, status) {
        (ContainerState::Running, "running") => Observation::Reached,
        (ContainerState::Running, "exited" | "dead") => Observation::Failed,
        (ContainerState::Running, _) => Observation::Pending,
        // 容器不存在也算已停止
        (ContainerState::Stopped, "" | "exited" | "dead" | "created") => Observation::Reached,
        (ContainerState::Stopped, _) => Observation::Pending,
    }
}

/// 容器当前状态；容器不存在时返回空串
pub async fn container_status(executor: &dyn RemoteExecutor, name: &str) -> DeployResult<String> {
    let output = executor
        .run_silent(&format!(
            "docker inspect -f '{{{{.State.Status}}}}' {} 2>/dev/null || true",
            quote(name)
        ))
        .await?;
    Ok(output.trim().to_string())
}

/// 轮询直到容器进入期望状态
pub async fn wait_for_container(
    executor: &dyn RemoteExecutor,
    name: &str,
    desired: ContainerState,
    policy: WaitPolicy,
) -> DeployResult<()> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    info!(
        container = %name,
        desired = desired.as_str(),
        timeout = ?policy.timeout,
        "Waiting for container"
    );

    loop {
        let status = container_status(executor, name).await?;
        debug!(container = %name, status = %status, "Container status");

        match observe(desired, &status) {
            Observation::Reached => {
                info!(
                    container = %name,
                    elapsed = ?started.elapsed(),
                    "Container is {}",
                    desired.as_str()
                );
                return Ok(());
            }
            Observation::Failed => {
                return Err(DeployError::NotReady {
                    what: format!("container {}", name),
                    expected: desired.as_str().to_string(),
                    observed: status,
                });
            }
            Observation::Pending => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(DeployError::Timeout {
                what: format!("container {} to become {}", name, desired.as_str()),
                waited: policy.timeout,
            });
        }
        tokio::time::sleep(policy.interval.min(deadline - now).max(Duration::from_millis(1))).await;
    }
}

/// 名称以 `<prefix>` 开头的运行中容器
pub async fn running_containers(
    executor: &dyn RemoteExecutor,
    prefix: &str,
) -> DeployResult<Vec<String>> {
    let output = executor
        .run(&format!(
            "docker ps --filter name=^{} --format '{{{{.Names}}}}'",
            quote(prefix)
        ))
        .await?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && name.starts_with(prefix))
        .map(str::to_string)
        .collect())
}

/// 把容器日志写到远程文件并返回末尾若干行
pub async fn save_logs(
    executor: &dyn RemoteExecutor,
    name: &str,
    path: &str,
    tail: usize,
) -> DeployResult<String> {
    executor
        .run(&format!("docker logs {} > {} 2>&1 || true", quote(name), quote(path)))
        .await?;
    Ok(executor
        .run_silent(&format!("tail -n {} {} 2>/dev/null || true", tail, quote(path)))
        .await?)
}
