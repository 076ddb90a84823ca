//! 发布内生命周期脚本
//!
//! `scripts/server.sh start|stop <env>`、`scripts/init-server.sh`、
//! `scripts/maintenance.sh on|off`，全部在远程主机上以 bash 执行。

use tracing::info;

use crate::config::OrchestratorSettings;
use crate::error::DeployResult;
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::smoke_test::ValidatedConfig;

pub struct ServerLifecycle<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> ServerLifecycle<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    fn script(&self, release_dir: &str, name: &str) -> String {
        format!("bash {}", quote(&format!("{}/scripts/{}", release_dir, name)))
    }

    fn release_dir(&self, config: &ValidatedConfig) -> String {
        config.layout(self.settings).release_dir(config.tag())
    }

    /// 创建远程日志目录
    pub async fn prepare_logs(&self, config: &ValidatedConfig) -> DeployResult<()> {
        let layout = config.layout(self.settings);
        self.executor
            .run(&format!("mkdir -p {}", quote(&layout.logs_dir())))
            .await?;
        Ok(())
    }

    /// 停止当前生效的发布
    pub async fn stop(&self, config: &ValidatedConfig, active: &str) -> DeployResult<()> {
        let layout = config.layout(self.settings);
        let dir = layout.release_dir_named(active);
        self.executor
            .run(&format!("{} stop {}", self.script(&dir, "server.sh"), config.environment()))
            .await?;
        info!(release = %active, "Active release stopped");
        Ok(())
    }

    /// 启动新发布
    pub async fn start(&self, config: &ValidatedConfig) -> DeployResult<()> {
        self.executor
            .run(&format!(
                "{} start {}",
                self.script(&self.release_dir(config), "server.sh"),
                config.environment()
            ))
            .await?;
        info!(tag = %config.tag(), "Server started");
        Ok(())
    }

    /// 首次初始化主机；已有初始化标记时跳过，返回是否执行了初始化
    pub async fn init_server(&self, config: &ValidatedConfig) -> DeployResult<bool> {
        let marker = config.layout(self.settings).init_marker();
        let present = self
            .executor
            .run(&format!("test -f {} && echo yes || echo no", quote(&marker)))
            .await?;
        if present.trim() == "yes" {
            info!("Server already initialized");
            return Ok(false);
        }

        self.executor
            .run(&format!(
                "{} && touch {}",
                self.script(&self.release_dir(config), "init-server.sh"),
                quote(&marker)
            ))
            .await?;
        info!(server = %config.server(), "Server initialized");
        Ok(true)
    }

    pub async fn maintenance(&self, config: &ValidatedConfig, on: bool) -> DeployResult<()> {
        let mode = if on { "on" } else { "off" };
        self.executor
            .run(&format!(
                "{} {}",
                self.script(&self.release_dir(config), "maintenance.sh"),
                mode
            ))
            .await?;
        info!(mode, "Maintenance page toggled");
        Ok(())
    }
}
