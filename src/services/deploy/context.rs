//! 部署上下文
//!
//! 一次部署调用内共享的状态：已校验配置、阶段记录、上一个发布的信息

use serde::Serialize;
use tracing::{error, info};

use crate::domain::deploy::{DeployStage, DeployStatus, Stage, StageTracker};
use crate::error::DeployResult;
use crate::services::smoke_test::ValidatedConfig;

/// 部署执行上下文
pub struct DeployContext<'a> {
    /// 已校验的配置
    pub config: &'a ValidatedConfig,
    /// 阶段记录
    pub tracker: StageTracker,
    /// 被替换的发布标签
    pub previous_release: Option<String>,
    /// 停止前正在运行的旧发布容器，回滚时重新启动
    pub previous_containers: Vec<String>,
}

/// 部署结果
#[derive(Clone, Debug, Serialize)]
pub struct DeployReport {
    pub app: String,
    pub tag: String,
    pub status: DeployStatus,
    pub previous_release: Option<String>,
    pub stages: Vec<DeployStage>,
}

impl<'a> DeployContext<'a> {
    pub fn new(config: &'a ValidatedConfig) -> Self {
        Self {
            config,
            tracker: StageTracker::new(),
            previous_release: None,
            previous_containers: Vec::new(),
        }
    }

    pub fn start(&mut self, stage: Stage) {
        self.tracker.start(stage);
    }

    /// 按结果记录阶段并原样返回结果
    pub fn finish<T>(&mut self, stage: Stage, result: DeployResult<T>) -> DeployResult<T> {
        match &result {
            Ok(_) => self.tracker.succeed(stage),
            Err(e) => self.tracker.fail(stage, e.to_string()),
        }
        result
    }

    pub fn finish_with<T>(
        &mut self,
        stage: Stage,
        result: DeployResult<T>,
        message: impl Into<String>,
    ) -> DeployResult<T> {
        match &result {
            Ok(_) => self.tracker.succeed_with(stage, message),
            Err(e) => self.tracker.fail(stage, e.to_string()),
        }
        result
    }

    pub fn skip(&mut self, stage: Stage, reason: &str) {
        info!(stage = stage.name(), reason, "Skipping {}", stage.display_name());
        self.tracker.skip(stage, reason);
    }

    /// 输出阶段摘要
    pub fn log_summary(&self, status: DeployStatus) {
        let lines = self.tracker.summary_lines().join("\n");
        match status {
            DeployStatus::Success => info!(
                app = %self.config.app_name(),
                tag = %self.config.tag(),
                "Deploy succeeded\n{}",
                lines
            ),
            _ => error!(
                app = %self.config.app_name(),
                tag = %self.config.tag(),
                status = status.as_str(),
                "Deploy did not complete\n{}",
                lines
            ),
        }
    }

    pub fn into_report(self, status: DeployStatus) -> DeployReport {
        DeployReport {
            app: self.config.app_name().to_string(),
            tag: self.config.tag().to_string(),
            status,
            previous_release: self.previous_release,
            stages: self.tracker.stages(),
        }
    }
}
