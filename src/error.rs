//! 统一错误处理
//!
//! 部署流水线的错误分类：配置错误与前置检查失败一律在任何远程变更之前抛出；
//! 锁竞争区分可重试与被取代；远程命令错误携带完整的 stdout/stderr；
//! 身份迁移失败是唯一带补偿动作（回滚）的错误。

use std::time::Duration;

use thiserror::Error;

use crate::infra::remote::RemoteCommandError;

/// 部署锁错误
#[derive(Debug, Error)]
pub enum LockError {
    /// 锁被一个不比自己旧的部署持有，可退避重试
    #[error("Deploy lock is held by {holder}, waiting for it to clear")]
    Contended { holder: String },

    /// 自己比锁持有者新：放弃而不是排队
    #[error(
        "Deploy of {contender} aborted: newer version deployed while {holder} holds the deploy lock"
    )]
    Superseded { holder: String, contender: String },

    /// 连续多次无法读取锁内容
    #[error("Deploy lock could not be read after {attempts} consecutive attempts: {last}")]
    Unreadable { attempts: u32, last: String },
}

impl LockError {
    /// 是否可以退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Contended { .. })
    }
}

/// 部署错误
#[derive(Debug, Error)]
pub enum DeployError {
    /// 配置结构/语义错误，在任何远程调用之前抛出
    #[error("Invalid deploy configuration: {0}")]
    ConfigValidation(String),

    /// 实时环境检查失败（冒烟测试）
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Remote(#[from] RemoteCommandError),

    /// 轮询超过了截止时间
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// 容器进入了与期望不符的终态
    #[error("{what} never became {expected} (observed state: {observed})")]
    NotReady {
        what: String,
        expected: String,
        observed: String,
    },

    /// 用户重新导入失败；`rollback` 记录补偿动作的结果
    #[error("Identity migration failed: {source}{}", rollback_suffix(.rollback))]
    IdentityMigration {
        #[source]
        source: Box<DeployError>,
        rollback: RollbackOutcome,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 身份迁移回滚结果
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// 备份已恢复，上一个版本已重启，维护页面已撤下
    Restored,
    /// 回滚本身失败，维护页面保持显示，需要人工介入
    Failed(String),
}

fn rollback_suffix(outcome: &RollbackOutcome) -> String {
    match outcome {
        RollbackOutcome::Restored => " (backup restored, previous release restarted)".to_string(),
        RollbackOutcome::Failed(reason) => format!(
            " (ROLLBACK FAILED: {}; maintenance page left up, manual intervention required)",
            reason
        ),
    }
}

impl DeployError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}

/// 便捷类型别名
pub type DeployResult<T> = Result<T, DeployError>;
