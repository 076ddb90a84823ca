//! 部署配置（原始输入）
//!
//! `DeployConfig` 只是调用方一次性构造的不可变输入，
//! 必须经过 `services::smoke_test` 校验得到 `ValidatedConfig` 后才能用于任何变更操作。

use std::fmt;
use std::str::FromStr;

/// 部署环境
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "ENVIRONMENT must be 'staging' or 'production', got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 原始部署配置
#[derive(Clone, Default)]
pub struct DeployConfig {
    /// 应用名（用于远程路径与容器名）
    pub app_name: String,
    /// 目标主机
    pub deploy_server: String,
    /// 发布标签
    pub deploy_tag: String,
    /// staging | production
    pub environment: String,
    /// 后端密钥（JSON）
    pub backend_secrets: String,
    /// 有状态后端密钥（JSON）
    pub stateful_backend_secrets: String,
    /// Docker 环境密钥（KEY=value 行）
    pub docker_secrets: String,
    /// Keycloak 密钥（JSON）
    pub keycloak_secrets: String,
    /// 应用配置密钥（原样透传给密钥合并脚本）
    pub config_secrets: String,
    /// 使用远程数据库服务器而不是本地容器卷
    pub use_remote_database: bool,
    /// 本地数据库 compose 文件（相对发布目录）
    pub local_database_compose_file: Option<String>,
    /// 本地数据库持久卷
    pub local_database_volumes: Vec<String>,
    /// 重置模式：丢弃 Keycloak 用户，不导出/备份/重新导入
    pub reset_keycloak: bool,
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("app_name", &self.app_name)
            .field("deploy_server", &self.deploy_server)
            .field("deploy_tag", &self.deploy_tag)
            .field("environment", &self.environment)
            .field("backend_secrets", &redacted(&self.backend_secrets))
            .field("stateful_backend_secrets", &redacted(&self.stateful_backend_secrets))
            .field("docker_secrets", &redacted(&self.docker_secrets))
            .field("keycloak_secrets", &redacted(&self.keycloak_secrets))
            .field("config_secrets", &redacted(&self.config_secrets))
            .field("use_remote_database", &self.use_remote_database)
            .field("local_database_compose_file", &self.local_database_compose_file)
            .field("local_database_volumes", &self.local_database_volumes)
            .field("reset_keycloak", &self.reset_keycloak)
            .finish()
    }
}
