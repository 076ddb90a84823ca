//! 环境变量配置加载

use std::env;

use tracing::warn;

use crate::domain::config::DeployConfig;

/// 从环境变量构造原始部署配置
///
/// 缺失的变量保留为空字符串，由结构校验统一报告。
pub fn load_deploy_config() -> DeployConfig {
    let app_name = load_with_fallback("APP_NAME", "DEPLOY_APP_NAME").unwrap_or_default();
    if env::var("APP_NAME").is_err() && env::var("DEPLOY_APP_NAME").is_ok() {
        warn!("Deprecated environment variable DEPLOY_APP_NAME detected. Please use APP_NAME");
    }

    let local_database_volumes = env::var("LOCAL_DATABASE_VOLUMES")
        .map(|v| parse_list(&v))
        .unwrap_or_default();

    DeployConfig {
        app_name,
        deploy_server: var("DEPLOY_SERVER"),
        deploy_tag: var("DEPLOY_TAG"),
        environment: var("ENVIRONMENT"),
        backend_secrets: var("BACKEND_SECRETS"),
        stateful_backend_secrets: var("STATEFUL_BACKEND_SECRETS"),
        docker_secrets: var("DOCKER_SECRETS"),
        keycloak_secrets: var("KEYCLOAK_SECRETS"),
        config_secrets: var("CONFIG_SECRETS"),
        use_remote_database: flag("USE_REMOTE_DATABASE"),
        local_database_compose_file: env::var("LOCAL_DATABASE_COMPOSE_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        local_database_volumes,
        reset_keycloak: flag("RESET_KEYCLOAK"),
    }
}

fn var(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

/// 布尔开关：`1` 或 `true`（不区分大小写）
pub fn flag(name: &str) -> bool {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// 逗号分隔列表，忽略空项
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 单条远程命令超时（秒）
    pub const COMMAND_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 容器状态轮询截止时间（秒）
    pub const CONTAINER_WAIT_TIMEOUT_SECS: u64 = 180;

    /// 容器状态轮询间隔（秒）
    pub const CONTAINER_WAIT_INTERVAL_SECS: u64 = 2;

    /// 部署锁退避区间（毫秒）
    pub const LOCK_BACKOFF_MIN_MS: u64 = 3_000;
    pub const LOCK_BACKOFF_MAX_MS: u64 = 6_000;

    /// 连续读取锁失败上限
    pub const LOCK_MAX_READ_FAILURES: u32 = 3;

    /// 最低可用磁盘空间
    pub const MIN_FREE_DISK_BYTES: u64 = 2 * 1024 * 1024 * 1024;

    /// 可用空间至少为发布包大小的倍数
    pub const DISK_ARCHIVE_FACTOR: u64 = 3;
}
