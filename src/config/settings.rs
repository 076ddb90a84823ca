//! 编排器运行参数
//!
//! 构造一次后不再修改，按引用传入各个服务。

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::env::constants::{
    COMMAND_TIMEOUT_SECS, CONTAINER_WAIT_INTERVAL_SECS, CONTAINER_WAIT_TIMEOUT_SECS,
    DISK_ARCHIVE_FACTOR, LOCK_BACKOFF_MAX_MS, LOCK_BACKOFF_MIN_MS, LOCK_MAX_READ_FAILURES,
    MIN_FREE_DISK_BYTES,
};
use crate::config::env::parse_list;

/// 轮询策略：墙钟截止时间 + 轮询间隔
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(CONTAINER_WAIT_TIMEOUT_SECS),
            interval: Duration::from_secs(CONTAINER_WAIT_INTERVAL_SECS),
        }
    }
}

/// 部署锁参数
#[derive(Clone, Debug, PartialEq)]
pub struct LockPolicy {
    pub path: String,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub max_read_failures: u32,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            path: "/tmp/deploy.lock".to_string(),
            backoff_min: Duration::from_millis(LOCK_BACKOFF_MIN_MS),
            backoff_max: Duration::from_millis(LOCK_BACKOFF_MAX_MS),
            max_read_failures: LOCK_MAX_READ_FAILURES,
        }
    }
}

/// 编排器参数
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// 远程根目录
    pub remote_root: String,
    /// SSH 用户
    pub ssh_user: String,
    /// SSH 端口
    pub ssh_port: u16,
    /// 单条远程命令超时
    pub command_timeout: Duration,
    /// 本地发布包目录（包文件名为 `<tag>.tar.gz`）
    pub archive_dir: PathBuf,
    /// 容器状态轮询
    pub container_wait: WaitPolicy,
    /// 部署锁
    pub lock: LockPolicy,
    /// 期望的目标系统（/etc/os-release 中的 ID）
    pub expected_os: String,
    /// 必需的主机软件包（缺失时自动安装）
    pub required_packages: Vec<String>,
    /// 最低可用磁盘空间
    pub min_free_disk_bytes: u64,
    /// 可用空间至少为发布包大小的倍数
    pub disk_archive_factor: u64,
    /// 一次性数据库客户端镜像
    pub db_client_image: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            remote_root: "/opt/deploy".to_string(),
            ssh_user: "deploy".to_string(),
            ssh_port: 22,
            command_timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            archive_dir: PathBuf::from("dist"),
            container_wait: WaitPolicy::default(),
            lock: LockPolicy::default(),
            expected_os: "ubuntu".to_string(),
            required_packages: vec!["tar".to_string(), "gzip".to_string(), "curl".to_string()],
            min_free_disk_bytes: MIN_FREE_DISK_BYTES,
            disk_archive_factor: DISK_ARCHIVE_FACTOR,
            db_client_image: "postgres:16-alpine".to_string(),
        }
    }
}

impl OrchestratorSettings {
    /// 从环境变量加载，未设置的使用默认值
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let remote_root = env::var("DEPLOY_ROOT")
            .ok()
            .filter(|s| s.starts_with('/'))
            .unwrap_or(defaults.remote_root);

        let ssh_user = env::var("DEPLOY_SSH_USER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.ssh_user);

        let ssh_port = env::var("DEPLOY_SSH_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.ssh_port);

        let command_timeout = env::var("DEPLOY_COMMAND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout);

        let archive_dir = env::var("DEPLOY_ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.archive_dir);

        let container_wait = WaitPolicy {
            timeout: env::var("CONTAINER_WAIT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.container_wait.timeout),
            interval: env::var("CONTAINER_WAIT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.container_wait.interval),
        };

        let mut lock = defaults.lock;
        if let Ok(path) = env::var("DEPLOY_LOCK_PATH") {
            if path.starts_with('/') {
                lock.path = path;
            }
        }

        let expected_os = env::var("DEPLOY_EXPECTED_OS").unwrap_or(defaults.expected_os);

        let required_packages = env::var("DEPLOY_REQUIRED_PACKAGES")
            .map(|v| parse_list(&v))
            .unwrap_or(defaults.required_packages);

        let db_client_image = env::var("DB_CLIENT_IMAGE").unwrap_or(defaults.db_client_image);

        Self {
            remote_root,
            ssh_user,
            ssh_port,
            command_timeout,
            archive_dir,
            container_wait,
            lock,
            expected_os,
            required_packages,
            min_free_disk_bytes: defaults.min_free_disk_bytes,
            disk_archive_factor: defaults.disk_archive_factor,
            db_client_image,
        }
    }

    /// 发布包本地路径
    pub fn archive_path(&self, tag: &str) -> PathBuf {
        self.archive_dir.join(format!("{}.tar.gz", tag))
    }

    /// 所需磁盘空间：max(倍数 × 包大小, 下限)
    pub fn required_disk_bytes(&self, archive_size: u64) -> u64 {
        archive_size
            .saturating_mul(self.disk_archive_factor)
            .max(self.min_free_disk_bytes)
    }
}
