//! 部署锁
//!
//! 远程主机上一个众所周知的文件，内容为持有者的发布标签。
//! 获取：noclobber 原子创建；冲突时读出持有者标签比较新旧：
//! - 自己更新：立即放弃（`LockError::Superseded`）
//! - 否则（包括同一标签的重复部署）：随机退避 3~6 秒后重试
//!
//! 连续读取失败达到上限即放弃；锁在读取前消失不算失败，立即重试。释放时只删除内容仍等于自己标签的锁。
//! 锁没有过期时间：进程在持锁期间崩溃需要人工 `unlock`。

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::LockPolicy;
use crate::domain::tag::DeployTag;
use crate::error::LockError;
use crate::infra::remote::{quote, RemoteCommandError};
use crate::infra::RemoteExecutor;

/// 锁文件存储
#[async_trait]
pub trait LockFile: Send + Sync {
    /// 原子创建并写入；已存在时返回 false
    async fn try_create(&self, content: &str) -> Result<bool, RemoteCommandError>;

    /// 读取内容；不存在时返回 None
    async fn read(&self) -> Result<Option<String>, RemoteCommandError>;

    /// 内容等于 `expected` 时删除，返回是否删除
    async fn remove_if(&self, expected: &str) -> Result<bool, RemoteCommandError>;
}

/// 远程主机上的锁文件
pub struct RemoteLockFile<'a> {
    executor: &'a dyn RemoteExecutor,
    path: String,
}

impl<'a> RemoteLockFile<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, path: impl Into<String>) -> Self {
        Self {
            executor,
            path: path.into(),
        }
    }
}

#[async_trait]
impl LockFile for RemoteLockFile<'_> {
    async fn try_create(&self, content: &str) -> Result<bool, RemoteCommandError> {
        let output = self
            .executor
            .run(&format!(
                "(set -o noclobber; echo {} > {}) 2>/dev/null && echo acquired || echo held",
                quote(content),
                quote(&self.path)
            ))
            .await?;
        Ok(output.trim() == "acquired")
    }

    async fn read(&self) -> Result<Option<String>, RemoteCommandError> {
        let output = self
            .executor
            .run(&format!(
                "if [ -e {path} ]; then cat {path}; else echo __absent__; fi",
                path = quote(&self.path)
            ))
            .await?;
        let content = output.trim();
        if content == "__absent__" {
            Ok(None)
        } else {
            Ok(Some(content.to_string()))
        }
    }

    async fn remove_if(&self, expected: &str) -> Result<bool, RemoteCommandError> {
        let output = self
            .executor
            .run(&format!(
                "if [ \"$(cat {path} 2>/dev/null)\" = {tag} ]; then rm -f {path} && echo released; else echo kept; fi",
                path = quote(&self.path),
                tag = quote(expected)
            ))
            .await?;
        Ok(output.trim() == "released")
    }
}

/// 部署锁
pub struct DeploymentLock<'a> {
    file: &'a dyn LockFile,
    policy: &'a LockPolicy,
}

impl<'a> DeploymentLock<'a> {
    pub fn new(file: &'a dyn LockFile, policy: &'a LockPolicy) -> Self {
        Self { file, policy }
    }

    fn backoff(&self) -> Duration {
        let min = self.policy.backoff_min.as_millis() as u64;
        let max = (self.policy.backoff_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// 获取锁，成功时返回持有的标签
    pub async fn acquire(&self, tag: &DeployTag) -> Result<DeployTag, LockError> {
        let mut read_failures = 0u32;

        loop {
            match self.file.try_create(tag.as_str()).await {
                Ok(true) => {
                    info!(tag = %tag, path = %self.policy.path, "Deploy lock acquired");
                    return Ok(tag.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    read_failures += 1;
                    warn!(error = %e, attempt = read_failures, "Failed to create deploy lock");
                    self.check_failures(read_failures, &e)?;
                    tokio::time::sleep(self.backoff()).await;
                    continue;
                }
            }

            let holder = match self.file.read().await {
                Ok(Some(holder)) => {
                    read_failures = 0;
                    holder
                }
                Ok(None) => {
                    // 持有者刚刚释放，立即重试
                    debug!(tag = %tag, "Deploy lock released while reading, retrying");
                    continue;
                }
                Err(e) => {
                    read_failures += 1;
                    warn!(error = %e, attempt = read_failures, "Failed to read deploy lock");
                    self.check_failures(read_failures, &e)?;
                    tokio::time::sleep(self.backoff()).await;
                    continue;
                }
            };

            let error = contention(tag, &holder);
            if !error.is_retryable() {
                warn!(holder = %holder, contender = %tag, "Giving up on deploy lock");
                return Err(error);
            }

            let wait = self.backoff();
            info!(holder = %holder, wait = ?wait, "{}", error);
            tokio::time::sleep(wait).await;
        }
    }

    fn check_failures(&self, failures: u32, last: &RemoteCommandError) -> Result<(), LockError> {
        if failures >= self.policy.max_read_failures {
            Err(LockError::Unreadable {
                attempts: failures,
                last: last.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// 释放锁；锁已被其他标签持有时不做任何事
    pub async fn release(&self, tag: &DeployTag) -> Result<bool, RemoteCommandError> {
        let released = self.file.remove_if(tag.as_str()).await?;
        if released {
            info!(tag = %tag, "Deploy lock released");
        } else {
            warn!(tag = %tag, "Deploy lock is not held by this tag, leaving it in place");
        }
        Ok(released)
    }
}

/// 冲突判定：比持有者新的部署放弃，其余退避重试
fn contention(contender: &DeployTag, holder: &str) -> LockError {
    match DeployTag::parse(holder) {
        Ok(holder_tag) if contender.is_newer_than(&holder_tag) => LockError::Superseded {
            holder: holder.to_string(),
            contender: contender.to_string(),
        },
        Ok(_) => LockError::Contended {
            holder: holder.to_string(),
        },
        Err(e) => {
            warn!(error = %e, "Deploy lock holds an unparsable tag");
            LockError::Contended {
                holder: holder.to_string(),
            }
        }
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    /// 内存中的锁文件
    #[derive(Default)]
    pub struct MemoryLockFile {
        content: Mutex<Option<String>>,
        failing_reads: Mutex<u32>,
        vanishing_reads: Mutex<u32>,
        create_attempts: Mutex<u32>,
    }

    impl MemoryLockFile {
        pub fn held_by(tag: &str) -> Self {
            let file = Self::default();
            *file.content.lock().unwrap() = Some(tag.to_string());
            file
        }

        /// 接下来的 `n` 次读取失败
        pub fn fail_reads(&self, n: u32) {
            *self.failing_reads.lock().unwrap() = n;
        }

        /// 接下来的 `n` 次读取看不到锁文件，仿佛持有者刚刚释放
        pub fn vanish_reads(&self, n: u32) {
            *self.vanishing_reads.lock().unwrap() = n;
        }

        pub fn content(&self) -> Option<String> {
            self.content.lock().unwrap().clone()
        }

        pub fn create_attempts(&self) -> u32 {
            *self.create_attempts.lock().unwrap()
        }
    }

    #[async_trait]
    impl LockFile for MemoryLockFile {
        async fn try_create(&self, content: &str) -> Result<bool, RemoteCommandError> {
            *self.create_attempts.lock().unwrap() += 1;
            let mut current = self.content.lock().unwrap();
            if current.is_some() {
                return Ok(false);
            }
            *current = Some(content.to_string());
            Ok(true)
        }

        async fn read(&self) -> Result<Option<String>, RemoteCommandError> {
            let mut failing = self.failing_reads.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(RemoteCommandError::new("read failed").with_output(
                    Some(255),
                    "",
                    "connection reset",
                ));
            }
            let mut vanishing = self.vanishing_reads.lock().unwrap();
            if *vanishing > 0 {
                *vanishing -= 1;
                return Ok(None);
            }
            Ok(self.content.lock().unwrap().clone())
        }

        async fn remove_if(&self, expected: &str) -> Result<bool, RemoteCommandError> {
            let mut current = self.content.lock().unwrap();
            if current.as_deref() == Some(expected) {
                *current = None;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }
}
