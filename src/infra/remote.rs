//! 远程命令执行
//!
//! `RemoteExecutor` 是编排逻辑与远程主机之间唯一的端口。
//! 生产实现 `SshExecutor` 通过本地 `ssh`/`scp` 二进制工作；
//! 命令文本先做 base64 编码再传输，远端解码后交给 bash，
//! 因此任意引号、换行都能无损传输，不需要逐字转义。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{error, info};

use crate::infra::command::CommandRunner;

/// 远程命令失败
#[derive(Debug, Clone, Error)]
#[error("{message}: {}", summarize(.stderr, .stdout))]
pub struct RemoteCommandError {
    pub message: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn summarize(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    "no output".to_string()
}

impl RemoteCommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_output(
        mut self,
        exit_code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        self.exit_code = exit_code;
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }
}

/// 远程执行端口
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// 执行命令并返回原始 stdout，不写日志
    async fn execute(&self, command: &str) -> Result<String, RemoteCommandError>;

    /// 复制本地文件到远程路径
    async fn copy_file(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteCommandError>;

    /// 执行命令，记录命令与（裁剪后的）输出
    async fn run(&self, command: &str) -> Result<String, RemoteCommandError> {
        info!(command = %command, ">>> remote");
        match self.execute(command).await {
            Ok(output) => {
                let output = output.trim().to_string();
                if !output.is_empty() {
                    info!(output = %output, "<<< remote");
                }
                Ok(output)
            }
            Err(e) => {
                error!(
                    exit_code = ?e.exit_code,
                    stdout = %e.stdout.trim(),
                    stderr = %e.stderr.trim(),
                    "Remote command failed"
                );
                Err(e)
            }
        }
    }

    /// 静默执行（命令中含有凭据时使用）
    async fn run_silent(&self, command: &str) -> Result<String, RemoteCommandError> {
        self.execute(command).await.map(|output| output.trim().to_string())
    }
}

/// 单个参数的 shell 引用
pub fn quote(arg: &str) -> String {
    shell_words::quote(arg).into_owned()
}

/// 远端解码执行的包装命令
pub fn encode_for_transport(command: &str) -> String {
    format!(
        "bash -o pipefail -c \"$(echo {} | base64 -d)\"",
        STANDARD.encode(command.as_bytes())
    )
}

/// 基于本地 ssh/scp 的执行器
#[derive(Clone, Debug)]
pub struct SshExecutor {
    host: String,
    user: String,
    port: u16,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        port: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port,
            timeout,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn common_options() -> Vec<String> {
        ["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new", "-o", "ConnectTimeout=20"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, command: &str) -> Result<String, RemoteCommandError> {
        let mut args = Self::common_options();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push(self.destination());
        args.push(encode_for_transport(command));

        let output = CommandRunner::run("ssh", &args, self.timeout)
            .await
            .map_err(|e| RemoteCommandError::new(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(stdout)
        } else {
            let code = output.status.code();
            Err(RemoteCommandError::new(format!(
                "Remote command on {} exited with code {}",
                self.host,
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
            ))
            .with_output(code, stdout, stderr))
        }
    }

    async fn copy_file(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteCommandError> {
        info!(local = %local_path.display(), remote = %remote_path, "Copying file to remote");

        let mut args = Self::common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args.push(local_path.display().to_string());
        args.push(format!("{}:{}", self.destination(), remote_path));

        let output = CommandRunner::run("scp", &args, self.timeout)
            .await
            .map_err(|e| RemoteCommandError::new(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RemoteCommandError::new(format!(
                "Copying {} to {}:{} failed",
                local_path.display(),
                self.host,
                remote_path
            ))
            .with_output(
                output.status.code(),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}
