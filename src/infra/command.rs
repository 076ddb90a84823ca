//! 本地命令执行器
//!
//! 用于启动 ssh/scp 等本地子进程：
//! - 捕获 stdout/stderr
//! - 超时控制（超时后杀死子进程）

use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::error;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// 命令超时
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

impl CommandRunner {
    /// 执行命令并捕获输出
    ///
    /// 非零退出码不视为错误，由调用方检查 `Output::status`。
    pub async fn run(
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Output, CommandError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        tokio::select! {
            result = child => {
                result.map_err(|source| CommandError::SpawnFailed {
                    program: program.to_string(),
                    source,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                error!(program, ?timeout, "Command timed out, killing process");
                Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                })
            }
        }
    }
}
