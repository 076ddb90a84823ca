//! 基础设施模块
//!
//! 封装外部依赖（本地命令执行、远程 shell）

pub mod command;
pub mod remote;

#[cfg(test)]
pub mod fake;

pub use command::{CommandError, CommandRunner};
pub use remote::{RemoteCommandError, RemoteExecutor, SshExecutor};
