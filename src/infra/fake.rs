//! 测试用的脚本化远程执行器
//!
//! 记录每条命令，按子串匹配规则返回预设输出；未匹配的命令返回空输出。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::remote::{RemoteCommandError, RemoteExecutor};

enum Response {
    Output(String),
    Fail(String),
}

struct Rule {
    pattern: String,
    response: Response,
    remaining: Option<usize>,
}

#[derive(Default)]
pub struct FakeExecutor {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    copies: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, pattern: &str, response: Response, remaining: Option<usize>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            response,
            remaining,
        });
        self
    }

    /// 匹配到 `pattern` 的命令返回 `output`
    pub fn on(self, pattern: &str, output: &str) -> Self {
        self.push(pattern, Response::Output(output.to_string()), None)
    }

    /// 只生效一次的规则，先注册先消费
    pub fn on_once(self, pattern: &str, output: &str) -> Self {
        self.push(pattern, Response::Output(output.to_string()), Some(1))
    }

    /// 匹配到 `pattern` 的命令以 `stderr` 失败
    pub fn fail_on(self, pattern: &str, stderr: &str) -> Self {
        self.push(pattern, Response::Fail(stderr.to_string()), None)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<(PathBuf, String)> {
        self.copies.lock().unwrap().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }

    /// 第一条包含 `pattern` 的命令的序号
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .position(|c| c.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(&self, command: &str) -> Result<String, RemoteCommandError> {
        self.commands.lock().unwrap().push(command.to_string());

        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|r| command.contains(&r.pattern) && r.remaining != Some(0));

        match rule {
            Some(rule) => {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                match &rule.response {
                    Response::Output(out) => Ok(out.clone()),
                    Response::Fail(stderr) => Err(RemoteCommandError::new("fake failure")
                        .with_output(Some(1), "", stderr.clone())),
                }
            }
            None => Ok(String::new()),
        }
    }

    async fn copy_file(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteCommandError> {
        self.copies
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), remote_path.to_string()));
        Ok(())
    }
}
