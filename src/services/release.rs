//! 发布目录与 `active` 链接
//!
//! 同一时刻最多只有一个发布生效：`unlink` 删除链接及其目标目录，
//! `copy_deployment_file` 上传并解包新发布，`link` 把 `active` 指向新标签。
//! `unlink` 与 `link` 之间没有生效的发布，必须处于维护窗口内。

use tracing::info;

use crate::config::OrchestratorSettings;
use crate::error::DeployResult;
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::smoke_test::ValidatedConfig;

pub struct ReleaseLinker<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> ReleaseLinker<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    /// 当前 `active` 指向的发布目录名；从未激活过时为 None
    pub async fn active_release(&self, config: &ValidatedConfig) -> DeployResult<Option<String>> {
        let layout = config.layout(self.settings);
        let target = self
            .executor
            .run(&format!("readlink {} || true", quote(&layout.active_link())))
            .await?;
        let target = target.trim().trim_end_matches('/');
        if target.is_empty() {
            return Ok(None);
        }
        // 链接目标可能是相对名也可能是绝对路径
        let name = target.rsplit('/').next().unwrap_or(target);
        Ok(Some(name.to_string()))
    }

    /// 删除 `active` 链接及其指向的发布目录；没有链接时什么也不做
    pub async fn unlink(&self, config: &ValidatedConfig) -> DeployResult<Option<String>> {
        let Some(previous) = self.active_release(config).await? else {
            info!(app = %config.app_name(), "No active release to unlink");
            return Ok(None);
        };

        let layout = config.layout(self.settings);
        self.executor
            .run(&format!(
                "rm -f {} && rm -rf {}",
                quote(&layout.active_link()),
                quote(&layout.release_dir_named(&previous))
            ))
            .await?;
        info!(previous = %previous, "Active release unlinked");
        Ok(Some(previous))
    }

    /// 上传并解包发布包
    pub async fn copy_deployment_file(&self, config: &ValidatedConfig) -> DeployResult<()> {
        let layout = config.layout(self.settings);
        let tag = config.tag();
        let upload = layout.upload_archive(tag);
        let release_dir = layout.release_dir(tag);

        self.executor
            .run(&format!("mkdir -p {}", quote(layout.app_dir())))
            .await?;
        info!(
            local = %config.archive().path.display(),
            remote = %upload,
            "Uploading release archive"
        );
        self.executor.copy_file(&config.archive().path, &upload).await?;

        self.executor
            .run(&format!(
                "rm -rf {dir} && tar -xzf {archive} -C {app} && rm -f {archive}",
                dir = quote(&release_dir),
                archive = quote(&upload),
                app = quote(layout.app_dir())
            ))
            .await?;
        info!(release = %release_dir, "Release unpacked");
        Ok(())
    }

    /// `active -> <tag>`
    pub async fn link(&self, config: &ValidatedConfig) -> DeployResult<()> {
        let layout = config.layout(self.settings);
        self.executor
            .run(&format!(
                "ln -sfn {} {}",
                quote(config.tag().as_str()),
                quote(&layout.active_link())
            ))
            .await?;
        info!(tag = %config.tag(), "Release linked as active");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::fake::FakeExecutor;
    use crate::services::smoke_test::fixtures::local_config;

    #[tokio::test]
    async fn test_unlink_without_active_release_is_noop() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config());
        let executor = FakeExecutor::new();
        let linker = ReleaseLinker::new(&executor, &settings);

        assert_eq!(linker.unlink(&config).await.unwrap(), None);
        assert_eq!(linker.unlink(&config).await.unwrap(), None);
        assert!(!executor.ran("rm -"));
    }

    #[tokio::test]
    async fn test_unlink_removes_link_and_target() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config());
        let executor = FakeExecutor::new().on("readlink", "25.0601.0900.00\n");
        let linker = ReleaseLinker::new(&executor, &settings);

        let previous = linker.unlink(&config).await.unwrap();
        assert_eq!(previous.as_deref(), Some("25.0601.0900.00"));
        assert!(executor.ran(
            "rm -f /opt/deploy/shop/active && rm -rf /opt/deploy/shop/25.0601.0900.00"
        ));
    }

    #[tokio::test]
    async fn test_absolute_link_target() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config());
        let executor = FakeExecutor::new().on("readlink", "/opt/deploy/shop/25.0601.0900.00/");
        let linker = ReleaseLinker::new(&executor, &settings);
        assert_eq!(
            linker.active_release(&config).await.unwrap().as_deref(),
            Some("25.0601.0900.00")
        );
    }

    #[tokio::test]
    async fn test_copy_then_link() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config());
        let executor = FakeExecutor::new();
        let linker = ReleaseLinker::new(&executor, &settings);

        linker.copy_deployment_file(&config).await.unwrap();
        linker.link(&config).await.unwrap();

        let copies = executor.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].1, "/opt/deploy/shop/25.0615.1000.00.tar.gz");

        let unpack = executor.position("tar -xzf").unwrap();
        let command = &executor.commands()[unpack];
        assert!(command.starts_with("rm -rf /opt/deploy/shop/25.0615.1000.00 &&"));
        assert!(command.ends_with("rm -f /opt/deploy/shop/25.0615.1000.00.tar.gz"));
        assert!(executor.ran("ln -sfn 25.0615.1000.00 /opt/deploy/shop/active"));
        assert!(unpack < executor.position("ln -sfn").unwrap());
    }
}
