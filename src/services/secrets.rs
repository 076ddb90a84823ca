//! 密钥注入
//!
//! 把密钥写入本地临时目录，逐个上传到 `<release>/.deploy-secrets/`，
//! 再调用发布内的 `scripts/merge-secrets.sh` 生成 `.env` 与 `keycloak/realm.json`。
//! 远程密钥目录无论成功与否都会被删除。

use std::path::PathBuf;

use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::OrchestratorSettings;
use crate::error::DeployResult;
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::smoke_test::ValidatedConfig;

const SECRETS_DIR: &str = ".deploy-secrets";

pub struct SecretsInjector<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> SecretsInjector<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    /// 写出本地密钥文件，返回 (文件名, 本地路径)
    async fn write_local(
        &self,
        dir: &TempDir,
        config: &ValidatedConfig,
    ) -> DeployResult<Vec<(String, PathBuf)>> {
        let secrets = config.secrets();
        let files = [
            ("backend.json", &secrets.backend),
            ("stateful-backend.json", &secrets.stateful_backend),
            ("docker.env", &secrets.docker),
            ("keycloak.json", &secrets.keycloak),
            ("config.json", &secrets.config),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, content) in files {
            let path = dir.path().join(name);
            tokio::fs::write(&path, content.as_bytes()).await?;
            written.push((name.to_string(), path));
        }
        Ok(written)
    }

    pub async fn inject(&self, config: &ValidatedConfig) -> DeployResult<()> {
        let local = tempfile::Builder::new().prefix("deploy-secrets").tempdir()?;
        let files = self.write_local(&local, config).await?;

        let release_dir = config.layout(self.settings).release_dir(config.tag());
        let remote_dir = format!("{}/{}", release_dir, SECRETS_DIR);

        let result = self.upload_and_merge(config, &release_dir, &remote_dir, &files).await;

        if let Err(e) = self.executor.run(&format!("rm -rf {}", quote(&remote_dir))).await {
            warn!(error = %e, dir = %remote_dir, "Failed to remove remote secrets directory");
            result?;
            return Err(e.into());
        }
        result?;
        info!(tag = %config.tag(), "Secrets merged into release");
        Ok(())
    }

    async fn upload_and_merge(
        &self,
        config: &ValidatedConfig,
        release_dir: &str,
        remote_dir: &str,
        files: &[(String, PathBuf)],
    ) -> DeployResult<()> {
        self.executor
            .run(&format!(
                "mkdir -p {dir} && chmod 700 {dir}",
                dir = quote(remote_dir)
            ))
            .await?;

        for (name, path) in files {
            self.executor
                .copy_file(path, &format!("{}/{}", remote_dir, name))
                .await?;
        }

        self.executor
            .run(&format!(
                "bash {} {} {} {}",
                quote(&format!("{}/scripts/merge-secrets.sh", release_dir)),
                quote(release_dir),
                quote(remote_dir),
                config.environment()
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::fake::FakeExecutor;
    use crate::services::smoke_test::fixtures::local_config;

    #[tokio::test]
    async fn test_inject_uploads_and_merges() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config());
        let executor = FakeExecutor::new();

        SecretsInjector::new(&executor, &settings).inject(&config).await.unwrap();

        let copies = executor.copies();
        assert_eq!(copies.len(), 5);
        let secrets_dir = "/opt/deploy/shop/25.0615.1000.00/.deploy-secrets/";
        assert!(copies.iter().all(|(_, remote)| remote.starts_with(secrets_dir)));
        // 本地临时目录在注入后被清理
        assert!(copies.iter().all(|(local, _)| !local.exists()));

        let merge = executor.position("merge-secrets.sh").unwrap();
        assert!(executor.commands()[merge].ends_with(
            "/opt/deploy/shop/25.0615.1000.00 /opt/deploy/shop/25.0615.1000.00/.deploy-secrets staging"
        ));
        let cleanup = executor.position("rm -rf /opt/deploy/shop/25.0615.1000.00/.deploy-secrets");
        assert!(cleanup.unwrap() > merge);
    }

    #[tokio::test]
    async fn test_secrets_removed_when_merge_fails() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config());
        let executor = FakeExecutor::new().fail_on("merge-secrets.sh", "template error");

        let err = SecretsInjector::new(&executor, &settings).inject(&config).await.unwrap_err();
        assert!(err.to_string().contains("template error"));
        assert!(executor.ran("rm -rf /opt/deploy/shop/25.0615.1000.00/.deploy-secrets"));
    }
}
