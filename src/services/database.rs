//! 数据库准备
//!
//! 远程模式：在数据库服务器上检查并创建应用库、有状态后端库和 Keycloak 库。
//! 本地模式：检查并创建持久卷。两种模式都是先检查再创建，从不删除已有数据。

use std::collections::BTreeSet;

use tracing::info;

use crate::config::OrchestratorSettings;
use crate::domain::secrets::KnexConnection;
use crate::error::DeployResult;
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::db_client::DbTarget;
use crate::services::smoke_test::{DatabaseMode, ValidatedConfig};

/// 本次调用的结果
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

impl ProvisionReport {
    pub fn summary(&self) -> String {
        format!("{} created, {} already present", self.created.len(), self.existing.len())
    }
}

pub struct DatabaseProvisioner<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> DatabaseProvisioner<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    pub async fn ensure_databases(
        &self,
        config: &ValidatedConfig,
    ) -> DeployResult<ProvisionReport> {
        match config.database_mode() {
            DatabaseMode::Remote => {
                self.ensure_remote(&[
                    config.backend_db(),
                    config.stateful_backend_db(),
                    config.keycloak_db(),
                ])
                .await
            }
            DatabaseMode::Local { volumes, .. } => self.ensure_volumes(volumes).await,
        }
    }

    async fn ensure_remote(
        &self,
        connections: &[&KnexConnection],
    ) -> DeployResult<ProvisionReport> {
        let mut report = ProvisionReport::default();
        let mut seen = BTreeSet::new();

        for connection in connections {
            let key = (connection.host.clone(), connection.port, connection.database.clone());
            if !seen.insert(key) {
                continue;
            }
            let target = DbTarget::remote(connection, &self.settings.db_client_image);
            let label = format!("{}/{}", target.describe(), connection.database);

            if target.database_exists(self.executor, &connection.database).await? {
                info!(database = %label, "Database already exists");
                report.existing.push(label);
            } else {
                target.create_database(self.executor, &connection.database).await?;
                info!(database = %label, "Database created");
                report.created.push(label);
            }
        }
        Ok(report)
    }

    async fn ensure_volumes(&self, volumes: &[String]) -> DeployResult<ProvisionReport> {
        let mut report = ProvisionReport::default();

        for volume in volumes {
            let exists = self
                .executor
                .run(&format!(
                    "docker volume inspect {} >/dev/null 2>&1 && echo yes || echo no",
                    quote(volume)
                ))
                .await?;
            if exists.trim() == "yes" {
                info!(volume = %volume, "Volume already exists");
                report.existing.push(volume.clone());
            } else {
                self.executor
                    .run(&format!("docker volume create {}", quote(volume)))
                    .await?;
                info!(volume = %volume, "Volume created");
                report.created.push(volume.clone());
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::DeployConfig;
    use crate::infra::fake::FakeExecutor;
    use crate::services::smoke_test::fixtures::{backend_secrets, local_config, remote_config};

    #[tokio::test]
    async fn test_local_mode_creates_missing_volumes_only() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config());
        let executor = FakeExecutor::new()
            .on("volume inspect shop-pgdata", "yes")
            .on("volume inspect", "no");

        let report = DatabaseProvisioner::new(&executor, &settings)
            .ensure_databases(&config)
            .await
            .unwrap();

        assert_eq!(report.existing, vec!["shop-pgdata"]);
        assert_eq!(report.created, vec!["shop-keycloak-pgdata"]);
        assert!(executor.ran("docker volume create shop-keycloak-pgdata"));
        assert!(!executor.ran("docker volume create shop-pgdata"));
        assert!(!executor.ran("psql"));
    }

    #[tokio::test]
    async fn test_remote_mode_checks_before_creating() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&remote_config());
        let executor = FakeExecutor::new()
            .on("datname = '\\''shop'\\''", "1")
            .on("pg_database", "");

        let report = DatabaseProvisioner::new(&executor, &settings)
            .ensure_databases(&config)
            .await
            .unwrap();

        assert_eq!(report.existing.len(), 1);
        assert_eq!(report.created.len(), 2);
        assert_eq!(executor.count("CREATE DATABASE"), 2);
        assert!(!executor.ran("CREATE DATABASE \"shop\""));
        assert!(!executor.ran("docker volume"));
    }

    #[tokio::test]
    async fn test_remote_mode_deduplicates_databases() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&DeployConfig {
            stateful_backend_secrets: backend_secrets("shop"),
            ..remote_config()
        });
        let executor = FakeExecutor::new().on("pg_database", "1");

        let report = DatabaseProvisioner::new(&executor, &settings)
            .ensure_databases(&config)
            .await
            .unwrap();

        assert_eq!(report.existing.len(), 2);
        assert_eq!(executor.count("pg_database"), 2);
        assert_eq!(executor.count("CREATE DATABASE"), 0);
    }
}
