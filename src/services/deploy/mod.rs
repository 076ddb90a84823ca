//! 部署编排
//!
//! `DeploymentOrchestrator::deploy` 是唯一入口，按固定顺序执行：
//! 加锁 → 日志目录 → 停止旧发布 → unlink → 上传解包 → 初始化主机 → 注入密钥
//! → 维护页面 → 数据库 → 导出用户/备份 → 导入 realm → 导入用户（失败回滚）
//! → 撤下维护页面 → link → 启动 → 释放锁。
//!
//! 锁在任何情况下都会释放；维护页面只有在回滚成功时才会在失败路径上撤下。

pub mod context;

use tracing::{error, info, warn};

use crate::config::OrchestratorSettings;
use crate::domain::deploy::{DeployStatus, Stage};
use crate::error::{DeployError, DeployResult, RollbackOutcome};
use crate::infra::RemoteExecutor;
use crate::services::compose::running_containers;
use crate::services::database::DatabaseProvisioner;
use crate::services::keycloak::{IdentityMigrator, IMPORT_INSTANCE};
use crate::services::lock::{DeploymentLock, RemoteLockFile};
use crate::services::release::ReleaseLinker;
use crate::services::secrets::SecretsInjector;
use crate::services::server::ServerLifecycle;
use crate::services::smoke_test::{SmokeTest, ValidatedConfig};

pub use context::{DeployContext, DeployReport};

pub struct DeploymentOrchestrator<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> DeploymentOrchestrator<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    /// 执行一次完整部署
    pub async fn deploy(&self, config: &ValidatedConfig) -> DeployResult<DeployReport> {
        let mut ctx = DeployContext::new(config);
        info!(
            app = %config.app_name(),
            tag = %config.tag(),
            environment = %config.environment(),
            server = %config.server(),
            "Starting deploy"
        );

        let lock_file = RemoteLockFile::new(self.executor, self.settings.lock.path.clone());
        let lock = DeploymentLock::new(&lock_file, &self.settings.lock);

        ctx.start(Stage::AcquireLock);
        let acquired = lock.acquire(config.tag()).await.map_err(DeployError::from);
        if let Err(e) = ctx.finish(Stage::AcquireLock, acquired) {
            ctx.log_summary(DeployStatus::Failed);
            return Err(e);
        }

        let mut result = self.run_pipeline(&mut ctx).await;
        if let Err(e) = &result {
            ctx.tracker.fail_running(&e.to_string());
        }

        ctx.start(Stage::ReleaseLock);
        match lock.release(config.tag()).await {
            Ok(true) => ctx.tracker.succeed(Stage::ReleaseLock),
            Ok(false) => ctx
                .tracker
                .succeed_with(Stage::ReleaseLock, "lock owned by another deploy, left in place"),
            Err(e) => {
                ctx.tracker.fail(Stage::ReleaseLock, e.to_string());
                if result.is_ok() {
                    result = Err(e.into());
                } else {
                    warn!(error = %e, "Failed to release deploy lock after a failed deploy");
                }
            }
        }

        match result {
            Ok(()) => {
                ctx.log_summary(DeployStatus::Success);
                Ok(ctx.into_report(DeployStatus::Success))
            }
            Err(e) => {
                error!(error = %e, "Deploy failed");
                ctx.log_summary(DeployStatus::Failed);
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, ctx: &mut DeployContext<'_>) -> DeployResult<()> {
        let config = ctx.config;
        let server = ServerLifecycle::new(self.executor, self.settings);
        let linker = ReleaseLinker::new(self.executor, self.settings);
        let identity = IdentityMigrator::new(self.executor, self.settings);

        ctx.start(Stage::PrepareLogs);
        let r = server.prepare_logs(config).await;
        ctx.finish(Stage::PrepareLogs, r)?;

        ctx.start(Stage::StopRelease);
        match linker.active_release(config).await {
            Ok(Some(active)) => {
                let r = self.stop_active(ctx, &server, &active).await;
                ctx.finish_with(Stage::StopRelease, r, format!("stopped {}", active))?;
            }
            Ok(None) => ctx.skip(Stage::StopRelease, "no active release"),
            Err(e) => return ctx.finish(Stage::StopRelease, Err(e)),
        }

        ctx.start(Stage::Unlink);
        let r = linker.unlink(config).await;
        ctx.previous_release = ctx.finish(Stage::Unlink, r)?;

        ctx.start(Stage::CopyRelease);
        let r = linker.copy_deployment_file(config).await;
        ctx.finish(Stage::CopyRelease, r)?;

        ctx.start(Stage::InitServer);
        let r = self.init_server(&server, config).await;
        match ctx.finish(Stage::InitServer, r)? {
            true => {}
            false => ctx.tracker.succeed_with(Stage::InitServer, "already initialized"),
        }

        ctx.start(Stage::InjectSecrets);
        let r = SecretsInjector::new(self.executor, self.settings).inject(config).await;
        ctx.finish(Stage::InjectSecrets, r)?;

        ctx.start(Stage::MaintenanceOn);
        let r = server.maintenance(config, true).await;
        ctx.finish(Stage::MaintenanceOn, r)?;

        ctx.start(Stage::EnsureDatabases);
        let r = DatabaseProvisioner::new(self.executor, self.settings)
            .ensure_databases(config)
            .await;
        let report = ctx.finish(Stage::EnsureDatabases, r)?;
        ctx.tracker.succeed_with(Stage::EnsureDatabases, report.summary());

        let mut exported = false;
        if config.reset_keycloak() {
            ctx.skip(Stage::ExportUsers, "reset mode");
            ctx.skip(Stage::BackupDatabase, "reset mode");
        } else {
            ctx.start(Stage::ExportUsers);
            let r = identity.export_users(config).await;
            exported = ctx.finish(Stage::ExportUsers, r)?;
            if !exported {
                ctx.tracker.succeed_with(Stage::ExportUsers, "realm not present yet");
            }

            ctx.start(Stage::BackupDatabase);
            let r = identity.backup_database(config).await;
            ctx.finish(Stage::BackupDatabase, r)?;
        }

        ctx.start(Stage::ImportRealm);
        let r = identity.import_realm(config).await;
        ctx.finish(Stage::ImportRealm, r)?;

        if config.reset_keycloak() {
            ctx.skip(Stage::ImportUsers, "reset mode");
        } else if !exported {
            ctx.skip(Stage::ImportUsers, "no exported users");
        } else {
            ctx.start(Stage::ImportUsers);
            let r = identity
                .import_users_or_rollback(config, &ctx.previous_containers)
                .await;
            if let Err(e) = ctx.finish(Stage::ImportUsers, r) {
                self.after_failed_migration(ctx, &server, &e).await;
                return Err(e);
            }
        }

        ctx.start(Stage::MaintenanceOff);
        let r = server.maintenance(config, false).await;
        ctx.finish(Stage::MaintenanceOff, r)?;

        ctx.start(Stage::Link);
        let r = linker.link(config).await;
        ctx.finish(Stage::Link, r)?;

        ctx.start(Stage::StartServer);
        let r = server.start(config).await;
        ctx.finish(Stage::StartServer, r)?;

        Ok(())
    }

    /// 记录旧发布的运行容器，然后停止它
    async fn stop_active(
        &self,
        ctx: &mut DeployContext<'_>,
        server: &ServerLifecycle<'_>,
        active: &str,
    ) -> DeployResult<()> {
        let prefix = format!("{}-", ctx.config.app_name());
        let import_instance = ctx.config.container_name(IMPORT_INSTANCE);
        ctx.previous_containers = running_containers(self.executor, &prefix)
            .await?
            .into_iter()
            .filter(|name| *name != import_instance)
            .collect();
        server.stop(ctx.config, active).await
    }

    /// 首次初始化后补跑被推迟的运行时检查
    async fn init_server(
        &self,
        server: &ServerLifecycle<'_>,
        config: &ValidatedConfig,
    ) -> DeployResult<bool> {
        let initialized = server.init_server(config).await?;
        if initialized && config.runtime_checks_deferred() {
            info!("Running container runtime checks deferred from the smoke test");
            SmokeTest::new(self.executor, self.settings)
                .run_deferred_checks(config)
                .await?;
        }
        Ok(initialized)
    }

    /// 回滚成功则撤下维护页面，回滚失败则保留
    async fn after_failed_migration(
        &self,
        ctx: &mut DeployContext<'_>,
        server: &ServerLifecycle<'_>,
        error: &DeployError,
    ) {
        match error {
            DeployError::IdentityMigration {
                rollback: RollbackOutcome::Restored,
                ..
            } => {
                ctx.start(Stage::MaintenanceOff);
                let r = server.maintenance(ctx.config, false).await;
                if let Err(e) = ctx.finish(Stage::MaintenanceOff, r) {
                    error!(
                        error = %e,
                        "Rollback succeeded but the maintenance page could not be hidden"
                    );
                }
            }
            DeployError::IdentityMigration {
                rollback: RollbackOutcome::Failed(_),
                ..
            } => {
                ctx.skip(Stage::MaintenanceOff, "rollback failed, maintenance page left up");
                error!("Maintenance page left up, manual intervention required");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::DeployConfig;
    use crate::domain::deploy::StageStatus;
    use crate::infra::fake::FakeExecutor;
    use crate::services::smoke_test::fixtures::{local_config, remote_config};

    const PREVIOUS: &str = "25.0601.0900.00";

    /// 已部署过、realm 已存在的主机
    fn deployed_host() -> FakeExecutor {
        FakeExecutor::new()
            .on("noclobber", "acquired")
            .on("echo released", "released")
            .on("readlink", PREVIOUS)
            .on("docker ps", "shop-api\nshop-keycloak\n")
            .on("server-init-marker && echo", "yes")
            .on("tablename", "1")
            .on("FROM realm", "1")
            .on("pg_database", "1")
            .on_once("shop-keycloak-import 2>", "running")
            .on("shop-keycloak-import 2>", "exited")
    }

    fn status_of(report: &DeployReport, name: &str) -> StageStatus {
        report
            .stages
            .iter()
            .find(|s| s.stage.name() == name)
            .map(|s| s.status)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_deploy_runs_stages_in_order() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&remote_config());
        let executor = deployed_host();

        let report = DeploymentOrchestrator::new(&executor, &settings)
            .deploy(&config)
            .await
            .unwrap();

        assert_eq!(report.status, DeployStatus::Success);
        assert_eq!(report.previous_release.as_deref(), Some(PREVIOUS));
        assert!(report
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Success));

        let order = [
            "noclobber",
            "mkdir -p /opt/deploy/shop/logs",
            "scripts/server.sh stop staging",
            "rm -f /opt/deploy/shop/active && rm -rf /opt/deploy/shop/25.0601.0900.00",
            "tar -xzf",
            "merge-secrets.sh",
            "maintenance.sh on",
            "pg_database",
            "keycloak export",
            "pg_dump",
            "keycloak import",
            "partialImport",
            "maintenance.sh off",
            "ln -sfn",
            "scripts/server.sh start staging",
            "echo released",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|p| executor.position(p).unwrap_or_else(|| panic!("{} never ran", p)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", positions);
        assert_eq!(executor.copies().iter().filter(|(_, r)| r.ends_with(".tar.gz")).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_deploy_touches_nothing() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&remote_config());
        let executor = FakeExecutor::new()
            .on("noclobber", "held")
            .on("__absent__", "25.0615.0900.00");

        let err = DeploymentOrchestrator::new(&executor, &settings)
            .deploy(&config)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("newer version deployed"));
        assert!(!executor.ran("server.sh"));
        assert!(!executor.ran("echo released"));
        assert!(executor.copies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_released_when_pipeline_fails() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&remote_config());
        let executor = deployed_host().fail_on("tar -xzf", "No space left on device");

        let err = DeploymentOrchestrator::new(&executor, &settings)
            .deploy(&config)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("No space left on device"));
        assert!(executor.ran("echo released"));
        assert!(!executor.ran("maintenance.sh"));
        assert!(!executor.ran("ln -sfn"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_failure_rolls_back_and_hides_maintenance() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&remote_config());
        let executor = deployed_host().fail_on("partialImport", "user conflict");

        let err = DeploymentOrchestrator::new(&executor, &settings)
            .deploy(&config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::IdentityMigration { rollback: RollbackOutcome::Restored, .. }
        ));
        assert!(err.to_string().contains("user conflict"));
        assert!(executor.ran("docker start shop-api shop-keycloak"));
        let restart = executor.position("docker start").unwrap();
        assert!(restart < executor.position("maintenance.sh off").unwrap());
        assert!(!executor.ran("ln -sfn"));
        assert!(!executor.ran("server.sh start"));
        assert!(executor.ran("echo released"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rollback_leaves_maintenance_page_up() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&remote_config());
        let executor = deployed_host()
            .fail_on("partialImport", "user conflict")
            .fail_on("DROP SCHEMA", "permission denied");

        let err = DeploymentOrchestrator::new(&executor, &settings)
            .deploy(&config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::IdentityMigration { rollback: RollbackOutcome::Failed(_), .. }
        ));
        assert!(!executor.ran("maintenance.sh off"));
        assert!(executor.ran("echo released"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_mode_only_imports_realm() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&DeployConfig {
            reset_keycloak: true,
            ..remote_config()
        });
        let executor = deployed_host();

        let report = DeploymentOrchestrator::new(&executor, &settings)
            .deploy(&config)
            .await
            .unwrap();

        assert_eq!(status_of(&report, "export_users"), StageStatus::Skipped);
        assert_eq!(status_of(&report, "backup_database"), StageStatus::Skipped);
        assert_eq!(status_of(&report, "import_users"), StageStatus::Skipped);
        assert_eq!(status_of(&report, "import_realm"), StageStatus::Success);
        assert!(!executor.ran("keycloak export"));
        assert!(!executor.ran("pg_dump"));
        assert!(!executor.ran("partialImport"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_deploy_initializes_host_and_runs_deferred_checks() {
        let settings = OrchestratorSettings::default();
        let config = ValidatedConfig::assume_live(&local_config()).with_deferred_runtime_checks();
        let executor = FakeExecutor::new()
            .on("noclobber", "acquired")
            .on("echo released", "released")
            .on("server-init-marker && echo", "no")
            .on("shop-keycloak-db 2>", "running");

        let report = DeploymentOrchestrator::new(&executor, &settings)
            .deploy(&config)
            .await
            .unwrap();

        assert_eq!(report.previous_release, None);
        assert_eq!(status_of(&report, "stop_release"), StageStatus::Skipped);
        assert_eq!(status_of(&report, "import_users"), StageStatus::Skipped);
        let init = executor.position("init-server.sh").unwrap();
        let deferred = executor.position("docker info").unwrap();
        assert!(init < deferred);
        assert!(deferred < executor.position("merge-secrets.sh").unwrap());
        assert!(executor.ran("docker volume create shop-pgdata"));
        assert!(!executor.ran("docker start"));
    }
}
