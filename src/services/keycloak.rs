//! Keycloak 身份迁移
//!
//! 每次部署：导出用户 → 备份数据库 → 导入 realm 配置 → 重新导入用户。
//! 重置模式下只导入 realm。用户导入失败时回滚：恢复备份、启动上一个发布的容器，
//! 然后把原始错误连同回滚结果一起抛出。
//!
//! 用户导入使用一次性容器 `<app>-keycloak-import`，不会重建上一个发布的
//! `<app>-keycloak` 容器，回滚时按名字启动的仍是旧容器。

use tracing::{error, info, warn};

use crate::config::OrchestratorSettings;
use crate::error::{DeployError, DeployResult, RollbackOutcome};
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::compose::{save_logs, wait_for_container, Compose, ContainerState};
use crate::services::db_client::DbTarget;
use crate::services::smoke_test::{DatabaseMode, ValidatedConfig};

const KCADM: &str = "/opt/keycloak/bin/kcadm.sh";
const CONTAINER_EXPORT_DIR: &str = "/tmp/keycloak-export";
const LOG_TAIL_LINES: usize = 50;

/// 临时导入实例的服务后缀，容器名为 `<app>-keycloak-import`
pub const IMPORT_INSTANCE: &str = "keycloak-import";

pub struct IdentityMigrator<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> IdentityMigrator<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    fn compose(&self, config: &ValidatedConfig) -> Compose {
        let layout = config.layout(self.settings);
        Compose::for_release(config, &layout.release_dir(config.tag()))
    }

    /// 本地模式下启动 Keycloak 数据库容器；远程模式什么也不做
    async fn ensure_database_running(&self, config: &ValidatedConfig) -> DeployResult<()> {
        if let DatabaseMode::Local { .. } = config.database_mode() {
            self.executor
                .run(&self.compose(config).command("up -d keycloak-db"))
                .await?;
            wait_for_container(
                self.executor,
                &config.container_name("keycloak-db"),
                ContainerState::Running,
                self.settings.container_wait,
            )
            .await?;
        }
        Ok(())
    }

    /// realm 是否已经存在于 Keycloak 数据库（首次部署时不存在）
    async fn realm_exists(&self, config: &ValidatedConfig) -> DeployResult<bool> {
        let target = DbTarget::keycloak(config, self.settings);
        let database = DbTarget::keycloak_database(config);

        let table = target
            .query(
                self.executor,
                &database,
                "SELECT 1 FROM pg_tables WHERE schemaname = 'public' AND tablename = 'realm'",
            )
            .await?;
        if table.trim() != "1" {
            return Ok(false);
        }

        let realm = target
            .query(
                self.executor,
                &database,
                &format!("SELECT 1 FROM realm WHERE name = '{}'", config.realm()),
            )
            .await?;
        Ok(realm.trim() == "1")
    }

    /// 导出 realm 用户；返回是否导出了用户
    pub async fn export_users(&self, config: &ValidatedConfig) -> DeployResult<bool> {
        self.ensure_database_running(config).await?;

        if !self.realm_exists(config).await? {
            info!(realm = %config.realm(), "Realm does not exist yet, nothing to export");
            return Ok(false);
        }

        let layout = config.layout(self.settings);
        let export_dir = layout.keycloak_export_dir();
        self.executor
            .run(&format!(
                "rm -rf {dir} && mkdir -p {dir} && chmod 777 {dir}",
                dir = quote(&export_dir)
            ))
            .await?;

        let export = self
            .executor
            .run(&self.compose(config).command(&format!(
                "run --rm -v {}:/export keycloak export --dir /export --realm {} --users different_files",
                quote(&export_dir),
                quote(config.realm())
            )))
            .await;

        let restore = self
            .executor
            .run(&format!("chmod 700 {}", quote(&export_dir)))
            .await;

        export?;
        restore?;
        info!(realm = %config.realm(), dir = %export_dir, "Keycloak users exported");
        Ok(true)
    }

    /// 备份 Keycloak 数据库
    pub async fn backup_database(&self, config: &ValidatedConfig) -> DeployResult<String> {
        let layout = config.layout(self.settings);
        let backup = layout.keycloak_backup();
        DbTarget::keycloak(config, self.settings)
            .dump_to(self.executor, &DbTarget::keycloak_database(config), &backup)
            .await?;
        info!(path = %backup, "Keycloak database backed up");
        Ok(backup)
    }

    /// 导入 realm 配置（重置模式下同样执行）
    pub async fn import_realm(&self, config: &ValidatedConfig) -> DeployResult<()> {
        self.ensure_database_running(config).await?;

        let layout = config.layout(self.settings);
        let realm_dir = format!("{}/keycloak", layout.release_dir(config.tag()));
        self.executor
            .run(&self.compose(config).command(&format!(
                "run --rm -v {}:/opt/keycloak/data/import:ro keycloak import --file /opt/keycloak/data/import/realm.json --override true",
                quote(&realm_dir)
            )))
            .await?;
        info!(realm = %config.realm(), "Keycloak realm imported");
        Ok(())
    }

    /// 启动临时 Keycloak 实例并重新导入用户；实例总会被停止
    pub async fn import_users(&self, config: &ValidatedConfig) -> DeployResult<()> {
        let container = config.container_name(IMPORT_INSTANCE);

        // 上次部署中断时可能残留
        self.executor
            .run(&format!("docker rm -f {} >/dev/null 2>&1 || true", quote(&container)))
            .await?;
        self.executor
            .run(&self.compose(config).command(&format!(
                "run -d --no-deps --name {} keycloak",
                quote(&container)
            )))
            .await?;

        let result = async {
            wait_for_container(
                self.executor,
                &container,
                ContainerState::Running,
                self.settings.container_wait,
            )
            .await?;
            self.run_user_import(config, &container).await
        }
        .await;

        let cleanup = self.stop_temporary_instance(config, &container).await;

        match (result, cleanup) {
            (Ok(()), Ok(())) => {
                info!(realm = %config.realm(), "Keycloak users imported");
                Ok(())
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!(error = %cleanup, "Failed to stop temporary Keycloak instance");
                Err(e)
            }
        }
    }

    async fn run_user_import(&self, config: &ValidatedConfig, container: &str) -> DeployResult<()> {
        let docker = config.docker();
        let exec = format!("docker exec {}", quote(container));

        info!(container = %container, "Logging in to Keycloak admin CLI");
        self.executor
            .run_silent(&format!(
                "{} {} config credentials --server http://localhost:8080 --realm master --user {} --password {}",
                exec,
                KCADM,
                quote(docker.required("KEYCLOAK_ADMIN")),
                quote(docker.required("KEYCLOAK_ADMIN_PASSWORD"))
            ))
            .await?;

        self.executor
            .run(&format!("{} {} update realms/master -s sslRequired=NONE", exec, KCADM))
            .await?;

        let layout = config.layout(self.settings);
        let export_dir = layout.keycloak_export_dir();
        self.executor
            .run(&format!(
                "docker cp {}/. {}:{}",
                quote(&export_dir),
                quote(container),
                CONTAINER_EXPORT_DIR
            ))
            .await?;

        let script = format!(
            "for f in {dir}/*-users-*.json; do [ -e \"$f\" ] || continue; {kcadm} create partialImport -r {realm} -s ifResourceExists=SKIP -o -f \"$f\" || exit 1; done",
            dir = CONTAINER_EXPORT_DIR,
            kcadm = KCADM,
            realm = quote(config.realm())
        );
        self.executor
            .run(&format!("{} bash -c {}", exec, quote(&script)))
            .await?;

        self.executor
            .run(&format!("{} {} update realms/master -s sslRequired=EXTERNAL", exec, KCADM))
            .await?;

        self.executor
            .run(&format!("rm -rf {}", quote(&export_dir)))
            .await?;
        Ok(())
    }

    async fn stop_temporary_instance(
        &self,
        config: &ValidatedConfig,
        container: &str,
    ) -> DeployResult<()> {
        let layout = config.layout(self.settings);
        let log_file = format!("{}/keycloak-import-{}.log", layout.logs_dir(), config.tag());
        match save_logs(self.executor, container, &log_file, LOG_TAIL_LINES).await {
            Ok(tail) if !tail.is_empty() => {
                info!(log_file = %log_file, "Keycloak log tail:\n{}", tail)
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not save Keycloak logs"),
        }

        self.executor.run(&format!("docker stop {}", quote(container))).await?;
        wait_for_container(
            self.executor,
            container,
            ContainerState::Stopped,
            self.settings.container_wait,
        )
        .await?;
        self.executor.run(&format!("docker rm {}", quote(container))).await?;
        Ok(())
    }

    /// 导入用户；失败时回滚并返回 `IdentityMigration`
    pub async fn import_users_or_rollback(
        &self,
        config: &ValidatedConfig,
        previous_containers: &[String],
    ) -> DeployResult<()> {
        let source = match self.import_users(config).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        error!(error = %source, "Keycloak user import failed, rolling back");
        let rollback = match self.rollback(config, previous_containers).await {
            Ok(()) => RollbackOutcome::Restored,
            Err(e) => {
                error!(error = %e, "Rollback failed");
                RollbackOutcome::Failed(e.to_string())
            }
        };

        Err(DeployError::IdentityMigration {
            source: Box::new(source),
            rollback,
        })
    }

    /// 恢复数据库备份，启动上一个发布的容器
    pub async fn rollback(
        &self,
        config: &ValidatedConfig,
        previous_containers: &[String],
    ) -> DeployResult<()> {
        self.ensure_database_running(config).await?;

        let layout = config.layout(self.settings);
        let target = DbTarget::keycloak(config, self.settings);
        let database = DbTarget::keycloak_database(config);

        target.reset_schema(self.executor, &database).await?;
        target
            .restore_from(self.executor, &database, &layout.keycloak_backup())
            .await?;
        info!(path = %layout.keycloak_backup(), "Keycloak database restored from backup");

        if previous_containers.is_empty() {
            warn!("No containers of the previous release were running, nothing to restart");
            return Ok(());
        }
        let names: Vec<String> = previous_containers.iter().map(|n| quote(n)).collect();
        self.executor
            .run(&format!("docker start {}", names.join(" ")))
            .await?;
        info!(containers = ?previous_containers, "Previous release restarted");
        Ok(())
    }
}
