//! PostgreSQL 客户端命令
//!
//! 远程数据库通过一次性客户端容器（`docker run --rm --network host`）访问，
//! 本地数据库通过 `docker exec` 进入 `<app>-keycloak-db` 容器访问。
//! 命令中带有密码，因此全部静默执行，日志只写描述。

use tracing::info;

use crate::config::OrchestratorSettings;
use crate::domain::secrets::KnexConnection;
use crate::error::DeployResult;
use crate::infra::remote::quote;
use crate::infra::RemoteExecutor;
use crate::services::smoke_test::{CheckedConfig, DatabaseMode};

/// 数据库维护库（建库、探活时连接）
pub const MAINTENANCE_DATABASE: &str = "postgres";

#[derive(Clone, PartialEq, Eq)]
pub enum DbTarget {
    /// 远程服务器，经一次性客户端容器访问
    Remote {
        host: String,
        port: u16,
        user: String,
        password: String,
        image: String,
    },
    /// 本地数据库容器
    Local {
        container: String,
        user: String,
        password: String,
    },
}

impl std::fmt::Debug for DbTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl DbTarget {
    pub fn remote(connection: &KnexConnection, image: &str) -> Self {
        DbTarget::Remote {
            host: connection.host.clone(),
            port: connection.port,
            user: connection.user.clone(),
            password: connection.password.clone(),
            image: image.to_string(),
        }
    }

    /// Keycloak 数据库：远程模式用 KEYCLOAK_SECRETS，本地模式用容器与 KC_DB_* 凭据
    pub fn keycloak(config: &CheckedConfig, settings: &OrchestratorSettings) -> Self {
        match config.database_mode() {
            DatabaseMode::Remote => Self::remote(config.keycloak_db(), &settings.db_client_image),
            DatabaseMode::Local { .. } => DbTarget::Local {
                container: config.container_name("keycloak-db"),
                user: config.docker().required("KC_DB_USERNAME").to_string(),
                password: config.docker().required("KC_DB_PASSWORD").to_string(),
            },
        }
    }

    /// Keycloak 数据库名
    pub fn keycloak_database(config: &CheckedConfig) -> String {
        match config.database_mode() {
            DatabaseMode::Remote => config.keycloak_db().database.clone(),
            DatabaseMode::Local { .. } => config.keycloak_db_url().database.clone(),
        }
    }

    /// 日志用描述，不含凭据
    pub fn describe(&self) -> String {
        match self {
            DbTarget::Remote { host, port, user, .. } => format!("{}@{}:{}", user, host, port),
            DbTarget::Local { container, user, .. } => format!("{}@container {}", user, container),
        }
    }

    /// 客户端命令前缀；`stdin` 为 true 时保持标准输入
    fn client(&self, program: &str, stdin: bool) -> String {
        let interactive = if stdin { " -i" } else { "" };
        match self {
            DbTarget::Remote {
                host,
                port,
                user,
                password,
                image,
            } => format!(
                "docker run --rm{} --network host -e PGPASSWORD={} {} {} -h {} -p {} -U {}",
                interactive,
                quote(password),
                quote(image),
                program,
                quote(host),
                port,
                quote(user)
            ),
            DbTarget::Local {
                container,
                user,
                password,
            } => format!(
                "docker exec{} -e PGPASSWORD={} {} {} -h localhost -U {}",
                interactive,
                quote(password),
                quote(container),
                program,
                quote(user)
            ),
        }
    }

    /// 执行单条 SQL，返回去除空白的结果（`psql -tA`）
    pub async fn query(
        &self,
        executor: &dyn RemoteExecutor,
        database: &str,
        sql: &str,
    ) -> DeployResult<String> {
        let command = format!(
            "{} -d {} -v ON_ERROR_STOP=1 -tAc {}",
            self.client("psql", false),
            quote(database),
            quote(sql)
        );
        info!(
            target_db = %self.describe(),
            database = %database,
            sql = %sql,
            "Running database query"
        );
        Ok(executor.run_silent(&command).await?)
    }

    /// 数据库是否存在
    pub async fn database_exists(
        &self,
        executor: &dyn RemoteExecutor,
        database: &str,
    ) -> DeployResult<bool> {
        let sql = format!("SELECT 1 FROM pg_database WHERE datname = '{}'", database);
        let output = self.query(executor, MAINTENANCE_DATABASE, &sql).await?;
        Ok(output.trim() == "1")
    }

    /// 创建数据库；名称已经过字符集校验
    pub async fn create_database(
        &self,
        executor: &dyn RemoteExecutor,
        database: &str,
    ) -> DeployResult<()> {
        let sql = format!("CREATE DATABASE \"{}\"", database);
        self.query(executor, MAINTENANCE_DATABASE, &sql).await?;
        Ok(())
    }

    /// 导出到远程主机上的 SQL 文件
    pub async fn dump_to(
        &self,
        executor: &dyn RemoteExecutor,
        database: &str,
        path: &str,
    ) -> DeployResult<()> {
        let command = format!(
            "{} -d {} --clean --if-exists > {}",
            self.client("pg_dump", false),
            quote(database),
            quote(path)
        );
        info!(target_db = %self.describe(), database = %database, path = %path, "Dumping database");
        executor.run_silent(&command).await?;
        Ok(())
    }

    /// 从远程主机上的 SQL 文件回放
    pub async fn restore_from(
        &self,
        executor: &dyn RemoteExecutor,
        database: &str,
        path: &str,
    ) -> DeployResult<()> {
        let command = format!(
            "{} -d {} -v ON_ERROR_STOP=1 -q -f - < {}",
            self.client("psql", true),
            quote(database),
            quote(path)
        );
        info!(
            target_db = %self.describe(),
            database = %database,
            path = %path,
            "Restoring database"
        );
        executor.run_silent(&command).await?;
        Ok(())
    }

    /// 清空 public schema
    pub async fn reset_schema(
        &self,
        executor: &dyn RemoteExecutor,
        database: &str,
    ) -> DeployResult<()> {
        self.query(executor, database, "DROP SCHEMA public CASCADE; CREATE SCHEMA public;")
            .await?;
        Ok(())
    }
}
