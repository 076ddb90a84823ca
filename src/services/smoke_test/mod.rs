//! 部署前冒烟测试
//!
//! 两个阶段：
//! 1. 结构校验（`structure`）：纯本地，不发起任何远程调用
//! 2. 实时校验（`live`）：连通性、系统、发布包、磁盘、软件包、数据库可达性
//!
//! 只有两阶段都通过才能得到 `ValidatedConfig`，所有变更操作都要求传入它。

pub mod archive;
pub mod live;
pub mod structure;

use std::fmt;
use std::ops::Deref;

use crate::config::OrchestratorSettings;
use crate::domain::config::{DeployConfig, Environment};
use crate::domain::layout::RemoteLayout;
use crate::domain::secrets::{DockerSecrets, JdbcUrl, KeycloakSecrets, KnexConnection};
use crate::domain::tag::DeployTag;
use crate::error::DeployResult;
use crate::infra::RemoteExecutor;

pub use archive::ReleaseArchive;
pub use structure::check_structure;

/// 数据库模式
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseMode {
    /// 在远程数据库服务器上建库
    Remote,
    /// 本地容器 + 持久卷
    Local {
        compose_file: String,
        volumes: Vec<String>,
    },
}

/// 原样交给密钥合并脚本的密钥文本
#[derive(Clone)]
pub struct SecretTexts {
    pub backend: String,
    pub stateful_backend: String,
    pub docker: String,
    pub keycloak: String,
    pub config: String,
}

impl fmt::Debug for SecretTexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretTexts(<redacted>)")
    }
}

/// 通过结构校验的配置
#[derive(Clone, Debug)]
pub struct CheckedConfig {
    app_name: String,
    server: String,
    tag: DeployTag,
    environment: Environment,
    backend_db: KnexConnection,
    stateful_backend_db: KnexConnection,
    keycloak: KeycloakSecrets,
    docker: DockerSecrets,
    keycloak_db_url: JdbcUrl,
    database_mode: DatabaseMode,
    reset_keycloak: bool,
    secrets: SecretTexts,
}

impl CheckedConfig {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn tag(&self) -> &DeployTag {
        &self.tag
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn backend_db(&self) -> &KnexConnection {
        &self.backend_db
    }

    pub fn stateful_backend_db(&self) -> &KnexConnection {
        &self.stateful_backend_db
    }

    pub fn keycloak_db(&self) -> &KnexConnection {
        &self.keycloak.connection
    }

    /// Keycloak realm，未配置时使用应用名
    pub fn realm(&self) -> &str {
        self.keycloak.realm.as_deref().unwrap_or(&self.app_name)
    }

    pub fn docker(&self) -> &DockerSecrets {
        &self.docker
    }

    pub fn keycloak_db_url(&self) -> &JdbcUrl {
        &self.keycloak_db_url
    }

    pub fn database_mode(&self) -> &DatabaseMode {
        &self.database_mode
    }

    pub fn reset_keycloak(&self) -> bool {
        self.reset_keycloak
    }

    pub fn secrets(&self) -> &SecretTexts {
        &self.secrets
    }

    pub fn layout(&self, settings: &OrchestratorSettings) -> RemoteLayout {
        RemoteLayout::new(&settings.remote_root, &self.app_name)
    }

    /// 容器命名约定 `<app>-<service>`
    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.app_name, service)
    }
}

/// 通过全部冒烟测试的配置；只能由本模块构造
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    checked: CheckedConfig,
    archive: ReleaseArchive,
    runtime_checks_deferred: bool,
}

impl ValidatedConfig {
    pub fn archive(&self) -> &ReleaseArchive {
        &self.archive
    }

    /// 主机尚未初始化，依赖容器运行时的检查需在初始化后补跑
    pub fn runtime_checks_deferred(&self) -> bool {
        self.runtime_checks_deferred
    }
}

impl Deref for ValidatedConfig {
    type Target = CheckedConfig;

    fn deref(&self) -> &Self::Target {
        &self.checked
    }
}

/// 冒烟测试
pub struct SmokeTest<'a> {
    executor: &'a dyn RemoteExecutor,
    settings: &'a OrchestratorSettings,
}

impl<'a> SmokeTest<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, settings: &'a OrchestratorSettings) -> Self {
        Self { executor, settings }
    }

    /// 完整校验：结构校验失败时不会发起任何远程调用
    pub async fn run(&self, config: &DeployConfig) -> DeployResult<ValidatedConfig> {
        let checked = check_structure(config)?;
        tracing::info!(
            app = %checked.app_name(),
            tag = %checked.tag(),
            "Deploy configuration is structurally valid"
        );
        self.run_live(checked).await
    }

    /// 首次初始化主机后补跑被推迟的运行时检查
    pub async fn run_deferred_checks(&self, config: &ValidatedConfig) -> DeployResult<()> {
        live::LiveChecks::new(self.executor, self.settings)
            .runtime_checks(config)
            .await
    }

    async fn run_live(&self, checked: CheckedConfig) -> DeployResult<ValidatedConfig> {
        live::LiveChecks::new(self.executor, self.settings)
            .run(checked)
            .await
    }
}

#[cfg(test)]
impl ValidatedConfig {
    /// 跳过实时校验，仅供测试
    pub fn assume_live(config: &DeployConfig) -> Self {
        let checked = check_structure(config).expect("test config must be structurally valid");
        let archive = ReleaseArchive {
            path: std::path::PathBuf::from(format!("dist/{}.tar.gz", checked.tag())),
            size: 1024,
        };
        Self {
            checked,
            archive,
            runtime_checks_deferred: false,
        }
    }

    /// 模拟尚未初始化的主机
    pub fn with_deferred_runtime_checks(mut self) -> Self {
        self.runtime_checks_deferred = true;
        self
    }
}

#[cfg(test)]
pub mod fixtures {
    use crate::domain::config::DeployConfig;

    pub const TAG: &str = "25.0615.1000.00";

    pub fn backend_secrets(database: &str) -> String {
        format!(
            r#"{{"knex":{{"connection":{{"host":"db.internal","port":5432,"user":"app","password":"app-pw","database":"{}"}}}}}}"#,
            database
        )
    }

    pub fn docker_secrets() -> String {
        [
            "KC_DB_URL=jdbc:postgresql://shop-keycloak-db:5432/keycloak",
            "KC_DB_USERNAME=keycloak",
            "KC_DB_PASSWORD=kc-pw",
            "KEYCLOAK_ADMIN=admin",
            "KEYCLOAK_ADMIN_PASSWORD=admin-pw",
        ]
        .join("\n")
    }

    /// 合法的本地数据库模式配置
    pub fn local_config() -> DeployConfig {
        DeployConfig {
            app_name: "shop".into(),
            deploy_server: "shop.example.com".into(),
            deploy_tag: TAG.into(),
            environment: "staging".into(),
            backend_secrets: backend_secrets("shop"),
            stateful_backend_secrets: backend_secrets("shop_state"),
            docker_secrets: docker_secrets(),
            keycloak_secrets: backend_secrets("keycloak"),
            config_secrets: "{\"feature\":true}".into(),
            use_remote_database: false,
            local_database_compose_file: Some("docker-compose.local-db.yml".into()),
            local_database_volumes: vec!["shop-pgdata".into(), "shop-keycloak-pgdata".into()],
            reset_keycloak: false,
        }
    }

    /// 合法的远程数据库模式配置
    pub fn remote_config() -> DeployConfig {
        DeployConfig {
            use_remote_database: true,
            local_database_compose_file: None,
            local_database_volumes: Vec::new(),
            ..local_config()
        }
    }
}
