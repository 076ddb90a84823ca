//! 结构校验（不访问网络）

use std::sync::LazyLock;

use regex::Regex;

use super::{CheckedConfig, DatabaseMode, SecretTexts};
use crate::domain::config::{DeployConfig, Environment};
use crate::domain::secrets::{DockerSecrets, JdbcUrl, KeycloakSecrets, KnexConnection};
use crate::domain::tag::DeployTag;
use crate::error::{DeployError, DeployResult};

static APP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{1,39}$").expect("static pattern"));
static TAG_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z._-]{1,64}$").expect("static pattern"));
static HOST: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.-]{0,251}[A-Za-z0-9])?$").expect("static pattern")
    });
static VOLUME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("static pattern"));
static COMPOSE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_./-]{0,127}$").expect("static pattern"));
static DATABASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]{0,62}$").expect("static pattern"));
static REALM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("static pattern"));

/// 校验原始配置；失败即返回，不做任何远程调用
pub fn check_structure(config: &DeployConfig) -> DeployResult<CheckedConfig> {
    let fail = |message: String| DeployError::ConfigValidation(message);

    require("APP_NAME", &config.app_name)?;
    if !APP_NAME.is_match(&config.app_name) {
        return Err(fail(format!(
            "APP_NAME '{}' must match {}",
            config.app_name,
            APP_NAME.as_str()
        )));
    }

    require("DEPLOY_SERVER", &config.deploy_server)?;
    if !HOST.is_match(&config.deploy_server) {
        return Err(fail(format!(
            "DEPLOY_SERVER '{}' is not a valid host name",
            config.deploy_server
        )));
    }

    require("DEPLOY_TAG", &config.deploy_tag)?;
    if !TAG_CHARSET.is_match(&config.deploy_tag) {
        return Err(fail(format!(
            "DEPLOY_TAG '{}' must match {}",
            config.deploy_tag,
            TAG_CHARSET.as_str()
        )));
    }
    let tag = DeployTag::parse(&config.deploy_tag).map_err(|e| fail(e.to_string()))?;

    require("ENVIRONMENT", &config.environment)?;
    let environment: Environment = config.environment.parse().map_err(fail)?;

    let backend_db =
        KnexConnection::parse("BACKEND_SECRETS", &config.backend_secrets).map_err(fail)?;
    check_database_name("BACKEND_SECRETS", &backend_db)?;

    let stateful_backend_db =
        KnexConnection::parse("STATEFUL_BACKEND_SECRETS", &config.stateful_backend_secrets)
            .map_err(fail)?;
    check_database_name("STATEFUL_BACKEND_SECRETS", &stateful_backend_db)?;

    let keycloak =
        KeycloakSecrets::parse("KEYCLOAK_SECRETS", &config.keycloak_secrets).map_err(fail)?;
    check_database_name("KEYCLOAK_SECRETS", &keycloak.connection)?;
    if let Some(realm) = &keycloak.realm {
        if !REALM.is_match(realm) {
            return Err(fail(format!(
                "KEYCLOAK_SECRETS realm '{}' must match {}",
                realm,
                REALM.as_str()
            )));
        }
    }

    let docker = DockerSecrets::parse("DOCKER_SECRETS", &config.docker_secrets).map_err(fail)?;
    let keycloak_db_url = JdbcUrl::parse(docker.required("KC_DB_URL")).map_err(fail)?;

    require("CONFIG_SECRETS", &config.config_secrets)?;

    let database_mode = if config.use_remote_database {
        DatabaseMode::Remote
    } else {
        let compose_file = config
            .local_database_compose_file
            .clone()
            .ok_or_else(|| {
                fail(
                    "LOCAL_DATABASE_COMPOSE_FILE is required when USE_REMOTE_DATABASE is false"
                        .to_string(),
                )
            })?;
        if !COMPOSE_FILE.is_match(&compose_file) || compose_file.contains("..") {
            return Err(fail(format!(
                "LOCAL_DATABASE_COMPOSE_FILE '{}' is not a safe relative path",
                compose_file
            )));
        }
        if config.local_database_volumes.is_empty() {
            return Err(fail(
                "LOCAL_DATABASE_VOLUMES must list at least one volume when USE_REMOTE_DATABASE is false"
                    .to_string(),
            ));
        }
        if let Some(bad) = config.local_database_volumes.iter().find(|v| !VOLUME.is_match(v)) {
            return Err(fail(format!(
                "Volume name '{}' must match {}",
                bad,
                VOLUME.as_str()
            )));
        }
        DatabaseMode::Local {
            compose_file,
            volumes: config.local_database_volumes.clone(),
        }
    };

    Ok(CheckedConfig {
        app_name: config.app_name.clone(),
        server: config.deploy_server.clone(),
        tag,
        environment,
        backend_db,
        stateful_backend_db,
        keycloak,
        docker,
        keycloak_db_url,
        database_mode,
        reset_keycloak: config.reset_keycloak,
        secrets: SecretTexts {
            backend: config.backend_secrets.clone(),
            stateful_backend: config.stateful_backend_secrets.clone(),
            docker: config.docker_secrets.clone(),
            keycloak: config.keycloak_secrets.clone(),
            config: config.config_secrets.clone(),
        },
    })
}

fn require(name: &str, value: &str) -> DeployResult<()> {
    if value.trim().is_empty() {
        Err(DeployError::config(format!("{} is required", name)))
    } else {
        Ok(())
    }
}

fn check_database_name(label: &str, connection: &KnexConnection) -> DeployResult<()> {
    if DATABASE.is_match(&connection.database) {
        Ok(())
    } else {
        Err(DeployError::config(format!(
            "{} 'knex.connection.database' '{}' must match {}",
            label,
            connection.database,
            DATABASE.as_str()
        )))
    }
}
