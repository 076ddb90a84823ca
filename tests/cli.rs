//! 命令行行为：配置无效时在任何网络访问之前失败

use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("deploy-orchestrator").unwrap();
    cmd.env_clear().env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("unlock"));
}

#[test]
fn test_validate_without_configuration_fails() {
    cli()
        .arg("validate")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("APP_NAME is required"));
}

#[test]
fn test_deploy_rejects_invalid_backend_secrets() {
    cli()
        .env("APP_NAME", "shop")
        .env("DEPLOY_SERVER", "shop.example.com")
        .env("DEPLOY_TAG", "25.0615.1000.00")
        .env("ENVIRONMENT", "staging")
        .env("BACKEND_SECRETS", r#"{"knex":{}}"#)
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must contain a 'knex.connection' property"));
}

#[test]
fn test_unlock_requires_a_valid_tag() {
    cli()
        .args(["unlock", "--tag", "latest"])
        .env("DEPLOY_SERVER", "shop.example.com")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid deploy tag"));
}

#[test]
fn test_unlock_requires_a_server() {
    cli()
        .args(["unlock", "--tag", "25.0615.1000.00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DEPLOY_SERVER is required"));
}
