//! 服务层模块
//!
//! 部署流水线的各个组件，全部通过 `RemoteExecutor` 操作远程主机

pub mod compose;
pub mod database;
pub mod db_client;
pub mod deploy;
pub mod keycloak;
pub mod lock;
pub mod release;
pub mod secrets;
pub mod server;
pub mod smoke_test;
