//! 领域模型模块
//!
//! 纯数据结构与解析，不做任何远程调用

pub mod config;
pub mod deploy;
pub mod layout;
pub mod secrets;
pub mod tag;

pub use config::{DeployConfig, Environment};
pub use deploy::{DeployStage, DeployStatus, Stage, StageStatus, StageTracker};
pub use layout::RemoteLayout;
pub use secrets::{DockerSecrets, JdbcUrl, KeycloakSecrets, KnexConnection};
pub use tag::DeployTag;
