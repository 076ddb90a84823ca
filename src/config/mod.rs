//! 配置模块
//!
//! 环境变量解析与运行参数

pub mod env;
pub mod settings;

pub use env::load_deploy_config;
pub use settings::{LockPolicy, OrchestratorSettings, WaitPolicy};
