//! 编排器核心定义：错误类型、领域模型、存储与能力接口、配置

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{OrchestratorError, OrchestratorResult};
pub use models::*;
