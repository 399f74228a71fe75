//! Mgmt Controller - 事务式配置管理核心
//!
//! 维护一棵可寻址的资源树，支持：
//! - 按模式校验的增删改查操作
//! - 组合事务与失败回滚
//! - 原子写入的快照持久化与归档
//! - 需要重启的修改跟踪与重新加载协调
//! - 结构化日志与审计日志

pub mod app;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod model;
pub mod operation;
pub mod persistence;
pub mod reload;
pub mod server;

// 重新导出主要类型
pub use controller::Controller;
pub use error::{ManagementError, ModelError, PersistenceError};
pub use model::{AttributeValue, ResourceAddress, ResourceModel, SchemaRegistry};
pub use operation::{Operation, ProcessState, Transaction, TransactionOutcome};
pub use reload::{ReloadCoordinator, ReloadOutcome};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
