//! 配置管理模块
//!
//! 提供运行配置文件解析、验证，以及快照文件的外部修改监控

pub mod loader;
pub mod types;
pub mod watcher;

// 重新导出主要类型
pub use loader::{get_default_config_path, ConfigLoader, TomlConfigLoader};
pub use types::{
    validate_config, LoggingConfig, PersistenceConfig, ReloadConfig, ServerConfig, WatchConfig,
};
pub use watcher::{SnapshotChangeEvent, SnapshotWatcher};
