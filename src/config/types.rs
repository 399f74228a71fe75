//! 配置数据结构定义
//!
//! 管理核心自身的运行配置：快照位置、重新加载参数、日志和快照文件监控

use crate::logging::{parse_level, LogConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// 持久化配置
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// 重新加载配置
    #[serde(default)]
    pub reload: ReloadConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 快照文件监控配置
    #[serde(default)]
    pub watch: WatchConfig,
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceConfig {
    /// 主快照文件路径
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// 归档目录，未设置时为快照同级的 `snapshot/`
    pub archive_dir: Option<PathBuf>,
}

/// 重新加载配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReloadConfig {
    /// 等待重新加载完成的超时（毫秒）
    #[serde(default = "default_reload_timeout")]
    pub timeout_ms: u64,
    /// 健康轮询间隔（毫秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 是否输出JSON
    #[serde(default)]
    pub json: bool,
    /// 日志文件（设置后不再输出到控制台）
    pub file: Option<PathBuf>,
    /// 模块级别
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

/// 快照文件监控配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// 是否监控外部修改
    #[serde(default)]
    pub enabled: bool,
    /// 防抖动延迟（毫秒）
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

// 默认值函数
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data").join("configuration.json")
}
fn default_reload_timeout() -> u64 {
    50_000
}
fn default_poll_interval() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_debounce() -> u64 {
    500
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            archive_dir: None,
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_reload_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            module_levels: HashMap::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_debounce(),
        }
    }
}

impl ServerConfig {
    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.reload.poll_interval_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    /// 转换为日志系统配置
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: parse_level(&self.logging.level),
            console: self.logging.file.is_none(),
            file_path: self.logging.file.clone(),
            json_format: self.logging.json,
            module_levels: self
                .logging
                .module_levels
                .iter()
                .map(|(module, level)| (module.clone(), parse_level(level)))
                .collect(),
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &ServerConfig) -> Result<(), String> {
    if config.persistence.snapshot_path.as_os_str().is_empty() {
        return Err("快照路径不能为空".to_string());
    }

    if config.reload.timeout_ms == 0 {
        return Err("重新加载超时不能为0".to_string());
    }

    if config.reload.poll_interval_ms == 0 {
        return Err("健康轮询间隔不能为0".to_string());
    }

    if config.reload.poll_interval_ms > config.reload.timeout_ms {
        return Err(format!(
            "健康轮询间隔 {}ms 不能大于重新加载超时 {}ms",
            config.reload.poll_interval_ms, config.reload.timeout_ms
        ));
    }

    let levels = std::iter::once(&config.logging.level).chain(config.logging.module_levels.values());
    for level in levels {
        if !VALID_LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(format!(
                "无效的日志级别: {}，支持的级别: {:?}",
                level, VALID_LOG_LEVELS
            ));
        }
    }

    if config.watch.enabled && config.watch.debounce_ms == 0 {
        return Err("启用监控时防抖动延迟不能为0".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::LevelFilter;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.reload_timeout(), Duration::from_millis(50_000));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(!config.watch.enabled);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = ServerConfig::default();
        config.reload.timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = ServerConfig::default();
        config.reload.poll_interval_ms = 60_000;
        assert!(validate_config(&config).unwrap_err().contains("轮询"));

        let mut config = ServerConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(validate_config(&config).unwrap_err().contains("verbose"));

        let mut config = ServerConfig::default();
        config.watch.enabled = true;
        config.watch.debounce_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_log_config_conversion() {
        let mut config = ServerConfig::default();
        config.logging.level = "debug".to_string();
        config.logging.file = Some(PathBuf::from("/tmp/controller.log"));
        config
            .logging
            .module_levels
            .insert("mgmt_controller::reload".to_string(), "trace".to_string());

        let log_config = config.log_config();
        assert_eq!(log_config.level, LevelFilter::Debug);
        assert!(!log_config.console);
        assert_eq!(
            log_config.module_levels.get("mgmt_controller::reload"),
            Some(&LevelFilter::Trace)
        );
    }
}
