//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// 管理核心命令行
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mgmt-controller",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "MGMT_CONTROLLER_CONFIG"
    )]
    pub config: Option<PathBuf>,

    /// 快照文件路径，覆盖配置文件中的设置
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "快照文件路径",
        env = "MGMT_CONTROLLER_SNAPSHOT"
    )]
    pub snapshot: Option<PathBuf>,

    /// 日志级别，覆盖配置文件中的设置
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "MGMT_CONTROLLER_LOG_LEVEL"
    )]
    pub log_level: Option<LogLevel>,

    /// 以JSON格式输出日志
    #[arg(long, help = "以JSON格式输出日志")]
    pub json_logs: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 生成默认配置文件并初始化快照
    Init {
        /// 配置文件路径
        #[arg(
            value_name = "FILE",
            help = "配置文件路径",
            default_value = "mgmt-controller.toml"
        )]
        config_path: PathBuf,

        /// 是否覆盖现有文件
        #[arg(short, long, help = "覆盖现有文件")]
        force: bool,
    },

    /// 验证配置文件和快照
    Validate {
        /// 配置文件路径
        #[arg(value_name = "FILE", help = "配置文件路径")]
        config_path: Option<PathBuf>,
    },

    /// 读取资源
    Read {
        /// 资源地址，例如 subsystem=audit/file-audit-log=local-audit
        #[arg(value_name = "ADDRESS", help = "资源地址")]
        address: String,

        /// 递归包含子资源
        #[arg(short, long, help = "递归包含子资源")]
        recursive: bool,

        /// 不合并默认值
        #[arg(long, help = "不合并默认值")]
        no_defaults: bool,
    },

    /// 添加资源
    Add {
        /// 资源地址
        #[arg(value_name = "ADDRESS", help = "资源地址")]
        address: String,

        /// 属性，格式为 name=value
        #[arg(value_name = "NAME=VALUE", help = "属性")]
        attributes: Vec<String>,

        /// 允许重启受影响的服务
        #[arg(long, help = "允许重启受影响的服务")]
        allow_restart: bool,
    },

    /// 删除资源及其子资源
    Remove {
        /// 资源地址
        #[arg(value_name = "ADDRESS", help = "资源地址")]
        address: String,

        /// 允许重启受影响的服务
        #[arg(long, help = "允许重启受影响的服务")]
        allow_restart: bool,
    },

    /// 修改资源属性
    Write {
        /// 资源地址
        #[arg(value_name = "ADDRESS", help = "资源地址")]
        address: String,

        /// 属性，格式为 name=value
        #[arg(value_name = "NAME=VALUE", help = "属性", required = true)]
        attributes: Vec<String>,

        /// 允许重启受影响的服务
        #[arg(long, help = "允许重启受影响的服务")]
        allow_restart: bool,
    },

    /// 从JSON文件执行组合事务
    Batch {
        /// 事务文件
        #[arg(value_name = "FILE", help = "事务文件（JSON）")]
        file: PathBuf,

        /// 步骤失败时不回滚
        #[arg(long, help = "步骤失败时不回滚")]
        no_rollback: bool,

        /// 允许重启受影响的服务
        #[arg(long, help = "允许重启受影响的服务")]
        allow_restart: bool,
    },

    /// 重新加载运行时并等待完成
    Reload {
        /// 等待超时（毫秒），默认取配置文件
        #[arg(long, value_name = "MILLIS", help = "等待超时（毫秒）")]
        timeout_ms: Option<u64>,
    },

    /// 快照归档管理
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// 监控快照文件的外部修改
    Watch,
}

/// 快照子命令
#[derive(Subcommand, Debug, Clone)]
pub enum SnapshotAction {
    /// 归档当前配置
    Take {
        /// 标签
        #[arg(value_name = "LABEL", default_value = "manual", help = "快照标签")]
        label: String,
    },

    /// 列出归档
    List,

    /// 恢复归档
    Restore {
        /// 归档ID
        #[arg(value_name = "ID", help = "归档ID")]
        id: String,
    },
}

impl Args {
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::get_default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_write_command() {
        let args = Args::try_parse_from([
            "mgmt-controller",
            "--snapshot",
            "/tmp/configuration.json",
            "write",
            "subsystem=audit/file-audit-log=local-audit",
            "format=SIMPLE",
            "--allow-restart",
        ])
        .unwrap();

        assert_eq!(args.snapshot, Some(PathBuf::from("/tmp/configuration.json")));
        match args.command {
            Commands::Write {
                address,
                attributes,
                allow_restart,
            } => {
                assert_eq!(address, "subsystem=audit/file-audit-log=local-audit");
                assert_eq!(attributes, vec!["format=SIMPLE".to_string()]);
                assert!(allow_restart);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_write_requires_attributes() {
        let result = Args::try_parse_from(["mgmt-controller", "write", "subsystem=audit"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_snapshot_and_batch() {
        let args = Args::try_parse_from(["mgmt-controller", "snapshot", "restore", "1-manual"]).unwrap();
        assert!(matches!(
            args.command,
            Commands::Snapshot {
                action: SnapshotAction::Restore { ref id }
            } if id == "1-manual"
        ));

        let args = Args::try_parse_from([
            "mgmt-controller",
            "--log-level",
            "debug",
            "batch",
            "tx.json",
            "--no-rollback",
        ])
        .unwrap();
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(matches!(
            args.command,
            Commands::Batch {
                no_rollback: true,
                allow_restart: false,
                ..
            }
        ));
    }
}
