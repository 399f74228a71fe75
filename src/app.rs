//! 应用程序入口逻辑
//!
//! 解析命令行、初始化日志并分派命令

use crate::cli::args::{Args, Commands};
use crate::cli::commands::{
    load_server_config, BatchCommand, Command, InitCommand, OperationCommand, ReloadCommand,
    SnapshotCommand, ValidateCommand, WatchCommand,
};
use crate::logging::{LogConfig, LoggingSystem};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};

/// 应用程序主函数
pub async fn main() -> Result<()> {
    let args = Args::parse();

    // 配置文件有问题时仍按命令行级别输出日志，错误留给具体命令报告
    let log_config = match load_server_config(&args).await {
        Ok(config) => config.log_config(),
        Err(_) => LogConfig {
            level: args.log_level.map(Into::into).unwrap_or(log::LevelFilter::Info),
            json_format: args.json_logs,
            ..Default::default()
        },
    };
    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    debug!("{} v{} 启动", crate::APP_NAME, crate::VERSION);

    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 执行CLI命令
pub async fn execute_command(args: &Args) -> Result<()> {
    let command: &dyn Command = match &args.command {
        Commands::Init { .. } => &InitCommand,
        Commands::Validate { .. } => &ValidateCommand,
        Commands::Read { .. }
        | Commands::Add { .. }
        | Commands::Remove { .. }
        | Commands::Write { .. } => &OperationCommand,
        Commands::Batch { .. } => &BatchCommand,
        Commands::Reload { .. } => &ReloadCommand,
        Commands::Snapshot { .. } => &SnapshotCommand,
        Commands::Watch => &WatchCommand,
    };

    command.execute(args).await.map_err(anyhow::Error::from)
}
