//! 命令处理逻辑
//!
//! 实现各CLI命令。管理操作的输出统一为JSON结果格式。

use crate::cli::args::{Args, Commands, SnapshotAction};
use crate::config::{ConfigLoader, ServerConfig, TomlConfigLoader};
use crate::error::{ConfigError, ManagementError, ModelError, Result};
use crate::model::{AttributeValue, ResourceAddress, SchemaRegistry};
use crate::operation::{Operation, Transaction, TransactionOutcome};
use crate::persistence::{FileSnapshotStore, SnapshotStore};
use crate::reload::ReloadOutcome;
use crate::server::Server;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 加载运行配置并应用命令行覆盖
///
/// 显式指定的配置文件必须存在；使用默认路径且文件不存在时采用默认配置。
pub async fn load_server_config(args: &Args) -> Result<ServerConfig> {
    let path = args.get_config_path();
    let loader = TomlConfigLoader::new(true);

    let mut config = if path.exists() {
        loader.load_from_file(&path).await?
    } else if args.config.is_some() {
        return Err(ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        }
        .into());
    } else {
        ServerConfig::default()
    };

    if let Some(snapshot) = &args.snapshot {
        config.persistence.snapshot_path = snapshot.clone();
    }
    if let Some(level) = args.log_level {
        config.logging.level = level.to_string();
    }
    if args.json_logs {
        config.logging.json = true;
    }

    loader.validate(&config)?;
    Ok(config)
}

async fn open_server(args: &Args) -> Result<Server> {
    let config = load_server_config(args).await?;
    Ok(Server::start(config).await?)
}

/// 解析 `name=value` 形式的属性，值为JSON数组时解析为列表
pub fn parse_attribute(input: &str) -> Result<(String, AttributeValue)> {
    let (name, raw) = input.split_once('=').ok_or_else(|| {
        ModelError::InvalidOperation(format!("属性格式应为 name=value: {input}"))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ModelError::InvalidOperation(format!("属性名称为空: {input}")).into());
    }

    let value = if raw.trim_start().starts_with('[') {
        let parsed: serde_json::Value = serde_json::from_str(raw)?;
        AttributeValue::from_json(&parsed)?
    } else {
        AttributeValue::from(raw)
    };
    Ok((name.to_string(), value))
}

fn with_attributes(mut operation: Operation, attributes: &[String]) -> Result<Operation> {
    for input in attributes {
        let (name, value) = parse_attribute(input)?;
        operation = operation.with_attribute(name, value);
    }
    Ok(operation)
}

/// 由命令行参数构建事务，非管理操作命令返回 `None`
pub fn transaction_from_command(command: &Commands) -> Result<Option<Transaction>> {
    let transaction = match command {
        Commands::Read {
            address,
            recursive,
            no_defaults,
        } => Transaction::single(
            Operation::read(address.parse::<ResourceAddress>()?)
                .recursive(*recursive)
                .include_defaults(!*no_defaults),
        ),
        Commands::Add {
            address,
            attributes,
            allow_restart,
        } => Transaction::single(with_attributes(
            Operation::add(address.parse()?),
            attributes,
        )?)
        .allow_restart(*allow_restart),
        Commands::Remove {
            address,
            allow_restart,
        } => Transaction::single(Operation::remove(address.parse()?)).allow_restart(*allow_restart),
        Commands::Write {
            address,
            attributes,
            allow_restart,
        } => {
            let (first, rest) = attributes.split_first().ok_or_else(|| {
                ModelError::InvalidOperation("write 至少需要一个属性".to_string())
            })?;
            let (name, value) = parse_attribute(first)?;
            let operation = with_attributes(Operation::update(address.parse()?, name, value), rest)?;
            Transaction::single(operation).allow_restart(*allow_restart)
        }
        _ => return Ok(None),
    };
    Ok(Some(transaction))
}

fn print_outcome(outcome: &TransactionOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
    if outcome.success {
        Ok(())
    } else {
        Err(ManagementError::Other(anyhow::anyhow!(
            "{}",
            outcome
                .failure_description
                .clone()
                .unwrap_or_else(|| "操作失败".to_string())
        )))
    }
}

/// 初始化命令
pub struct InitCommand;

#[async_trait]
impl Command for InitCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Init { config_path, force } = &args.command {
            self.create_config_file(config_path, *force).await?;

            let mut config = ServerConfig::default();
            if let Some(snapshot) = &args.snapshot {
                config.persistence.snapshot_path = snapshot.clone();
            }
            let server = Server::start(config).await?;
            println!("快照已就绪: {}", server.snapshot_path().display());
        }
        Ok(())
    }
}

impl InitCommand {
    async fn create_config_file(&self, config_path: &Path, force: bool) -> Result<()> {
        if config_path.exists() && !force {
            eprintln!("配置文件已存在: {}", config_path.display());
            eprintln!("使用 --force 参数覆盖现有文件");
            return Ok(());
        }

        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(&ServerConfig::default())
            .map_err(|e| ConfigError::ParseError(format!("生成默认配置失败: {e}")))?;
        tokio::fs::write(config_path, content).await?;

        println!("配置文件已创建: {}", config_path.display());
        Ok(())
    }
}

/// 验证命令：检查配置文件，以及快照是否符合资源模式
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Validate { config_path } = &args.command else {
            return Ok(());
        };

        let mut args = args.clone();
        if let Some(path) = config_path {
            args.config = Some(path.clone());
        }
        let config = load_server_config(&args).await?;
        println!("✅ 配置有效");

        let store = FileSnapshotStore::new(&config.persistence.snapshot_path);
        match store.read_snapshot().await {
            Ok(model) => {
                SchemaRegistry::standard().validate_model(&model)?;
                println!(
                    "✅ 快照有效: {} ({} 个资源)",
                    config.persistence.snapshot_path.display(),
                    model.resource_count()
                );
            }
            Err(crate::error::PersistenceError::NotFound { path }) => {
                warn!("快照不存在: {}", path);
                println!("⚠️ 快照不存在，首次启动时将写入默认模型: {path}");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// 单个管理操作命令：read / add / remove / write
pub struct OperationCommand;

#[async_trait]
impl Command for OperationCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Some(transaction) = transaction_from_command(&args.command)? else {
            return Ok(());
        };
        let server = open_server(args).await?;
        let outcome = server.controller().execute(transaction).await;
        print_outcome(&outcome)
    }
}

/// 组合事务命令
pub struct BatchCommand;

#[async_trait]
impl Command for BatchCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Batch {
            file,
            no_rollback,
            allow_restart,
        } = &args.command
        else {
            return Ok(());
        };

        let content = tokio::fs::read_to_string(file).await?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        let mut transaction = Transaction::from_json(&value)?;
        if *no_rollback {
            transaction = transaction.rollback_on_failure(false);
        }
        if *allow_restart {
            transaction = transaction.allow_restart(true);
        }
        info!("执行组合事务，步骤数: {}", transaction.operations.len());

        let server = open_server(args).await?;
        let outcome = server.controller().execute(transaction).await;
        print_outcome(&outcome)
    }
}

/// 重新加载命令
pub struct ReloadCommand;

#[async_trait]
impl Command for ReloadCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Reload { timeout_ms } = &args.command else {
            return Ok(());
        };

        let server = open_server(args).await?;
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| server.config().reload_timeout());

        let outcome = server.controller().reload_and_wait(timeout).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "outcome": outcome.to_string(),
                "process-state": server.controller().process_state(),
            }))?
        );

        match outcome {
            ReloadOutcome::Completed => Ok(()),
            other => Err(ManagementError::Other(anyhow::anyhow!("重新加载未完成: {other}"))),
        }
    }
}

/// 快照归档命令
pub struct SnapshotCommand;

#[async_trait]
impl Command for SnapshotCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Snapshot { action } = &args.command else {
            return Ok(());
        };

        let server = open_server(args).await?;
        let controller = server.controller();
        match action {
            SnapshotAction::Take { label } => {
                let info = controller.take_snapshot(label).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
            }
            SnapshotAction::List => {
                let archives = controller.list_snapshots().await?;
                println!("{}", serde_json::to_string_pretty(&archives)?);
            }
            SnapshotAction::Restore { id } => {
                controller.restore_snapshot(id).await?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "restored": id,
                        "process-state": controller.process_state(),
                    }))?
                );
            }
        }
        Ok(())
    }
}

/// 监控命令：持续监控快照文件，直到收到 Ctrl+C
pub struct WatchCommand;

#[async_trait]
impl Command for WatchCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let server = open_server(args).await?;
        let (mut watcher, mut events) = server.snapshot_watcher()?;
        watcher.start()?;

        println!("正在监控快照: {}", watcher.snapshot_path().display());
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("收到中断信号，停止监控");
                    break;
                }
                event = events.recv() => match event {
                    Ok(change) => println!(
                        "{}",
                        json!({
                            "version": change.version,
                            "outcome": change.outcome.to_string(),
                            "timestamp": change.timestamp.to_rfc3339(),
                        })
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("跳过了 {} 个快照变更事件", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        watcher.stop();
        Ok(())
    }
}
