//! 启动装配
//!
//! 加载快照（不存在时写入默认模型）、按模式校验，并构建控制器与文件监控

use crate::config::{ServerConfig, SnapshotWatcher};
use crate::controller::Controller;
use crate::error::PersistenceError;
use crate::model::{ResourceModel, SchemaRegistry};
use crate::persistence::{FileSnapshotStore, SnapshotStore};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 已启动的管理核心
pub struct Server {
    /// 运行配置
    config: ServerConfig,
    /// 控制器
    controller: Arc<Controller>,
}

impl Server {
    /// 按配置启动
    ///
    /// # 参数
    /// * `config` - 运行配置
    ///
    /// # 返回
    /// * `Result<Self>` - 启动好的服务
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let schema = Arc::new(SchemaRegistry::standard());
        let store = Self::build_store(&config);

        let model = load_or_initialize(&store, &schema)
            .await
            .with_context(|| {
                format!(
                    "加载配置快照失败: {}",
                    config.persistence.snapshot_path.display()
                )
            })?;
        info!("资源模型已加载，资源数: {}", model.resource_count());

        let controller = Controller::with_model_runtime(
            model,
            schema,
            Arc::new(store),
            config.poll_interval(),
        );

        Ok(Self {
            config,
            controller: Arc::new(controller),
        })
    }

    fn build_store(config: &ServerConfig) -> FileSnapshotStore {
        let store = FileSnapshotStore::new(&config.persistence.snapshot_path);
        match &config.persistence.archive_dir {
            Some(dir) => store.with_archive_dir(dir),
            None => store,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.config.persistence.snapshot_path
    }

    /// 创建快照文件监控器（尚未启动）
    pub fn snapshot_watcher(
        &self,
    ) -> Result<(
        SnapshotWatcher,
        tokio::sync::broadcast::Receiver<crate::config::SnapshotChangeEvent>,
    )> {
        SnapshotWatcher::new(
            self.snapshot_path(),
            Arc::clone(&self.controller),
            self.config.watch_debounce(),
            self.config.reload_timeout(),
        )
    }
}

/// 读取主快照并校验；不存在时写入默认模型
pub async fn load_or_initialize(
    store: &dyn SnapshotStore,
    schema: &SchemaRegistry,
) -> Result<ResourceModel> {
    match store.read_snapshot().await {
        Ok(model) => {
            schema
                .validate_model(&model)
                .context("快照不符合资源模式")?;
            Ok(model)
        }
        Err(PersistenceError::NotFound { path }) => {
            warn!("快照不存在，写入默认模型: {}", path);
            let model = ResourceModel::with_defaults();
            store
                .write_snapshot(&model)
                .await
                .context("写入默认快照失败")?;
            Ok(model)
        }
        Err(e) => Err(e).context("读取快照失败"),
    }
}
