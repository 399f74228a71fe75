//! 快照文件监控模块
//!
//! 监控主快照文件的外部修改。防抖动后比较文件内容与活动模型，
//! 不一致时通过重新加载协调器让运行时采用新配置。
//! 控制器自身的写穿也会触发文件事件，内容一致时直接忽略。

use crate::controller::Controller;
use crate::persistence::decode_snapshot;
use crate::reload::ReloadOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// 快照变更事件
#[derive(Debug, Clone)]
pub struct SnapshotChangeEvent {
    /// 快照文件路径
    pub snapshot_path: PathBuf,
    /// 重新加载结果
    pub outcome: ReloadOutcome,
    /// 变更时间
    pub timestamp: DateTime<Utc>,
    /// 已处理的外部变更序号
    pub version: u64,
}

/// 快照文件监控器
pub struct SnapshotWatcher {
    /// 快照文件路径
    snapshot_path: PathBuf,
    /// 控制器
    controller: Arc<Controller>,
    /// 文件系统监控器
    watcher: Option<RecommendedWatcher>,
    /// 事件发送器
    event_sender: broadcast::Sender<SnapshotChangeEvent>,
    /// 防抖动延迟
    debounce_delay: Duration,
    /// 重新加载超时
    reload_timeout: Duration,
}

impl SnapshotWatcher {
    /// 创建新的快照监控器
    ///
    /// # 参数
    /// * `snapshot_path` - 主快照文件路径
    /// * `controller` - 管理控制器
    /// * `debounce_delay` - 防抖动延迟时间
    /// * `reload_timeout` - 每次重新加载的等待超时
    ///
    /// # 返回
    /// * `Result<(Self, broadcast::Receiver<SnapshotChangeEvent>)>` - 监控器和事件接收器
    pub fn new<P: AsRef<Path>>(
        snapshot_path: P,
        controller: Arc<Controller>,
        debounce_delay: Duration,
        reload_timeout: Duration,
    ) -> Result<(Self, broadcast::Receiver<SnapshotChangeEvent>)> {
        let snapshot_path = Self::resolve_snapshot_path(snapshot_path.as_ref())?;
        let (event_sender, event_receiver) = broadcast::channel(32);

        let watcher = Self {
            snapshot_path,
            controller,
            watcher: None,
            event_sender,
            debounce_delay,
            reload_timeout,
        };

        Ok((watcher, event_receiver))
    }

    /// 校验并规范化快照路径，文件事件中的路径是绝对路径
    fn resolve_snapshot_path(path: &Path) -> Result<PathBuf> {
        if !path.is_file() {
            return Err(anyhow::anyhow!("快照文件不存在: {}", path.display()));
        }

        if path.extension().map(|e| e != "json").unwrap_or(true) {
            warn!("快照文件扩展名不是.json: {}", path.display());
        }

        path.canonicalize()
            .with_context(|| format!("无法解析快照路径: {}", path.display()))
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// 启动快照文件监控
    pub fn start(&mut self) -> Result<()> {
        info!("启动快照文件监控: {}", self.snapshot_path.display());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // 接收端关闭说明监控已停止
                let _ = tx.send(res);
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .context("创建文件监控器失败")?;

        // 原子写入通过重命名完成，需要监控所在目录
        let watch_path = self
            .snapshot_path
            .parent()
            .unwrap_or(&self.snapshot_path)
            .to_path_buf();
        watcher
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("监控目录失败: {}", watch_path.display()))?;

        self.watcher = Some(watcher);

        tokio::spawn(Self::handle_file_events(
            rx,
            self.snapshot_path.clone(),
            Arc::clone(&self.controller),
            self.event_sender.clone(),
            self.debounce_delay,
            self.reload_timeout,
        ));

        info!("快照文件监控已启动");
        Ok(())
    }

    /// 处理文件系统事件
    async fn handle_file_events(
        mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        snapshot_path: PathBuf,
        controller: Arc<Controller>,
        event_sender: broadcast::Sender<SnapshotChangeEvent>,
        debounce_delay: Duration,
        reload_timeout: Duration,
    ) {
        let mut version = 0u64;

        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("文件监控事件错误: {}", e);
                    continue;
                }
            };

            if !Self::is_target_file_event(&event, &snapshot_path) {
                continue;
            }
            debug!("检测到快照文件变更事件: {:?}", event.kind);

            // 等待写入完成，合并这段时间内的重复事件
            tokio::time::sleep(debounce_delay).await;
            while rx.try_recv().is_ok() {}

            match Self::apply_external_change(&controller, &snapshot_path, reload_timeout).await {
                Ok(Some(outcome)) => {
                    version += 1;
                    info!("外部快照变更已处理，版本: {}，结果: {}", version, outcome);
                    let change = SnapshotChangeEvent {
                        snapshot_path: snapshot_path.clone(),
                        outcome,
                        timestamp: Utc::now(),
                        version,
                    };
                    if event_sender.send(change).is_err() {
                        debug!("没有快照变更订阅者");
                    }
                }
                Ok(None) => debug!("快照内容与活动模型一致，忽略"),
                Err(e) => error!("处理快照变更失败: {:#}", e),
            }
        }

        debug!("快照文件事件通道已关闭");
    }

    /// 检查是否是目标文件的事件
    fn is_target_file_event(event: &Event, target_path: &Path) -> bool {
        match &event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => {
                event.paths.iter().any(|path| path == target_path)
            }
            _ => false,
        }
    }

    /// 将外部修改过的快照应用到运行时
    ///
    /// # 返回
    /// * `Ok(None)` - 文件内容与活动模型一致，无需处理
    /// * `Ok(Some(outcome))` - 已触发重新加载
    pub async fn apply_external_change(
        controller: &Controller,
        snapshot_path: &Path,
        reload_timeout: Duration,
    ) -> Result<Option<ReloadOutcome>> {
        let content = tokio::fs::read_to_string(snapshot_path)
            .await
            .with_context(|| format!("读取快照失败: {}", snapshot_path.display()))?;
        let model = decode_snapshot(&content).context("解析快照失败")?;

        if model == controller.snapshot_model().await {
            return Ok(None);
        }

        controller
            .schema()
            .validate_model(&model)
            .context("外部修改的快照不符合资源模式")?;

        info!("检测到外部修改的快照，开始重新加载");
        Ok(Some(controller.reload_and_wait(reload_timeout).await))
    }

    /// 停止监控
    pub fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            info!("快照文件监控已停止");
        }
    }

    /// 订阅快照变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotChangeEvent> {
        self.event_sender.subscribe()
    }
}

impl Drop for SnapshotWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceAddress, ResourceModel, SchemaRegistry};
    use crate::operation::{Operation, ProcessState};
    use crate::persistence::{FileSnapshotStore, SnapshotStore};
    use tempfile::TempDir;

    async fn file_backed_controller(dir: &TempDir) -> (Arc<Controller>, PathBuf) {
        let path = dir.path().join("configuration.json");
        let store = Arc::new(FileSnapshotStore::new(&path));
        let model = ResourceModel::with_defaults();
        store.write_snapshot(&model).await.unwrap();

        let controller = Controller::with_model_runtime(
            model,
            Arc::new(SchemaRegistry::standard()),
            store,
            Duration::from_millis(5),
        );
        (Arc::new(controller), path)
    }

    #[tokio::test]
    async fn test_watcher_creation_and_validation() {
        let dir = TempDir::new().unwrap();
        let (controller, path) = file_backed_controller(&dir).await;

        let result = SnapshotWatcher::new(
            &path,
            Arc::clone(&controller),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        assert!(result.is_ok());

        let missing = SnapshotWatcher::new(
            dir.path().join("missing.json"),
            controller,
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_own_write_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (controller, path) = file_backed_controller(&dir).await;

        controller
            .execute_operation(Operation::remove(
                "subsystem=logging".parse::<ResourceAddress>().unwrap(),
            ))
            .await;

        let result = SnapshotWatcher::apply_external_change(&controller, &path, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_external_edit_is_reloaded() {
        let dir = TempDir::new().unwrap();
        let (controller, path) = file_backed_controller(&dir).await;

        // 模拟外部工具直接改写快照
        let mut edited = ResourceModel::with_defaults();
        edited
            .remove(&"subsystem=logging".parse::<ResourceAddress>().unwrap())
            .unwrap();
        FileSnapshotStore::new(&path).write_snapshot(&edited).await.unwrap();

        let outcome = SnapshotWatcher::apply_external_change(&controller, &path, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, Some(ReloadOutcome::Completed));
        assert_eq!(controller.snapshot_model().await, edited);
        assert_eq!(controller.process_state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_invalid_external_edit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (controller, path) = file_backed_controller(&dir).await;

        tokio::fs::write(&path, r#"{"format_version": 1, "saved_at": "2026-01-01T00:00:00Z", "root": {"children": {"bogus": {"x": {}}}}}"#)
            .await
            .unwrap();

        let result =
            SnapshotWatcher::apply_external_change(&controller, &path, Duration::from_secs(1)).await;
        assert!(result.is_err());
        assert_eq!(controller.snapshot_model().await, ResourceModel::with_defaults());
    }
}
