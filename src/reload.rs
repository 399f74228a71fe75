//! 重新加载协调模块
//!
//! 状态机：`Running -> ReloadRequested -> Reloading -> Running`，出错时 `Reloading -> Failed`。
//! 实际的重启由外部的 [`RuntimeProcess`] 完成，协调器负责异步触发重启、
//! 轮询健康状态，并在调用方给定的超时内返回结果。

use crate::model::{ResourceModel, SchemaRegistry};
use crate::operation::ProcessState;
use crate::persistence::SnapshotStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// 默认健康轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 协调器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadState {
    /// 正常运行
    Running,
    /// 已请求重新加载，等待执行
    ReloadRequested,
    /// 重新加载中
    Reloading,
    /// 重新加载失败，需要人工介入
    Failed,
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadState::Running => write!(f, "running"),
            ReloadState::ReloadRequested => write!(f, "reload-requested"),
            ReloadState::Reloading => write!(f, "reloading"),
            ReloadState::Failed => write!(f, "failed"),
        }
    }
}

/// 重新加载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// 完成，运行时已与快照一致
    Completed,
    /// 超时，重启可能仍在后台进行
    TimedOut,
    /// 失败
    Failed(String),
}

impl fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadOutcome::Completed => write!(f, "completed"),
            ReloadOutcome::TimedOut => write!(f, "timed-out"),
            ReloadOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// 状态变更事件
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// 新状态
    pub state: ReloadState,
    /// 变更时间
    pub timestamp: DateTime<Utc>,
    /// 附加说明
    pub reason: Option<String>,
}

/// 外部的“重启并报告健康状态”原语
#[async_trait]
pub trait RuntimeProcess: Send + Sync {
    /// 重启运行时，使其采用最新持久化的配置
    async fn restart(&self) -> Result<()>;

    /// 运行时是否已进入稳定状态
    async fn is_healthy(&self) -> bool;
}

/// 重新加载协调器
pub struct ReloadCoordinator {
    /// 运行时
    runtime: Arc<dyn RuntimeProcess>,
    /// 当前状态
    state: Arc<RwLock<ReloadState>>,
    /// 最近一次失败原因
    last_failure: Arc<RwLock<Option<String>>>,
    /// 需要重启的修改计数，每次标记过期时递增
    modified_generation: AtomicU64,
    /// 运行时已经加载到的修改计数，小于 `modified_generation` 表示过期
    applied_generation: AtomicU64,
    /// 防止并发重新加载
    in_flight: Mutex<()>,
    /// 健康轮询间隔
    poll_interval: Duration,
    /// 状态事件发送器
    event_sender: broadcast::Sender<ReloadEvent>,
    /// 成功完成的重新加载次数
    completed_reloads: AtomicUsize,
}

impl ReloadCoordinator {
    /// 创建新的协调器
    ///
    /// # 参数
    /// * `runtime` - 外部重启原语
    /// * `poll_interval` - 健康轮询间隔
    pub fn new(runtime: Arc<dyn RuntimeProcess>, poll_interval: Duration) -> Self {
        let (event_sender, _) = broadcast::channel(32);
        Self {
            runtime,
            state: Arc::new(RwLock::new(ReloadState::Running)),
            last_failure: Arc::new(RwLock::new(None)),
            modified_generation: AtomicU64::new(0),
            applied_generation: AtomicU64::new(0),
            in_flight: Mutex::new(()),
            poll_interval,
            event_sender,
            completed_reloads: AtomicUsize::new(0),
        }
    }

    /// 订阅状态变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_sender.subscribe()
    }

    pub async fn state(&self) -> ReloadState {
        *self.state.read().await
    }

    pub async fn last_failure(&self) -> Option<String> {
        self.last_failure.read().await.clone()
    }

    pub fn completed_reloads(&self) -> usize {
        self.completed_reloads.load(Ordering::SeqCst)
    }

    /// 标记运行时已过期，直到显式重新加载
    pub fn mark_reload_required(&self) {
        let previous = self.modified_generation.fetch_add(1, Ordering::SeqCst);
        if previous <= self.applied_generation.load(Ordering::SeqCst) {
            info!("运行时配置已过期，需要重新加载");
        }
    }

    pub fn is_reload_required(&self) -> bool {
        self.modified_generation.load(Ordering::SeqCst)
            > self.applied_generation.load(Ordering::SeqCst)
    }

    /// 面向操作结果的运行时状态
    pub fn process_state(&self) -> ProcessState {
        if self.is_reload_required() {
            ProcessState::ReloadRequired
        } else {
            ProcessState::Running
        }
    }

    /// 请求重新加载：`Running -> ReloadRequested`
    pub async fn request_reload(&self) {
        self.mark_reload_required();
        let mut state = self.state.write().await;
        if *state == ReloadState::Running {
            *state = ReloadState::ReloadRequested;
            drop(state);
            self.publish(ReloadState::ReloadRequested, None);
            info!("已请求重新加载");
        } else {
            debug!("当前状态 {} 下忽略重新加载请求", *state);
        }
    }

    /// 执行重新加载并等待完成
    ///
    /// 重启在后台任务中异步执行，本方法轮询健康状态直到稳定或超时。
    /// 失败原因原样返回，不会自动重试。
    pub async fn reload_and_wait(&self, timeout: Duration) -> ReloadOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("重新加载已在进行中");
            return ReloadOutcome::Failed("重新加载已在进行中".to_string());
        };

        // 重启开始前记录修改计数，之后提交的修改不算已加载
        let generation = self.modified_generation.load(Ordering::SeqCst);
        self.set_state(ReloadState::Reloading, None).await;
        info!("开始重新加载，超时: {:?}", timeout);

        let runtime = Arc::clone(&self.runtime);
        let poll_interval = self.poll_interval;
        let restart = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move { runtime.restart().await }
        });

        let waited = tokio::time::timeout(timeout, async move {
            match restart.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(format!("{e:#}")),
                Err(e) => return Err(format!("重启任务异常退出: {e}")),
            }

            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                if runtime.is_healthy().await {
                    return Ok(());
                }
                debug!("运行时尚未就绪，继续等待");
            }
        })
        .await;

        match waited {
            Ok(Ok(())) => {
                self.applied_generation.fetch_max(generation, Ordering::SeqCst);
                if self.is_reload_required() {
                    info!("重新加载期间有新的需要重启的修改，运行时仍需重新加载");
                }
                *self.last_failure.write().await = None;
                self.completed_reloads.fetch_add(1, Ordering::SeqCst);
                self.set_state(ReloadState::Running, None).await;
                info!("重新加载完成");
                ReloadOutcome::Completed
            }
            Ok(Err(reason)) => {
                error!("重新加载失败: {}", reason);
                *self.last_failure.write().await = Some(reason.clone());
                self.set_state(ReloadState::Failed, Some(reason.clone())).await;
                ReloadOutcome::Failed(reason)
            }
            Err(_) => {
                warn!("重新加载在 {:?} 内未完成", timeout);
                ReloadOutcome::TimedOut
            }
        }
    }

    async fn set_state(&self, new_state: ReloadState, reason: Option<String>) {
        *self.state.write().await = new_state;
        self.publish(new_state, reason);
    }

    fn publish(&self, state: ReloadState, reason: Option<String>) {
        // 没有订阅者时发送失败是正常的
        let _ = self.event_sender.send(ReloadEvent {
            state,
            timestamp: Utc::now(),
            reason,
        });
    }
}

/// 进程内运行时：重新读取快照并替换活动模型
pub struct ModelRuntime {
    /// 活动模型
    model: Arc<RwLock<ResourceModel>>,
    /// 快照存储
    store: Arc<dyn SnapshotStore>,
    /// 模式注册表
    schema: Arc<SchemaRegistry>,
    /// 是否健康
    healthy: AtomicBool,
}

impl ModelRuntime {
    pub fn new(
        model: Arc<RwLock<ResourceModel>>,
        store: Arc<dyn SnapshotStore>,
        schema: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            model,
            store,
            schema,
            healthy: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RuntimeProcess for ModelRuntime {
    async fn restart(&self) -> Result<()> {
        self.healthy.store(false, Ordering::SeqCst);

        // 从读取快照到替换模型全程持有写锁，与事务串行
        let mut model = self.model.write().await;
        let loaded = self.store.read_snapshot().await.context("读取快照失败")?;
        self.schema
            .validate_model(&loaded)
            .context("快照不符合资源模式")?;

        let count = loaded.resource_count();
        *model = loaded;
        drop(model);
        self.healthy.store(true, Ordering::SeqCst);

        info!("运行时已从快照重新加载，资源数: {}", count);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// 不做真实重启的运行时，用于测试
#[derive(Debug, Default)]
pub struct NoOpRuntime {
    /// 重启时返回的错误
    fail_with: Option<String>,
    /// 是否永远不健康
    never_healthy: bool,
    /// 模拟重启耗时
    restart_delay: Duration,
    /// 重启次数
    restarts: AtomicUsize,
}

impl NoOpRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重启总是失败
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::default()
        }
    }

    /// 重启后永远不会变为健康
    pub fn never_healthy() -> Self {
        Self {
            never_healthy: true,
            ..Self::default()
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeProcess for NoOpRuntime {
    async fn restart(&self) -> Result<()> {
        if !self.restart_delay.is_zero() {
            tokio::time::sleep(self.restart_delay).await;
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(reason) => Err(anyhow::anyhow!(reason.clone())),
            None => Ok(()),
        }
    }

    async fn is_healthy(&self) -> bool {
        !self.never_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceAddress;
    use crate::persistence::MemorySnapshotStore;

    fn coordinator(runtime: NoOpRuntime) -> (ReloadCoordinator, Arc<NoOpRuntime>) {
        let runtime = Arc::new(runtime);
        let coordinator = ReloadCoordinator::new(runtime.clone(), Duration::from_millis(5));
        (coordinator, runtime)
    }

    #[tokio::test]
    async fn test_request_then_reload_completes() {
        let (coordinator, runtime) = coordinator(NoOpRuntime::new());
        let mut events = coordinator.subscribe();

        coordinator.request_reload().await;
        assert_eq!(coordinator.state().await, ReloadState::ReloadRequested);
        assert_eq!(coordinator.process_state(), ProcessState::ReloadRequired);

        let outcome = coordinator.reload_and_wait(Duration::from_secs(5)).await;
        assert_eq!(outcome, ReloadOutcome::Completed);
        assert_eq!(coordinator.state().await, ReloadState::Running);
        assert_eq!(coordinator.process_state(), ProcessState::Running);
        assert_eq!(runtime.restarts(), 1);
        assert_eq!(coordinator.completed_reloads(), 1);

        let states: Vec<ReloadState> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(
            states,
            vec![
                ReloadState::ReloadRequested,
                ReloadState::Reloading,
                ReloadState::Running
            ]
        );
    }

    #[tokio::test]
    async fn test_reload_failure_is_reported_verbatim() {
        let (coordinator, _) = coordinator(NoOpRuntime::failing("disk on fire"));
        coordinator.mark_reload_required();

        let outcome = coordinator.reload_and_wait(Duration::from_secs(5)).await;
        assert_eq!(outcome, ReloadOutcome::Failed("disk on fire".to_string()));
        assert_eq!(coordinator.state().await, ReloadState::Failed);
        assert_eq!(coordinator.last_failure().await.as_deref(), Some("disk on fire"));
        // 失败后仍然过期
        assert!(coordinator.is_reload_required());
    }

    #[tokio::test]
    async fn test_reload_times_out() {
        let (coordinator, _) = coordinator(NoOpRuntime::never_healthy());

        let outcome = coordinator.reload_and_wait(Duration::from_millis(50)).await;
        assert_eq!(outcome, ReloadOutcome::TimedOut);
        assert_eq!(coordinator.state().await, ReloadState::Reloading);
    }

    #[tokio::test]
    async fn test_concurrent_reload_rejected() {
        let runtime = Arc::new(NoOpRuntime::new().with_restart_delay(Duration::from_millis(200)));
        let coordinator = Arc::new(ReloadCoordinator::new(runtime, Duration::from_millis(5)));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.reload_and_wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = coordinator.reload_and_wait(Duration::from_secs(5)).await;
        assert!(matches!(second, ReloadOutcome::Failed(_)));
        assert_eq!(first.await.unwrap(), ReloadOutcome::Completed);
    }

    #[tokio::test]
    async fn test_change_during_reload_keeps_runtime_stale() {
        let runtime = Arc::new(NoOpRuntime::new().with_restart_delay(Duration::from_millis(200)));
        let coordinator = Arc::new(ReloadCoordinator::new(runtime, Duration::from_millis(5)));
        coordinator.mark_reload_required();

        let reload = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.reload_and_wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.mark_reload_required();

        assert_eq!(reload.await.unwrap(), ReloadOutcome::Completed);
        assert_eq!(coordinator.state().await, ReloadState::Running);
        assert!(coordinator.is_reload_required());

        // 再次重新加载后追上最新修改
        let outcome = coordinator.reload_and_wait(Duration::from_secs(5)).await;
        assert_eq!(outcome, ReloadOutcome::Completed);
        assert!(!coordinator.is_reload_required());
    }

    #[tokio::test]
    async fn test_model_runtime_blocks_writers_until_swap() {
        let schema = Arc::new(SchemaRegistry::standard());
        let store = Arc::new(MemorySnapshotStore::with_model(&ResourceModel::with_defaults()).unwrap());
        let model = Arc::new(RwLock::new(ResourceModel::new()));
        let runtime = Arc::new(ModelRuntime::new(model.clone(), store, schema));

        let guard = model.read().await;
        let restart = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.restart().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // 持有读锁时重启无法读取快照并替换
        assert!(!runtime.is_healthy().await);
        assert!(!restart.is_finished());
        drop(guard);

        restart.await.unwrap().unwrap();
        assert!(runtime.is_healthy().await);
        assert_eq!(*model.read().await, ResourceModel::with_defaults());
    }

    #[tokio::test]
    async fn test_model_runtime_swaps_model() {
        let schema = Arc::new(SchemaRegistry::standard());
        let persisted = ResourceModel::with_defaults();
        let store = Arc::new(MemorySnapshotStore::with_model(&persisted).unwrap());
        let model = Arc::new(RwLock::new(ResourceModel::new()));

        let runtime = ModelRuntime::new(model.clone(), store, schema);
        runtime.restart().await.unwrap();

        assert!(runtime.is_healthy().await);
        let live = model.read().await;
        assert_eq!(*live, persisted);
        assert!(live.contains(&"subsystem=audit/file-audit-log=local-audit".parse::<ResourceAddress>().unwrap()));
    }

    #[tokio::test]
    async fn test_model_runtime_missing_snapshot_fails() {
        let schema = Arc::new(SchemaRegistry::standard());
        let store = Arc::new(MemorySnapshotStore::new());
        let model = Arc::new(RwLock::new(ResourceModel::with_defaults()));

        let runtime = ModelRuntime::new(model.clone(), store, schema);
        assert!(runtime.restart().await.is_err());
        assert!(!runtime.is_healthy().await);
        // 失败时保留原模型
        assert_eq!(*model.read().await, ResourceModel::with_defaults());
    }
}
