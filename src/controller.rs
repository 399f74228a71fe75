//! 管理控制器
//!
//! 所有修改都经过控制器：按顺序执行事务中的操作，记录撤销日志，
//! 按回滚策略处理失败，写穿持久化，并跟踪运行时是否需要重新加载。
//!
//! 控制器从不返回 `Err`，所有失败都体现在 [`TransactionOutcome`] 中。

use crate::error::{ManagementError, ModelError, PersistenceError};
use crate::logging::LoggingSystem;
use crate::model::{
    AttributeValue, Formatter, FormatterCapability, FormatterFactory, FormatterKind, Resource,
    ResourceAddress, ResourceModel, SchemaRegistry,
};
use crate::operation::{
    Operation, OperationKind, OperationOutcome, ProcessState, Transaction, TransactionOutcome,
};
use crate::persistence::{SnapshotInfo, SnapshotStore};
use crate::reload::{ModelRuntime, ReloadCoordinator, ReloadOutcome};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 撤销日志条目
#[derive(Debug)]
enum UndoAction {
    /// 删除新添加的资源
    Remove(ResourceAddress),
    /// 重新挂上被删除的子树
    Reinsert(ResourceAddress, Resource),
    /// 恢复属性旧值，按写入顺序记录
    Restore(ResourceAddress, Vec<(String, Option<AttributeValue>)>),
}

impl UndoAction {
    fn apply(self, model: &mut ResourceModel) -> Result<(), ModelError> {
        match self {
            UndoAction::Remove(address) => model.remove(&address).map(|_| ()),
            UndoAction::Reinsert(address, resource) => model.insert(&address, resource),
            UndoAction::Restore(address, previous) => {
                for (name, value) in previous.into_iter().rev() {
                    model.restore_attribute(&address, &name, value)?;
                }
                Ok(())
            }
        }
    }
}

/// 单个操作成功应用后的结果
struct Applied {
    result: Option<Value>,
    requires_restart: bool,
    undo: Option<UndoAction>,
}

impl Applied {
    fn read(result: Value) -> Self {
        Self {
            result: Some(result),
            requires_restart: false,
            undo: None,
        }
    }
}

/// 管理控制器
pub struct Controller {
    /// 活动模型
    model: Arc<RwLock<ResourceModel>>,
    /// 资源类型注册表
    schema: Arc<SchemaRegistry>,
    /// 快照存储
    store: Arc<dyn SnapshotStore>,
    /// 重新加载协调器
    reload: Arc<ReloadCoordinator>,
}

impl Controller {
    /// 创建新的控制器
    ///
    /// # 参数
    /// * `model` - 活动模型，与运行时共享
    /// * `schema` - 资源类型注册表
    /// * `store` - 快照存储
    /// * `reload` - 重新加载协调器
    pub fn new(
        model: Arc<RwLock<ResourceModel>>,
        schema: Arc<SchemaRegistry>,
        store: Arc<dyn SnapshotStore>,
        reload: Arc<ReloadCoordinator>,
    ) -> Self {
        Self {
            model,
            schema,
            store,
            reload,
        }
    }

    /// 以进程内运行时创建控制器：重新加载时从快照存储重建活动模型
    pub fn with_model_runtime(
        model: ResourceModel,
        schema: Arc<SchemaRegistry>,
        store: Arc<dyn SnapshotStore>,
        poll_interval: Duration,
    ) -> Self {
        let model = Arc::new(RwLock::new(model));
        let runtime = ModelRuntime::new(Arc::clone(&model), Arc::clone(&store), Arc::clone(&schema));
        let reload = Arc::new(ReloadCoordinator::new(Arc::new(runtime), poll_interval));
        Self::new(model, schema, store, reload)
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    pub fn reload_coordinator(&self) -> &Arc<ReloadCoordinator> {
        &self.reload
    }

    /// 当前模型的副本
    pub async fn snapshot_model(&self) -> ResourceModel {
        self.model.read().await.clone()
    }

    /// 运行时相对于已持久化配置的状态
    pub fn process_state(&self) -> ProcessState {
        self.reload.process_state()
    }

    /// 执行事务
    ///
    /// # 参数
    /// * `transaction` - 待执行的事务
    ///
    /// # 返回
    /// * `TransactionOutcome` - 每一步的结果以及事务级状态
    pub async fn execute(&self, transaction: Transaction) -> TransactionOutcome {
        let id = Uuid::new_v4();
        debug!(
            transaction_id = %id,
            "开始执行事务，步骤数: {}",
            transaction.operations.len()
        );

        let outcome = if transaction.is_read_only() {
            self.execute_read_only(id, &transaction).await
        } else {
            self.execute_write(id, &transaction).await
        };

        Self::audit(&transaction, &outcome);
        outcome
    }

    /// 执行单个操作
    pub async fn execute_operation(&self, operation: Operation) -> TransactionOutcome {
        self.execute(Transaction::single(operation)).await
    }

    async fn execute_read_only(&self, id: Uuid, transaction: &Transaction) -> TransactionOutcome {
        let model = self.model.read().await;
        let steps: Vec<OperationOutcome> = transaction
            .operations
            .iter()
            .map(|operation| match self.read(&model, operation) {
                Ok(result) => OperationOutcome::success(Some(result), false),
                Err(e) => OperationOutcome::failed(e),
            })
            .collect();
        drop(model);

        let success = steps.iter().all(|s| s.success);
        TransactionOutcome {
            id,
            success,
            failure_description: (!success).then(|| describe_failures(&steps)),
            steps,
            requires_restart: false,
            rolled_back: false,
            process_state: self.reload.process_state(),
            composite: transaction.composite,
        }
    }

    async fn execute_write(&self, id: Uuid, transaction: &Transaction) -> TransactionOutcome {
        let total = transaction.operations.len();
        let mut model = self.model.write().await;
        let mut undo_log: Vec<UndoAction> = Vec::new();
        let mut steps: Vec<OperationOutcome> = Vec::with_capacity(total);
        let mut failed = false;
        let mut rolled_back = false;

        for (index, operation) in transaction.operations.iter().enumerate() {
            match self.apply(&mut model, operation) {
                Ok(applied) => {
                    if let Some(undo) = applied.undo {
                        undo_log.push(undo);
                    }
                    steps.push(OperationOutcome::success(
                        applied.result,
                        applied.requires_restart,
                    ));
                }
                Err(e) => {
                    warn!(
                        transaction_id = %id,
                        "步骤 {} ({}) 失败: {}",
                        index + 1,
                        operation,
                        e
                    );
                    steps.push(OperationOutcome::failed(e));
                    failed = true;

                    if transaction.headers.rollback_on_failure {
                        Self::rollback(&mut model, &mut undo_log);
                        mark_rolled_back(&mut steps);
                        rolled_back = true;
                        steps.extend((index + 1..total).map(|_| OperationOutcome::not_executed()));
                        break;
                    }
                }
            }
        }

        let mut failure_description = failed.then(|| describe_failures(&steps));

        if !undo_log.is_empty() {
            if let Err(e) = self.store.write_snapshot(&model).await {
                error!(transaction_id = %id, "持久化失败，撤销全部已应用的操作: {}", e);
                Self::rollback(&mut model, &mut undo_log);
                mark_rolled_back(&mut steps);
                rolled_back = true;
                failed = true;
                failure_description = Some(format!("持久化失败，事务已回滚: {e}"));
            }
        }

        let requires_restart = steps.iter().any(|s| s.success && !s.rolled_back && s.requires_restart);
        if requires_restart {
            if transaction.headers.allow_restart {
                self.reload.request_reload().await;
            } else {
                self.reload.mark_reload_required();
            }
        }
        drop(model);

        TransactionOutcome {
            id,
            success: !failed,
            steps,
            requires_restart,
            rolled_back,
            process_state: self.reload.process_state(),
            failure_description,
            composite: transaction.composite,
        }
    }

    /// 按撤销日志逆序恢复
    fn rollback(model: &mut ResourceModel, undo_log: &mut Vec<UndoAction>) {
        while let Some(undo) = undo_log.pop() {
            if let Err(e) = undo.apply(model) {
                error!("回滚步骤失败: {}", e);
            }
        }
    }

    fn apply(&self, model: &mut ResourceModel, operation: &Operation) -> Result<Applied, ModelError> {
        let address = &operation.address;
        match operation.kind {
            OperationKind::Read => self.read(model, operation).map(Applied::read),
            OperationKind::Add => {
                if model.contains(address) {
                    return Err(ModelError::AlreadyExists {
                        address: address.to_string(),
                    });
                }
                let attributes = self.schema.validate_add(address, operation.attributes.clone())?;
                let requires_restart = match address.resource_type() {
                    Some(resource_type) => self
                        .schema
                        .definition(resource_type)?
                        .any_requires_restart(attributes.keys()),
                    None => false,
                };
                model.add(address, attributes)?;
                Ok(Applied {
                    result: None,
                    requires_restart,
                    undo: Some(UndoAction::Remove(address.clone())),
                })
            }
            OperationKind::Remove => {
                let removed = model.remove(address)?;
                let requires_restart = self.subtree_requires_restart(address, &removed);
                Ok(Applied {
                    result: None,
                    requires_restart,
                    undo: Some(UndoAction::Reinsert(address.clone(), removed)),
                })
            }
            OperationKind::Update => {
                if operation.attributes.is_empty() {
                    return Err(ModelError::InvalidOperation(
                        "write-attribute 至少需要一个属性".to_string(),
                    ));
                }
                model.resolve(address)?;

                let mut previous = Vec::with_capacity(operation.attributes.len());
                for (name, value) in &operation.attributes {
                    match model.set_attribute(&self.schema, address, name, value.clone()) {
                        Ok(old) => previous.push((name.clone(), old)),
                        Err(e) => {
                            // 单个操作内部也要原子
                            if let Err(undo_err) =
                                UndoAction::Restore(address.clone(), previous).apply(model)
                            {
                                error!("恢复属性失败: {}", undo_err);
                            }
                            return Err(e);
                        }
                    }
                }

                let requires_restart = address
                    .resource_type()
                    .map(|t| {
                        operation
                            .attributes
                            .keys()
                            .any(|name| self.schema.requires_restart(t, name))
                    })
                    .unwrap_or(false);
                Ok(Applied {
                    result: None,
                    requires_restart,
                    undo: Some(UndoAction::Restore(address.clone(), previous)),
                })
            }
        }
    }

    fn read(&self, model: &ResourceModel, operation: &Operation) -> Result<Value, ModelError> {
        let resource = model.resolve(&operation.address)?;
        Ok(self.describe(
            &operation.address,
            resource,
            operation.include_defaults,
            operation.recursive,
        ))
    }

    /// 资源的读取视图：属性（可合并默认值）以及子资源
    fn describe(
        &self,
        address: &ResourceAddress,
        resource: &Resource,
        include_defaults: bool,
        recursive: bool,
    ) -> Value {
        let mut object = Map::new();

        for (name, value) in self.effective_attributes(address, resource, include_defaults) {
            object.insert(name, value.to_json());
        }

        for (child_type, named) in &resource.children {
            let mut children = Map::new();
            for (name, child) in named {
                let value = match address.append(child_type, name) {
                    Ok(child_address) if recursive => {
                        self.describe(&child_address, child, include_defaults, true)
                    }
                    _ => Value::Null,
                };
                children.insert(name.clone(), value);
            }
            object.insert(child_type.clone(), Value::Object(children));
        }

        Value::Object(object)
    }

    fn effective_attributes(
        &self,
        address: &ResourceAddress,
        resource: &Resource,
        include_defaults: bool,
    ) -> BTreeMap<String, AttributeValue> {
        let mut attributes = match address.resource_type() {
            Some(resource_type) if include_defaults => self.schema.defaults_for(resource_type),
            _ => BTreeMap::new(),
        };
        attributes.extend(
            resource
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        attributes
    }

    fn subtree_requires_restart(&self, address: &ResourceAddress, resource: &Resource) -> bool {
        let own = address
            .resource_type()
            .and_then(|t| self.schema.definition(t).ok())
            .map(|d| d.any_requires_restart(resource.attributes.keys()))
            .unwrap_or(false);

        own || resource.children.iter().any(|(child_type, named)| {
            named.iter().any(|(name, child)| {
                address
                    .append(child_type, name)
                    .map(|child_address| self.subtree_requires_restart(&child_address, child))
                    .unwrap_or(false)
            })
        })
    }

    /// 读取资源的有效属性（包含默认值）
    pub async fn read_resource(
        &self,
        address: &ResourceAddress,
    ) -> Result<BTreeMap<String, AttributeValue>, ModelError> {
        let model = self.model.read().await;
        let resource = model.resolve(address)?;
        Ok(self.effective_attributes(address, resource, true))
    }

    /// 为资源创建格式化器
    ///
    /// 固定格式化器类型直接返回，可选择的类型按属性取值（或其默认值）决定。
    pub async fn formatter_for(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn Formatter>, ModelError> {
        let resource_type = address
            .resource_type()
            .ok_or_else(|| ModelError::InvalidOperation("根资源没有格式化器".to_string()))?;
        let definition = self.schema.definition(resource_type)?;

        let model = self.model.read().await;
        let resource = model.resolve(address)?;

        let kind = match &definition.formatter {
            Some(FormatterCapability::Fixed(kind)) => *kind,
            Some(FormatterCapability::Selectable { attribute }) => {
                let selected = resource
                    .attributes
                    .get(attribute)
                    .cloned()
                    .or_else(|| {
                        definition
                            .attributes
                            .get(attribute)
                            .and_then(|a| a.default.clone())
                    })
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                FormatterKind::parse(&selected).ok_or_else(|| ModelError::InvalidValue {
                    attribute: attribute.clone(),
                    value: selected.clone(),
                    allowed: vec![FormatterKind::Simple.to_string(), FormatterKind::Json.to_string()],
                })?
            }
            None => {
                return Err(ModelError::InvalidOperation(format!(
                    "资源类型 {resource_type} 不提供格式化器"
                )))
            }
        };

        Ok(kind.create_formatter())
    }

    /// 归档当前配置
    ///
    /// 先把活动模型写入主快照，再归档，保证归档内容与内存一致。
    pub async fn take_snapshot(&self, label: &str) -> Result<SnapshotInfo, PersistenceError> {
        let model = self.model.write().await;
        self.store.write_snapshot(&model).await?;
        let info = self.store.archive(label).await?;
        drop(model);

        info!("已归档配置快照: {}", info.id);
        LoggingSystem::audit_log("take-snapshot", "success", Some(&info.id));
        Ok(info)
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, PersistenceError> {
        self.store.list_archives().await
    }

    /// 恢复归档快照
    ///
    /// 归档内容经模式校验后成为主快照和活动模型，运行时标记为需要重新加载。
    pub async fn restore_snapshot(&self, id: &str) -> Result<(), ManagementError> {
        let restored = self.store.read_archive(id).await?;
        self.schema.validate_model(&restored)?;

        let mut model = self.model.write().await;
        self.store.write_snapshot(&restored).await?;
        *model = restored;
        drop(model);

        self.reload.mark_reload_required();
        info!("已恢复配置快照: {}", id);
        LoggingSystem::audit_log("restore-snapshot", "success", Some(id));
        Ok(())
    }

    /// 重新加载运行时并等待完成
    pub async fn reload_and_wait(&self, timeout: Duration) -> ReloadOutcome {
        let outcome = self.reload.reload_and_wait(timeout).await;
        LoggingSystem::audit_log("reload", &outcome.to_string(), None);
        outcome
    }

    fn audit(transaction: &Transaction, outcome: &TransactionOutcome) {
        let operation = if transaction.composite {
            "composite".to_string()
        } else {
            transaction
                .operations
                .first()
                .map(|op| op.to_string())
                .unwrap_or_default()
        };
        let result = if outcome.success {
            "success"
        } else if outcome.rolled_back {
            "rolled-back"
        } else {
            "failed"
        };
        let details = format!(
            "id={} steps={} requires_restart={} process_state={}",
            outcome.id,
            outcome.steps.len(),
            outcome.requires_restart,
            outcome.process_state
        );
        LoggingSystem::audit_log(&operation, result, Some(&details));
    }
}

fn mark_rolled_back(steps: &mut [OperationOutcome]) {
    for step in steps.iter_mut().filter(|s| s.success) {
        step.rolled_back = true;
        step.requires_restart = false;
    }
}

fn describe_failures(steps: &[OperationOutcome]) -> String {
    let failures: Vec<String> = steps
        .iter()
        .enumerate()
        .filter_map(|(index, step)| {
            step.error
                .as_ref()
                .map(|e| format!("step-{}: {}", index + 1, e))
        })
        .collect();
    format!("操作失败: {}", failures.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogRecord;
    use crate::persistence::MemorySnapshotStore;
    use crate::reload::{NoOpRuntime, ReloadState};
    use serde_json::json;

    struct Fixture {
        controller: Controller,
        store: Arc<MemorySnapshotStore>,
    }

    fn fixture() -> Fixture {
        let model = ResourceModel::with_defaults();
        let store = Arc::new(MemorySnapshotStore::with_model(&model).unwrap());
        let reload = Arc::new(ReloadCoordinator::new(
            Arc::new(NoOpRuntime::new()),
            Duration::from_millis(5),
        ));
        let controller = Controller::new(
            Arc::new(RwLock::new(model)),
            Arc::new(SchemaRegistry::standard()),
            store.clone(),
            reload,
        );
        Fixture { controller, store }
    }

    fn addr(s: &str) -> ResourceAddress {
        s.parse().unwrap()
    }

    fn periodic_add(name: &str) -> Operation {
        Operation::add(addr(&format!("subsystem=audit/periodic-rotating-file-audit-log={name}")))
            .with_attribute("path", format!("{name}.log"))
            .with_attribute("relative-to", "jboss.server.log.dir")
            .with_attribute("suffix", ".yyyy-MM-dd-HH")
            .with_attribute("format", "SIMPLE")
    }

    #[tokio::test]
    async fn test_add_then_read() {
        let f = fixture();
        let outcome = f.controller.execute_operation(periodic_add("my_log")).await;
        assert!(outcome.success);
        assert!(outcome.requires_restart);
        assert_eq!(f.store.write_count(), 1);

        let read = f
            .controller
            .execute_operation(Operation::read(addr(
                "subsystem=audit/periodic-rotating-file-audit-log=my_log",
            )))
            .await;
        let result = read.result().unwrap();
        assert_eq!(result["path"], "my_log.log");
        assert_eq!(result["suffix"], ".yyyy-MM-dd-HH");
        // 默认值合并进读取结果
        assert_eq!(result["synchronized"], true);
        // 读取不写快照
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_then_read_not_found() {
        let f = fixture();
        let local = addr("subsystem=audit/file-audit-log=local-audit");

        let outcome = f.controller.execute_operation(Operation::remove(local.clone())).await;
        assert!(outcome.success);
        assert!(outcome.requires_restart);
        assert_eq!(f.controller.process_state(), ProcessState::ReloadRequired);

        let read = f.controller.execute_operation(Operation::read(local)).await;
        assert!(!read.success);
        assert!(matches!(read.first_error(), Some(ModelError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_add_existing_leaves_model_unchanged() {
        let f = fixture();
        let before = f.controller.snapshot_model().await;

        let outcome = f
            .controller
            .execute_operation(
                Operation::add(addr("subsystem=audit/file-audit-log=local-audit"))
                    .with_attribute("path", "other.log"),
            )
            .await;
        assert!(!outcome.success);
        assert!(matches!(outcome.first_error(), Some(ModelError::AlreadyExists { .. })));
        assert_eq!(f.controller.snapshot_model().await, before);
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_unknown_attribute() {
        let f = fixture();
        let outcome = f
            .controller
            .execute_operation(Operation::update(
                addr("subsystem=audit/file-audit-log=local-audit"),
                "no-such-attribute",
                "x",
            ))
            .await;
        assert!(!outcome.success);
        assert!(matches!(
            outcome.first_error(),
            Some(ModelError::UnknownAttribute { .. })
        ));
        assert_eq!(f.controller.process_state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_failed_update_is_atomic_within_operation() {
        let f = fixture();
        let local = addr("subsystem=audit/file-audit-log=local-audit");
        let before = f.controller.snapshot_model().await;

        let operation = Operation::update(local, "autoflush", "true").with_attribute("synchronized", 42);
        let outcome = f.controller.execute_operation(operation).await;

        assert!(!outcome.success);
        assert_eq!(f.controller.snapshot_model().await, before);
    }

    #[tokio::test]
    async fn test_composite_rollback_restores_model() {
        let f = fixture();
        let before = f.controller.snapshot_model().await;

        let transaction = Transaction::new(vec![
            Operation::remove(addr("subsystem=audit/file-audit-log=local-audit")),
            periodic_add("my_log"),
            Operation::update(addr("subsystem=audit"), "bogus", "1"),
            periodic_add("never_reached"),
        ]);
        let outcome = f.controller.execute(transaction).await;

        assert!(!outcome.success);
        assert!(outcome.rolled_back);
        assert!(!outcome.requires_restart);
        assert_eq!(outcome.steps.len(), 4);
        assert!(outcome.step(0).unwrap().rolled_back);
        assert!(outcome.step(1).unwrap().rolled_back);
        assert!(!outcome.step(2).unwrap().success);
        assert!(outcome.step(3).unwrap().rolled_back);
        assert!(outcome.failure_description.as_deref().unwrap().contains("step-3"));

        assert_eq!(f.controller.snapshot_model().await, before);
        assert_eq!(f.store.write_count(), 0);
        assert_eq!(f.controller.process_state(), ProcessState::Running);

        let json = outcome.to_json();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["rolled-back"], true);
    }

    #[tokio::test]
    async fn test_partial_failure_without_rollback() {
        let f = fixture();

        let transaction = Transaction::new(vec![
            periodic_add("kept"),
            Operation::add(addr("subsystem=audit/file-audit-log=local-audit"))
                .with_attribute("path", "dup.log"),
        ])
        .rollback_on_failure(false);
        let outcome = f.controller.execute(transaction).await;

        assert!(!outcome.success);
        assert!(!outcome.rolled_back);
        assert!(outcome.is_partial_success());
        assert!(outcome.requires_restart);
        assert!(f
            .controller
            .snapshot_model()
            .await
            .contains(&addr("subsystem=audit/periodic-rotating-file-audit-log=kept")));

        // 部分生效的模型已持久化
        assert_eq!(f.store.write_count(), 1);
        let persisted = f.store.read_snapshot().await.unwrap();
        assert_eq!(persisted, f.controller.snapshot_model().await);
    }

    #[tokio::test]
    async fn test_steps_after_failure_still_run_without_rollback() {
        let f = fixture();
        let local = addr("subsystem=audit/file-audit-log=local-audit");

        let transaction = Transaction::new(vec![
            periodic_add("first"),
            Operation::update(local.clone(), "no-such-attribute", "x"),
            Operation::update(local.clone(), "autoflush", true),
        ])
        .rollback_on_failure(false);
        let outcome = f.controller.execute(transaction).await;

        assert!(!outcome.success);
        assert!(!outcome.rolled_back);
        assert!(outcome.is_partial_success());
        assert_eq!(outcome.steps.len(), 3);
        assert!(outcome.step(0).unwrap().success);
        assert!(matches!(
            outcome.step(1).unwrap().error,
            Some(ModelError::UnknownAttribute { .. })
        ));

        // 失败步骤之后的操作照常执行并报告自己的结果
        let third = outcome.step(2).unwrap();
        assert!(third.success);
        assert!(!third.rolled_back);
        assert!(third.requires_restart);

        let model = f.controller.snapshot_model().await;
        assert!(model.contains(&addr("subsystem=audit/periodic-rotating-file-audit-log=first")));
        assert_eq!(
            model.resolve(&local).unwrap().attributes.get("autoflush"),
            Some(&AttributeValue::Boolean(true))
        );
        assert_eq!(f.store.read_snapshot().await.unwrap(), model);
    }

    #[tokio::test]
    async fn test_persistence_failure_undoes_everything() {
        let f = fixture();
        let before = f.controller.snapshot_model().await;
        f.store.set_fail_writes(true);

        let transaction = Transaction::new(vec![periodic_add("a"), periodic_add("b")])
            .rollback_on_failure(false)
            .allow_restart(true);
        let outcome = f.controller.execute(transaction).await;

        assert!(!outcome.success);
        assert!(outcome.rolled_back);
        assert!(!outcome.requires_restart);
        assert!(outcome
            .failure_description
            .as_deref()
            .unwrap()
            .contains("注入的写入失败"));
        assert_eq!(f.controller.snapshot_model().await, before);
        assert_eq!(
            f.controller.reload_coordinator().state().await,
            ReloadState::Running
        );
    }

    #[tokio::test]
    async fn test_allow_restart_requests_reload() {
        let f = fixture();

        let outcome = f
            .controller
            .execute(Transaction::new(vec![periodic_add("my_log")]).allow_restart(true))
            .await;
        assert!(outcome.success);
        assert!(outcome.requires_restart);
        assert_eq!(outcome.process_state, ProcessState::ReloadRequired);
        assert_eq!(
            f.controller.reload_coordinator().state().await,
            ReloadState::ReloadRequested
        );
    }

    #[tokio::test]
    async fn test_restart_without_permission_marks_stale() {
        let f = fixture();

        let outcome = f.controller.execute_operation(periodic_add("my_log")).await;
        assert_eq!(outcome.process_state, ProcessState::ReloadRequired);
        assert_eq!(
            f.controller.reload_coordinator().state().await,
            ReloadState::Running
        );

        let reload = f.controller.reload_and_wait(Duration::from_secs(5)).await;
        assert_eq!(reload, ReloadOutcome::Completed);
        assert_eq!(f.controller.process_state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_non_restart_attribute_keeps_running() {
        let f = fixture();
        let formatter = addr("subsystem=logging/pattern-formatter=short");

        let add = f.controller.execute_operation(Operation::add(formatter.clone())).await;
        assert!(add.success);
        assert!(!add.requires_restart);

        let update = f
            .controller
            .execute_operation(Operation::update(formatter, "pattern", "%s%n"))
            .await;
        assert!(update.success);
        assert!(!update.requires_restart);
        assert_eq!(f.controller.process_state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_read_recursive_and_without_defaults() {
        let f = fixture();

        let shallow = f
            .controller
            .execute_operation(Operation::read(addr("subsystem=audit")))
            .await;
        assert_eq!(
            shallow.result().unwrap(),
            &json!({"file-audit-log": {"local-audit": null}})
        );

        let deep = f
            .controller
            .execute_operation(
                Operation::read(addr("subsystem=audit"))
                    .recursive(true)
                    .include_defaults(false),
            )
            .await;
        assert_eq!(
            deep.result().unwrap(),
            &json!({"file-audit-log": {"local-audit": {
                "path": "audit.log",
                "relative-to": "server.log.dir",
                "format": "JSON"
            }}})
        );
    }

    #[tokio::test]
    async fn test_read_resource_merges_defaults() {
        let f = fixture();
        let attributes = f
            .controller
            .read_resource(&addr("subsystem=audit/file-audit-log=local-audit"))
            .await
            .unwrap();
        assert_eq!(attributes.get("format"), Some(&AttributeValue::from("JSON")));
        assert_eq!(attributes.get("encoding"), Some(&AttributeValue::from("UTF-8")));
    }

    #[tokio::test]
    async fn test_formatter_for() {
        let f = fixture();
        let record = LogRecord::new("INFO", "subsystem=audit", "hello");

        let json_formatter = f
            .controller
            .formatter_for(&addr("subsystem=audit/file-audit-log=local-audit"))
            .await
            .unwrap();
        let line = json_formatter.format(&record);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["message"], "hello");

        f.controller.execute_operation(periodic_add("plain")).await;
        let simple = f
            .controller
            .formatter_for(&addr("subsystem=audit/periodic-rotating-file-audit-log=plain"))
            .await
            .unwrap();
        assert!(simple.format(&record).ends_with("hello"));

        let err = f
            .controller
            .formatter_for(&addr("subsystem=audit"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_snapshot_take_and_restore() {
        let f = fixture();
        let original = f.controller.snapshot_model().await;

        let info = f.controller.take_snapshot("before change").await.unwrap();
        f.controller.execute_operation(periodic_add("temp")).await;
        assert_ne!(f.controller.snapshot_model().await, original);

        let archives = f.controller.list_snapshots().await.unwrap();
        assert_eq!(archives.len(), 1);

        f.controller.restore_snapshot(&info.id).await.unwrap();
        assert_eq!(f.controller.snapshot_model().await, original);
        assert_eq!(f.store.read_snapshot().await.unwrap(), original);
        assert_eq!(f.controller.process_state(), ProcessState::ReloadRequired);

        assert!(f.controller.restore_snapshot("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_reads() {
        let f = Arc::new(fixture());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&f);
                tokio::spawn(async move {
                    f.controller
                        .execute_operation(Operation::read(addr("subsystem=audit")).recursive(true))
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().success);
        }
    }

    /// 读取快照较慢的存储，拉开重新加载的时间窗口
    struct SlowReadStore {
        inner: MemorySnapshotStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl SnapshotStore for SlowReadStore {
        async fn write_snapshot(&self, model: &ResourceModel) -> Result<(), PersistenceError> {
            self.inner.write_snapshot(model).await
        }

        async fn read_snapshot(&self) -> Result<ResourceModel, PersistenceError> {
            tokio::time::sleep(self.delay).await;
            self.inner.read_snapshot().await
        }

        async fn archive(&self, label: &str) -> Result<SnapshotInfo, PersistenceError> {
            self.inner.archive(label).await
        }

        async fn list_archives(&self) -> Result<Vec<SnapshotInfo>, PersistenceError> {
            self.inner.list_archives().await
        }

        async fn read_archive(&self, id: &str) -> Result<ResourceModel, PersistenceError> {
            self.inner.read_archive(id).await
        }
    }

    #[tokio::test]
    async fn test_commit_during_reload_is_kept() {
        let model = ResourceModel::with_defaults();
        let store = Arc::new(SlowReadStore {
            inner: MemorySnapshotStore::with_model(&model).unwrap(),
            delay: Duration::from_millis(200),
        });
        let controller = Arc::new(Controller::with_model_runtime(
            model,
            Arc::new(SchemaRegistry::standard()),
            store.clone(),
            Duration::from_millis(5),
        ));
        let committed = addr("subsystem=audit/periodic-rotating-file-audit-log=committed");

        let reload = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.reload_and_wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 重新加载读取快照期间提交的修改
        let add = controller.execute_operation(periodic_add("committed")).await;
        assert!(add.success);
        assert!(add.requires_restart);
        assert_eq!(reload.await.unwrap(), ReloadOutcome::Completed);

        assert!(controller.snapshot_model().await.contains(&committed));
        // 修改在重启开始之后提交，运行时仍然过期
        assert_eq!(controller.process_state(), ProcessState::ReloadRequired);

        let next = controller
            .execute_operation(Operation::add(addr("subsystem=logging/pattern-formatter=next")))
            .await;
        assert!(next.success);
        assert!(store.inner.read_snapshot().await.unwrap().contains(&committed));
    }
}
