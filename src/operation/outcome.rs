//! 操作结果
//!
//! 每个已执行的操作产生一个 `OperationOutcome`，汇总为 `TransactionOutcome`。
//! 线上格式：`{outcome: "success"|"failed", result?, failure-description?}`。

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

/// 运行时相对于已持久化配置的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessState {
    /// 运行时与配置一致
    Running,
    /// 已接受需要重启的修改，等待重新加载
    ReloadRequired,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Running => write!(f, "running"),
            ProcessState::ReloadRequired => write!(f, "reload-required"),
        }
    }
}

/// 单个操作的结果
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    /// 是否成功
    pub success: bool,
    /// 失败描述
    pub failure_description: Option<String>,
    /// 该操作是否修改了需要重启的属性
    pub requires_restart: bool,
    /// 返回结果（读取操作）
    pub result: Option<Value>,
    /// 成功执行后是否被回滚
    pub rolled_back: bool,
    /// 失败原因
    pub error: Option<ModelError>,
}

impl OperationOutcome {
    pub fn success(result: Option<Value>, requires_restart: bool) -> Self {
        Self {
            success: true,
            failure_description: None,
            requires_restart,
            result,
            rolled_back: false,
            error: None,
        }
    }

    pub fn failed(error: ModelError) -> Self {
        Self {
            success: false,
            failure_description: Some(error.to_string()),
            requires_restart: false,
            result: None,
            rolled_back: false,
            error: Some(error),
        }
    }

    /// 事务回滚后未执行的步骤
    pub fn not_executed() -> Self {
        Self {
            success: false,
            failure_description: Some("操作未执行，事务已回滚".to_string()),
            requires_restart: false,
            result: None,
            rolled_back: true,
            error: None,
        }
    }

    /// 线上格式
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            "outcome".to_string(),
            json!(if self.success { "success" } else { "failed" }),
        );
        if let Some(result) = &self.result {
            object.insert("result".to_string(), result.clone());
        }
        if let Some(description) = &self.failure_description {
            object.insert("failure-description".to_string(), json!(description));
        }
        if self.rolled_back {
            object.insert("rolled-back".to_string(), json!(true));
        }
        Value::Object(object)
    }
}

/// 事务结果
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    /// 事务ID
    pub id: Uuid,
    /// 整体是否成功
    pub success: bool,
    /// 已执行步骤的结果
    pub steps: Vec<OperationOutcome>,
    /// 是否有已生效的修改需要重启
    pub requires_restart: bool,
    /// 是否已整体回滚
    pub rolled_back: bool,
    /// 事务结束后的运行时状态
    pub process_state: ProcessState,
    /// 事务级失败描述
    pub failure_description: Option<String>,
    /// 是否以 composite 形式提交
    pub composite: bool,
}

impl TransactionOutcome {
    /// 某一步的结果
    pub fn step(&self, index: usize) -> Option<&OperationOutcome> {
        self.steps.get(index)
    }

    /// 第一个失败步骤的错误
    pub fn first_error(&self) -> Option<&ModelError> {
        self.steps.iter().find_map(|s| s.error.as_ref())
    }

    /// 部分成功：有步骤失败，但已成功的步骤保留生效
    pub fn is_partial_success(&self) -> bool {
        !self.success && !self.rolled_back && self.steps.iter().any(|s| s.success)
    }

    /// 单操作事务的返回结果
    pub fn result(&self) -> Option<&Value> {
        self.steps.first().and_then(|s| s.result.as_ref())
    }

    /// 线上格式
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            "outcome".to_string(),
            json!(if self.success { "success" } else { "failed" }),
        );

        if self.composite || self.steps.len() != 1 {
            let mut steps = Map::new();
            for (index, step) in self.steps.iter().enumerate() {
                steps.insert(format!("step-{}", index + 1), step.to_json());
            }
            object.insert("result".to_string(), Value::Object(steps));
        } else if let Some(result) = self.result() {
            object.insert("result".to_string(), result.clone());
        }

        if let Some(description) = &self.failure_description {
            object.insert("failure-description".to_string(), json!(description));
        }
        if self.rolled_back {
            object.insert("rolled-back".to_string(), json!(true));
        }
        object.insert(
            "response-headers".to_string(),
            json!({
                "operation-requires-restart": self.requires_restart,
                "process-state": self.process_state,
            }),
        );
        Value::Object(object)
    }
}
