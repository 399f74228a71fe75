//! 管理操作模块
//!
//! 定义单个操作、组合事务及其 JSON 线上格式：
//!
//! ```json
//! {"operation": "composite",
//!  "steps": [{"operation": "add", "address": [{"subsystem": "audit"}], "path": "a.log"}],
//!  "operation-headers": {"rollback-on-runtime-failure": false,
//!                        "allow-resource-service-restart": true}}
//! ```

pub mod outcome;

use crate::error::ModelError;
use crate::model::{AttributeValue, ResourceAddress};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

pub use outcome::{OperationOutcome, ProcessState, TransactionOutcome};

const OP: &str = "operation";
const OP_ADDR: &str = "address";
const OPERATION_HEADERS: &str = "operation-headers";
const HEADERS: &str = "headers";
const STEPS: &str = "steps";
const COMPOSITE: &str = "composite";
const NAME: &str = "name";
const VALUE: &str = "value";
const INCLUDE_DEFAULTS: &str = "include-defaults";
const RECURSIVE: &str = "recursive";

/// 操作种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Add,
    Remove,
    Read,
    Update,
}

impl OperationKind {
    /// 线上名称
    pub fn wire_name(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Remove => "remove",
            OperationKind::Read => "read-resource",
            OperationKind::Update => "write-attribute",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "add" => Some(OperationKind::Add),
            "remove" => Some(OperationKind::Remove),
            "read-resource" | "read" => Some(OperationKind::Read),
            "write-attribute" | "update" => Some(OperationKind::Update),
            _ => None,
        }
    }

    /// 是否修改模型
    pub fn is_write(&self) -> bool {
        !matches!(self, OperationKind::Read)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// 单个管理操作，作用于一个资源地址
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// 操作种类
    pub kind: OperationKind,
    /// 目标地址
    pub address: ResourceAddress,
    /// 负载属性
    pub attributes: BTreeMap<String, AttributeValue>,
    /// 读取时是否包含默认值
    pub include_defaults: bool,
    /// 读取时是否递归包含子资源
    pub recursive: bool,
}

impl Operation {
    fn new(kind: OperationKind, address: ResourceAddress) -> Self {
        Self {
            kind,
            address,
            attributes: BTreeMap::new(),
            include_defaults: true,
            recursive: false,
        }
    }

    pub fn add(address: ResourceAddress) -> Self {
        Self::new(OperationKind::Add, address)
    }

    pub fn remove(address: ResourceAddress) -> Self {
        Self::new(OperationKind::Remove, address)
    }

    pub fn read(address: ResourceAddress) -> Self {
        Self::new(OperationKind::Read, address)
    }

    /// 修改单个属性
    pub fn update(address: ResourceAddress, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(OperationKind::Update, address).with_attribute(name, value)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn include_defaults(mut self, include: bool) -> Self {
        self.include_defaults = include;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 从 JSON 解析
    pub fn from_json(value: &Value) -> Result<Self, ModelError> {
        let object = value
            .as_object()
            .ok_or_else(|| ModelError::InvalidOperation("操作必须是 JSON 对象".to_string()))?;

        let name = object
            .get(OP)
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::InvalidOperation("缺少 operation 字段".to_string()))?;
        let kind = OperationKind::from_wire(name)
            .ok_or_else(|| ModelError::InvalidOperation(format!("不支持的操作: {name}")))?;

        let address = match object.get(OP_ADDR) {
            Some(addr) => serde_json::from_value(addr.clone())
                .map_err(|e| ModelError::InvalidAddress(e.to_string()))?,
            None => ResourceAddress::root(),
        };

        let mut operation = Self::new(kind, address);
        match kind {
            OperationKind::Read => {
                if let Some(flag) = object.get(INCLUDE_DEFAULTS).and_then(Value::as_bool) {
                    operation.include_defaults = flag;
                }
                if let Some(flag) = object.get(RECURSIVE).and_then(Value::as_bool) {
                    operation.recursive = flag;
                }
            }
            OperationKind::Update if object.contains_key(NAME) => {
                let attr = object
                    .get(NAME)
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::InvalidOperation("name 必须是字符串".to_string()))?;
                let value = object
                    .get(VALUE)
                    .ok_or_else(|| ModelError::InvalidOperation("缺少 value 字段".to_string()))?;
                operation
                    .attributes
                    .insert(attr.to_string(), AttributeValue::from_json(value)?);
            }
            _ => {
                for (key, value) in object {
                    if matches!(key.as_str(), OP | OP_ADDR | OPERATION_HEADERS | HEADERS) {
                        continue;
                    }
                    operation
                        .attributes
                        .insert(key.clone(), AttributeValue::from_json(value)?);
                }
            }
        }

        if kind == OperationKind::Update && operation.attributes.is_empty() {
            return Err(ModelError::InvalidOperation(
                "write-attribute 至少需要一个属性".to_string(),
            ));
        }

        Ok(operation)
    }

    /// 转换为 JSON
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(OP.to_string(), json!(self.kind.wire_name()));
        object.insert(OP_ADDR.to_string(), json!(self.address));

        match self.kind {
            OperationKind::Read => {
                object.insert(INCLUDE_DEFAULTS.to_string(), json!(self.include_defaults));
                object.insert(RECURSIVE.to_string(), json!(self.recursive));
            }
            OperationKind::Update if self.attributes.len() == 1 => {
                if let Some((name, value)) = self.attributes.iter().next() {
                    object.insert(NAME.to_string(), json!(name));
                    object.insert(VALUE.to_string(), value.to_json());
                }
            }
            _ => {
                for (name, value) in &self.attributes {
                    object.insert(name.clone(), value.to_json());
                }
            }
        }

        Value::Object(object)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.kind)
    }
}

/// 事务级别的指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionHeaders {
    /// 任一步骤失败时是否回滚全部已执行的步骤
    #[serde(rename = "rollback-on-runtime-failure", default = "default_rollback")]
    pub rollback_on_failure: bool,
    /// 是否允许重启受影响的服务
    #[serde(rename = "allow-resource-service-restart", default)]
    pub allow_restart: bool,
}

fn default_rollback() -> bool {
    true
}

impl Default for TransactionHeaders {
    fn default() -> Self {
        Self {
            rollback_on_failure: default_rollback(),
            allow_restart: false,
        }
    }
}

/// 组合事务：按顺序执行的一批操作
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// 操作列表
    pub operations: Vec<Operation>,
    /// 事务指令
    pub headers: TransactionHeaders,
    /// 是否以 composite 形式提交
    pub composite: bool,
}

impl Transaction {
    /// 组合事务
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            headers: TransactionHeaders::default(),
            composite: true,
        }
    }

    /// 单个操作的事务
    pub fn single(operation: Operation) -> Self {
        Self {
            operations: vec![operation],
            headers: TransactionHeaders::default(),
            composite: false,
        }
    }

    pub fn rollback_on_failure(mut self, rollback: bool) -> Self {
        self.headers.rollback_on_failure = rollback;
        self
    }

    pub fn allow_restart(mut self, allow: bool) -> Self {
        self.headers.allow_restart = allow;
        self
    }

    /// 是否只包含读取操作
    pub fn is_read_only(&self) -> bool {
        self.operations.iter().all(|op| !op.kind.is_write())
    }

    /// 从 JSON 解析，接受单个操作或 composite
    ///
    /// 事务指令可以放在 `operation-headers` 或 `headers` 下，两者不能同时出现。
    pub fn from_json(value: &Value) -> Result<Self, ModelError> {
        let headers = Self::headers_from_json(value)?;

        if value.get(OP).and_then(Value::as_str) != Some(COMPOSITE) {
            let mut transaction = Self::single(Operation::from_json(value)?);
            transaction.headers = headers;
            return Ok(transaction);
        }

        if let Some(object) = value.as_object() {
            if let Some(key) = object
                .keys()
                .find(|k| !matches!(k.as_str(), OP | OP_ADDR | STEPS | OPERATION_HEADERS | HEADERS))
            {
                return Err(ModelError::InvalidOperation(format!(
                    "composite 不支持字段: {key}"
                )));
            }
        }

        let steps = value
            .get(STEPS)
            .and_then(Value::as_array)
            .ok_or_else(|| ModelError::InvalidOperation("composite 缺少 steps 数组".to_string()))?;

        let mut operations = Vec::with_capacity(steps.len());
        for step in steps {
            if step.get(OP).and_then(Value::as_str) == Some(COMPOSITE) {
                return Err(ModelError::InvalidOperation("不支持嵌套的 composite".to_string()));
            }
            operations.push(Operation::from_json(step)?);
        }

        let mut transaction = Self::new(operations);
        transaction.headers = headers;
        Ok(transaction)
    }

    fn headers_from_json(value: &Value) -> Result<TransactionHeaders, ModelError> {
        let raw = match (value.get(OPERATION_HEADERS), value.get(HEADERS)) {
            (Some(_), Some(_)) => {
                return Err(ModelError::InvalidOperation(
                    "operation-headers 与 headers 不能同时出现".to_string(),
                ))
            }
            (Some(h), None) | (None, Some(h)) => h,
            (None, None) => return Ok(TransactionHeaders::default()),
        };
        serde_json::from_value(raw.clone())
            .map_err(|e| ModelError::InvalidOperation(format!("无效的事务指令: {e}")))
    }

    /// 转换为 JSON
    pub fn to_json(&self) -> Value {
        let headers = json!(self.headers);
        if !self.composite && self.operations.len() == 1 {
            let mut op = self.operations[0].to_json();
            if let Some(object) = op.as_object_mut() {
                object.insert(OPERATION_HEADERS.to_string(), headers);
            }
            return op;
        }

        json!({
            "operation": COMPOSITE,
            "address": [],
            "steps": self.operations.iter().map(Operation::to_json).collect::<Vec<_>>(),
            "operation-headers": headers,
        })
    }
}
