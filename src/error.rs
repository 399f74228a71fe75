//! 错误处理模块
//!
//! 定义管理模型、持久化与应用配置的统一错误类型

use thiserror::Error;

/// 管理核心的主要错误类型
#[derive(Error, Debug)]
pub enum ManagementError {
    /// 资源模型相关错误
    #[error("模型错误: {0}")]
    Model(#[from] ModelError),

    /// 持久化相关错误
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),

    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 资源模型错误类型
///
/// 地址与模式校验错误只会中止当前操作，是否影响整个事务由回滚策略决定。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// 地址无法解析到资源
    #[error("资源不存在: {address}")]
    NotFound { address: String },

    /// 添加的资源已存在
    #[error("资源已存在: {address}")]
    AlreadyExists { address: String },

    /// 属性未在模式中声明
    #[error("资源类型 {resource_type} 未声明属性: {attribute}")]
    UnknownAttribute {
        resource_type: String,
        attribute: String,
    },

    /// 属性值类型不匹配
    #[error("属性 {attribute} 类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },

    /// 属性值不在允许范围内
    #[error("属性 {attribute} 的值 {value} 无效，允许的值: {allowed:?}")]
    InvalidValue {
        attribute: String,
        value: String,
        allowed: Vec<String>,
    },

    /// 缺少必需属性
    #[error("资源类型 {resource_type} 缺少必需属性: {attribute}")]
    MissingAttribute {
        resource_type: String,
        attribute: String,
    },

    /// 资源类型未注册
    #[error("未注册的资源类型: {resource_type}")]
    UnknownResourceType { resource_type: String },

    /// 资源地址格式无效
    #[error("无效的资源地址: {0}")]
    InvalidAddress(String),

    /// 操作格式无效
    #[error("无效的操作: {0}")]
    InvalidOperation(String),
}

/// 持久化错误类型
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// 快照文件不存在
    #[error("快照不存在: {path}")]
    NotFound { path: String },

    /// 快照内容无法解析
    #[error("快照已损坏: {0}")]
    Corrupt(String),

    /// 读写失败
    #[error("快照读写失败: {0}")]
    Io(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e.to_string())
    }
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ManagementError>;
