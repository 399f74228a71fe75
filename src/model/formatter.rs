//! 格式化器能力
//!
//! 模型只关心 `create_formatter()` 这一工厂契约，具体的格式化逻辑保持最简。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// 一条待格式化的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// 记录时间
    pub timestamp: DateTime<Utc>,
    /// 级别
    pub level: String,
    /// 来源（例如资源地址）
    pub source: String,
    /// 消息
    pub message: String,
}

impl LogRecord {
    pub fn new(level: impl Into<String>, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.into(),
            source: source.into(),
            message: message.into(),
        }
    }
}

/// 格式化器
pub trait Formatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> String;
}

/// 格式化器工厂
pub trait FormatterFactory {
    fn create_formatter(&self) -> Box<dyn Formatter>;
}

/// 内置格式化器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormatterKind {
    /// 单行文本
    Simple,
    /// JSON 对象
    Json,
}

impl FormatterKind {
    /// 由属性取值解析，例如 `format = "SIMPLE"`
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "SIMPLE" => Some(FormatterKind::Simple),
            "JSON" => Some(FormatterKind::Json),
            _ => None,
        }
    }
}

impl fmt::Display for FormatterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatterKind::Simple => write!(f, "SIMPLE"),
            FormatterKind::Json => write!(f, "JSON"),
        }
    }
}

impl FormatterFactory for FormatterKind {
    fn create_formatter(&self) -> Box<dyn Formatter> {
        match self {
            FormatterKind::Simple => Box::new(SimpleFormatter),
            FormatterKind::Json => Box::new(JsonFormatter),
        }
    }
}

struct SimpleFormatter;

impl Formatter for SimpleFormatter {
    fn format(&self, record: &LogRecord) -> String {
        format!(
            "{} {} [{}] {}",
            record.timestamp.to_rfc3339(),
            record.level,
            record.source,
            record.message
        )
    }
}

struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, record: &LogRecord) -> String {
        json!({
            "timestamp": record.timestamp.to_rfc3339(),
            "level": record.level,
            "source": record.source,
            "message": record.message,
        })
        .to_string()
    }
}
