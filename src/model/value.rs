//! 属性值类型
//!
//! 定义资源属性的取值与声明类型，以及管理模型惯用的类型转换规则

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 属性值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// 布尔值
    Boolean(bool),
    /// 整数
    Int(i64),
    /// 字符串
    String(String),
    /// 列表
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// 值的实际类型
    pub fn value_type(&self) -> ValueType {
        match self {
            AttributeValue::Boolean(_) => ValueType::Boolean,
            AttributeValue::Int(_) => ValueType::Int,
            AttributeValue::String(_) => ValueType::String,
            AttributeValue::List(_) => ValueType::List,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// 从 JSON 值转换
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ModelError> {
        serde_json::from_value(value.clone()).map_err(|_| {
            ModelError::InvalidOperation(format!("不支持的属性值: {value}"))
        })
    }

    /// 转换为 JSON 值
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Boolean(b) => serde_json::Value::Bool(*b),
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
            AttributeValue::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::String(s) => write!(f, "{s}"),
            AttributeValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Int(i64::from(i))
    }
}

/// 属性的声明类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Boolean,
    Int,
    List,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "STRING"),
            ValueType::Boolean => write!(f, "BOOLEAN"),
            ValueType::Int => write!(f, "INT"),
            ValueType::List => write!(f, "LIST"),
        }
    }
}

impl ValueType {
    /// 将值转换为声明类型
    ///
    /// 字符串 `"true"`/`"false"` 可转为布尔值，十进制数字串可转为整数，
    /// 布尔值和整数可转为其字符串形式；其余组合视为类型不匹配。
    pub fn coerce(&self, attribute: &str, value: AttributeValue) -> Result<AttributeValue, ModelError> {
        let mismatch = |actual: ValueType| ModelError::TypeMismatch {
            attribute: attribute.to_string(),
            expected: self.to_string(),
            actual: actual.to_string(),
        };

        match (self, value) {
            (ValueType::String, AttributeValue::String(s)) => Ok(AttributeValue::String(s)),
            (ValueType::String, AttributeValue::Boolean(b)) => Ok(AttributeValue::String(b.to_string())),
            (ValueType::String, AttributeValue::Int(i)) => Ok(AttributeValue::String(i.to_string())),

            (ValueType::Boolean, AttributeValue::Boolean(b)) => Ok(AttributeValue::Boolean(b)),
            (ValueType::Boolean, AttributeValue::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(AttributeValue::Boolean(true)),
                "false" => Ok(AttributeValue::Boolean(false)),
                _ => Err(mismatch(ValueType::String)),
            },

            (ValueType::Int, AttributeValue::Int(i)) => Ok(AttributeValue::Int(i)),
            (ValueType::Int, AttributeValue::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(AttributeValue::Int)
                .map_err(|_| mismatch(ValueType::String)),

            (ValueType::List, AttributeValue::List(items)) => Ok(AttributeValue::List(items)),

            (_, other) => Err(mismatch(other.value_type())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_coercion_from_string() {
        let v = ValueType::Boolean
            .coerce("synchronized", AttributeValue::from("false"))
            .unwrap();
        assert_eq!(v, AttributeValue::Boolean(false));

        let v = ValueType::Boolean
            .coerce("synchronized", AttributeValue::from("TRUE"))
            .unwrap();
        assert_eq!(v, AttributeValue::Boolean(true));
    }

    #[test]
    fn test_int_coercion() {
        let v = ValueType::Int.coerce("max-backup-index", AttributeValue::from("5")).unwrap();
        assert_eq!(v, AttributeValue::Int(5));

        let err = ValueType::Int
            .coerce("max-backup-index", AttributeValue::from("five"))
            .unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        let err = ValueType::Boolean
            .coerce("synchronized", AttributeValue::Int(1))
            .unwrap_err();
        match err {
            ModelError::TypeMismatch { expected, actual, .. } => {
                assert_eq!(expected, "BOOLEAN");
                assert_eq!(actual, "INT");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_json_conversion() {
        let v = AttributeValue::from_json(&serde_json::json!(["a", 1, true])).unwrap();
        assert_eq!(
            v,
            AttributeValue::List(vec![
                AttributeValue::from("a"),
                AttributeValue::Int(1),
                AttributeValue::Boolean(true)
            ])
        );
        assert_eq!(v.to_json(), serde_json::json!(["a", 1, true]));

        assert!(AttributeValue::from_json(&serde_json::json!({"nested": 1})).is_err());
        assert!(AttributeValue::from_json(&serde_json::Value::Null).is_err());
    }
}
