//! 资源地址
//!
//! 地址是有序的 `(类型, 名称)` 段序列，例如 `subsystem=audit/file-audit-log=local-audit`。

use crate::error::ModelError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 地址中的单个段
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    /// 资源类型，例如 `subsystem`
    pub key: String,
    /// 资源名称，例如 `audit`
    pub value: String,
}

impl PathElement {
    /// 创建地址段，类型与名称都不能为空且不能包含分隔符
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, ModelError> {
        let key = key.into();
        let value = value.into();
        for part in [&key, &value] {
            if part.trim().is_empty() || part.contains('/') || part.contains('=') {
                return Err(ModelError::InvalidAddress(format!("{key}={value}")));
            }
        }
        Ok(Self { key, value })
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// 资源地址，构造后不可变，通过 `append` 派生子地址
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddress {
    elements: Vec<PathElement>,
}

impl ResourceAddress {
    /// 根地址
    pub fn root() -> Self {
        Self::default()
    }

    /// 由 `(类型, 名称)` 对构造地址
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let elements = pairs
            .into_iter()
            .map(|(k, v)| PathElement::new(k, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { elements })
    }

    /// 派生子地址
    pub fn append(&self, key: impl Into<String>, value: impl Into<String>) -> Result<Self, ModelError> {
        let mut elements = self.elements.clone();
        elements.push(PathElement::new(key, value)?);
        Ok(Self { elements })
    }

    /// 父地址，根地址没有父地址
    pub fn parent(&self) -> Option<Self> {
        if self.elements.is_empty() {
            return None;
        }
        Some(Self {
            elements: self.elements[..self.elements.len() - 1].to_vec(),
        })
    }

    /// 最后一段
    pub fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    /// 最后一段的资源类型
    pub fn resource_type(&self) -> Option<&str> {
        self.last().map(|e| e.key.as_str())
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// 判断 `self` 是否是 `other` 的祖先（或相同）
    pub fn is_prefix_of(&self, other: &ResourceAddress) -> bool {
        other.elements.len() >= self.elements.len()
            && other.elements[..self.elements.len()] == self.elements[..]
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elements.is_empty() {
            return write!(f, "/");
        }
        let joined = self
            .elements
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("/");
        write!(f, "{joined}")
    }
}

impl FromStr for ResourceAddress {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut elements = Vec::new();
        for segment in trimmed.split('/') {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ModelError::InvalidAddress(s.to_string()))?;
            elements.push(
                PathElement::new(key.trim(), value.trim())
                    .map_err(|_| ModelError::InvalidAddress(s.to_string()))?,
            );
        }
        Ok(Self { elements })
    }
}

// 线上格式：[{"subsystem": "audit"}, {"file-audit-log": "local-audit"}]
impl Serialize for ResourceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.elements.iter().map(|e| {
            let mut entry = BTreeMap::new();
            entry.insert(e.key.as_str(), e.value.as_str());
            entry
        }))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Text(String),
    Pairs(Vec<BTreeMap<String, String>>),
}

impl<'de> Deserialize<'de> for ResourceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match AddressRepr::deserialize(deserializer)? {
            AddressRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            AddressRepr::Pairs(pairs) => {
                let mut elements = Vec::with_capacity(pairs.len());
                for entry in pairs {
                    if entry.len() != 1 {
                        return Err(serde::de::Error::custom(
                            "地址段必须且只能包含一个 类型=名称 键值对",
                        ));
                    }
                    for (k, v) in entry {
                        elements.push(PathElement::new(k, v).map_err(serde::de::Error::custom)?);
                    }
                }
                Ok(Self { elements })
            }
        }
    }
}
