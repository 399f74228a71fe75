//! 资源模型
//!
//! 可寻址资源组成的树。父资源独占子资源，删除时级联。
//! 这里只做内存中的树操作，持久化是单独的显式步骤。

use crate::error::ModelError;
use crate::model::address::ResourceAddress;
use crate::model::schema::SchemaRegistry;
use crate::model::value::AttributeValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单个资源节点
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// 属性映射
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// 子资源：类型 -> 名称 -> 资源
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, BTreeMap<String, Resource>>,
}

impl Resource {
    pub fn with_attributes(attributes: BTreeMap<String, AttributeValue>) -> Self {
        Self {
            attributes,
            children: BTreeMap::new(),
        }
    }

    /// 子资源
    pub fn child(&self, resource_type: &str, name: &str) -> Option<&Resource> {
        self.children.get(resource_type).and_then(|c| c.get(name))
    }

    fn child_mut(&mut self, resource_type: &str, name: &str) -> Option<&mut Resource> {
        self.children
            .get_mut(resource_type)
            .and_then(|c| c.get_mut(name))
    }

    /// 子资源名称，按类型分组
    pub fn child_names(&self) -> BTreeMap<String, Vec<String>> {
        self.children
            .iter()
            .map(|(t, named)| (t.clone(), named.keys().cloned().collect()))
            .collect()
    }
}

/// 资源模型，持有整棵树
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceModel {
    root: Resource,
}

impl ResourceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_root(root: Resource) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Resource {
        &self.root
    }

    /// 启动时的默认模型：审计子系统与一个本地文件审计日志
    pub fn with_defaults() -> Self {
        let mut local_audit = BTreeMap::new();
        local_audit.insert("path".to_string(), AttributeValue::from("audit.log"));
        local_audit.insert(
            "relative-to".to_string(),
            AttributeValue::from("server.log.dir"),
        );
        local_audit.insert("format".to_string(), AttributeValue::from("JSON"));

        let mut audit = Resource::default();
        audit
            .children
            .entry("file-audit-log".to_string())
            .or_default()
            .insert("local-audit".to_string(), Resource::with_attributes(local_audit));

        let mut root = Resource::default();
        let subsystems = root.children.entry("subsystem".to_string()).or_default();
        subsystems.insert("audit".to_string(), audit);
        subsystems.insert("logging".to_string(), Resource::default());

        Self { root }
    }

    /// 解析地址
    pub fn resolve(&self, address: &ResourceAddress) -> Result<&Resource, ModelError> {
        let mut current = &self.root;
        for element in address.elements() {
            current = current
                .child(&element.key, &element.value)
                .ok_or_else(|| not_found(address))?;
        }
        Ok(current)
    }

    fn resolve_mut(&mut self, address: &ResourceAddress) -> Result<&mut Resource, ModelError> {
        let mut current = &mut self.root;
        for element in address.elements() {
            current = current
                .child_mut(&element.key, &element.value)
                .ok_or_else(|| not_found(address))?;
        }
        Ok(current)
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.resolve(address).is_ok()
    }

    /// 在父资源下添加子资源
    pub fn add_child(
        &mut self,
        parent: &ResourceAddress,
        resource_type: &str,
        name: &str,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> Result<&Resource, ModelError> {
        let address = parent.append(resource_type, name)?;
        let parent_resource = self.resolve_mut(parent)?;

        let named = parent_resource
            .children
            .entry(resource_type.to_string())
            .or_default();
        if named.contains_key(name) {
            return Err(ModelError::AlreadyExists {
                address: address.to_string(),
            });
        }

        Ok(named
            .entry(name.to_string())
            .or_insert_with(|| Resource::with_attributes(attributes)))
    }

    /// 按完整地址添加资源
    pub fn add(
        &mut self,
        address: &ResourceAddress,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> Result<&Resource, ModelError> {
        let (parent, last) = split(address)?;
        let (resource_type, name) = (last.key.clone(), last.value.clone());
        self.add_child(&parent, &resource_type, &name, attributes)
    }

    /// 删除资源及其全部后代，返回被摘下的子树
    pub fn remove(&mut self, address: &ResourceAddress) -> Result<Resource, ModelError> {
        let (parent, last) = split(address)?;
        let parent_resource = self.resolve_mut(&parent).map_err(|_| not_found(address))?;

        let named = parent_resource
            .children
            .get_mut(&last.key)
            .ok_or_else(|| not_found(address))?;
        let removed = named.remove(&last.value).ok_or_else(|| not_found(address))?;
        if named.is_empty() {
            parent_resource.children.remove(&last.key);
        }
        Ok(removed)
    }

    /// 重新挂上之前摘下的子树
    pub fn insert(&mut self, address: &ResourceAddress, resource: Resource) -> Result<(), ModelError> {
        let (parent, last) = split(address)?;
        let parent_resource = self.resolve_mut(&parent)?;
        let named = parent_resource.children.entry(last.key.clone()).or_default();
        if named.contains_key(&last.value) {
            return Err(ModelError::AlreadyExists {
                address: address.to_string(),
            });
        }
        named.insert(last.value.clone(), resource);
        Ok(())
    }

    /// 设置属性（按模式校验），返回旧值
    pub fn set_attribute(
        &mut self,
        schema: &SchemaRegistry,
        address: &ResourceAddress,
        name: &str,
        value: AttributeValue,
    ) -> Result<Option<AttributeValue>, ModelError> {
        let resource_type = address
            .resource_type()
            .ok_or_else(|| ModelError::InvalidOperation("根资源没有属性".to_string()))?;
        let resource = self.resolve_mut(address)?;
        let value = schema.validate(resource_type, name, value)?;
        Ok(resource.attributes.insert(name.to_string(), value))
    }

    /// 不经校验地恢复属性，`None` 表示删除该属性
    pub fn restore_attribute(
        &mut self,
        address: &ResourceAddress,
        name: &str,
        previous: Option<AttributeValue>,
    ) -> Result<(), ModelError> {
        let resource = self.resolve_mut(address)?;
        match previous {
            Some(value) => {
                resource.attributes.insert(name.to_string(), value);
            }
            None => {
                resource.attributes.remove(name);
            }
        }
        Ok(())
    }

    /// 深度优先遍历所有资源（包括根）
    pub fn visit<F>(&self, mut f: F)
    where
        F: FnMut(&ResourceAddress, &Resource),
    {
        fn walk<F>(address: &ResourceAddress, resource: &Resource, f: &mut F)
        where
            F: FnMut(&ResourceAddress, &Resource),
        {
            f(address, resource);
            for (resource_type, named) in &resource.children {
                for (name, child) in named {
                    // 树中的键在插入时已校验过，append 不会失败
                    if let Ok(child_address) = address.append(resource_type, name) {
                        walk(&child_address, child, f);
                    }
                }
            }
        }

        walk(&ResourceAddress::root(), &self.root, &mut f);
    }

    /// 资源总数（不含根）
    pub fn resource_count(&self) -> usize {
        let mut count = 0;
        self.visit(|address, _| {
            if !address.is_root() {
                count += 1;
            }
        });
        count
    }
}

fn not_found(address: &ResourceAddress) -> ModelError {
    ModelError::NotFound {
        address: address.to_string(),
    }
}

fn split(
    address: &ResourceAddress,
) -> Result<(ResourceAddress, crate::model::address::PathElement), ModelError> {
    match (address.parent(), address.last()) {
        (Some(parent), Some(last)) => Ok((parent, last.clone())),
        _ => Err(ModelError::InvalidOperation(
            "不能对根资源执行该操作".to_string(),
        )),
    }
}
