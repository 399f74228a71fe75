//! 属性模式与资源类型注册表
//!
//! 每种资源类型声明允许的属性、类型、默认值、是否必需以及修改后是否需要重启。
//! 注册表在启动时构建一次，此后只读，通过 `Arc` 在各处共享。

use crate::error::ModelError;
use crate::model::address::ResourceAddress;
use crate::model::formatter::FormatterKind;
use crate::model::resource::ResourceModel;
use crate::model::value::{AttributeValue, ValueType};
use std::collections::{BTreeMap, HashMap};

/// 属性定义
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDefinition {
    /// 属性名称
    pub name: String,
    /// 声明类型
    pub value_type: ValueType,
    /// 默认值
    pub default: Option<AttributeValue>,
    /// 是否必需
    pub required: bool,
    /// 修改后是否需要重启才能生效
    pub requires_restart: bool,
    /// 允许的取值（为空表示不限制）
    pub allowed_values: Vec<String>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: None,
            required: false,
            requires_restart: false,
            allowed_values: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn restart_required(mut self) -> Self {
        self.requires_restart = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<AttributeValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_allowed_values(mut self, values: &[&str]) -> Self {
        self.allowed_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    /// 校验并转换属性值
    fn check(&self, value: AttributeValue) -> Result<AttributeValue, ModelError> {
        let value = self.value_type.coerce(&self.name, value)?;

        if self.allowed_values.is_empty() {
            return Ok(value);
        }

        // 枚举值大小写不敏感，统一为声明的写法
        let text = value.to_string();
        match self
            .allowed_values
            .iter()
            .find(|allowed| allowed.eq_ignore_ascii_case(&text))
        {
            Some(canonical) => Ok(AttributeValue::String(canonical.clone())),
            None => Err(ModelError::InvalidValue {
                attribute: self.name.clone(),
                value: text,
                allowed: self.allowed_values.clone(),
            }),
        }
    }
}

/// 资源类型产生格式化器的能力
#[derive(Debug, Clone, PartialEq)]
pub enum FormatterCapability {
    /// 由某个属性的取值选择格式化器，例如审计日志的 `format`
    Selectable { attribute: String },
    /// 资源本身就是一种固定的格式化器
    Fixed(FormatterKind),
}

/// 资源类型定义
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    /// 资源类型名称
    pub resource_type: String,
    /// 注册位置的父资源类型，`None` 表示挂在根下
    pub parent_type: Option<String>,
    /// 属性定义
    pub attributes: BTreeMap<String, AttributeDefinition>,
    /// 格式化器能力
    pub formatter: Option<FormatterCapability>,
}

impl ResourceDefinition {
    pub fn new(resource_type: impl Into<String>, parent_type: Option<&str>) -> Self {
        Self {
            resource_type: resource_type.into(),
            parent_type: parent_type.map(str::to_string),
            attributes: BTreeMap::new(),
            formatter: None,
        }
    }

    pub fn attribute(mut self, definition: AttributeDefinition) -> Self {
        self.attributes.insert(definition.name.clone(), definition);
        self
    }

    pub fn with_formatter(mut self, capability: FormatterCapability) -> Self {
        self.formatter = Some(capability);
        self
    }

    /// 给定属性集合中是否有需要重启的属性
    pub fn any_requires_restart<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        names.into_iter().any(|name| {
            self.attributes
                .get(name)
                .map(|d| d.requires_restart)
                .unwrap_or(false)
        })
    }
}

/// 资源类型注册表
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    definitions: HashMap<String, ResourceDefinition>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册资源类型
    pub fn register(mut self, definition: ResourceDefinition) -> Self {
        self.definitions
            .insert(definition.resource_type.clone(), definition);
        self
    }

    /// 内置的标准注册表：审计子系统与日志格式化器
    pub fn standard() -> Self {
        let format = || {
            AttributeDefinition::new("format", ValueType::String)
                .with_default("SIMPLE")
                .with_allowed_values(&["SIMPLE", "JSON"])
                .restart_required()
        };
        let file_attributes = |definition: ResourceDefinition| {
            definition
                .attribute(
                    AttributeDefinition::new("path", ValueType::String)
                        .required()
                        .restart_required(),
                )
                .attribute(AttributeDefinition::new("relative-to", ValueType::String).restart_required())
                .attribute(format())
                .attribute(
                    AttributeDefinition::new("synchronized", ValueType::Boolean)
                        .with_default(true)
                        .restart_required(),
                )
                .attribute(AttributeDefinition::new("autoflush", ValueType::Boolean).restart_required())
                .attribute(
                    AttributeDefinition::new("encoding", ValueType::String)
                        .with_default("UTF-8")
                        .restart_required(),
                )
                .with_formatter(FormatterCapability::Selectable {
                    attribute: "format".to_string(),
                })
        };

        Self::new()
            .register(ResourceDefinition::new("subsystem", None))
            .register(file_attributes(ResourceDefinition::new(
                "file-audit-log",
                Some("subsystem"),
            )))
            .register(
                file_attributes(ResourceDefinition::new(
                    "periodic-rotating-file-audit-log",
                    Some("subsystem"),
                ))
                .attribute(
                    AttributeDefinition::new("suffix", ValueType::String)
                        .required()
                        .restart_required(),
                ),
            )
            .register(
                file_attributes(ResourceDefinition::new(
                    "size-rotating-file-audit-log",
                    Some("subsystem"),
                ))
                .attribute(
                    AttributeDefinition::new("rotate-size", ValueType::String)
                        .with_default("10m")
                        .restart_required(),
                )
                .attribute(
                    AttributeDefinition::new("max-backup-index", ValueType::Int)
                        .with_default(1)
                        .restart_required(),
                )
                .attribute(
                    AttributeDefinition::new("rotate-on-boot", ValueType::Boolean)
                        .with_default(false)
                        .restart_required(),
                )
                .attribute(AttributeDefinition::new("suffix", ValueType::String).restart_required()),
            )
            .register(
                ResourceDefinition::new("syslog-audit-log", Some("subsystem"))
                    .attribute(
                        AttributeDefinition::new("server-address", ValueType::String)
                            .required()
                            .restart_required(),
                    )
                    .attribute(
                        AttributeDefinition::new("port", ValueType::Int)
                            .required()
                            .restart_required(),
                    )
                    .attribute(
                        AttributeDefinition::new("transport", ValueType::String)
                            .with_default("TCP")
                            .with_allowed_values(&["TCP", "UDP", "SSL_TCP"])
                            .restart_required(),
                    )
                    .attribute(
                        AttributeDefinition::new("host-name", ValueType::String)
                            .required()
                            .restart_required(),
                    )
                    .attribute(format())
                    .with_formatter(FormatterCapability::Selectable {
                        attribute: "format".to_string(),
                    }),
            )
            .register(
                ResourceDefinition::new("pattern-formatter", Some("subsystem"))
                    .attribute(
                        AttributeDefinition::new("pattern", ValueType::String)
                            .with_default("%d{HH:mm:ss,SSS} %-5p [%c] (%t) %s%e%n"),
                    )
                    .attribute(AttributeDefinition::new("color-map", ValueType::String))
                    .with_formatter(FormatterCapability::Fixed(FormatterKind::Simple)),
            )
            .register(
                ResourceDefinition::new("json-formatter", Some("subsystem"))
                    .attribute(AttributeDefinition::new("pretty-print", ValueType::Boolean).with_default(false))
                    .attribute(AttributeDefinition::new("print-details", ValueType::Boolean).with_default(false))
                    .attribute(AttributeDefinition::new("date-format", ValueType::String))
                    .with_formatter(FormatterCapability::Fixed(FormatterKind::Json)),
            )
    }

    /// 获取资源类型定义
    pub fn definition(&self, resource_type: &str) -> Result<&ResourceDefinition, ModelError> {
        self.definitions
            .get(resource_type)
            .ok_or_else(|| ModelError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
    }

    /// 已注册的资源类型名称（排序后）
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// 校验单个属性，返回转换后的值
    pub fn validate(
        &self,
        resource_type: &str,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<AttributeValue, ModelError> {
        let definition = self.definition(resource_type)?;
        let attr = definition
            .attributes
            .get(attribute)
            .ok_or_else(|| ModelError::UnknownAttribute {
                resource_type: resource_type.to_string(),
                attribute: attribute.to_string(),
            })?;
        attr.check(value)
    }

    /// 属性修改后是否需要重启
    pub fn requires_restart(&self, resource_type: &str, attribute: &str) -> bool {
        self.definitions
            .get(resource_type)
            .and_then(|d| d.attributes.get(attribute))
            .map(|a| a.requires_restart)
            .unwrap_or(false)
    }

    /// 资源类型的默认值
    pub fn defaults_for(&self, resource_type: &str) -> BTreeMap<String, AttributeValue> {
        self.definitions
            .get(resource_type)
            .map(|d| {
                d.attributes
                    .values()
                    .filter_map(|a| a.default.clone().map(|v| (a.name.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 校验添加操作：注册位置、每个属性以及必需属性
    ///
    /// 只返回显式提供的属性（已转换），默认值不写入模型。
    pub fn validate_add(
        &self,
        address: &ResourceAddress,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> Result<BTreeMap<String, AttributeValue>, ModelError> {
        let resource_type = address
            .resource_type()
            .ok_or_else(|| ModelError::InvalidOperation("不能添加根资源".to_string()))?;
        let definition = self.definition(resource_type)?;
        self.check_placement(definition, address)?;

        let mut validated = BTreeMap::new();
        for (name, value) in attributes {
            let value = self.validate(resource_type, &name, value)?;
            validated.insert(name, value);
        }

        if let Some(missing) = definition
            .attributes
            .values()
            .find(|a| a.required && a.default.is_none() && !validated.contains_key(&a.name))
        {
            return Err(ModelError::MissingAttribute {
                resource_type: resource_type.to_string(),
                attribute: missing.name.clone(),
            });
        }

        Ok(validated)
    }

    /// 校验整个模型（用于加载快照）
    pub fn validate_model(&self, model: &ResourceModel) -> Result<(), ModelError> {
        let mut result = Ok(());
        model.visit(|address, resource| {
            if result.is_err() || address.is_root() {
                return;
            }
            result = self.validate_add(address, resource.attributes.clone()).map(|_| ());
        });
        result
    }

    fn check_placement(
        &self,
        definition: &ResourceDefinition,
        address: &ResourceAddress,
    ) -> Result<(), ModelError> {
        let parent_type = address.parent().and_then(|p| p.resource_type().map(str::to_string));
        if parent_type != definition.parent_type {
            return Err(ModelError::InvalidOperation(format!(
                "资源类型 {} 不能注册在 {} 下",
                definition.resource_type,
                address.parent().map(|p| p.to_string()).unwrap_or_default()
            )));
        }
        Ok(())
    }
}
