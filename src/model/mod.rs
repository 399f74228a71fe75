//! 资源模型模块
//!
//! 提供可寻址的资源树、属性模式注册表和格式化器能力

pub mod address;
pub mod formatter;
pub mod resource;
pub mod schema;
pub mod value;

// 重新导出主要类型
pub use address::{PathElement, ResourceAddress};
pub use formatter::{Formatter, FormatterFactory, FormatterKind, LogRecord};
pub use resource::{Resource, ResourceModel};
pub use schema::{AttributeDefinition, FormatterCapability, ResourceDefinition, SchemaRegistry};
pub use value::{AttributeValue, ValueType};
