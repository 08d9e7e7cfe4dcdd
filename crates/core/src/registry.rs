// Tool descriptors, the handler contract, and the registry that binds them

use crate::schema::{InputSchema, SchemaError, ValueType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Public description of a tool, as returned by `list_tools`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    /// Set for tools that page through results with cursors
    #[serde(skip)]
    pub pagination: Option<Pagination>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, input_schema: InputSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            pagination: None,
        }
    }

    pub fn paginated(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn is_paginated(&self) -> bool {
        self.pagination.is_some()
    }

    /// Verify the descriptor can be served
    pub fn check(&self) -> Result<(), RegistryError> {
        self.input_schema
            .check()
            .map_err(|source| RegistryError::InvalidSchema {
                tool: self.name.clone(),
                source,
            })?;

        if let Some(pagination) = &self.pagination {
            let cursor = self.input_schema.properties.get(&pagination.cursor_field);
            if cursor.map(|p| p.value_type) != Some(ValueType::String) {
                return Err(RegistryError::InvalidPagination {
                    tool: self.name.clone(),
                    field: pagination.cursor_field.clone(),
                });
            }
            if let Some(size_field) = &pagination.page_size_field {
                if !self.input_schema.properties.contains_key(size_field) {
                    return Err(RegistryError::InvalidPagination {
                        tool: self.name.clone(),
                        field: size_field.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Which arguments carry pagination state rather than the query itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub cursor_field: String,
    pub page_size_field: Option<String>,
}

impl Pagination {
    pub fn new(cursor_field: &str) -> Self {
        Self {
            cursor_field: cursor_field.to_string(),
            page_size_field: None,
        }
    }

    pub fn page_size(mut self, field: &str) -> Self {
        self.page_size_field = Some(field.to_string());
        self
    }

    /// True for arguments that do not identify the query
    pub fn is_paging_field(&self, name: &str) -> bool {
        name == self.cursor_field || self.page_size_field.as_deref() == Some(name)
    }
}

/// Where a paginated handler should resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Offset of the next page, `None` once the listing is exhausted
    pub next_offset: Option<u64>,
    pub total: u64,
}

/// What a handler hands back to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Value(Value),
    Page(Page),
}

/// Handler-side failures.
///
/// `Internal` causes are logged by the dispatcher and never sent to clients.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Executable side of a tool.
///
/// Arguments arrive validated with defaults applied. Handlers are expected to
/// keep their payloads compact; nothing downstream truncates them.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// `page` is `Some` exactly when the tool is registered as paginated
    async fn call(
        &self,
        arguments: Map<String, Value>,
        page: Option<PageRequest>,
    ) -> Result<ToolOutput, ToolError>;
}

/// A descriptor and its handler
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateName(String),

    #[error("tool '{tool}' has an invalid input schema: {source}")]
    InvalidSchema {
        tool: String,
        #[source]
        source: SchemaError,
    },

    #[error("tool '{tool}' pages with undeclared or non-string field '{field}'")]
    InvalidPagination { tool: String, field: String },
}

/// Ordered tool registry.
///
/// Populated at startup through `&mut self`; once moved behind an `Arc` into
/// the dispatcher it can only be read.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a tool
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }
        descriptor.check()?;

        tracing::debug!(tool = %descriptor.name, "Registered tool");
        self.by_name.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { descriptor, handler });
        Ok(())
    }

    /// Descriptors in registration order
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Get a tool by name
    pub fn resolve(&self, name: &str) -> Option<&RegisteredTool> {
        self.by_name.get(name).map(|&idx| &self.tools[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertySchema;

    struct Echo;

    #[async_trait::async_trait]
    impl ToolHandler for Echo {
        async fn call(
            &self,
            arguments: Map<String, Value>,
            _page: Option<PageRequest>,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Value(Value::Object(arguments)))
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, "Echo arguments", InputSchema::object())
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(descriptor(name), Arc::new(Echo)).unwrap();
        }

        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("echo"), Arc::new(Echo)).unwrap();
        let err = registry.register(descriptor("echo"), Arc::new(Echo)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("echo"), Arc::new(Echo)).unwrap();
        assert_eq!(registry.resolve("echo").unwrap().descriptor.name, "echo");
        assert!(registry.resolve("nope").is_none());
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let mut schema = InputSchema::object();
        schema.required.push("ghost".to_string());

        let mut registry = ToolRegistry::new();
        let err = registry
            .register(ToolDescriptor::new("bad", "Bad", schema), Arc::new(Echo))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pagination_requires_string_cursor_property() {
        let mut registry = ToolRegistry::new();
        let err = registry
            .register(
                descriptor("list").paginated(Pagination::new("cursor")),
                Arc::new(Echo),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPagination { .. }));

        let schema = InputSchema::object()
            .property("cursor", PropertySchema::string("Cursor"))
            .property("limit", PropertySchema::integer("Page size"));
        registry
            .register(
                ToolDescriptor::new("list", "List", schema)
                    .paginated(Pagination::new("cursor").page_size("limit")),
                Arc::new(Echo),
            )
            .unwrap();
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let json = serde_json::to_value(
            descriptor("echo").paginated(Pagination::new("cursor")),
        )
        .unwrap();
        assert_eq!(json["name"], "echo");
        assert_eq!(json["description"], "Echo arguments");
        assert_eq!(json["inputSchema"]["type"], "object");
        assert!(json.get("pagination").is_none());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }
}
