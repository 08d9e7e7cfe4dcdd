// Transport-neutral tool dispatch

use crate::config::DispatchConfig;
use crate::cursor;
use crate::error::DispatchError;
use crate::registry::{PageRequest, ToolDescriptor, ToolError, ToolOutput, ToolRegistry};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single tool call, as deframed by a transport adapter
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    /// Correlation token supplied by the caller
    pub request_id: String,
    /// Cursor passed outside the tool's own arguments
    pub cursor: Option<String>,
}

impl InvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>, request_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            request_id: request_id.into(),
            cursor: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Success payload or a normalized failure
pub type InvocationResult = Result<Value, DispatchError>;

/// Which tools a caller may see and call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolFilter {
    #[default]
    All,
    Only(HashSet<String>),
}

impl ToolFilter {
    pub fn from_allow_list(allowed: Option<&[String]>) -> Self {
        match allowed {
            Some(names) => Self::Only(names.iter().cloned().collect()),
            None => Self::All,
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(name),
        }
    }
}

/// Orchestrates lookup, validation, pagination and handler execution.
///
/// Holds no per-request state; one instance is shared by every transport.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    /// Takes ownership of the registry, which ends its registration phase
    pub fn new(registry: ToolRegistry, config: &DispatchConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: config.timeout(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn list_tools(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        self.registry
            .list()
            .into_iter()
            .filter(|d| filter.allows(&d.name))
            .collect()
    }

    pub async fn call_tool(&self, request: InvocationRequest, filter: &ToolFilter) -> InvocationResult {
        let started = Instant::now();
        let InvocationRequest {
            tool_name,
            arguments,
            request_id,
            cursor: outer_cursor,
        } = request;

        let tool = match self.registry.resolve(&tool_name) {
            Some(tool) if filter.allows(&tool_name) => tool,
            _ => {
                tracing::info!(tool = %tool_name, request_id = %request_id, "Unknown tool requested");
                return Err(DispatchError::unknown_tool());
            }
        };
        let descriptor = &tool.descriptor;

        let mut arguments = descriptor.input_schema.validate(arguments).map_err(|err| {
            tracing::info!(tool = %tool_name, request_id = %request_id, field = %err.field, "Rejected arguments");
            DispatchError::from(err)
        })?;

        // Resolve the page to serve, and the fingerprint the next cursor is bound to
        let (page, fingerprint) = match &descriptor.pagination {
            Some(pagination) => {
                let inner_cursor = match arguments.remove(&pagination.cursor_field) {
                    Some(Value::String(token)) => Some(token),
                    _ => None,
                };
                let token = outer_cursor.or(inner_cursor);

                let filter_args: Map<String, Value> = arguments
                    .iter()
                    .filter(|(name, _)| !pagination.is_paging_field(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                let fingerprint = cursor::fingerprint(&filter_args);

                let state = cursor::decode_or_start(token.as_deref(), &fingerprint).map_err(|err| {
                    tracing::info!(tool = %tool_name, request_id = %request_id, "Rejected cursor: {}", err);
                    DispatchError::from(err)
                })?;

                (Some(PageRequest { offset: state.offset }), Some(fingerprint))
            }
            None => {
                if outer_cursor.is_some() {
                    return Err(DispatchError::validation(
                        "cursor",
                        "is not supported by this tool",
                    ));
                }
                (None, None)
            }
        };

        tracing::info!(tool = %tool_name, request_id = %request_id, "Dispatching tool call");

        // Run on its own task so a handler that never yields cannot hold the
        // caller past the deadline. On expiry the task is detached, not aborted.
        let handler = Arc::clone(&tool.handler);
        let task = tokio::spawn(async move { handler.call(arguments, page).await });

        let output = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                tracing::warn!(
                    tool = %tool_name,
                    request_id = %request_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Tool call timed out"
                );
                return Err(DispatchError::Timeout);
            }
            Ok(Err(join_err)) => {
                tracing::error!(tool = %tool_name, request_id = %request_id, "Tool handler panicked: {}", join_err);
                return Err(DispatchError::Internal);
            }
            Ok(Ok(Err(tool_err))) => return Err(map_tool_error(&tool_name, &request_id, tool_err)),
            Ok(Ok(Ok(output))) => output,
        };

        let payload = match (output, fingerprint) {
            (ToolOutput::Value(value), _) => value,
            (ToolOutput::Page(page), Some(fingerprint)) => {
                let next_cursor = page
                    .next_offset
                    .map(|offset| cursor::encode(offset, &fingerprint));
                json!({
                    "items": page.items,
                    "nextCursor": next_cursor,
                    "total": page.total,
                })
            }
            (ToolOutput::Page(_), None) => {
                tracing::error!(tool = %tool_name, request_id = %request_id, "Non-paginated tool returned a page");
                return Err(DispatchError::Internal);
            }
        };

        tracing::debug!(
            tool = %tool_name,
            request_id = %request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool call completed"
        );
        Ok(payload)
    }
}

fn map_tool_error(tool_name: &str, request_id: &str, err: ToolError) -> DispatchError {
    match err {
        ToolError::NotFound(what) => DispatchError::NotFound {
            message: format!("{} not found", what),
        },
        ToolError::InvalidArgument { field, reason } => DispatchError::Validation { field, reason },
        ToolError::Internal(cause) => {
            tracing::error!(tool = %tool_name, request_id = %request_id, "Tool failed: {:#}", cause);
            DispatchError::Internal
        }
    }
}
