// MCP server over a line-delimited byte stream (stdio in production)

use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability, JSONRPC_VERSION,
    PROTOCOL_VERSION,
};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead, FramedWrite, LinesCodec};
use toolgate_core::config::ServerInfoConfig;
use toolgate_core::{Dispatcher, InvocationRequest, ToolFilter};

/// Longest request line accepted before the session is dropped
const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    server_info: ServerInfo,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>, server: &ServerInfoConfig) -> Self {
        Self {
            dispatcher,
            server_info: ServerInfo {
                name: server.name.clone(),
                version: server.version.clone(),
            },
        }
    }

    /// Serve on stdin/stdout until the client closes stdin
    pub async fn start(&self) -> Result<()> {
        tracing::info!("MCP server listening on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection.
    ///
    /// Requests are handled strictly one at a time, so responses leave in the
    /// order their requests arrived.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        // Frames are split on raw bytes so one undecodable line cannot end the session
        let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH);
        let mut frames = FramedRead::new(reader, codec);
        let mut sink = FramedWrite::new(writer, LinesCodec::new());

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    tracing::warn!("Request line exceeds {} bytes, closing session", MAX_LINE_LENGTH);
                    let response = JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error());
                    sink.send(serde_json::to_string(&response)?).await?;
                    break;
                }
                Err(AnyDelimiterCodecError::Io(err)) => {
                    return Err(err).context("Failed to read from client");
                }
            };

            let line = match std::str::from_utf8(&frame) {
                Ok(line) => line,
                Err(_) => {
                    tracing::warn!("Request line is not valid UTF-8");
                    let response = JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error());
                    sink.send(serde_json::to_string(&response)?).await?;
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            tracing::debug!("Received: {}", line);
            if let Some(response) = self.handle_line(line).await {
                let out = serde_json::to_string(&response)?;
                tracing::debug!("Sending: {}", out);
                sink.send(out).await.context("Failed to write response")?;
            }
        }

        tracing::info!("Client closed the connection");
        Ok(())
    }

    /// Handle one raw line; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => return Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error())),
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(_) => return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request())),
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request()));
        }

        self.handle_request(request).await
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            tracing::debug!("Notification: {}", request.method);
            return None;
        };

        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(&id, request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let requested = params
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
            .map(|p| p.protocol_version);
        tracing::info!("Client initialized (protocol {:?})", requested);

        let result = InitializeResult {
            protocol_version: requested.unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.server_info.clone(),
        };
        to_value(&result)
    }

    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: self.dispatcher.list_tools(&ToolFilter::All),
        };
        to_value(&result)
    }

    async fn call_tool(&self, id: &Value, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .ok_or_else(|| JsonRpcError::invalid_params("Invalid tool call parameters"))?;

        let request_id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let request = InvocationRequest::new(params.name, params.arguments, request_id)
            .with_cursor(params.cursor);

        match self.dispatcher.call_tool(request, &ToolFilter::All).await {
            Ok(payload) => to_value(&CallToolResult::from_payload(payload)),
            Err(err) => Err(JsonRpcError::from_dispatch(&err)),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|_| JsonRpcError::custom(JsonRpcError::INTERNAL_ERROR, "Internal error"))
}
