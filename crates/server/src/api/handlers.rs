use super::{ApiError, ApiResult, REQUEST_ID_HEADER};
use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderValue,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use toolgate_core::{AuthIdentity, DispatchError, InvocationRequest, ToolDescriptor};

/// Liveness probe; served outside the guard
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "transport": "http",
        "server": state.server.name,
        "version": state.server.version,
    }))
}

/// Body accepted by `/mcp` and `/mcp/sse`
#[derive(Debug, Deserialize)]
pub struct McpRequest {
    pub action: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
}

enum McpAction {
    ListTools,
    CallTool(InvocationRequest),
}

#[derive(Debug, Serialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct CallToolResponse {
    pub result: Value,
}

/// Decode the body into an action and its correlation id.
///
/// The id is the caller's own when the body carries one, else a fresh UUID.
fn parse_request(body: &[u8]) -> (String, Result<McpAction, DispatchError>) {
    let request: McpRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(_) => {
            let error = DispatchError::validation("body", "must be a JSON object with an action");
            return (new_request_id(), Err(error));
        }
    };

    let request_id = match request.id {
        Some(Value::String(id)) => id,
        Some(Value::Null) | None => new_request_id(),
        Some(other) => other.to_string(),
    };

    let action = match request.action.as_str() {
        "list_tools" => Ok(McpAction::ListTools),
        "call_tool" => match request.name {
            Some(name) => Ok(McpAction::CallTool(
                InvocationRequest::new(name, request.arguments.unwrap_or_default(), request_id.clone())
                    .with_cursor(request.cursor),
            )),
            None => Err(DispatchError::validation("name", "is required")),
        },
        _ => Err(DispatchError::validation("action", "must be list_tools or call_tool")),
    };

    (request_id, action)
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// JSON request/response endpoint
pub async fn mcp(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    body: Bytes,
) -> Response {
    let (request_id, action) = parse_request(&body);
    let outcome = respond(&state, &identity, action).await;

    match outcome {
        Ok(response) => with_request_id(response, &request_id),
        Err(err) => err.with_request_id(request_id).into_response(),
    }
}

async fn respond(
    state: &AppState,
    identity: &AuthIdentity,
    action: Result<McpAction, DispatchError>,
) -> ApiResult<Response> {
    match action? {
        McpAction::ListTools => {
            let tools = state.dispatcher.list_tools(&state.filter);
            Ok(Json(ListToolsResponse { tools }).into_response())
        }
        McpAction::CallTool(request) => {
            tracing::debug!(caller = ?identity, tool = %request.tool_name, "HTTP tool call");
            let result = state.dispatcher.call_tool(request, &state.filter).await?;
            Ok(Json(CallToolResponse { result }).into_response())
        }
    }
}

/// Streaming endpoint.
///
/// Body errors are returned as plain HTTP errors before the stream opens.
/// Once open, dispatch failures travel as an `error` event and every stream
/// closes with an `end` event.
pub async fn mcp_sse(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    body: Bytes,
) -> Response {
    let (request_id, action) = parse_request(&body);
    let action = match action {
        Ok(action) => action,
        Err(err) => return ApiError::from(err).with_request_id(request_id).into_response(),
    };

    tracing::debug!(caller = ?identity, request_id = %request_id, "Opening event stream");
    let response = Sse::new(event_stream(state, action)).into_response();
    with_request_id(response, &request_id)
}

fn event_stream(
    state: Arc<AppState>,
    action: McpAction,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    async_stream::stream! {
        match action {
            McpAction::ListTools => {
                for tool in state.dispatcher.list_tools(&state.filter) {
                    yield Event::default().event("tool").json_data(&tool);
                }
            }
            McpAction::CallTool(request) => {
                match state.dispatcher.call_tool(request, &state.filter).await {
                    Ok(payload) => {
                        yield Event::default().event("result").json_data(&payload);
                    }
                    Err(err) => {
                        yield Event::default().event("error").json_data(err.to_body());
                    }
                }
            }
        }
        yield Ok(Event::default().event("end").data("{}"));
    }
}
