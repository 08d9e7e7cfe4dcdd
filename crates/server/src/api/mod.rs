use crate::config::{AppState, ServerConfig};
use crate::middleware::auth;
use anyhow::Result;
use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use toolgate_core::{DispatchError, ErrorBody, ErrorKind};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Start the API server
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config)?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    // Peer addresses key the quota of anonymous callers
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let guarded = Router::new()
        .route("/mcp", post(handlers::mcp))
        .route("/mcp/sse", post(handlers::mcp_sse))
        .route_layer(from_fn_with_state(state.clone(), auth::require_token));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(guarded)
        // Middleware; request headers stay out of spans since they carry the token
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API error response: `{"error": {kind, message, field?, retryAfterSecs?}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error type for API handlers and the guard middleware
#[derive(Debug)]
pub struct ApiError {
    error: DispatchError,
    request_id: Option<String>,
}

impl ApiError {
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ValidationError | ErrorKind::CursorError => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.error.to_body();
        let status = status_for(body.kind);
        let retry_after = body.retry_after_secs;

        let mut response = (status, Json(ErrorResponse { error: body })).into_response();
        let headers = response.headers_mut();
        if let Some(secs) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if let Some(value) = self.request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

impl<E> From<E> for ApiError
where
    E: Into<DispatchError>,
{
    fn from(err: E) -> Self {
        Self {
            error: err.into(),
            request_id: None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use toolgate_core::GatewayConfig;
    use tower::ServiceExt;

    const TOKEN: &str = "s3cret";

    fn router_with(gateway: GatewayConfig) -> Router {
        let state = AppState::new(&ServerConfig { gateway }).unwrap();
        create_router(state)
    }

    fn secured_router() -> Router {
        let mut gateway = GatewayConfig::default();
        gateway.auth.api_key = Some(TOKEN.to_string());
        router_with(gateway)
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let response = secured_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["transport"], "http");
        assert_eq!(body["server"], "toolgate");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let response = secured_router()
            .oneshot(post_json("/mcp", None, json!({"action": "list_tools"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["kind"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_wrong_token_is_not_echoed() {
        let response = secured_router()
            .oneshot(post_json("/mcp", Some("guess-123"), json!({"action": "list_tools"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!text_body(response).await.contains("guess-123"));
    }

    #[tokio::test]
    async fn test_list_tools_with_token() {
        let response = secured_router()
            .oneshot(post_json("/mcp", Some(TOKEN), json!({"action": "list_tools"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let body = json_body(response).await;
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 3);
        assert_eq!(tools[0]["name"], "search_items");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let response = secured_router()
            .oneshot(post_json(
                "/mcp",
                Some(TOKEN),
                json!({"action": "call_tool", "name": "nope", "arguments": {}, "id": "req-7"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-7");

        let body = json_body(response).await;
        assert_eq!(body, json!({"error": {"kind": "NotFound", "message": "Unknown tool"}}));
    }

    #[tokio::test]
    async fn test_call_tool_result_and_validation() {
        let router = secured_router();

        let response = router
            .clone()
            .oneshot(post_json(
                "/mcp",
                Some(TOKEN),
                json!({"action": "call_tool", "name": "get_item", "arguments": {"id": "item_001"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["result"]["id"], "item_001");

        let response = router
            .oneshot(post_json(
                "/mcp",
                Some(TOKEN),
                json!({"action": "call_tool", "name": "search_items", "arguments": {"query": "ai", "limit": 99}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["kind"], "ValidationError");
        assert_eq!(body["error"]["field"], "limit");
    }

    #[tokio::test]
    async fn test_bad_cursor_is_cursor_error() {
        let response = secured_router()
            .oneshot(post_json(
                "/mcp",
                Some(TOKEN),
                json!({"action": "call_tool", "name": "search_items", "arguments": {"query": "ai"}, "cursor": "%%%"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["kind"], "CursorError");
    }

    #[tokio::test]
    async fn test_unknown_action_and_malformed_body() {
        let router = secured_router();

        let response = router
            .clone()
            .oneshot(post_json("/mcp", Some(TOKEN), json!({"action": "delete_everything"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["field"], "action");

        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .body(Body::from("{not json"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["field"], "body");
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_request_over_capacity() {
        let mut gateway = GatewayConfig::default();
        gateway.rate_limit.capacity = 2;
        let router = router_with(gateway);

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(post_json("/mcp", None, json!({"action": "list_tools"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = router
            .clone()
            .oneshot(post_json("/mcp", None, json!({"action": "list_tools"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
        let body = json_body(response).await;
        assert_eq!(body["error"]["kind"], "RateLimited");
        assert_eq!(body["error"]["retryAfterSecs"], retry_after);

        // Health stays outside the quota
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_allow_list_hides_tools() {
        let mut gateway = GatewayConfig::default();
        gateway.tools.allowed = Some(vec!["health".to_string()]);
        let router = router_with(gateway);

        let response = router
            .clone()
            .oneshot(post_json("/mcp", None, json!({"action": "list_tools"})))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);

        let response = router
            .oneshot(post_json(
                "/mcp",
                None,
                json!({"action": "call_tool", "name": "get_item", "arguments": {"id": "item_001"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sse_list_tools() {
        let response = secured_router()
            .oneshot(post_json("/mcp/sse", Some(TOKEN), json!({"action": "list_tools"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = text_body(response).await;
        assert_eq!(body.matches("event: tool").count(), 3);
        assert!(body.contains("\"name\":\"health\""));
        assert!(body.trim_end().ends_with("data: {}"));
        assert!(body.find("event: end").unwrap() > body.rfind("event: tool").unwrap());
    }

    #[tokio::test]
    async fn test_sse_call_tool_error_event() {
        let response = secured_router()
            .oneshot(post_json(
                "/mcp/sse",
                Some(TOKEN),
                json!({"action": "call_tool", "name": "get_item", "arguments": {"id": "missing"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = text_body(response).await;
        assert!(body.contains("event: error"));
        assert!(body.contains("\"kind\":\"NotFound\""));
        assert!(body.contains("event: end"));
        assert!(!body.contains("event: result"));
    }

    #[tokio::test]
    async fn test_sse_auth_failure_is_plain_http() {
        let response = secured_router()
            .oneshot(post_json("/mcp/sse", None, json!({"action": "list_tools"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
    }
}
