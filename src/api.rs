//! HTTP API consumed by the chat UI

use crate::mcp::{
    ConsoleLogSummary, HealthSnapshot, McpCoordinator, McpError, McpManager, McpToolDef,
    StatusSnapshot, ToolCallSummary,
};
use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<McpCoordinator<McpManager>>,
}

impl AppState {
    pub fn new(coordinator: Arc<McpCoordinator<McpManager>>) -> Self {
        Self { coordinator }
    }
}

/// A summary with an optional explanation of why it is empty
#[derive(Debug, Serialize)]
struct WithNote<T> {
    #[serde(flatten)]
    inner: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl<T> WithNote<T> {
    fn live(inner: T) -> Self {
        Self { inner, note: None }
    }

    fn unavailable(inner: T, err: &McpError) -> Self {
        Self {
            inner,
            note: Some(unavailable_note(err)),
        }
    }
}

fn unavailable_note(err: &McpError) -> String {
    format!("MCP server unavailable: {}", err)
}

#[derive(Debug, Serialize)]
struct ToolList {
    count: usize,
    tools: Vec<McpToolDef>,
}

#[derive(Debug, Deserialize)]
struct CallInput {
    #[serde(default)]
    tool: String,
    params: Option<Value>,
}

async fn health(State(state): State<AppState>) -> Json<HealthSnapshot> {
    match state.coordinator.get_or_create().await {
        Ok(manager) => Json(manager.health()),
        Err(e) => Json(HealthSnapshot::unavailable(unavailable_note(&e))),
    }
}

async fn tools(State(state): State<AppState>) -> Json<WithNote<ToolList>> {
    match state.coordinator.get_or_create().await {
        Ok(manager) => {
            let tools = manager.tools();
            Json(WithNote::live(ToolList {
                count: tools.len(),
                tools,
            }))
        }
        Err(e) => Json(WithNote::unavailable(
            ToolList {
                count: 0,
                tools: Vec::new(),
            },
            &e,
        )),
    }
}

async fn tool_calls(State(state): State<AppState>) -> Json<WithNote<ToolCallSummary>> {
    match state.coordinator.get_or_create().await {
        Ok(manager) => Json(WithNote::live(manager.tool_calls())),
        Err(e) => Json(WithNote::unavailable(ToolCallSummary::default(), &e)),
    }
}

async fn console_logs(State(state): State<AppState>) -> Json<WithNote<ConsoleLogSummary>> {
    match state.coordinator.get_or_create().await {
        Ok(manager) => Json(WithNote::live(manager.console_logs())),
        Err(e) => Json(WithNote::unavailable(ConsoleLogSummary::default(), &e)),
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    match state.coordinator.get_or_create().await {
        Ok(manager) => Json(manager.status()),
        Err(e) => Json(StatusSnapshot {
            health: HealthSnapshot::unavailable(unavailable_note(&e)),
            tool_calls: ToolCallSummary::default(),
            console_logs: ConsoleLogSummary::default(),
            available_tools: Vec::new(),
        }),
    }
}

async fn call_tool(State(state): State<AppState>, Json(input): Json<CallInput>) -> Response {
    let tool = input.tool.trim();
    if tool.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Missing tool name".to_string());
    }

    let manager = match state.coordinator.get_or_create().await {
        Ok(manager) => manager,
        Err(e) => return failure(StatusCode::SERVICE_UNAVAILABLE, unavailable_note(&e)),
    };

    let params = input.params.unwrap_or_else(|| json!({}));
    match manager.call_tool(tool, params).await {
        Ok(result) => Json(json!({ "success": true, "result": result })).into_response(),
        Err(e) => {
            crate::logging::warn(&format!("Tool call '{}' failed: {}", tool, e));
            let status = match e {
                McpError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            failure(status, e.to_string())
        }
    }
}

fn failure(status: StatusCode, error: String) -> Response {
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}

async fn reset(State(state): State<AppState>) -> Json<Value> {
    state.coordinator.reset().await;
    Json(json!({ "success": true, "message": "MCP server reset" }))
}

/// Clears history on the live manager only; never starts a server.
async fn clear(State(state): State<AppState>) -> Json<Value> {
    if let Some(manager) = state.coordinator.current() {
        manager.clear_history();
    }
    Json(json!({ "success": true }))
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/mcp/health", get(health))
        .route("/api/mcp/tools", get(tools))
        .route("/api/mcp/tool-calls", get(tool_calls))
        .route("/api/mcp/console-logs", get(console_logs))
        .route("/api/mcp/status", get(status))
        .route("/api/mcp/call", post(call_tool))
        .route("/api/mcp/reset", post(reset))
        .route("/api/mcp/clear", post(clear))
        .layer(cors)
        .with_state(state)
}

/// Serve until ctrl-c, then stop the MCP server.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let coordinator = Arc::clone(&state.coordinator);
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    crate::logging::info(&format!("Listening on {}", addr));

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await;

    crate::logging::info("Shutting down");
    coordinator.reset().await;
    result?;
    Ok(())
}
