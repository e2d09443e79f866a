//! End-to-end tests for finchat using a scripted MCP server
//!
//! These tests run the real manager, coordinator and HTTP router against a
//! child process, without a MongoDB deployment.

#![cfg(unix)]

mod mock_server;

use anyhow::Result;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use finchat::api::{AppState, app_router};
use finchat::config::McpConfig;
use finchat::mcp::{
    LogCategory, McpCoordinator, McpError, McpManager, Tool, ToolCallStatus, market_tools,
};
use mock_server::MockServer;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn coordinator(config: McpConfig) -> Arc<McpCoordinator<McpManager>> {
    Arc::new(McpCoordinator::new(move || McpManager::new(config.clone())))
}

async fn wait_until_stopped(manager: &McpManager) {
    for _ in 0..100 {
        if !manager.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("MCP server still running");
}

/// Start the server, list tools, make one call and read it back
#[tokio::test]
async fn test_tool_call_round_trip() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());
    let manager = coordinator.get_or_create().await?;

    let names: Vec<String> = manager.tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["find", "fail", "slow", "notify", "crash"]);
    assert!(manager.is_running());

    let result = manager
        .call_tool("find", json!({"collection": "prices", "filter": {"symbol": "BTC"}}))
        .await?;
    assert_eq!(result["content"][0]["text"], "BTC 64000");

    let calls = manager.tool_calls();
    assert_eq!(calls.total_calls, 1);
    assert_eq!(calls.recent_calls[0].status, ToolCallStatus::Completed);
    assert_eq!(calls.recent_calls[0].result, Some(result));

    let categories: Vec<LogCategory> = manager
        .console_logs()
        .logs
        .into_iter()
        .map(|e| e.category)
        .collect();
    assert_eq!(
        categories,
        vec![
            LogCategory::Lifecycle,
            LogCategory::Tool,
            LogCategory::Outbound,
            LogCategory::Inbound,
            LogCategory::Success,
        ]
    );

    let health = manager.health();
    assert_eq!(health.mcp_server, "running");
    assert_eq!(health.available_tools, 5);
    assert_eq!(health.tool_calls.completed, 1);
    assert_eq!(health.console_logs.total, 5);
    assert_eq!(health.console_logs.recent, 5);

    coordinator.reset().await;
    assert!(!manager.is_running());
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_recorded() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());
    let manager = coordinator.get_or_create().await?;

    let err = manager.call_tool("fail", json!({})).await.unwrap_err();
    assert_eq!(
        err,
        McpError::ToolInvocation {
            code: -32000,
            message: "collection not found".to_string(),
        }
    );

    let record = &manager.tool_calls().recent_calls[0];
    assert_eq!(record.status, ToolCallStatus::Error);
    assert_eq!(
        record.error,
        Some(json!({"code": -32000, "message": "collection not found"}))
    );
    assert_eq!(manager.console_logs().stats.errors, 1);

    coordinator.reset().await;
    Ok(())
}

/// A call the server never answers times out without disturbing later calls
#[tokio::test]
async fn test_timeout_then_recovery() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());
    let manager = coordinator.get_or_create().await?;

    let err = manager.call_tool("slow", json!({})).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "Request timeout");
    assert_eq!(
        manager.tool_calls().recent_calls[0].error,
        Some(json!("Request timeout"))
    );

    let result = manager.call_tool("find", json!({})).await?;
    assert_eq!(result["content"][0]["text"], "BTC 64000");
    let stats = manager.tool_calls().stats;
    assert_eq!((stats.completed, stats.error), (1, 1));

    coordinator.reset().await;
    Ok(())
}

#[tokio::test]
async fn test_notification_and_split_response() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());
    let manager = coordinator.get_or_create().await?;

    let result = manager.call_tool("notify", json!({})).await?;
    assert_eq!(result["content"][0]["text"], "done");

    let logs = manager.console_logs();
    let notification = logs
        .logs
        .iter()
        .find(|e| e.category == LogCategory::Notification)
        .expect("notification entry");
    assert_eq!(notification.message, "📢 MCP notification:");
    assert_eq!(notification.data, Some(json!("querying prices")));
    assert_eq!(logs.stats.notifications, 1);

    coordinator.reset().await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());
    let manager = coordinator.get_or_create().await?;

    let calls = (0..5).map(|i| {
        let manager = Arc::clone(&manager);
        async move { manager.call_tool("find", json!({"page": i})).await }
    });
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(manager.tool_calls().stats.completed, 5);

    coordinator.reset().await;
    Ok(())
}

/// The process dying fails the pending call and makes the manager report
/// itself as not running
#[tokio::test]
async fn test_crash_fails_pending_call() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());
    let manager = coordinator.get_or_create().await?;

    let err = manager.call_tool("crash", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ProcessExited { .. }), "{:?}", err);

    wait_until_stopped(&manager).await;
    assert_eq!(manager.health().mcp_server, "not running");

    let err = manager.call_tool("find", json!({})).await.unwrap_err();
    assert_eq!(err, McpError::NotRunning);

    // The exit watcher reports the exit code
    tokio::time::sleep(Duration::from_millis(50)).await;
    let exited = manager
        .console_logs()
        .logs
        .iter()
        .any(|e| e.message.contains("process exited with code 1"));
    assert!(exited);

    // A reset brings up a fresh server
    coordinator.reset().await;
    let fresh = coordinator.get_or_create().await?;
    assert!(!Arc::ptr_eq(&manager, &fresh));
    assert!(fresh.is_running());
    assert_eq!(fresh.tool_calls().total_calls, 0);

    coordinator.reset().await;
    Ok(())
}

#[tokio::test]
async fn test_parallel_startup_shares_one_server() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());

    let starts = (0..10).map(|_| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.get_or_create().await }
    });
    let managers: Vec<Arc<McpManager>> = futures::future::join_all(starts)
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;
    assert!(managers.iter().all(|m| Arc::ptr_eq(m, &managers[0])));

    coordinator.reset().await;
    Ok(())
}

#[tokio::test]
async fn test_missing_executable_is_initialization_error() {
    let config = McpConfig {
        command: "finchat-no-such-server".to_string(),
        ..MockServer::new().config()
    };
    let coordinator = coordinator(config);
    let err = coordinator.get_or_create().await.err().expect("start should fail");
    assert!(matches!(err, McpError::Initialization(_)));
    assert!(err.to_string().contains("finchat-no-such-server"));
    assert!(coordinator.current().is_none());
}

#[tokio::test]
async fn test_http_call_and_history() -> Result<()> {
    let mock = MockServer::new();
    let state = AppState::new(coordinator(mock.config()));

    async fn request(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .expect("request");
        let resp = app_router(state.clone()).oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    let (status, tools) = request(&state, "GET", "/api/mcp/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tools["count"], 5);

    let (status, payload) = request(
        &state,
        "POST",
        "/api/mcp/call",
        Some(json!({"tool": "find", "params": {"collection": "prices"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["success"], true);
    assert_eq!(payload["result"]["content"][0]["text"], "BTC 64000");

    let (status, payload) = request(
        &state,
        "POST",
        "/api/mcp/call",
        Some(json!({"tool": "fail"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(payload["error"], "collection not found");

    let (_, calls) = request(&state, "GET", "/api/mcp/tool-calls", None).await;
    assert_eq!(calls["totalCalls"], 2);
    assert_eq!(calls["stats"]["completed"], 1);
    assert_eq!(calls["stats"]["error"], 1);

    let (_, health) = request(&state, "GET", "/api/mcp/health", None).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["mcpServer"], "running");
    let total = health["consoleLogs"]["total"].as_u64().expect("total count");
    assert_eq!(health["consoleLogs"]["recent"], total.min(10));

    let (_, _) = request(&state, "POST", "/api/mcp/clear", None).await;
    let (_, calls) = request(&state, "GET", "/api/mcp/tool-calls", None).await;
    assert_eq!(calls["totalCalls"], 0);
    // Clearing history keeps the server and its tools
    let (_, tools) = request(&state, "GET", "/api/mcp/tools", None).await;
    assert_eq!(tools["count"], 5);

    let (_, _) = request(&state, "POST", "/api/mcp/reset", None).await;
    assert!(state.coordinator.current().is_none());
    Ok(())
}

/// The agent's find tool routes a symbol to its collection and is tracked
#[tokio::test]
async fn test_market_find_tool_through_server() -> Result<()> {
    let mock = MockServer::new();
    let coordinator = coordinator(mock.config());
    let tools = market_tools(&coordinator);

    let output = tools[0]
        .execute(json!({"symbol": "btc", "limit": 1}))
        .await?;
    assert!(output.output.contains("BTC 64000"), "{}", output.output);

    let manager = coordinator.current().expect("server started on demand");
    let calls = manager.tool_calls();
    assert_eq!(calls.total_calls, 1);
    let record = &calls.recent_calls[0];
    assert_eq!(record.tool, "find");
    assert_eq!(record.params["collection"], "binanceCryptoData");
    assert_eq!(record.params["filter"], json!({"symbol": "BTC"}));
    assert_eq!(record.status, ToolCallStatus::Completed);

    coordinator.reset().await;
    Ok(())
}
