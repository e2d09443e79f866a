//! Market data tools for the agent
//!
//! Thin adapters over the server's `find`, `aggregate` and `list-collections`
//! tools. Symbols are checked against the assets the database actually holds
//! and routed to the matching collection. Failures come back to the agent as
//! `"Error: ..."` text rather than as an error, so it can read them and retry.

use super::coordinator::McpCoordinator;
use super::manager::McpManager;
use super::tool::{Tool, ToolOutput};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use thiserror::Error;

pub const MARKET_DATABASE: &str = "agentic_capital_markets";
pub const CRYPTO_ASSETS: [&str; 6] = ["BTC", "ETH", "XRP", "SOL", "DOGE", "ADA"];
pub const STOCK_ASSETS: [&str; 10] = [
    "HYG", "LQD", "TLT", "GLD", "USO", "EEM", "QQQ", "SPY", "XLE", "VNQ",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Crypto,
    Stock,
}

impl AssetClass {
    /// Case-insensitive lookup against the supported assets
    pub fn of(symbol: &str) -> Option<Self> {
        let symbol = symbol.to_uppercase();
        if CRYPTO_ASSETS.contains(&symbol.as_str()) {
            Some(AssetClass::Crypto)
        } else if STOCK_ASSETS.contains(&symbol.as_str()) {
            Some(AssetClass::Stock)
        } else {
            None
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "binanceCryptoData",
            AssetClass::Stock => "yfinanceMarketData",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketToolError {
    #[error(
        "Asset '{0}' is not supported. Supported crypto: {crypto}. Supported stocks: {stocks}",
        crypto = CRYPTO_ASSETS.join(", "),
        stocks = STOCK_ASSETS.join(", ")
    )]
    UnsupportedAsset(String),

    #[error(
        "Unknown operation: {0}. Supported operations: stats, trend, volatility, volume, custom"
    )]
    UnknownOperation(String),

    #[error("Custom pipeline is required for 'custom' operation")]
    MissingPipeline,

    #[error("Invalid custom pipeline JSON: {0}")]
    InvalidPipeline(String),

    #[error("Custom pipeline must be an array of aggregation stages")]
    PipelineNotArray,
}

/// Resolve a symbol to its upper-cased form and asset class
fn resolve(symbol: &str) -> Result<(String, AssetClass), MarketToolError> {
    let class =
        AssetClass::of(symbol).ok_or_else(|| MarketToolError::UnsupportedAsset(symbol.to_string()))?;
    Ok((symbol.to_uppercase(), class))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindInput {
    pub symbol: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_sort_order")]
    pub sort_order: i64,
    /// Comma-separated projection, e.g. `symbol,close,timestamp`
    pub fields: Option<String>,
}

fn default_limit() -> i64 {
    10
}

fn default_sort_by() -> String {
    "timestamp".to_string()
}

fn default_sort_order() -> i64 {
    -1
}

/// Arguments for the server's `find` tool
pub fn find_params(input: &FindInput) -> Result<Value, MarketToolError> {
    let (symbol, class) = resolve(&input.symbol)?;

    let mut projection = Map::new();
    if let Some(fields) = &input.fields {
        for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            projection.insert(field.to_string(), json!(1));
        }
    }
    let mut sort = Map::new();
    sort.insert(input.sort_by.clone(), json!(input.sort_order));

    Ok(json!({
        "database": MARKET_DATABASE,
        "collection": class.collection(),
        "filter": { "symbol": symbol },
        "projection": projection,
        "sort": sort,
        "limit": input.limit,
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateInput {
    pub symbol: String,
    /// One of `stats`, `trend`, `volatility`, `volume`, `custom`
    pub operation: String,
    #[serde(default = "default_days")]
    pub days: i64,
    /// JSON array of stages, only for `custom`
    pub custom_pipeline: Option<String>,
}

fn default_days() -> i64 {
    30
}

/// Arguments for the server's `aggregate` tool. `now` anchors the `days`
/// cutoff; a non-positive `days` means no date filter.
pub fn aggregate_params(
    input: &AggregateInput,
    now: DateTime<Utc>,
) -> Result<Value, MarketToolError> {
    let (symbol, class) = resolve(&input.symbol)?;

    let mut pipeline = vec![json!({ "$match": { "symbol": symbol } })];
    if input.days > 0 {
        let cutoff = (now - Duration::days(input.days)).to_rfc3339_opts(SecondsFormat::Millis, true);
        pipeline.push(json!({
            "$match": { "timestamp": { "$gte": { "$date": cutoff } } }
        }));
    }

    match input.operation.as_str() {
        "stats" => pipeline.push(json!({
            "$group": {
                "_id": null,
                "avgClose": { "$avg": "$close" },
                "minClose": { "$min": "$close" },
                "maxClose": { "$max": "$close" },
                "avgVolume": { "$avg": "$volume" },
                "totalRecords": { "$sum": 1 },
                "latestPrice": { "$last": "$close" },
                "latestTimestamp": { "$last": "$timestamp" }
            }
        })),
        "trend" => {
            pipeline.push(json!({
                "$group": {
                    "_id": {
                        "year": { "$year": "$timestamp" },
                        "month": { "$month": "$timestamp" },
                        "day": { "$dayOfMonth": "$timestamp" }
                    },
                    "avgClose": { "$avg": "$close" },
                    "avgVolume": { "$avg": "$volume" }
                }
            }));
            pipeline.push(json!({ "$sort": { "_id.year": 1, "_id.month": 1, "_id.day": 1 } }));
        }
        "volatility" => pipeline.push(json!({
            "$group": {
                "_id": null,
                "avgClose": { "$avg": "$close" },
                "stdDev": { "$stdDevPop": "$close" },
                "volatility": {
                    "$multiply": [
                        { "$divide": [{ "$stdDevPop": "$close" }, { "$avg": "$close" }] },
                        100
                    ]
                }
            }
        })),
        "volume" => pipeline.push(json!({
            "$group": {
                "_id": null,
                "totalVolume": { "$sum": "$volume" },
                "avgVolume": { "$avg": "$volume" },
                "maxVolume": { "$max": "$volume" },
                "minVolume": { "$min": "$volume" }
            }
        })),
        "custom" => {
            let raw = input
                .custom_pipeline
                .as_deref()
                .ok_or(MarketToolError::MissingPipeline)?;
            let stages: Value = serde_json::from_str(raw)
                .map_err(|e| MarketToolError::InvalidPipeline(e.to_string()))?;
            match stages {
                Value::Array(stages) => pipeline.extend(stages),
                _ => return Err(MarketToolError::PipelineNotArray),
            }
        }
        other => return Err(MarketToolError::UnknownOperation(other.to_string())),
    }

    Ok(json!({
        "database": MARKET_DATABASE,
        "collection": class.collection(),
        "pipeline": pipeline,
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListCollectionsInput {
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    MARKET_DATABASE.to_string()
}

/// Run one server tool through the shared manager
async fn call_server(
    coordinator: &McpCoordinator<McpManager>,
    tool: &str,
    params: Value,
) -> Result<Value> {
    let manager = coordinator.get_or_create().await.map_err(|e| {
        crate::logging::warn(&format!("No MCP server for {}: {}", tool, e));
        anyhow::anyhow!("MCP Server not available")
    })?;
    Ok(manager.call_tool(tool, params).await?)
}

/// Pretty JSON on success, `Error: <message>` otherwise
fn report(outcome: Result<Value>) -> Result<ToolOutput> {
    let output = match outcome {
        Ok(value) => serde_json::to_string_pretty(&value)?,
        Err(e) => format!("Error: {}", e),
    };
    Ok(ToolOutput::new(output))
}

pub struct MarketFindTool {
    coordinator: Arc<McpCoordinator<McpManager>>,
}

impl MarketFindTool {
    pub fn new(coordinator: Arc<McpCoordinator<McpManager>>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Tool for MarketFindTool {
    fn name(&self) -> &str {
        "mcp_find"
    }

    fn description(&self) -> &str {
        "Find documents from MongoDB collections. Use this to get current prices, historical data, \
         or specific records for crypto (BTC, ETH, XRP, SOL, DOGE, ADA) or stock (HYG, LQD, TLT, \
         GLD, USO, EEM, QQQ, SPY, XLE, VNQ) assets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string", "description": "The asset symbol to search for (e.g., 'BTC', 'ETH', 'SPY', 'QQQ')"},
                "limit": {"type": "number", "default": 10, "description": "Maximum number of documents to return"},
                "sortBy": {"type": "string", "default": "timestamp", "description": "Field to sort by"},
                "sortOrder": {"type": "number", "default": -1, "description": "Sort order: -1 for descending, 1 for ascending"},
                "fields": {"type": "string", "description": "Comma-separated list of fields to include (e.g., 'symbol,close,timestamp')"}
            },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let outcome = async {
            let input: FindInput = serde_json::from_value(input)?;
            let params = find_params(&input)?;
            call_server(&self.coordinator, "find", params).await
        }
        .await;
        report(outcome)
    }
}

pub struct MarketAggregateTool {
    coordinator: Arc<McpCoordinator<McpManager>>,
}

impl MarketAggregateTool {
    pub fn new(coordinator: Arc<McpCoordinator<McpManager>>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Tool for MarketAggregateTool {
    fn name(&self) -> &str {
        "mcp_aggregate"
    }

    fn description(&self) -> &str {
        "Perform aggregation operations on MongoDB collections. Use this for calculating averages, \
         statistics, trends, or complex analysis for crypto (BTC, ETH, XRP, SOL, DOGE, ADA) or stock \
         (HYG, LQD, TLT, GLD, USO, EEM, QQQ, SPY, XLE, VNQ) assets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string", "description": "The asset symbol to analyze (e.g., 'BTC', 'ETH', 'SPY', 'QQQ')"},
                "operation": {
                    "type": "string",
                    "enum": ["stats", "trend", "volatility", "volume", "custom"],
                    "description": "The aggregation operation: 'stats' (basic statistics), 'trend' (price trends), 'volatility' (price volatility), 'volume' (volume analysis), 'custom' (custom pipeline)"
                },
                "days": {"type": "number", "default": 30, "description": "Number of days to analyze (for time-based operations)"},
                "customPipeline": {"type": "string", "description": "Custom aggregation pipeline in JSON format (only for 'custom' operation)"}
            },
            "required": ["symbol", "operation"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let outcome = async {
            let input: AggregateInput = serde_json::from_value(input)?;
            let params = aggregate_params(&input, Utc::now())?;
            call_server(&self.coordinator, "aggregate", params).await
        }
        .await;
        report(outcome)
    }
}

pub struct ListCollectionsTool {
    coordinator: Arc<McpCoordinator<McpManager>>,
}

impl ListCollectionsTool {
    pub fn new(coordinator: Arc<McpCoordinator<McpManager>>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Tool for ListCollectionsTool {
    fn name(&self) -> &str {
        "mcp_list_collections"
    }

    fn description(&self) -> &str {
        "List available collections in the MongoDB database. Use this to understand what data is available."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "database": {"type": "string", "default": MARKET_DATABASE, "description": "Database name to list collections from"}
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let outcome = async {
            let input: ListCollectionsInput = serde_json::from_value(input)?;
            call_server(
                &self.coordinator,
                "list-collections",
                json!({ "database": input.database }),
            )
            .await
        }
        .await;
        report(outcome)
    }
}

/// The agent's market data toolset
pub fn market_tools(coordinator: &Arc<McpCoordinator<McpManager>>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(MarketFindTool::new(Arc::clone(coordinator))),
        Arc::new(MarketAggregateTool::new(Arc::clone(coordinator))),
        Arc::new(ListCollectionsTool::new(Arc::clone(coordinator))),
    ]
}
