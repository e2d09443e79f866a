//! MCP Tool - exposes server tools to the reasoning agent

use super::manager::McpManager;
use super::protocol::{ContentBlock, McpToolDef, ToolCallResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub output: String,
    pub title: Option<String>,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            title: None,
            metadata: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// What the agent sees when choosing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the agent sends back)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// JSON Schema for the input parameters
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, input: Value) -> Result<ToolOutput>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

/// A tool that proxies to the MCP server
pub struct McpTool {
    tool_def: McpToolDef,
    manager: Arc<McpManager>,
}

impl McpTool {
    pub fn new(tool_def: McpToolDef, manager: Arc<McpManager>) -> Self {
        Self { tool_def, manager }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.tool_def.name
    }

    fn description(&self) -> &str {
        self.tool_def.description.as_deref().unwrap_or("MCP tool")
    }

    fn parameters_schema(&self) -> Value {
        self.tool_def.input_schema.clone()
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let raw = self.manager.call_tool(&self.tool_def.name, input).await?;
        let title = format!("mcp:{}", self.tool_def.name);

        let output = match serde_json::from_value::<ToolCallResult>(raw.clone()) {
            Ok(result) => render(result),
            // Not the usual content-block shape; hand the JSON over as is
            Err(_) => raw.to_string(),
        };
        Ok(ToolOutput::new(output).with_title(title).with_metadata(raw))
    }
}

/// Flatten content blocks to text for the agent
fn render(result: ToolCallResult) -> String {
    let mut output_parts = Vec::new();
    for block in result.content {
        match block {
            ContentBlock::Text { text } => {
                output_parts.push(text);
            }
            ContentBlock::Image { data, mime_type } => {
                output_parts.push(format!("[Image: {} ({} bytes)]", mime_type, data.len()));
            }
            ContentBlock::Resource { resource } => {
                if let Some(text) = resource.text {
                    output_parts.push(text);
                } else if let Some(blob) = resource.blob {
                    let kind = resource.mime_type.as_deref().unwrap_or("binary");
                    output_parts.push(format!(
                        "[Resource: {} ({}, {} bytes)]",
                        resource.uri,
                        kind,
                        blob.len()
                    ));
                } else {
                    output_parts.push(format!("[Resource: {}]", resource.uri));
                }
            }
        }
    }

    let output = output_parts.join("\n");
    if result.is_error {
        format!("Error: {}", output)
    } else {
        output
    }
}

/// One tool per descriptor the server currently advertises
pub fn create_mcp_tools(manager: &Arc<McpManager>) -> Vec<Arc<dyn Tool>> {
    manager
        .tools()
        .into_iter()
        .map(|tool_def| Arc::new(McpTool::new(tool_def, Arc::clone(manager))) as Arc<dyn Tool>)
        .collect()
}
