pub mod types;
pub mod transport;
pub mod client;

pub use client::McpClient;
pub use types::{McpTool, CallToolResult, McpContent};

use crate::tool_invoker::ToolInvoker;
use crate::types::ToolArgs;
use async_trait::async_trait;

/// Flattens an MCP `CallToolResult` into the text contract every other
/// component in this crate checks: concatenated text blocks, with the
/// literal substring `isError=True` appended when the server reported an error.
fn flatten_call_result(result: CallToolResult) -> String {
    let mut output = String::new();
    for content in result.content {
        if let McpContent::Text { text } = content {
            output.push_str(&text);
            output.push('\n');
        }
    }
    let output = output.trim().to_string();
    if result.is_error {
        format!("{output} isError=True")
    } else {
        output
    }
}

#[async_trait]
impl ToolInvoker for McpClient {
    async fn invoke(&self, tool_name: &str, args: &ToolArgs) -> Result<String, String> {
        self.call_tool(tool_name, args.clone())
            .await
            .map(flatten_call_result)
            .map_err(|e| format!("MCP tool error: {e}"))
    }
}
