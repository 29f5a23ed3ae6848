//! MCP tool implementations.
//!
//! This module contains all tools exposed by the offcache server.

pub mod cache;
pub mod fetch;
pub mod lifecycle;

use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

use crate::error::ToolError;

/// Render a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, ToolError> {
    let json = serde_json::to_string_pretty(output)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
