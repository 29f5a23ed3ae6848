//! Tool-level errors for the offcache server.
//!
//! Worker failures arrive as `offcache_core::Error` and convert on their own;
//! these cover what goes wrong while shaping tool input and output.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Errors raised by tool glue rather than the worker.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid input parameters (e.g., empty path).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Tool output could not be serialized.
    #[error("OUTPUT_FAILED: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let (code, message) = match &err {
            ToolError::InvalidInput(msg) => (-32602, msg.clone()),
            ToolError::Output(e) => (-32603, e.to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
