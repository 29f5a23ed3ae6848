//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the worker.
use crate::tools::cache::{CacheGetParams, get_impl, status_impl};
use crate::tools::fetch::{CacheFetchParams, fetch_impl};
use crate::tools::lifecycle::{activate_impl, install_impl};

use offcache_client::Worker;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for offcache.
#[derive(Clone)]
pub struct OffcacheServer {
    worker: Worker,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl OffcacheServer {
    /// Create a new server handler around a worker.
    pub fn new(worker: Worker) -> Self {
        Self { worker, tool_router: Self::tool_router() }
    }

    /// Fetch an asset through the offline cache.
    ///
    /// Serves the cached copy immediately when one exists and refreshes it in the background.
    #[tool(
        description = "Fetch an asset through the offline cache. Returns the cached copy immediately when present \
                       (refreshing it in the background), otherwise the network response."
    )]
    async fn cache_fetch(&self, params: Parameters<CacheFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.worker, params.0).await
    }

    /// Read an entry from the current generation without touching the network.
    #[tool(description = "Read a stored response from the current cache generation. No network requests are made.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(&self.worker, params.0).await
    }

    #[tool(description = "Show worker state and every cache generation with its entry count.")]
    async fn cache_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.worker).await
    }

    #[tool(description = "Fetch all pre-cache assets into the current generation. Fails without writing if any asset fails.")]
    async fn cache_install(&self) -> Result<CallToolResult, McpError> {
        install_impl(&self.worker).await
    }

    #[tool(description = "Delete every cache generation except the current one and take control of all clients.")]
    async fn cache_activate(&self) -> Result<CallToolResult, McpError> {
        activate_impl(&self.worker).await
    }
}

impl ServerHandler for OffcacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "offcache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
