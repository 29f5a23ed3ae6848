//! cache_fetch tool implementation.
//!
//! Sends one request through the worker, so it is answered with
//! stale-while-revalidate once the worker controls clients.

use offcache_client::{ResponseSource, Worker};
use offcache_core::StoredResponse;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

/// Parameters for the cache_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheFetchParams {
    /// Path on the configured origin (e.g. "/index.html") or an absolute URL.
    pub path: String,

    /// HTTP method (default: GET). Only GET responses are cached.
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "GET".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

/// A response as returned to MCP clients.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResponseOutput {
    /// Final URL of the response.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header.
    pub content_type: Option<String>,
    /// Response headers in arrival order.
    pub headers: Vec<HeaderPair>,
    /// Body decoded as UTF-8 (invalid sequences replaced).
    pub body: String,
    /// ISO8601 timestamp of the network fetch that produced this response.
    pub fetched_at: String,
}

impl From<StoredResponse> for ResponseOutput {
    fn from(response: StoredResponse) -> Self {
        let body = response.body_text();
        Self {
            url: response.url,
            status: response.status,
            content_type: response.content_type,
            headers: response
                .headers
                .into_iter()
                .map(|(name, value)| HeaderPair { name, value })
                .collect(),
            body,
            fetched_at: response.fetched_at,
        }
    }
}

/// Output structure for cache_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheFetchOutput {
    /// Method and canonical URL of the intercepted request.
    pub request: String,
    /// "cache" when served from the current generation, "network" otherwise.
    pub source: String,
    pub response: ResponseOutput,
}

/// Implementation of the cache_fetch tool.
pub async fn fetch_impl(worker: &Worker, params: CacheFetchParams) -> Result<CallToolResult, McpError> {
    if params.path.trim().is_empty() {
        return Err(ToolError::InvalidInput("path cannot be empty".into()).into());
    }

    let request = worker.request(&params.method, &params.path)?;
    let label = request.to_string();

    // The revalidation handle is dropped here; the background refresh keeps running.
    let intercepted = worker.fetch(request).await?;

    let source = match intercepted.source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
    };

    let output =
        CacheFetchOutput { request: label, source: source.into(), response: intercepted.response.into() };

    Ok(json_result(&output)?)
}
