//! cache_get tool implementation.
//!
//! Reads one entry from the current generation without any network access.

use offcache_client::Worker;
use offcache_core::Error;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::fetch::ResponseOutput;
use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Path on the configured origin or an absolute URL.
    pub path: String,

    /// HTTP method the entry was stored under (default: GET).
    #[serde(default)]
    pub method: Option<String>,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    /// Generation the entry was read from.
    pub generation: String,
    /// Storage key of the entry.
    pub key: String,
    pub response: ResponseOutput,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(worker: &Worker, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let method = params.method.as_deref().unwrap_or("GET");
    let request = worker.request(method, &params.path)?;

    let response = worker
        .store()
        .generation(worker.generation())
        .match_request(&request)
        .await?
        .ok_or_else(|| Error::CacheMiss(request.to_string()))?;

    let output = CacheGetOutput { generation: worker.generation().to_string(), key: request.key(), response: response.into() };

    Ok(json_result(&output)?)
}
