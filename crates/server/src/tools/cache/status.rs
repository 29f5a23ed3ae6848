//! cache_status tool implementation.

use offcache_client::Worker;
use offcache_core::GenerationSummary;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerationInfo {
    pub name: String,
    pub entries: u64,
    pub created_at: String,
    /// Whether this is the generation the worker reads and writes.
    pub current: bool,
}

/// Output from the cache_status tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatusOutput {
    /// Worker lifecycle state (parsed, installing, installed, activating, activated).
    pub state: String,
    /// Generation id of this deployment.
    pub current_generation: String,
    /// Every generation in the store, oldest first.
    pub generations: Vec<GenerationInfo>,
}

/// Implementation of the cache_status tool.
pub async fn status_impl(worker: &Worker) -> Result<CallToolResult, McpError> {
    let current = worker.generation().as_str();
    let generations = worker
        .store()
        .summaries()
        .await?
        .into_iter()
        .map(|GenerationSummary { name, entries, created_at }| GenerationInfo {
            current: name == current,
            name,
            entries,
            created_at,
        })
        .collect();

    let output = CacheStatusOutput {
        state: worker.state().await.to_string(),
        current_generation: current.to_string(),
        generations,
    };

    Ok(json_result(&output)?)
}
