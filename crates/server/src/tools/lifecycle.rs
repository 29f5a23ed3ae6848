//! cache_install and cache_activate tool implementations.
//!
//! These let a client drive the lifecycle by hand, e.g. to retry an install
//! that failed at start-up.

use offcache_client::{ActivateOutcome, InstallOutcome, Worker};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Output from the cache_install tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInstallOutput {
    pub generation: String,
    /// Number of pre-cache assets written.
    pub cached: usize,
    pub skip_waiting: bool,
    /// Worker state after install.
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FailedDelete {
    pub generation: String,
    pub reason: String,
}

/// Output from the cache_activate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheActivateOutput {
    pub generation: String,
    /// Stale generations removed.
    pub deleted: Vec<String>,
    /// Stale generations that could not be removed.
    pub failed: Vec<FailedDelete>,
    pub clients_claimed: bool,
    /// Worker state after activation.
    pub state: String,
}

/// Implementation of the cache_install tool.
pub async fn install_impl(worker: &Worker) -> Result<CallToolResult, McpError> {
    let InstallOutcome { generation, cached, skip_waiting } = worker.install().await?;
    let output = CacheInstallOutput { generation, cached, skip_waiting, state: worker.state().await.to_string() };
    Ok(json_result(&output)?)
}

/// Implementation of the cache_activate tool.
pub async fn activate_impl(worker: &Worker) -> Result<CallToolResult, McpError> {
    let ActivateOutcome { generation, deleted, failed, clients_claimed } = worker.activate().await?;
    let output = CacheActivateOutput {
        generation,
        deleted,
        failed: failed
            .into_iter()
            .map(|f| FailedDelete { generation: f.generation, reason: f.reason })
            .collect(),
        clients_claimed,
        state: worker.state().await.to_string(),
    };
    Ok(json_result(&output)?)
}
