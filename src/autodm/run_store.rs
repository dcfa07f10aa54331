//! Run Store: durable history of orchestrator runs and the tool calls they
//! made, for audit and replay. The crate ships one in-memory reference
//! implementation; a production deployment backs this with a database.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::autodm::model::{AgentRun, ToolCallAudit};

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, run: AgentRun);
    async fn save_tool_call(&self, room_id: &str, audit: ToolCallAudit);
    async fn list_runs(&self, room_id: &str, limit: usize) -> Vec<AgentRun>;
}

/// Append-only, lock-guarded history kept for the lifetime of the process.
/// Mirrors the append-then-read-back shape of a hash-chained ledger, minus
/// the chaining: runs here are looked up by room, not verified end to end.
pub struct InMemoryRunStore {
    runs: Mutex<Vec<AgentRun>>,
    tool_calls: Mutex<Vec<(String, ToolCallAudit)>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self { runs: Mutex::new(Vec::new()), tool_calls: Mutex::new(Vec::new()) }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save_run(&self, run: AgentRun) {
        self.runs.lock().await.push(run);
    }

    async fn save_tool_call(&self, room_id: &str, audit: ToolCallAudit) {
        self.tool_calls.lock().await.push((room_id.to_string(), audit));
    }

    async fn list_runs(&self, room_id: &str, limit: usize) -> Vec<AgentRun> {
        let runs = self.runs.lock().await;
        runs.iter().rev().filter(|r| r.room_id == room_id).take(limit).cloned().collect()
    }
}
