//! Orchestrator: the seven-step control loop — Sense, BuildContext, Plan,
//! Execute, Observe, Reflect, Persist — run once per tick for one room.
//!
//! Sub-agents run in a fixed order and their proposed actions are merged by
//! that order, not by any runtime-computed priority: moderator first (it is
//! the only one consulted on every tick), then rules, narrator, summarizer,
//! and finally player_modeler.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::autodm::agents::{AgentContext, MemoryContext, SubAgent, TimerDeadlines};
use crate::autodm::agents::{Moderator, Narrator, PlayerModeler, Rules, Summarizer};
use crate::autodm::error::AutoDmError;
use crate::autodm::memory::MemoryManager;
use crate::autodm::model::{Action, ActionResult, AgentRun, RunStatus, ToolCallAudit};
use crate::autodm::router::ModelRouter;
use crate::autodm::run_store::RunStore;
use crate::autodm::tool_registry::{ToolCall, ToolContext, ToolRegistry};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub run_interval: Duration,
    pub max_actions_per_run: usize,
    pub action_timeout: Duration,
    pub max_retries_per_action: u32,
    pub enable_reflection: bool,
    pub enable_player_modeling: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_interval: Duration::from_secs(2),
            max_actions_per_run: 10,
            action_timeout: Duration::from_secs(30),
            max_retries_per_action: 3,
            enable_reflection: true,
            enable_player_modeling: true,
        }
    }
}

fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

/// Drives one room's seven-step loop. Holds no phase/game-rule knowledge of
/// its own; everything beyond plan-merging and retry bookkeeping is
/// delegated to the sub-agents and the tool registry.
pub struct Orchestrator {
    room_id: String,
    config: OrchestratorConfig,
    tool_registry: Arc<ToolRegistry>,
    router: Arc<ModelRouter>,
    memory_manager: Arc<MemoryManager>,
    run_store: Arc<dyn RunStore>,
    tool_context: Arc<dyn ToolContext>,
    sub_agents: Vec<Box<dyn SubAgent>>,
    timers: Mutex<TimerDeadlines>,
}

impl Orchestrator {
    pub fn new(
        room_id: impl Into<String>,
        config: OrchestratorConfig,
        tool_registry: Arc<ToolRegistry>,
        router: Arc<ModelRouter>,
        memory_manager: Arc<MemoryManager>,
        run_store: Arc<dyn RunStore>,
        tool_context: Arc<dyn ToolContext>,
    ) -> Self {
        let sub_agents: Vec<Box<dyn SubAgent>> = vec![
            Box::new(Moderator),
            Box::new(Rules),
            Box::new(Narrator),
            Box::new(Summarizer),
            Box::new(PlayerModeler),
        ];
        Self {
            room_id: room_id.into(),
            config,
            tool_registry,
            router,
            memory_manager,
            run_store,
            tool_context,
            sub_agents,
            timers: Mutex::new(TimerDeadlines::default()),
        }
    }

    /// Runs one iteration of the loop starting from `last_seq` (exclusive).
    /// Returns the completed `AgentRun` record, which is always persisted
    /// regardless of whether any action failed.
    pub async fn run_once(&self, last_seq: u64) -> Result<AgentRun, AutoDmError> {
        let started_at = std::time::Instant::now();
        let mut run = AgentRun::started(self.room_id.clone(), last_seq);
        run.agent_name = "orchestrator".to_string();

        // Sense
        let state = match self.tool_context.room_state(&self.room_id).await {
            Some(state) => state,
            None => {
                let error = AutoDmError::StateMismatch(format!("no state available for room {}", self.room_id));
                run.status = RunStatus::Error;
                run.error_text = Some(error.to_string());
                run.latency_ms = started_at.elapsed().as_millis() as u64;
                self.run_store.save_run(run).await;
                return Err(error);
            }
        };
        let recent_events = self.tool_context.recent_events(&self.room_id, last_seq, 200).await;
        run.seq_to = recent_events.iter().map(|e| e.seq).max().unwrap_or(last_seq);

        let input_bytes = serde_json::to_vec(&recent_events).unwrap_or_default();
        run.input_digest = digest(&input_bytes);

        self.update_timers(&recent_events).await;

        // BuildContext
        let pending_inputs: Vec<String> = state.alive_non_dm_players().map(|p| p.id.clone()).collect();
        let relevant_entries = self.memory_manager.retrieve_relevant(&self.room_id, "", 10).await;
        let player_models = self.memory_manager.get_player_models(&self.room_id).await;
        let game_summary = self.memory_manager.get_game_summary(&self.room_id).await;
        let ctx = AgentContext {
            room_id: self.room_id.clone(),
            state,
            recent_events: &recent_events,
            pending_inputs,
            timers: self.timers.lock().await.clone(),
            memory: MemoryContext { relevant_entries, player_models, game_summary },
            run_id: run.id.clone(),
            router: self.router.clone(),
            memory_manager: self.memory_manager.clone(),
        };

        // Plan: run every sub-agent in fixed order, merging actions in that
        // same order. player_modeler is skipped entirely when disabled.
        let mut actions: Vec<Action> = Vec::new();
        let mut reasoning_parts: Vec<String> = Vec::new();
        for sub_agent in &self.sub_agents {
            if sub_agent.name() == "player_modeler" && !self.config.enable_player_modeling {
                continue;
            }
            let output = sub_agent.execute(&ctx).await;
            if let Some(message) = output.message {
                reasoning_parts.push(format!("{}: {}", sub_agent.name(), message));
            }
            actions.extend(output.actions);
            if actions.len() >= self.config.max_actions_per_run {
                break;
            }
        }
        actions.truncate(self.config.max_actions_per_run);

        let mut plan = crate::autodm::model::Plan::empty(self.room_id.clone());
        plan.actions = actions.clone();
        plan.reasoning = reasoning_parts.join("; ");

        // Execute + Observe
        let mut audits = Vec::new();
        let mut results = Vec::new();
        for action in &actions {
            let (audit, result) = self.execute_action(action).await;
            audits.push(audit.clone());
            results.push(result);
            self.run_store.save_tool_call(&self.room_id, audit).await;
        }

        // Reflect
        if self.config.enable_reflection {
            let failures = results.iter().filter(|r| !r.success).count();
            if failures > 0 {
                log::warn!("run {} for room {}: {} of {} actions failed", run.id, self.room_id, failures, results.len());
            }
        }

        let output_bytes = serde_json::to_vec(&results).unwrap_or_default();
        run.output_digest = digest(&output_bytes);
        run.plan = Some(plan);
        run.audits = audits;
        run.status = if results.iter().all(|r| r.success) { RunStatus::Completed } else { RunStatus::Error };
        run.latency_ms = started_at.elapsed().as_millis() as u64;

        // Persist
        self.run_store.save_run(run.clone()).await;
        Ok(run)
    }

    async fn update_timers(&self, events: &[crate::autodm::model::Event]) {
        let mut timers = self.timers.lock().await;
        for event in events {
            match event.event_type.as_str() {
                "phase.day" => timers.day_deadline = None,
                "phase.night" => timers.night_deadline = None,
                "nomination.created" => timers.vote_deadline = None,
                _ => {}
            }
        }
    }

    async fn execute_action(&self, action: &Action) -> (ToolCallAudit, ActionResult) {
        let started = std::time::Instant::now();
        let max_retries = action.max_retries.unwrap_or(self.config.max_retries_per_action);
        let timeout = action.timeout_ms.map(Duration::from_millis).unwrap_or(self.config.action_timeout);

        let mut last_error = None;
        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis((attempt as u64) * 100)).await;
            }
            let call = ToolCall {
                id: action.id.clone(),
                name: action.action_type.clone(),
                params: action.args.clone(),
                timestamp: chrono::Utc::now(),
            };
            match tokio::time::timeout(timeout, self.tool_registry.invoke(call, self.tool_context.clone())).await {
                Ok(invoke_result) if invoke_result.success => {
                    let audit = ToolCallAudit {
                        tool_name: action.action_type.clone(),
                        args: action.args.clone(),
                        result: invoke_result.result.clone(),
                        error: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                    let result = ActionResult {
                        action_id: action.id.clone(),
                        success: true,
                        output: invoke_result.result,
                        error: None,
                        duration_ms: audit.duration_ms,
                        timestamp: chrono::Utc::now(),
                    };
                    return (audit, result);
                }
                Ok(invoke_result) => last_error = invoke_result.error,
                Err(_) => last_error = Some("action timed out".to_string()),
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let audit = ToolCallAudit {
            tool_name: action.action_type.clone(),
            args: action.args.clone(),
            result: None,
            error: last_error.clone(),
            duration_ms,
        };
        let result = ActionResult {
            action_id: action.id.clone(),
            success: false,
            output: None,
            error: last_error,
            duration_ms,
            timestamp: chrono::Utc::now(),
        };
        (audit, result)
    }
}
