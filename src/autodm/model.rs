//! Wire shapes shared between the agent and the game engine, and the
//! orchestrator's own bookkeeping records.
//!
//! Everything here is plain data: no behavior, no I/O. The engine remains
//! authoritative for game rules; these types only describe what crosses the
//! boundary between it and the Storyteller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// An observation from the engine. Events are append-only and ordered by
/// `seq` within a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub room_id: String,
    pub seq: u64,
    pub event_id: String,
    pub event_type: String,
    pub actor_user_id: String,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        room_id: impl Into<String>,
        seq: u64,
        event_type: impl Into<String>,
        actor_user_id: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            seq,
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            actor_user_id: actor_user_id.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// An intent sent back to the engine. `idempotency_key` equals `command_id`
/// for every command the agent emits, guaranteeing an at-most-once effect
/// even if the dispatcher is asked to send it twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: String,
    pub idempotency_key: String,
    pub room_id: String,
    pub command_type: String,
    pub actor_user_id: String,
    pub payload: JsonValue,
}

impl CommandEnvelope {
    /// The actor id the agent stamps on every command it emits.
    pub const AGENT_ACTOR_ID: &'static str = "autodm";

    pub fn new(room_id: impl Into<String>, command_type: impl Into<String>, payload: JsonValue) -> Self {
        let command_id = uuid::Uuid::new_v4().to_string();
        Self {
            idempotency_key: command_id.clone(),
            command_id,
            room_id: room_id.into(),
            command_type: command_type.into(),
            actor_user_id: Self::AGENT_ACTOR_ID.to_string(),
            payload,
        }
    }

    pub fn public_chat(room_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            room_id,
            "public_chat",
            serde_json::json!({ "message": message.into(), "from": Self::AGENT_ACTOR_ID }),
        )
    }

    pub fn whisper(
        room_id: impl Into<String>,
        to_user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            room_id,
            "whisper",
            serde_json::json!({
                "to_user_id": to_user_id.into(),
                "message": message.into(),
                "from": Self::AGENT_ACTOR_ID,
            }),
        )
    }

    pub fn advance_phase(room_id: impl Into<String>, phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            room_id,
            "advance_phase",
            serde_json::json!({ "phase": phase.into(), "reason": reason.into() }),
        )
    }

    pub fn write_event(
        room_id: impl Into<String>,
        event_type: impl Into<String>,
        data: HashMap<String, String>,
    ) -> Self {
        Self::new(
            room_id,
            "write_event",
            serde_json::json!({ "event_type": event_type.into(), "data": data }),
        )
    }
}

/// Authoritative engine phase. The agent mirrors this; it never writes it
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    FirstNight,
    Day,
    Nomination,
    Night,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: String,
    pub name: String,
    pub seat: u32,
    pub role: Option<String>,
    pub alive: bool,
    pub vote_used: bool,
    pub reminder_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NominationState {
    pub nominator: String,
    pub nominee: String,
    pub votes_for: u32,
    pub threshold: u32,
}

/// A read-only projection of the engine's authoritative game state, supplied
/// by a state-getter callback. The agent never mutates it directly; all
/// writes flow back through declared tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    pub room_id: String,
    pub phase: Phase,
    pub day: u32,
    pub players: Vec<PlayerSnapshot>,
    pub nomination: Option<NominationState>,
    pub last_seq: u64,
}

impl GameStateSnapshot {
    pub fn alive_non_dm_players(&self) -> impl Iterator<Item = &PlayerSnapshot> {
        self.players.iter().filter(|p| p.alive && p.id != CommandEnvelope::AGENT_ACTOR_ID)
    }
}

/// A planned tool invocation. `action_type` mirrors a registered tool name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub action_type: String,
    pub args: JsonValue,
    pub priority: i32,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

impl Action {
    pub fn new(action_type: impl Into<String>, args: JsonValue, priority: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.into(),
            args,
            priority,
            timeout_ms: None,
            max_retries: None,
        }
    }
}

/// One sub-agent's or the orchestrator's merged proposal for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub room_id: String,
    pub actions: Vec<Action>,
    pub reasoning: String,
    pub confidence: Option<f32>,
}

impl Plan {
    pub fn empty(room_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            actions: Vec::new(),
            reasoning: String::new(),
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub success: bool,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Forensic record of a single tool invocation, independent of whether it
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallAudit {
    pub tool_name: String,
    pub args: JsonValue,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

/// One iteration of the orchestrator's seven-step loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub room_id: String,
    pub agent_name: String,
    pub seq_from: u64,
    pub seq_to: u64,
    pub input_digest: String,
    pub output_digest: String,
    pub plan: Option<Plan>,
    pub audits: Vec<ToolCallAudit>,
    pub status: RunStatus,
    pub latency_ms: u64,
    pub error_text: Option<String>,
}

impl AgentRun {
    pub fn started(room_id: impl Into<String>, seq_from: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            agent_name: "orchestrator".to_string(),
            seq_from,
            seq_to: seq_from,
            input_digest: String::new(),
            output_digest: String::new(),
            plan: None,
            audits: Vec::new(),
            status: RunStatus::Running,
            latency_ms: 0,
            error_text: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEntryType {
    Rule,
    Summary,
    Profile,
    Event,
}

/// A single stored or retrieved unit of memory: a rule chunk, a game
/// summary, a player profile, or an event digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub entry_type: MemoryEntryType,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
    /// Populated only on the copy returned from a retrieval call.
    pub score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(entry_type: MemoryEntryType, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entry_type,
            content: content.into(),
            embedding: Vec::new(),
            metadata: HashMap::new(),
            score: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Playstyle {
    Aggressive,
    Talkative,
    Quiet,
    Balanced,
}

/// Per-user behavioral profile maintained by the PlayerModeler sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerModel {
    pub user_id: String,
    pub playstyle: Playstyle,
    pub trust_score: f32,
    pub deception_score: f32,
    pub participation_score: f32,
    pub voting_pattern_tags: Vec<String>,
    pub last_updated: DateTime<Utc>,
}
