//! Sub-agents: five specialists sharing one capability set. Held as
//! `Box<dyn SubAgent>` by the orchestrator — a small sealed set of variants
//! behind one trait, not a deep inheritance hierarchy.

pub mod moderator;
pub mod narrator;
pub mod player_modeler;
pub mod rules;
pub mod summarizer;

use async_trait::async_trait;
use std::sync::Arc;

use crate::autodm::memory::MemoryManager;
use crate::autodm::model::{Action, Event, GameStateSnapshot, PlayerModel};
use crate::autodm::router::ModelRouter;

pub use moderator::Moderator;
pub use narrator::Narrator;
pub use player_modeler::PlayerModeler;
pub use rules::Rules;
pub use summarizer::Summarizer;

/// Memory context handed to every sub-agent: short-term/long-term results
/// already retrieved for this run, player models if modeling is enabled,
/// and a running game summary.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub relevant_entries: Vec<crate::autodm::model::MemoryEntry>,
    pub player_models: Vec<PlayerModel>,
    pub game_summary: Option<String>,
}

/// Phase timer deadlines as tracked by the orchestrator. A `None` deadline
/// never expires (e.g. no day timer configured for this table).
#[derive(Debug, Clone, Default)]
pub struct TimerDeadlines {
    pub day_deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub night_deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub vote_deadline: Option<chrono::DateTime<chrono::Utc>>,
}

impl TimerDeadlines {
    fn expired(deadline: &Option<chrono::DateTime<chrono::Utc>>) -> bool {
        deadline.map_or(false, |d| chrono::Utc::now() >= d)
    }

    pub fn day_expired(&self) -> bool {
        Self::expired(&self.day_deadline)
    }

    pub fn night_expired(&self) -> bool {
        Self::expired(&self.night_deadline)
    }

    pub fn vote_expired(&self) -> bool {
        Self::expired(&self.vote_deadline)
    }
}

pub struct AgentContext<'a> {
    pub room_id: String,
    pub state: GameStateSnapshot,
    pub recent_events: &'a [Event],
    /// Alive non-DM players the engine is waiting on (e.g. a pending night
    /// ability), derived from the state snapshot at Sense time.
    pub pending_inputs: Vec<String>,
    pub timers: TimerDeadlines,
    pub memory: MemoryContext,
    pub run_id: String,
    pub router: Arc<ModelRouter>,
    pub memory_manager: Arc<MemoryManager>,
}

/// What one sub-agent proposes for this run: zero or more actions, the
/// prose that motivated them, and an optional confidence in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub actions: Vec<Action>,
    pub message: Option<String>,
    pub confidence: Option<f32>,
}

impl AgentOutput {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait SubAgent: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn execute(&self, ctx: &AgentContext<'_>) -> AgentOutput;
}

/// Does the event window contain any event of the given types?
pub(crate) fn window_contains(events: &[Event], types: &[&str]) -> bool {
    events.iter().any(|e| types.contains(&e.event_type.as_str()))
}

/// Seconds since the most recent event in the window, or `f64::MAX` if the
/// window is empty.
pub(crate) fn seconds_since_last_event(events: &[Event]) -> f64 {
    events
        .iter()
        .map(|e| e.timestamp)
        .max()
        .map(|last| (chrono::Utc::now() - last).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(f64::MAX)
}
