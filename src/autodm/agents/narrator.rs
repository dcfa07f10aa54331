//! Narrates phase transitions and other dramatic beats. Degrades to a canned
//! line per event type when the model is slow or unreachable.

use async_trait::async_trait;

use crate::autodm::agents::{AgentContext, AgentOutput, SubAgent};
use crate::autodm::model::Action;
use crate::autodm::router::{ChatMessage, TaskKind};

const NARRATION_WORTHY: &[&str] = &["game.started", "phase.day", "phase.night", "execution.resolved", "game.ended"];

fn fallback_line(event_type: &str) -> &'static str {
    match event_type {
        "game.started" => "The sun sets on the first night. May fortune favor the good.",
        "phase.day" => "The sun rises over the square.",
        "phase.night" => "Darkness falls. Close your eyes.",
        "execution.resolved" => "The verdict has been carried out.",
        "game.ended" => "The game has ended.",
        _ => "The story continues.",
    }
}

pub struct Narrator;

#[async_trait]
impl SubAgent for Narrator {
    fn name(&self) -> &'static str {
        "narrator"
    }

    fn description(&self) -> &'static str {
        "Narrates narration-worthy beats in the storyteller's voice."
    }

    async fn execute(&self, ctx: &AgentContext<'_>) -> AgentOutput {
        let mut actions = Vec::new();
        let mut message = None;

        for event in ctx.recent_events.iter().filter(|e| NARRATION_WORTHY.contains(&e.event_type.as_str())) {
            let prompt = format!(
                "Narrate this moment for a hidden-role social deduction table in one or two evocative sentences: {}",
                event.event_type
            );
            let line = match ctx
                .router
                .chat(TaskKind::Narrator, &[ChatMessage::system("You are a dramatic, concise Storyteller."), ChatMessage::user(prompt)], None, None)
                .await
            {
                Ok(response) if !response.content.trim().is_empty() => response.content,
                _ => fallback_line(&event.event_type).to_string(),
            };

            actions.push(Action::new(
                "send_public_message",
                serde_json::json!({"room_id": ctx.room_id, "message": line, "tag": "narration"}),
                8,
            ));
            message.get_or_insert_with(|| format!("narrated {}", event.event_type));
        }

        AgentOutput { actions, message, confidence: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodm::agents::{MemoryContext, TimerDeadlines};
    use crate::autodm::memory::MemoryManager;
    use crate::autodm::model::{Event, GameStateSnapshot, Phase};
    use crate::autodm::router::{ClientBundle, ModelRouter};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_router_falls_back_to_a_canned_line() {
        let events = vec![Event::new("R1", 1, "phase.day", "engine", serde_json::json!({}))];
        let ctx = AgentContext {
            room_id: "R1".into(),
            state: GameStateSnapshot { room_id: "R1".into(), phase: Phase::Day, day: 1, players: vec![], nomination: None, last_seq: 1 },
            recent_events: &events,
            pending_inputs: vec![],
            timers: TimerDeadlines::default(),
            memory: MemoryContext::default(),
            run_id: "run1".into(),
            router: Arc::new(ModelRouter::new(ClientBundle {
                base_url: "http://127.0.0.1:1".into(),
                api_key: None,
                model: "m".into(),
                timeout: Duration::from_millis(50),
            })),
            memory_manager: Arc::new(MemoryManager::new(10)),
        };

        let output = Narrator.execute(&ctx).await;
        assert_eq!(output.actions.len(), 1);
        assert_eq!(output.actions[0].args["message"], "The sun rises over the square.");
        assert_eq!(output.actions[0].args["tag"], "narration");
    }

    #[tokio::test]
    async fn non_narration_events_are_ignored() {
        let events = vec![Event::new("R1", 1, "player.joined", "engine", serde_json::json!({}))];
        let ctx = AgentContext {
            room_id: "R1".into(),
            state: GameStateSnapshot { room_id: "R1".into(), phase: Phase::Day, day: 1, players: vec![], nomination: None, last_seq: 1 },
            recent_events: &events,
            pending_inputs: vec![],
            timers: TimerDeadlines::default(),
            memory: MemoryContext::default(),
            run_id: "run1".into(),
            router: Arc::new(ModelRouter::new(ClientBundle {
                base_url: "http://127.0.0.1:1".into(),
                api_key: None,
                model: "m".into(),
                timeout: Duration::from_millis(50),
            })),
            memory_manager: Arc::new(MemoryManager::new(10)),
        };
        let output = Narrator.execute(&ctx).await;
        assert!(output.actions.is_empty());
    }
}
