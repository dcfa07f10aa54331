//! Recaps the night's events into a short public summary, and files a copy
//! into the room's memory for later retrieval.

use async_trait::async_trait;

use crate::autodm::agents::{window_contains, AgentContext, AgentOutput, SubAgent};
use crate::autodm::model::Action;
use crate::autodm::router::{ChatMessage, TaskKind};

const RECAP_EVENT_TYPES: &[&str] =
    &["public.chat", "nomination.created", "vote.cast", "execution.resolved"];
const MAX_BULLETS: usize = 20;
const MAX_RECAP_WORDS: usize = 150;

fn bullet_for(event: &crate::autodm::model::Event) -> Option<String> {
    match event.event_type.as_str() {
        "public.chat" => event.payload.get("message").and_then(|v| v.as_str()).map(|m| format!("{} said: {}", event.actor_user_id, m)),
        "nomination.created" => {
            let nominee = event.payload.get("nominee").and_then(|v| v.as_str()).unwrap_or("someone");
            Some(format!("{} nominated {}", event.actor_user_id, nominee))
        }
        "vote.cast" => {
            let vote = event.payload.get("vote").and_then(|v| v.as_str()).unwrap_or("voted");
            Some(format!("{} {}", event.actor_user_id, vote))
        }
        "execution.resolved" => {
            let who = event.payload.get("executed").and_then(|v| v.as_str()).unwrap_or("a player");
            Some(format!("{} was executed", who))
        }
        _ => None,
    }
}

fn truncate_to_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[..max_words].join(" ")
    }
}

pub struct Summarizer;

#[async_trait]
impl SubAgent for Summarizer {
    fn name(&self) -> &'static str {
        "summarizer"
    }

    fn description(&self) -> &'static str {
        "Recaps the night's events into a short public summary."
    }

    async fn execute(&self, ctx: &AgentContext<'_>) -> AgentOutput {
        if !window_contains(ctx.recent_events, &["phase.night"]) {
            return AgentOutput::empty();
        }

        let bullets: Vec<String> = ctx
            .recent_events
            .iter()
            .filter(|e| RECAP_EVENT_TYPES.contains(&e.event_type.as_str()))
            .filter_map(bullet_for)
            .collect();
        let bullets: Vec<String> = bullets.into_iter().rev().take(MAX_BULLETS).rev().collect();
        if bullets.is_empty() {
            return AgentOutput::empty();
        }

        let bullet_list = bullets.iter().map(|b| format!("- {}", b)).collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "Summarize tonight's events for the table in at most {} words:\n{}",
            MAX_RECAP_WORDS, bullet_list
        );

        let recap = match ctx
            .router
            .chat(TaskKind::Summarizer, &[ChatMessage::system("You write terse, spoiler-free game recaps."), ChatMessage::user(prompt)], None, None)
            .await
        {
            Ok(response) if !response.content.trim().is_empty() => truncate_to_words(&response.content, MAX_RECAP_WORDS),
            _ => truncate_to_words(&bullet_list, MAX_RECAP_WORDS),
        };

        ctx.memory_manager.save_game_summary(&ctx.room_id, recap.clone()).await;

        let actions = vec![Action::new(
            "send_public_message",
            serde_json::json!({"room_id": ctx.room_id, "message": recap, "tag": "summary"}),
            6,
        )];

        AgentOutput { actions, message: Some("posted a night recap".to_string()), confidence: None }
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

    fn ctx_with<'a>(events: &'a [Event], memory_manager: Arc<MemoryManager>) -> AgentContext<'a> {
        AgentContext {
            room_id: "R1".into(),
            state: GameStateSnapshot { room_id: "R1".into(), phase: Phase::Night, day: 1, players: vec![], nomination: None, last_seq: 1 },
            recent_events: events,
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
            memory_manager,
        }
    }

    #[tokio::test]
    async fn no_night_phase_event_yields_no_recap() {
        let events = vec![Event::new("R1", 1, "public.chat", "p1", serde_json::json!({"message": "hi"}))];
        let output = Summarizer.execute(&ctx_with(&events, Arc::new(MemoryManager::new(10)))).await;
        assert!(output.actions.is_empty());
    }

    #[tokio::test]
    async fn night_recap_falls_back_to_bullet_list_and_saves_a_game_summary() {
        let events = vec![
            Event::new("R1", 1, "phase.night", "engine", serde_json::json!({})),
            Event::new("R1", 2, "public.chat", "p1", serde_json::json!({"message": "I suspect p2"})),
            Event::new("R1", 3, "execution.resolved", "engine", serde_json::json!({"executed": "p2"})),
        ];
        let memory_manager = Arc::new(MemoryManager::new(10));
        let output = Summarizer.execute(&ctx_with(&events, memory_manager.clone())).await;
        assert_eq!(output.actions.len(), 1);
        assert!(memory_manager.get_game_summary("R1").await.is_some());
    }
}
