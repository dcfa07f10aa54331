//! Answers rule questions and disputes, grounded in the rules index.

use async_trait::async_trait;

use crate::autodm::agents::{AgentContext, AgentOutput, SubAgent};
use crate::autodm::model::Action;
use crate::autodm::router::{ChatMessage, TaskKind};

const RULE_EVENT_TYPES: &[&str] = &["rule_question", "dispute"];
const TOP_K_SNIPPETS: usize = 3;

pub struct Rules;

impl Rules {
    fn build_answer(question: &str, snippets: &[crate::autodm::model::MemoryEntry]) -> (String, Vec<String>) {
        let mut body = String::new();
        let mut sources = Vec::new();
        for (i, snippet) in snippets.iter().enumerate() {
            let anchor = i + 1;
            body.push_str(&format!("[{}] {}\n", anchor, snippet.content));
            let source = snippet.metadata.get("source").cloned().unwrap_or_else(|| "corpus".to_string());
            sources.push(format!("[{}] {}", anchor, source));
        }
        let _ = question;
        (body, sources)
    }
}

#[async_trait]
impl SubAgent for Rules {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn description(&self) -> &'static str {
        "Answers rule questions and disputes with cited rulebook snippets."
    }

    async fn execute(&self, ctx: &AgentContext<'_>) -> AgentOutput {
        let mut actions = Vec::new();
        let mut message = None;

        for event in ctx.recent_events.iter().filter(|e| RULE_EVENT_TYPES.contains(&e.event_type.as_str())) {
            let question = event.payload.get("question").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let snippets = ctx.memory_manager.search_rules(&question, TOP_K_SNIPPETS).await;
            if snippets.is_empty() {
                continue;
            }

            let (snippet_body, sources) = Self::build_answer(&question, &snippets);

            let prompt = format!(
                "A player asked: \"{}\"\n\nRelevant rulebook excerpts:\n{}\nAnswer using only these excerpts and cite them by number.",
                question, snippet_body
            );

            let reply = match ctx
                .router
                .chat(TaskKind::Rules, &[ChatMessage::system("You are the rules adjudicator."), ChatMessage::user(prompt)], None, None)
                .await
            {
                Ok(response) if !response.content.trim().is_empty() => response.content,
                _ => snippet_body.clone(),
            };

            let body = format!("{}\n\nSources: {}", reply.trim_end(), sources.join(", "));

            actions.push(Action::new(
                "send_public_message",
                serde_json::json!({"room_id": ctx.room_id, "message": body}),
                5,
            ));
            message.get_or_insert_with(|| "answered a rule question".to_string());
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
    async fn rule_question_with_no_snippets_emits_nothing() {
        let memory_manager = Arc::new(MemoryManager::new(10));
        let events = vec![Event::new("R1", 1, "rule_question", "p1", serde_json::json!({"question": "Can a dead player vote?"}))];
        let ctx = AgentContext {
            room_id: "R1".into(),
            state: GameStateSnapshot { room_id: "R1".into(), phase: Phase::Day, day: 1, players: vec![], nomination: None, last_seq: 1 },
            recent_events: &events,
            pending_inputs: vec![],
            timers: TimerDeadlines::default(),
            memory: MemoryContext::default(),
            run_id: "run1".into(),
            router: Arc::new(ModelRouter::new(ClientBundle {
                base_url: "http://x".into(),
                api_key: None,
                model: "m".into(),
                timeout: Duration::from_secs(1),
            })),
            memory_manager,
        };

        let output = Rules.execute(&ctx).await;
        assert!(output.actions.is_empty());
    }

    #[tokio::test]
    async fn rule_question_with_snippets_falls_back_to_verbatim_text_with_citations() {
        let memory_manager = Arc::new(MemoryManager::new(10));
        memory_manager
            .ingest_rules(vec![
                ("rulebook.md".to_string(), "A ghost may still cast one vote after death.".to_string()),
                ("rulebook.md".to_string(), "Ghost votes are tracked per-player and never replenish.".to_string()),
            ])
            .await;

        let events = vec![Event::new("R1", 1, "rule_question", "p1", serde_json::json!({"question": "Can a dead player vote?"}))];
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
            memory_manager,
        };

        let output = Rules.execute(&ctx).await;
        assert_eq!(output.actions.len(), 1);
        let message = output.actions[0].args["message"].as_str().unwrap();
        assert!(message.contains("[1]"));
        assert!(message.contains("Sources:"));
    }
}
