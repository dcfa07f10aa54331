//! Examines phase and timers; the only sub-agent consulted on every run.

use async_trait::async_trait;

use crate::autodm::agents::{seconds_since_last_event, AgentContext, AgentOutput, SubAgent};
use crate::autodm::model::{Action, Phase};

const DAY_PROMPT_IDLE_SECONDS: f64 = 30.0;

pub struct Moderator;

#[async_trait]
impl SubAgent for Moderator {
    fn name(&self) -> &'static str {
        "moderator"
    }

    fn description(&self) -> &'static str {
        "Drives phase transitions and nudges a stalled table."
    }

    async fn execute(&self, ctx: &AgentContext<'_>) -> AgentOutput {
        let mut actions = Vec::new();
        let mut message = None;

        match ctx.state.phase {
            Phase::Day => {
                if ctx.state.nomination.is_none() && seconds_since_last_event(ctx.recent_events) > DAY_PROMPT_IDLE_SECONDS {
                    actions.push(Action::new(
                        "send_public_message",
                        serde_json::json!({
                            "room_id": ctx.room_id,
                            "message": "The table has gone quiet. Does anyone wish to nominate?",
                        }),
                        10,
                    ));
                    message = Some("prompted a quiet table".to_string());
                }
                if ctx.timers.vote_expired() {
                    actions.push(Action::new(
                        "toggle_voting",
                        serde_json::json!({"room_id": ctx.room_id, "open": false}),
                        20,
                    ));
                    message.get_or_insert_with(|| "closed an expired vote".to_string());
                }
                if ctx.timers.day_expired() {
                    actions.push(Action::new(
                        "advance_phase",
                        serde_json::json!({"room_id": ctx.room_id, "phase": "night", "reason": "day timer expired"}),
                        30,
                    ));
                    message.get_or_insert_with(|| "advanced to night".to_string());
                }
            }
            Phase::Night => {
                if !ctx.pending_inputs.is_empty() {
                    for player_id in &ctx.pending_inputs {
                        actions.push(Action::new(
                            "send_private_message",
                            serde_json::json!({
                                "room_id": ctx.room_id,
                                "to_user_id": player_id,
                                "message": "Choose your action for tonight.",
                            }),
                            15,
                        ));
                        actions.push(Action::new(
                            "request_player_confirmation",
                            serde_json::json!({
                                "room_id": ctx.room_id,
                                "to_user_id": player_id,
                                "message": "Confirm your nightly action.",
                            }),
                            16,
                        ));
                    }
                    message = Some(format!("requested actions from {} player(s)", ctx.pending_inputs.len()));
                }
                if ctx.timers.night_expired() {
                    actions.push(Action::new(
                        "advance_phase",
                        serde_json::json!({"room_id": ctx.room_id, "phase": "day", "reason": "night timer expired"}),
                        30,
                    ));
                    message.get_or_insert_with(|| "advanced to day".to_string());
                }
            }
            _ => {}
        }

        AgentOutput { actions, message, confidence: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodm::agents::{MemoryContext, TimerDeadlines};
    use crate::autodm::memory::MemoryManager;
    use crate::autodm::model::GameStateSnapshot;
    use crate::autodm::router::{ClientBundle, ModelRouter};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state(phase: Phase) -> GameStateSnapshot {
        GameStateSnapshot {
            room_id: "R1".into(),
            phase,
            day: 1,
            players: vec![],
            nomination: None,
            last_seq: 0,
        }
    }

    fn test_ctx<'a>(state: GameStateSnapshot, events: &'a [crate::autodm::model::Event]) -> AgentContext<'a> {
        AgentContext {
            room_id: "R1".into(),
            state,
            recent_events: events,
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
            memory_manager: Arc::new(MemoryManager::new(10)),
        }
    }

    #[tokio::test]
    async fn quiet_day_with_no_nomination_prompts_the_table() {
        let ctx = test_ctx(test_state(Phase::Day), &[]);
        let output = Moderator.execute(&ctx).await;
        assert_eq!(output.actions.len(), 1);
        assert_eq!(output.actions[0].action_type, "send_public_message");
    }

    #[tokio::test]
    async fn night_with_pending_players_whispers_each_one() {
        let mut ctx = test_ctx(test_state(Phase::Night), &[]);
        ctx.pending_inputs = vec!["p1".into(), "p2".into()];
        let output = Moderator.execute(&ctx).await;
        // two actions per pending player
        assert_eq!(output.actions.len(), 4);
    }

    #[tokio::test]
    async fn expired_night_timer_advances_to_day() {
        let mut ctx = test_ctx(test_state(Phase::Night), &[]);
        ctx.timers.night_deadline = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        let output = Moderator.execute(&ctx).await;
        assert!(output.actions.iter().any(|a| a.action_type == "advance_phase"));
    }
}
