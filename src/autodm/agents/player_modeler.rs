//! Aggregates per-player behavior from the event window into a playstyle
//! profile, filed into memory for the other sub-agents to draw on.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::autodm::agents::{AgentContext, AgentOutput, SubAgent};
use crate::autodm::model::{PlayerModel, Playstyle};

#[derive(Default)]
struct Counters {
    messages: u32,
    nominations: u32,
    votes_cast: u32,
    yes_votes: u32,
}

fn derive_playstyle(counters: &Counters) -> Playstyle {
    if counters.nominations >= 2 {
        Playstyle::Aggressive
    } else if counters.messages >= 5 {
        Playstyle::Talkative
    } else if counters.messages == 0 && counters.votes_cast == 0 {
        Playstyle::Quiet
    } else {
        Playstyle::Balanced
    }
}

fn voting_pattern_tags(counters: &Counters) -> Vec<String> {
    let mut tags = Vec::new();
    if counters.votes_cast == 0 {
        return tags;
    }
    let yes_ratio = counters.yes_votes as f32 / counters.votes_cast as f32;
    if yes_ratio >= 0.75 {
        tags.push("votes_yes_often".to_string());
    } else if yes_ratio <= 0.25 {
        tags.push("votes_no_often".to_string());
    } else {
        tags.push("votes_mixed".to_string());
    }
    tags
}

const PARTICIPATION_NORM: f32 = 10.0;

/// Normalized activity level for the window: messages plus a heavier weight
/// for nominations and votes, capped at 1.0.
fn participation_score(counters: &Counters) -> f32 {
    let weighted = counters.messages as f32 + counters.nominations as f32 * 2.0 + counters.votes_cast as f32;
    (weighted / PARTICIPATION_NORM).min(1.0)
}

/// No claim-tracking or vote-flip history is modeled yet, so trust starts
/// from a neutral baseline nudged by voting consistency; deception is kept
/// as its complement. Revisit once the Narrator surfaces claim contradictions.
fn trust_and_deception_scores(counters: &Counters) -> (f32, f32) {
    let trust = if counters.votes_cast == 0 {
        0.5
    } else {
        let yes_ratio = counters.yes_votes as f32 / counters.votes_cast as f32;
        0.5 + (0.5 - (yes_ratio - 0.5).abs())
    }
    .clamp(0.0, 1.0);
    (trust, 1.0 - trust)
}

pub struct PlayerModeler;

#[async_trait]
impl SubAgent for PlayerModeler {
    fn name(&self) -> &'static str {
        "player_modeler"
    }

    fn description(&self) -> &'static str {
        "Derives per-player playstyle and voting-pattern tags from recent activity."
    }

    async fn execute(&self, ctx: &AgentContext<'_>) -> AgentOutput {
        let mut by_actor: HashMap<String, Counters> = HashMap::new();

        for event in ctx.recent_events {
            let counters = by_actor.entry(event.actor_user_id.clone()).or_default();
            match event.event_type.as_str() {
                "public.chat" | "whisper.sent" => counters.messages += 1,
                "nomination.created" => counters.nominations += 1,
                "vote.cast" => {
                    counters.votes_cast += 1;
                    if event.payload.get("vote").and_then(|v| v.as_str()) == Some("yes") {
                        counters.yes_votes += 1;
                    }
                }
                _ => {}
            }
        }

        if by_actor.is_empty() {
            return AgentOutput::empty();
        }

        let mut modeled = 0;
        for (user_id, counters) in &by_actor {
            let playstyle = derive_playstyle(counters);
            let voting_pattern_tags = voting_pattern_tags(counters);
            let (trust_score, deception_score) = trust_and_deception_scores(counters);

            let model = PlayerModel {
                user_id: user_id.clone(),
                playstyle,
                trust_score,
                deception_score,
                participation_score: participation_score(counters),
                voting_pattern_tags,
                last_updated: chrono::Utc::now(),
            };
            ctx.memory_manager.save_player_model(&ctx.room_id, model).await;
            modeled += 1;
        }

        AgentOutput { actions: vec![], message: Some(format!("updated {} player model(s)", modeled)), confidence: None }
    }
}
