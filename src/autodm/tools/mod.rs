//! The canonical tool set the core ships: every side effect the sub-agents
//! can reach goes through one of these.

use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::autodm::model::CommandEnvelope;
use crate::autodm::tool_registry::{
    ParamSchema, ParamType, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolHandler, ToolRegistry,
};

/// Register `send_public_message`, `send_private_message`, `advance_phase`,
/// `toggle_voting`, `write_event`, `get_room_state`, `get_recent_events`, and
/// `request_player_confirmation` against `registry`.
pub async fn register_canonical_tools(registry: &ToolRegistry) -> Result<(), ToolError> {
    registry
        .register(
            ToolDefinition::new(
                "send_public_message",
                "Post a message visible to every seated player.",
                ToolCategory::Communication,
            )
            .with_parameter(ParamSchema::new("message", ParamType::String).required().with_length(Some(1), Some(2000))),
            send_public_message_handler(),
        )
        .await?;

    registry
        .register(
            ToolDefinition::new(
                "send_private_message",
                "Whisper a message to a single player.",
                ToolCategory::Communication,
            )
            .with_parameter(ParamSchema::new("to_user_id", ParamType::String).required())
            .with_parameter(ParamSchema::new("message", ParamType::String).required().with_length(Some(1), Some(2000))),
            send_private_message_handler(),
        )
        .await?;

    registry
        .register(
            ToolDefinition::new(
                "request_player_confirmation",
                "Whisper a player asking them to confirm a pending ability action.",
                ToolCategory::Moderation,
            )
            .with_parameter(ParamSchema::new("to_user_id", ParamType::String).required())
            .with_parameter(ParamSchema::new("message", ParamType::String).required()),
            request_player_confirmation_handler(),
        )
        .await?;

    registry
        .register(
            ToolDefinition::new(
                "advance_phase",
                "Request the engine advance to a new game phase.",
                ToolCategory::GameControl,
            )
            .with_parameter(
                ParamSchema::new("phase", ParamType::Enum)
                    .required()
                    .with_enum(vec!["day".into(), "night".into(), "nomination".into()]),
            )
            .with_parameter(ParamSchema::new("reason", ParamType::String)),
            advance_phase_handler(),
        )
        .await?;

    registry
        .register(
            ToolDefinition::new("toggle_voting", "Open or close voting on the active nomination.", ToolCategory::GameControl)
                .with_parameter(ParamSchema::new("open", ParamType::Boolean).required()),
            toggle_voting_handler(),
        )
        .await?;

    registry
        .register(
            ToolDefinition::new("write_event", "Append a normalized event to the engine's event log.", ToolCategory::GameControl)
                .with_parameter(ParamSchema::new("event_type", ParamType::String).required())
                .with_parameter(ParamSchema::new("data", ParamType::Object).with_properties(Vec::new())),
            write_event_handler(),
        )
        .await?;

    registry
        .register(
            ToolDefinition::new("get_room_state", "Read the engine's authoritative snapshot for a room.", ToolCategory::Information)
                .with_parameter(ParamSchema::new("room_id", ParamType::String).required()),
            get_room_state_handler(),
        )
        .await?;

    registry
        .register(
            ToolDefinition::new("get_recent_events", "Read events since a sequence number.", ToolCategory::Information)
                .with_parameter(ParamSchema::new("room_id", ParamType::String).required())
                .with_parameter(ParamSchema::new("since_seq", ParamType::Number).required().with_range(Some(0.0), None))
                .with_parameter(ParamSchema::new("limit", ParamType::Number).required().with_range(Some(0.0), Some(1000.0))),
            get_recent_events_handler(),
        )
        .await?;

    Ok(())
}

fn room_id_of(params: &JsonValue) -> String {
    params.get("room_id").and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn send_public_message_handler() -> ToolHandler {
    Arc::new(move |params, ctx| {
        Box::pin(async move {
            let message = params["message"].as_str().unwrap_or_default();
            let room_id = room_id_of(&params);
            ctx.dispatch(CommandEnvelope::public_chat(room_id, message))
                .await
                .map_err(|e| ToolError::HandlerError(e.to_string()))?;
            Ok(serde_json::json!({"status": "ok"}))
        })
    })
}

fn send_private_message_handler() -> ToolHandler {
    Arc::new(move |params, ctx| {
        Box::pin(async move {
            let to = params["to_user_id"].as_str().unwrap_or_default();
            let message = params["message"].as_str().unwrap_or_default();
            let room_id = room_id_of(&params);
            ctx.dispatch(CommandEnvelope::whisper(room_id, to, message))
                .await
                .map_err(|e| ToolError::HandlerError(e.to_string()))?;
            Ok(serde_json::json!({"status": "ok"}))
        })
    })
}

fn request_player_confirmation_handler() -> ToolHandler {
    // Same wire effect as a whisper; kept distinct so sub-agents express
    // intent ("I am asking you to act") separately from narration.
    send_private_message_handler()
}

fn advance_phase_handler() -> ToolHandler {
    Arc::new(move |params, ctx| {
        Box::pin(async move {
            let phase = params["phase"].as_str().unwrap_or_default();
            let reason = params.get("reason").and_then(|v| v.as_str()).unwrap_or_default();
            let room_id = room_id_of(&params);
            ctx.dispatch(CommandEnvelope::advance_phase(room_id, phase, reason))
                .await
                .map_err(|e| ToolError::HandlerError(e.to_string()))?;
            Ok(serde_json::json!({"status": "ok"}))
        })
    })
}

fn toggle_voting_handler() -> ToolHandler {
    Arc::new(move |params, ctx| {
        Box::pin(async move {
            let open = params["open"].as_bool().unwrap_or(false);
            let room_id = room_id_of(&params);
            ctx.dispatch(CommandEnvelope::new(room_id, "toggle_voting", serde_json::json!({"open": open})))
                .await
                .map_err(|e| ToolError::HandlerError(e.to_string()))?;
            Ok(serde_json::json!({"status": "ok"}))
        })
    })
}

fn write_event_handler() -> ToolHandler {
    Arc::new(move |params, ctx| {
        Box::pin(async move {
            let event_type = params["event_type"].as_str().unwrap_or_default();
            let room_id = room_id_of(&params);
            let data: std::collections::HashMap<String, String> = params
                .get("data")
                .and_then(|v| v.as_object())
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| (k.clone(), v.as_str().map(String::from).unwrap_or_else(|| v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            ctx.dispatch(CommandEnvelope::write_event(room_id, event_type, data))
                .await
                .map_err(|e| ToolError::HandlerError(e.to_string()))?;
            Ok(serde_json::json!({"status": "ok"}))
        })
    })
}

fn get_room_state_handler() -> ToolHandler {
    Arc::new(move |params, ctx| {
        Box::pin(async move {
            let room_id = room_id_of(&params);
            match ctx.room_state(&room_id).await {
                Some(state) => Ok(serde_json::to_value(state).unwrap_or(JsonValue::Null)),
                None => Err(ToolError::HandlerError(format!("no state available for room {}", room_id))),
            }
        })
    })
}

fn get_recent_events_handler() -> ToolHandler {
    Arc::new(move |params, ctx| {
        Box::pin(async move {
            let room_id = room_id_of(&params);
            let since_seq = params["since_seq"].as_u64().unwrap_or(0);
            let limit = params["limit"].as_u64().unwrap_or(0) as usize;
            let events = ctx.recent_events(&room_id, since_seq, limit).await;
            Ok(serde_json::to_value(events).unwrap_or(JsonValue::Array(vec![])))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodm::model::{Event, GameStateSnapshot, NominationState, Phase};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingContext {
        dispatched: Mutex<Vec<CommandEnvelope>>,
    }

    #[async_trait]
    impl ToolContext for RecordingContext {
        async fn dispatch(&self, command: CommandEnvelope) -> Result<(), ToolError> {
            self.dispatched.lock().unwrap().push(command);
            Ok(())
        }
        async fn room_state(&self, room_id: &str) -> Option<GameStateSnapshot> {
            Some(GameStateSnapshot {
                room_id: room_id.to_string(),
                phase: Phase::Day,
                day: 1,
                players: vec![],
                nomination: None::<NominationState>,
                last_seq: 0,
            })
        }
        async fn recent_events(&self, _room_id: &str, _since_seq: u64, _limit: usize) -> Vec<Event> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn send_public_message_dispatches_a_public_chat_command() {
        let registry = ToolRegistry::new();
        register_canonical_tools(&registry).await.unwrap();
        let ctx = Arc::new(RecordingContext { dispatched: Mutex::new(Vec::new()) });

        let result = registry
            .invoke(
                crate::autodm::tool_registry::ToolCall {
                    id: "1".into(),
                    name: "send_public_message".into(),
                    params: serde_json::json!({"room_id": "R1", "message": "hello table"}),
                    timestamp: chrono::Utc::now(),
                },
                ctx.clone(),
            )
            .await;

        assert!(result.success);
        let dispatched = ctx.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].command_type, "public_chat");
        assert_eq!(dispatched[0].idempotency_key, dispatched[0].command_id);
    }

    #[tokio::test]
    async fn advance_phase_rejects_unknown_phase_names() {
        let registry = ToolRegistry::new();
        register_canonical_tools(&registry).await.unwrap();
        let ctx = Arc::new(RecordingContext { dispatched: Mutex::new(Vec::new()) });

        let result = registry
            .invoke(
                crate::autodm::tool_registry::ToolCall {
                    id: "1".into(),
                    name: "advance_phase".into(),
                    params: serde_json::json!({"room_id": "R1", "phase": "dusk"}),
                    timestamp: chrono::Utc::now(),
                },
                ctx,
            )
            .await;

        assert!(!result.success);
    }
}
