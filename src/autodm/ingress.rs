//! Event Ingress & Dispatcher.
//!
//! The boundary between the engine's event stream and the agent's own loop.
//! Filters out disabled rooms, the agent's own echoes, and anything the
//! agent has no opinion on; for the rest, either answers inline under a
//! tight deadline or hands the event to the orchestrator's queue.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::autodm::error::AutoDmError;
use crate::autodm::memory::MemoryManager;
use crate::autodm::model::{CommandEnvelope, Event};
use crate::autodm::router::{ChatMessage, ModelRouter, TaskKind};

const GAME_RELEVANT_EVENT_TYPES: &[&str] = &[
    "game.started",
    "game.ended",
    "phase.day",
    "phase.night",
    "nomination.created",
    "vote.cast",
    "execution.resolved",
    "public.chat",
    "whisper.sent",
    "rule_question",
    "dispute",
];

const RULE_CONTEXT_EVENT_TYPES: &[&str] = &["rule_question", "dispute"];

fn fallback_message(event_type: &str) -> Option<&'static str> {
    match event_type {
        "phase.day" => Some("☀️ 天亮了，开始讨论并寻找隐藏的邪恶吧。"),
        "phase.night" => Some("🌙 夜幕降临，所有人请闭眼。"),
        "nomination.created" => Some("📣 提名已发起，请进行陈述与投票。"),
        "game.started" => Some("🎭 游戏开始，故事即将展开。"),
        "game.ended" => Some("🏁 游戏结束，感谢大家的参与。"),
        _ => None,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Sends a command to the engine. One implementation talks to the real
/// engine; tests use an in-memory recorder.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: CommandEnvelope) -> Result<(), AutoDmError>;
}

/// Hands an event off for the orchestrator's next tick to pick up, rather
/// than answering it inline.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, room_id: String, event: Event);
}

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub event_timeout: Duration,
    pub rule_context_deadline: Duration,
    pub rule_snippet_max_chars: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            event_timeout: Duration::from_secs(8),
            rule_context_deadline: Duration::from_millis(1500),
            rule_snippet_max_chars: 180,
        }
    }
}

pub struct Ingress {
    enabled: AtomicBool,
    config: IngressConfig,
    dispatcher: Option<Arc<dyn CommandDispatcher>>,
    task_queue: Option<Arc<dyn TaskQueue>>,
    memory_manager: Arc<MemoryManager>,
    router: Arc<ModelRouter>,
}

impl Ingress {
    pub fn new(
        config: IngressConfig,
        memory_manager: Arc<MemoryManager>,
        router: Arc<ModelRouter>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            config,
            dispatcher: None,
            task_queue: None,
            memory_manager,
            router,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_task_queue(mut self, task_queue: Arc<dyn TaskQueue>) -> Self {
        self.task_queue = Some(task_queue);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The entry point: one event in, zero or one immediate command out, or
    /// the event queued for the orchestrator's own run.
    pub async fn on_event(&self, room_id: &str, event: Event) -> Result<(), AutoDmError> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        // Loop prevention: drop the agent's own public messages and whispers
        // echoed back through the event stream.
        if event.actor_user_id == CommandEnvelope::AGENT_ACTOR_ID
            && matches!(event.event_type.as_str(), "public.chat" | "whisper.sent")
        {
            return Ok(());
        }

        if !GAME_RELEVANT_EVENT_TYPES.contains(&event.event_type.as_str()) {
            return Ok(());
        }

        if RULE_CONTEXT_EVENT_TYPES.contains(&event.event_type.as_str()) {
            return self.inject_rule_context_and_enqueue(room_id, event).await;
        }

        if let Some(fallback) = fallback_message(&event.event_type) {
            return self.narrate_or_fallback(room_id, &event, fallback).await;
        }

        self.enqueue(room_id, event).await;
        Ok(())
    }

    async fn inject_rule_context_and_enqueue(&self, room_id: &str, mut event: Event) -> Result<(), AutoDmError> {
        let question = event.payload.get("question").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        match tokio::time::timeout(self.config.rule_context_deadline, self.memory_manager.search_rules(&question, 3)).await {
            Ok(snippets) if !snippets.is_empty() => {
                let truncated: Vec<String> =
                    snippets.iter().map(|s| truncate_chars(&s.content, self.config.rule_snippet_max_chars)).collect();
                if let Some(obj) = event.payload.as_object_mut() {
                    obj.insert("rule_context".to_string(), serde_json::json!(truncated));
                }
            }
            Ok(_) => {}
            Err(_) => log::warn!("rule context lookup timed out for room {}", room_id),
        }

        self.enqueue(room_id, event).await;
        Ok(())
    }

    async fn narrate_or_fallback(&self, room_id: &str, event: &Event, fallback: &str) -> Result<(), AutoDmError> {
        let dispatcher = self.dispatcher.as_ref().ok_or(AutoDmError::DispatcherUnconfigured)?;

        let prompt = format!("Narrate this beat for the table in one sentence: {}", event.event_type);
        let message = match tokio::time::timeout(
            self.config.event_timeout,
            self.router.chat(TaskKind::Narrator, &[ChatMessage::system("You are a concise Storyteller."), ChatMessage::user(prompt)], None, None),
        )
        .await
        {
            Ok(Ok(response)) if !response.content.trim().is_empty() => response.content,
            _ => fallback.to_string(),
        };

        dispatcher.dispatch(CommandEnvelope::public_chat(room_id, message)).await
    }

    async fn enqueue(&self, room_id: &str, event: Event) {
        match &self.task_queue {
            Some(queue) => queue.enqueue(room_id.to_string(), event).await,
            None => log::warn!("no task queue configured for room {}; dropping event {}", room_id, event.event_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodm::router::ClientBundle;
    use tokio::sync::Mutex;

    struct RecordingDispatcher {
        dispatched: Mutex<Vec<CommandEnvelope>>,
    }

    #[async_trait]
    impl CommandDispatcher for RecordingDispatcher {
        async fn dispatch(&self, command: CommandEnvelope) -> Result<(), AutoDmError> {
            self.dispatched.lock().await.push(command);
            Ok(())
        }
    }

    struct RecordingQueue {
        queued: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn enqueue(&self, _room_id: String, event: Event) {
            self.queued.lock().await.push(event);
        }
    }

    fn test_router() -> Arc<ModelRouter> {
        Arc::new(ModelRouter::new(ClientBundle {
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            model: "m".into(),
            timeout: Duration::from_millis(50),
        }))
    }

    #[tokio::test]
    async fn self_authored_chat_is_dropped() {
        let ingress = Ingress::new(IngressConfig::default(), Arc::new(MemoryManager::new(10)), test_router());
        let event = Event::new("R1", 1, "public.chat", CommandEnvelope::AGENT_ACTOR_ID, serde_json::json!({}));
        assert!(ingress.on_event("R1", event).await.is_ok());
    }

    #[tokio::test]
    async fn phase_day_without_a_dispatcher_surfaces_an_error() {
        let ingress = Ingress::new(IngressConfig::default(), Arc::new(MemoryManager::new(10)), test_router());
        let event = Event::new("R1", 1, "phase.day", "engine", serde_json::json!({}));
        let err = ingress.on_event("R1", event).await.unwrap_err();
        assert!(matches!(err, AutoDmError::DispatcherUnconfigured));
    }

    #[tokio::test]
    async fn phase_day_falls_back_to_the_canned_chinese_line_when_the_model_is_unreachable() {
        let dispatcher = Arc::new(RecordingDispatcher { dispatched: Mutex::new(Vec::new()) });
        let ingress = Ingress::new(IngressConfig::default(), Arc::new(MemoryManager::new(10)), test_router())
            .with_dispatcher(dispatcher.clone());
        let event = Event::new("R1", 1, "phase.day", "engine", serde_json::json!({}));
        ingress.on_event("R1", event).await.unwrap();

        let dispatched = dispatcher.dispatched.lock().await;
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].payload["message"], "☀️ 天亮了，开始讨论并寻找隐藏的邪恶吧。");
    }

    #[tokio::test]
    async fn nomination_created_falls_back_to_the_canned_line() {
        let dispatcher = Arc::new(RecordingDispatcher { dispatched: Mutex::new(Vec::new()) });
        let ingress = Ingress::new(IngressConfig::default(), Arc::new(MemoryManager::new(10)), test_router())
            .with_dispatcher(dispatcher.clone());
        let event = Event::new("R1", 1, "nomination.created", "p1", serde_json::json!({"nominee": "p2"}));
        ingress.on_event("R1", event).await.unwrap();

        let dispatched = dispatcher.dispatched.lock().await;
        assert_eq!(dispatched[0].payload["message"], "📣 提名已发起，请进行陈述与投票。");
    }

    #[tokio::test]
    async fn rule_question_is_enqueued_with_context_when_available() {
        let memory_manager = Arc::new(MemoryManager::new(10));
        memory_manager.ingest_rules(vec![("book".to_string(), "a ghost may still vote once".to_string())]).await;
        let queue = Arc::new(RecordingQueue { queued: Mutex::new(Vec::new()) });
        let ingress = Ingress::new(IngressConfig::default(), memory_manager, test_router()).with_task_queue(queue.clone());

        let event = Event::new("R1", 1, "rule_question", "p1", serde_json::json!({"question": "can a ghost vote"}));
        ingress.on_event("R1", event).await.unwrap();

        let queued = queue.queued.lock().await;
        assert_eq!(queued.len(), 1);
        assert!(queued[0].payload.get("rule_context").is_some());
    }

    #[tokio::test]
    async fn disabled_ingress_drops_everything() {
        let ingress = Ingress::new(IngressConfig::default(), Arc::new(MemoryManager::new(10)), test_router());
        ingress.set_enabled(false);
        let event = Event::new("R1", 1, "phase.day", "engine", serde_json::json!({}));
        assert!(ingress.on_event("R1", event).await.is_ok());
    }

    #[tokio::test]
    async fn irrelevant_event_types_are_dropped() {
        let queue = Arc::new(RecordingQueue { queued: Mutex::new(Vec::new()) });
        let ingress = Ingress::new(IngressConfig::default(), Arc::new(MemoryManager::new(10)), test_router()).with_task_queue(queue.clone());
        let event = Event::new("R1", 1, "some.unknown.event", "engine", serde_json::json!({}));
        ingress.on_event("R1", event).await.unwrap();
        assert!(queue.queued.lock().await.is_empty());
    }
}
