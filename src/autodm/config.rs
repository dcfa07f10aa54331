//! Configuration and lifecycle: the one type an embedder constructs, and
//! the handle it holds onto to enable, start, and stop a table's agent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::autodm::ingress::{Ingress, IngressConfig};
use crate::autodm::memory::MemoryManager;
use crate::autodm::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::autodm::router::{ClientBundle, ModelRouter, TaskKind};
use crate::autodm::run_store::RunStore;
use crate::autodm::tool_registry::{ToolContext, ToolError, ToolRegistry};
use crate::autodm::tools::register_canonical_tools;

/// The full configuration surface for one table's Storyteller: which room,
/// whether it's enabled, which backend serves each task kind, and the
/// knobs the orchestrator and ingress run with.
#[derive(Debug, Clone)]
pub struct StorytellerConfig {
    pub room_id: String,
    pub enabled: bool,
    pub llm_default: ClientBundle,
    pub llm_overrides: HashMap<TaskKind, ClientBundle>,
    pub memory_short_term_capacity: usize,
    pub orchestrator: OrchestratorConfig,
    pub ingress: IngressConfig,
}

impl StorytellerConfig {
    pub fn new(room_id: impl Into<String>, llm_default: ClientBundle) -> Self {
        Self {
            room_id: room_id.into(),
            enabled: true,
            llm_default,
            llm_overrides: HashMap::new(),
            memory_short_term_capacity: 50,
            orchestrator: OrchestratorConfig::default(),
            ingress: IngressConfig::default(),
        }
    }

    pub fn with_llm_override(mut self, task_kind: TaskKind, bundle: ClientBundle) -> Self {
        self.llm_overrides.insert(task_kind, bundle);
        self
    }

    pub fn with_memory_short_term_capacity(mut self, capacity: usize) -> Self {
        self.memory_short_term_capacity = capacity;
        self
    }

    pub fn with_run_interval(mut self, interval: Duration) -> Self {
        self.orchestrator.run_interval = interval;
        self
    }

    pub fn with_max_actions_per_run(mut self, max_actions: usize) -> Self {
        self.orchestrator.max_actions_per_run = max_actions;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.orchestrator.action_timeout = timeout;
        self
    }

    pub fn with_max_retries_per_action(mut self, max_retries: u32) -> Self {
        self.orchestrator.max_retries_per_action = max_retries;
        self
    }

    pub fn with_reflection(mut self, enabled: bool) -> Self {
        self.orchestrator.enable_reflection = enabled;
        self
    }

    pub fn with_player_modeling(mut self, enabled: bool) -> Self {
        self.orchestrator.enable_player_modeling = enabled;
        self
    }
}

/// Owns the wired-together orchestrator and ingress for one table, and the
/// handle of the background run loop once started.
pub struct StorytellerAgent {
    config: StorytellerConfig,
    orchestrator: Arc<Orchestrator>,
    ingress: Arc<Ingress>,
    memory_manager: Arc<MemoryManager>,
    last_seq: Arc<AtomicU64>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StorytellerAgent {
    pub async fn new(
        config: StorytellerConfig,
        tool_context: Arc<dyn ToolContext>,
        run_store: Arc<dyn RunStore>,
    ) -> Result<Self, ToolError> {
        let mut router = ModelRouter::new(config.llm_default.clone());
        for (task_kind, bundle) in &config.llm_overrides {
            router = router.with_bundle(*task_kind, bundle.clone());
        }
        let router = Arc::new(router);

        let memory_manager = Arc::new(MemoryManager::new(config.memory_short_term_capacity));

        let tool_registry = Arc::new(ToolRegistry::new());
        register_canonical_tools(&tool_registry).await?;

        let orchestrator = Arc::new(Orchestrator::new(
            config.room_id.clone(),
            config.orchestrator.clone(),
            tool_registry,
            router.clone(),
            memory_manager.clone(),
            run_store,
            tool_context,
        ));

        let ingress = Arc::new(
            Ingress::new(config.ingress.clone(), memory_manager.clone(), router).with_task_queue(Arc::new(NoopTaskQueue)),
        );
        ingress.set_enabled(config.enabled);

        Ok(Self {
            config,
            orchestrator,
            ingress,
            memory_manager,
            last_seq: Arc::new(AtomicU64::new(0)),
            run_handle: Mutex::new(None),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    pub fn ingress(&self) -> Arc<Ingress> {
        self.ingress.clone()
    }

    pub fn memory_manager(&self) -> Arc<MemoryManager> {
        self.memory_manager.clone()
    }

    pub fn enable(&self) {
        self.ingress.set_enabled(true);
    }

    pub fn disable(&self) {
        self.ingress.set_enabled(false);
    }

    /// Spawns the orchestrator's tick loop. A second call while already
    /// running is a no-op.
    pub async fn start(&self) {
        let mut handle = self.run_handle.lock().await;
        if handle.is_some() {
            return;
        }
        let orchestrator = self.orchestrator.clone();
        let interval = self.config.orchestrator.run_interval;
        let room_id = self.config.room_id.clone();
        let last_seq = self.last_seq.clone();
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let cursor = last_seq.load(Ordering::Acquire);
                match orchestrator.run_once(cursor).await {
                    Ok(run) => {
                        last_seq.store(run.seq_to, Ordering::Release);
                        log::debug!("run {} for room {} completed: {:?}", run.id, room_id, run.status);
                    }
                    Err(e) => log::error!("run failed for room {}: {}", room_id, e),
                }
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.run_handle.lock().await.take() {
            handle.abort();
        }
    }
}

struct NoopTaskQueue;

#[async_trait::async_trait]
impl crate::autodm::ingress::TaskQueue for NoopTaskQueue {
    async fn enqueue(&self, _room_id: String, _event: crate::autodm::model::Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodm::model::{CommandEnvelope, Event, GameStateSnapshot, NominationState, Phase};
    use crate::autodm::run_store::InMemoryRunStore;
    use async_trait::async_trait;

    struct NoopEngine;

    #[async_trait]
    impl ToolContext for NoopEngine {
        async fn dispatch(&self, _command: CommandEnvelope) -> Result<(), ToolError> {
            Ok(())
        }
        async fn room_state(&self, room_id: &str) -> Option<GameStateSnapshot> {
            Some(GameStateSnapshot {
                room_id: room_id.to_string(),
                phase: Phase::Lobby,
                day: 0,
                players: vec![],
                nomination: None::<NominationState>,
                last_seq: 0,
            })
        }
        async fn recent_events(&self, _room_id: &str, _since_seq: u64, _limit: usize) -> Vec<Event> {
            Vec::new()
        }
    }

    fn test_bundle() -> ClientBundle {
        ClientBundle {
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            model: "m".into(),
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn builder_defaults_are_sane() {
        let config = StorytellerConfig::new("R1", test_bundle());
        assert!(config.enabled);
        assert_eq!(config.memory_short_term_capacity, 50);
        assert_eq!(config.orchestrator.run_interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn agent_starts_and_stops_without_panicking() {
        let config = StorytellerConfig::new("R1", test_bundle()).with_run_interval(Duration::from_millis(20));
        let agent = StorytellerAgent::new(config, Arc::new(NoopEngine), Arc::new(InMemoryRunStore::new())).await.unwrap();
        agent.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        agent.stop().await;
    }

    #[tokio::test]
    async fn disabling_the_agent_disables_its_ingress() {
        let config = StorytellerConfig::new("R1", test_bundle());
        let agent = StorytellerAgent::new(config, Arc::new(NoopEngine), Arc::new(InMemoryRunStore::new())).await.unwrap();
        agent.disable();
        let event = Event::new("R1", 1, "phase.day", "engine", serde_json::json!({}));
        assert!(agent.ingress().on_event("R1", event).await.is_ok());
    }
}
