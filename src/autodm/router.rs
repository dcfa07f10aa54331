//! Model Router.
//!
//! Masks the existence of multiple generative backends from callers. Exposes
//! one primitive, [`ModelRouter::chat`], which resolves a [`TaskKind`] to a
//! client bundle and sends an OpenAI-compatible chat-completions request.
//! The router never retries; that is the orchestrator's job.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

lazy_static! {
    /// One pooled client per process, mirroring the connection-reuse policy
    /// every router call relies on.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::Client::builder()
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build shared HTTP client");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Default,
    Planner,
    Rules,
    Narrator,
    Summarizer,
    PlayerModeler,
}

/// Per-task-kind backend configuration.
#[derive(Debug, Clone)]
pub struct ClientBundle {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: RouterToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone)]
pub enum RouterError {
    ApiError { status: u16, body: String },
    Timeout,
    TransientIo(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::ApiError { status, body } => write!(f, "model backend returned {}: {}", status, body),
            RouterError::Timeout => write!(f, "model call timed out"),
            RouterError::TransientIo(msg) => write!(f, "transient I/O error: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}

/// `TaskKind -> ClientBundle` resolved once at construction; unmapped kinds
/// fall through to `default`.
pub struct ModelRouter {
    bundles: HashMap<TaskKind, ClientBundle>,
    default_bundle: ClientBundle,
}

impl ModelRouter {
    pub fn new(default_bundle: ClientBundle) -> Self {
        Self { bundles: HashMap::new(), default_bundle }
    }

    pub fn with_bundle(mut self, task_kind: TaskKind, bundle: ClientBundle) -> Self {
        self.bundles.insert(task_kind, bundle);
        self
    }

    fn bundle_for(&self, task_kind: TaskKind) -> &ClientBundle {
        self.bundles.get(&task_kind).unwrap_or(&self.default_bundle)
    }

    /// Send one chat-completion request for `task_kind`. The effective
    /// deadline is `min(deadline, bundle.timeout)`.
    pub async fn chat(
        &self,
        task_kind: TaskKind,
        messages: &[ChatMessage],
        tools: Option<Vec<RouterToolDefinition>>,
        deadline: Option<Duration>,
    ) -> Result<ChatResponse, RouterError> {
        let bundle = self.bundle_for(task_kind);
        let effective_timeout = match deadline {
            Some(d) if d < bundle.timeout => d,
            _ => bundle.timeout,
        };

        let body = serde_json::json!({
            "model": bundle.model,
            "messages": messages,
            "tools": tools,
        });

        let mut request = SHARED_HTTP_CLIENT
            .post(format!("{}/chat/completions", bundle.base_url))
            .json(&body);
        if let Some(key) = &bundle.api_key {
            request = request.bearer_auth(key);
        }

        let send_future = request.send();
        let response = tokio::time::timeout(effective_timeout, send_future)
            .await
            .map_err(|_| RouterError::Timeout)?
            .map_err(|e| RouterError::TransientIo(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RouterError::ApiError { status: status.as_u16(), body: body_text });
        }

        let parsed: serde_json::Value = response.json().await.map_err(|e| RouterError::TransientIo(e.to_string()))?;

        let content = parsed["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string();
        let finish_reason = parsed["choices"][0]["finish_reason"].as_str().map(String::from);
        let usage = parsed.get("usage").map(|u| TokenUsage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as usize,
        });

        Ok(ChatResponse { content, finish_reason, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_task_kind_falls_back_to_default() {
        let default_bundle = ClientBundle {
            base_url: "http://default".into(),
            api_key: None,
            model: "default-model".into(),
            timeout: Duration::from_secs(5),
        };
        let router = ModelRouter::new(default_bundle.clone());
        assert_eq!(router.bundle_for(TaskKind::Narrator).base_url, default_bundle.base_url);
    }

    #[test]
    fn mapped_task_kind_resolves_to_its_own_bundle() {
        let default_bundle = ClientBundle {
            base_url: "http://default".into(),
            api_key: None,
            model: "default-model".into(),
            timeout: Duration::from_secs(5),
        };
        let rules_bundle = ClientBundle {
            base_url: "http://rules".into(),
            api_key: Some("key".into()),
            model: "rules-model".into(),
            timeout: Duration::from_secs(3),
        };
        let router = ModelRouter::new(default_bundle).with_bundle(TaskKind::Rules, rules_bundle.clone());
        assert_eq!(router.bundle_for(TaskKind::Rules).base_url, rules_bundle.base_url);
    }
}
