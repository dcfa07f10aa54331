//! Tool Registry (MCP layer).
//!
//! The agent's sole egress surface. Every side effect on the game engine —
//! and every read of engine state — happens through a tool registered here.
//! Parameters are validated against a declared schema before the handler
//! ever runs; the registry never retries a failed invocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::autodm::model::GameStateSnapshot;

/// Context a tool handler runs under: a way to emit commands and a way to
/// read the engine's authoritative state. Handlers never talk to the engine
/// any other way.
#[async_trait]
pub trait ToolContext: Send + Sync {
    async fn dispatch(&self, command: crate::autodm::model::CommandEnvelope) -> Result<(), ToolError>;
    async fn room_state(&self, room_id: &str) -> Option<GameStateSnapshot>;
    async fn recent_events(
        &self,
        room_id: &str,
        since_seq: u64,
        limit: usize,
    ) -> Vec<crate::autodm::model::Event>;
}

pub type ToolHandler = Arc<
    dyn Fn(
            JsonValue,
            Arc<dyn ToolContext>,
        ) -> Pin<Box<dyn Future<Output = Result<JsonValue, ToolError>> + Send>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Communication,
    GameControl,
    Moderation,
    Information,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Enum,
    Object,
}

/// A single declared field in a tool's parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed_values: Option<Vec<String>>,
    pub properties: Option<Vec<ParamSchema>>,
}

impl ParamSchema {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            allowed_values: None,
            properties: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    pub fn with_properties(mut self, properties: Vec<ParamSchema>) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Static identity of a registered tool: name, description, category, and
/// its parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Vec<ParamSchema>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, category: ToolCategory) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ParamSchema) -> Self {
        self.parameters.push(param);
        self
    }
}

#[derive(Debug, Clone)]
pub enum ToolError {
    DuplicateTool(String),
    InvalidSchema(String),
    UnknownTool(String),
    ValidationError(String),
    HandlerError(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::DuplicateTool(name) => write!(f, "tool already registered: {}", name),
            ToolError::InvalidSchema(msg) => write!(f, "invalid schema: {}", msg),
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {}", name),
            ToolError::ValidationError(msg) => write!(f, "validation error: {}", msg),
            ToolError::HandlerError(msg) => write!(f, "handler error: {}", msg),
        }
    }
}

impl std::error::Error for ToolError {}

/// `{id, name, params, timestamp}` — one call into `ToolRegistry::invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub params: JsonValue,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResult {
    pub success: bool,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Registers typed tools, validates parameters against their schema, invokes
/// handlers, and returns uniform results. Registration-phase writes are rare;
/// invocation-phase reads dominate, hence the read-biased lock.
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, definition: ToolDefinition, handler: ToolHandler) -> Result<(), ToolError> {
        validate_schema(&definition)?;
        let mut tools = self.tools.write().await;
        if tools.contains_key(&definition.name) {
            return Err(ToolError::DuplicateTool(definition.name));
        }
        tools.insert(definition.name.clone(), RegisteredTool { definition, handler });
        Ok(())
    }

    pub async fn list(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.values().map(|t| t.definition.clone()).collect()
    }

    pub async fn invoke(&self, call: ToolCall, ctx: Arc<dyn ToolContext>) -> InvokeResult {
        let started = Instant::now();
        let tools = self.tools.read().await;
        let Some(tool) = tools.get(&call.name) else {
            return InvokeResult {
                success: false,
                result: None,
                error: Some(ToolError::UnknownTool(call.name.clone()).to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        };

        if let Err(e) = validate_params(&tool.definition, &call.params) {
            return InvokeResult {
                success: false,
                result: None,
                error: Some(e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }

        let handler = tool.handler.clone();
        drop(tools);

        match handler(call.params, ctx).await {
            Ok(value) => InvokeResult {
                success: true,
                result: Some(value),
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => InvokeResult {
                success: false,
                result: None,
                error: Some(e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_schema(definition: &ToolDefinition) -> Result<(), ToolError> {
    for param in &definition.parameters {
        if param.param_type == ParamType::Enum && param.allowed_values.as_ref().map_or(true, |v| v.is_empty()) {
            return Err(ToolError::InvalidSchema(format!(
                "parameter '{}' declares enum type with no allowed values",
                param.name
            )));
        }
        if param.param_type == ParamType::Object && param.properties.is_none() {
            return Err(ToolError::InvalidSchema(format!(
                "parameter '{}' declares object type with no properties",
                param.name
            )));
        }
    }
    Ok(())
}

fn validate_params(definition: &ToolDefinition, params: &JsonValue) -> Result<(), ToolError> {
    for field in &definition.parameters {
        let value = params.get(&field.name);
        match value {
            None => {
                if field.required {
                    return Err(ToolError::ValidationError(format!("missing required field '{}'", field.name)));
                }
            }
            Some(v) => validate_field(field, v)?,
        }
    }
    Ok(())
}

fn validate_field(field: &ParamSchema, value: &JsonValue) -> Result<(), ToolError> {
    match field.param_type {
        ParamType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| ToolError::ValidationError(format!("field '{}' must be a string", field.name)))?;
            if let Some(min) = field.min_length {
                if s.len() < min {
                    return Err(ToolError::ValidationError(format!(
                        "field '{}' shorter than minimum length {}",
                        field.name, min
                    )));
                }
            }
            if let Some(max) = field.max_length {
                if s.len() > max {
                    return Err(ToolError::ValidationError(format!(
                        "field '{}' longer than maximum length {}",
                        field.name, max
                    )));
                }
            }
        }
        ParamType::Number => {
            let n = value
                .as_f64()
                .ok_or_else(|| ToolError::ValidationError(format!("field '{}' must be a number", field.name)))?;
            if let Some(min) = field.min {
                if n < min {
                    return Err(ToolError::ValidationError(format!("field '{}' below minimum {}", field.name, min)));
                }
            }
            if let Some(max) = field.max {
                if n > max {
                    return Err(ToolError::ValidationError(format!("field '{}' above maximum {}", field.name, max)));
                }
            }
        }
        ParamType::Boolean => {
            value
                .as_bool()
                .ok_or_else(|| ToolError::ValidationError(format!("field '{}' must be a boolean", field.name)))?;
        }
        ParamType::Enum => {
            let s = value
                .as_str()
                .ok_or_else(|| ToolError::ValidationError(format!("field '{}' must be a string", field.name)))?;
            let allowed = field.allowed_values.as_ref().expect("validated at registration");
            if !allowed.iter().any(|a| a == s) {
                return Err(ToolError::ValidationError(format!(
                    "field '{}' value '{}' is not one of {:?}",
                    field.name, s, allowed
                )));
            }
        }
        ParamType::Object => {
            let obj = value
                .as_object()
                .ok_or_else(|| ToolError::ValidationError(format!("field '{}' must be an object", field.name)))?;
            if let Some(nested) = &field.properties {
                for nested_field in nested {
                    match obj.get(&nested_field.name) {
                        None if nested_field.required => {
                            return Err(ToolError::ValidationError(format!(
                                "missing required field '{}.{}'",
                                field.name, nested_field.name
                            )));
                        }
                        Some(v) => validate_field(nested_field, v)?,
                        None => {}
                    }
                }
            }
        }
    }
    Ok(())
}
