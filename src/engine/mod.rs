//! The reasoning-engine seam.
//!
//! An engine sees the running transcript, the tools its agent may call and
//! the shape of the answer it must eventually give. Each call returns either
//! tool invocations or a final answer; the agent loop does the rest.

pub mod openrouter;
pub mod rules;
pub mod scripted;

pub use openrouter::OpenRouterEngine;
pub use rules::RuleBasedEngine;
pub use scripted::ScriptedEngine;

use crate::agent::{AgentRole, OutputSchema};
use crate::config::{AgentsConfig, EngineKind};
use crate::tools::{ToolCall, ToolDefinition, ToolName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("engine returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("malformed engine response: {0}")]
    Malformed(String),

    #[error("scripted engine has no replies left")]
    Exhausted,
}

/// One entry in an agent's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    System {
        text: String,
    },
    /// A task for the agent. `data` carries the same facts in machine form.
    User {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    ToolCalls {
        calls: Vec<ToolCall>,
    },
    ToolResult {
        call: ToolCall,
        result: Value,
        is_error: bool,
    },
    /// A final answer that was rejected and is kept for context.
    Answer {
        value: Value,
    },
    /// Why the previous answer was rejected.
    Correction {
        text: String,
    },
}

/// Ordered record of everything the engine has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::System {
                text: system.into(),
            }],
        }
    }

    pub fn with_task(mut self, text: impl Into<String>, data: Option<Value>) -> Self {
        self.push(Message::User {
            text: text.into(),
            data,
        });
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Structured data attached to the first task message.
    pub fn task_data(&self) -> Option<&Value> {
        self.messages.iter().find_map(|m| match m {
            Message::User { data, .. } => data.as_ref(),
            _ => None,
        })
    }

    /// Successful results of calls to `tool`, oldest first.
    pub fn results_for(&self, tool: ToolName) -> impl Iterator<Item = (&ToolCall, &Value)> + '_ {
        self.messages.iter().filter_map(move |m| match m {
            Message::ToolResult {
                call,
                result,
                is_error: false,
            } if call.is(tool) => Some((call, result)),
            _ => None,
        })
    }

    /// Whether `tool` has been requested at all, successful or not.
    pub fn has_called(&self, tool: ToolName) -> bool {
        self.messages.iter().any(|m| match m {
            Message::ToolCalls { calls } => calls.iter().any(|c| c.is(tool)),
            _ => false,
        })
    }

    pub fn corrections(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::Correction { .. }))
            .count()
    }
}

/// Everything an engine needs for one turn.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub role: AgentRole,
    pub transcript: &'a Transcript,
    pub tools: &'a [ToolDefinition],
    pub schema: OutputSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    ToolCalls(Vec<ToolCall>),
    Final(Value),
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<EngineReply, EngineError>;
}

/// Build the engine selected in configuration.
pub fn from_config(cfg: &AgentsConfig) -> Result<Arc<dyn ReasoningEngine>, EngineError> {
    match cfg.engine {
        EngineKind::Rules => Ok(Arc::new(RuleBasedEngine::new())),
        EngineKind::Openrouter => Ok(Arc::new(OpenRouterEngine::from_config(cfg)?)),
    }
}
