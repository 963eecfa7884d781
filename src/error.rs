//! Run-level errors. Anything here aborts the investigation.

use crate::agent::AgentRole;
use crate::detect::DetectError;
use crate::engine::EngineError;
use crate::report::ReportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{role} agent produced a non-conforming answer after one retry: {reason}")]
    SchemaValidation { role: AgentRole, reason: String },

    #[error("{role} agent exhausted its budget of {turns} turns without a final answer")]
    BudgetExceeded { role: AgentRole, turns: usize },

    #[error("reasoning engine failed")]
    Engine(#[from] EngineError),

    #[error("failed to persist RCA report")]
    Report(#[from] ReportError),

    #[error("investigation exceeded the {secs}s wall-clock limit")]
    Timeout { secs: u64 },
}

impl From<DetectError> for IncidentError {
    fn from(e: DetectError) -> Self {
        IncidentError::InvalidInput(e.to_string())
    }
}

pub type Result<T, E = IncidentError> = std::result::Result<T, E>;
