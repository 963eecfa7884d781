//! The incident commander: investigates with deeper tools and writes the RCA.

use super::{Agent, AgentRole, Termination, ToolCallRecord, TurnReport};
use crate::context::IncidentContext;
use crate::engine::{ReasoningEngine, Transcript};
use crate::error::IncidentError;
use crate::report::RcaReport;
use crate::tools::{ToolName, ToolRegistry};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CommanderRun {
    pub report: RcaReport,
    /// Set when the commander persisted the report itself via `write_rca`.
    pub written_to: Option<PathBuf>,
    pub turns: usize,
    pub records: Vec<ToolCallRecord>,
}

pub fn transcript(context: &IncidentContext) -> Transcript {
    Transcript::new(AgentRole::Commander.system_prompt())
        .with_task(context.briefing(), serde_json::to_value(context).ok())
}

pub async fn investigate<F>(
    engine: &dyn ReasoningEngine,
    registry: &ToolRegistry,
    context: &IncidentContext,
    budget: usize,
    observe: F,
) -> Result<CommanderRun, IncidentError>
where
    F: FnMut(&TurnReport<'_>),
{
    let run = Agent::new(engine, registry, budget)
        .run(transcript(context), observe)
        .await?;

    let invalid = |reason: String| IncidentError::SchemaValidation {
        role: AgentRole::Commander,
        reason,
    };
    let (payload, written_to) = match run.terminated_by {
        Termination::Tool(ToolName::WriteRca) => (
            run.output.get("report").cloned().unwrap_or_default(),
            run.output
                .get("path")
                .and_then(|p| p.as_str())
                .map(PathBuf::from),
        ),
        _ => (run.output.clone(), None),
    };
    let report = RcaReport::from_value(&payload).map_err(|e| invalid(e.to_string()))?;

    Ok(CommanderRun {
        report,
        written_to,
        turns: run.turns,
        records: run.records,
    })
}
