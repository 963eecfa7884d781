//! Log analysis around the anomaly timeframe.

use super::{Agent, AgentRole, TurnReport};
use crate::context::{LogSummary, Timeframe};
use crate::engine::{ReasoningEngine, Transcript};
use crate::error::IncidentError;
use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsTask {
    pub timeframe: Timeframe,
    /// Services worth a closer look, most suspicious first.
    pub services: Vec<String>,
}

pub fn transcript(timeframe: Timeframe, services: &[String]) -> Transcript {
    let text = format!(
        "Analyze logs between {} and {}. Fetch logs for key services ({}) and search for errors \
and timeouts. Produce a structured LogSummary with the most important entries and an overall summary.",
        timeframe.start.to_rfc3339(),
        timeframe.end.to_rfc3339(),
        services.join(", "),
    );
    let data = serde_json::to_value(LogsTask {
        timeframe,
        services: services.to_vec(),
    })
    .ok();
    Transcript::new(AgentRole::Logs.system_prompt()).with_task(text, data)
}

pub async fn investigate(
    engine: &dyn ReasoningEngine,
    registry: &ToolRegistry,
    timeframe: Timeframe,
    services: &[String],
    budget: usize,
) -> Result<LogSummary, IncidentError> {
    let run = Agent::new(engine, registry, budget)
        .run(transcript(timeframe, services), |_: &TurnReport<'_>| {})
        .await?;
    LogSummary::from_value(&run.output).map_err(|reason| IncidentError::SchemaValidation {
        role: AgentRole::Logs,
        reason,
    })
}
