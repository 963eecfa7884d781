//! Metrics triage: a free-text read of what the anomalies say.

use super::{Agent, AgentRole, TurnReport};
use crate::detect::MetricAnomaly;
use crate::engine::{ReasoningEngine, Transcript};
use crate::error::IncidentError;
use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Machine-readable form of the metrics agent's task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsTask {
    pub anomalies: Vec<MetricAnomaly>,
}

pub fn transcript(anomalies: &[MetricAnomaly]) -> Transcript {
    let mut text = String::from("Analyze the following metric anomalies and investigate using the available tools:\n\n");
    for a in anomalies {
        let _ = writeln!(
            text,
            "- {}: value={:.2}, threshold={:.2}, at={}",
            a.metric_name,
            a.value,
            a.threshold,
            a.timestamp.to_rfc3339()
        );
    }
    let data = serde_json::to_value(MetricsTask {
        anomalies: anomalies.to_vec(),
    })
    .ok();
    Transcript::new(AgentRole::Metrics.system_prompt()).with_task(text, data)
}

/// Produce the triage summary.
pub async fn investigate(
    engine: &dyn ReasoningEngine,
    registry: &ToolRegistry,
    anomalies: &[MetricAnomaly],
    budget: usize,
) -> Result<String, IncidentError> {
    let run = Agent::new(engine, registry, budget)
        .run(transcript(anomalies), |_: &TurnReport<'_>| {})
        .await?;
    // The loop only accepts non-blank text for this role.
    Ok(run.output.as_str().unwrap_or_default().to_string())
}
