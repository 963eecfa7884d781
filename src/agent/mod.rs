//! Agent roles and the turn loop they share.

pub mod commander;
pub mod logs;
pub mod metrics;

use crate::context::LogSummary;
use crate::engine::{CompletionRequest, EngineReply, Message, ReasoningEngine, Transcript};
use crate::error::IncidentError;
use crate::report::RcaReport;
use crate::tools::{ToolCall, ToolError, ToolName, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Metrics,
    Logs,
    Commander,
}

const METRICS_TOOLS: &[ToolName] = &[ToolName::QueryMetric, ToolName::CompareBaseline];
const LOGS_TOOLS: &[ToolName] = &[ToolName::FetchLogs, ToolName::SearchLogs];
const COMMANDER_TOOLS: &[ToolName] = &[
    ToolName::GetMetricDetails,
    ToolName::GetLogDetails,
    ToolName::ListRecentDeploys,
    ToolName::GetCodeDiff,
    ToolName::WriteRca,
];

const METRICS_PROMPT: &str = "You are a metrics triage specialist. Analyze the provided metric anomalies, \
query additional details using the available tools, and produce a concise plain-text summary of what \
the metrics indicate about system health. Focus on severity, affected components, and potential causes \
suggested by the metric patterns.";

const LOGS_PROMPT: &str = "You are a log analysis specialist. Fetch and analyze logs around the anomaly \
timeframe using the available tools. Identify error patterns, exceptions, and service degradation \
signals. Produce a structured log summary.";

const COMMANDER_PROMPT: &str = "You are an incident commander. Given metric anomalies and log summaries, \
investigate the incident using the available tools to gather additional context (deploys, code diffs, \
metric details, log details). Follow the loop: INVESTIGATE, DECIDE, ACT, REPORT.\n\
Investigation patterns to look for:\n\
1. Correlate anomaly onset with recent deployments. A deploy within 30 minutes before symptoms begin \
is a strong root cause signal.\n\
2. For latency spikes, check DB connection pool settings and timeouts in code diffs.\n\
3. A heap metric with a gradual_ramp trend (not a spike) indicates a memory leak. Check logs for \
listener or cache accumulation, missing TTLs, or unbounded queues.\n\
4. If a config or infrastructure change is the root cause, make an immediate rollback the first \
remediation step.\n\
5. If a memory leak is confirmed, recommend a pod restart as immediate mitigation and a heap dump plus \
code review as the follow-up.\n\
When you have enough information, call write_rca exactly once with your findings.";

impl AgentRole {
    pub fn tools(&self) -> &'static [ToolName] {
        match self {
            AgentRole::Metrics => METRICS_TOOLS,
            AgentRole::Logs => LOGS_TOOLS,
            AgentRole::Commander => COMMANDER_TOOLS,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentRole::Metrics => METRICS_PROMPT,
            AgentRole::Logs => LOGS_PROMPT,
            AgentRole::Commander => COMMANDER_PROMPT,
        }
    }

    pub fn output_schema(&self) -> OutputSchema {
        match self {
            AgentRole::Metrics => OutputSchema::Text,
            AgentRole::Logs => OutputSchema::LogSummary,
            AgentRole::Commander => OutputSchema::RcaReport,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Metrics => write!(f, "metrics"),
            AgentRole::Logs => write!(f, "logs"),
            AgentRole::Commander => write!(f, "commander"),
        }
    }
}

/// Shape a final answer must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    Text,
    LogSummary,
    RcaReport,
}

impl OutputSchema {
    /// JSON schema for structured answers; `None` for free text.
    pub fn json_schema(&self) -> Option<Value> {
        match self {
            OutputSchema::Text => None,
            OutputSchema::LogSummary => Some(LogSummary::json_schema()),
            OutputSchema::RcaReport => Some(RcaReport::json_schema()),
        }
    }

    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            OutputSchema::Text => match value.as_str() {
                Some(s) if !s.trim().is_empty() => Ok(()),
                Some(_) => Err("answer must not be empty".to_string()),
                None => Err("answer must be plain text".to_string()),
            },
            OutputSchema::LogSummary => LogSummary::from_value(value).map(|_| ()),
            OutputSchema::RcaReport => RcaReport::from_value(value)
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }
}

/// A tool call and what came back, kept for the length of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub turn: usize,
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
    pub is_error: bool,
}

/// How an agent's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    FinalAnswer,
    Tool(ToolName),
}

/// What one turn did, for observers such as the phase tracker.
#[derive(Debug, Clone)]
pub struct TurnReport<'a> {
    pub role: AgentRole,
    pub turn: usize,
    pub calls: &'a [ToolCall],
    pub answered: bool,
    pub terminal: bool,
}

#[derive(Debug, Clone)]
pub struct AgentRun {
    /// The accepted final answer, or the terminal tool's result.
    pub output: Value,
    pub terminated_by: Termination,
    pub turns: usize,
    pub records: Vec<ToolCallRecord>,
    pub transcript: Transcript,
}

/// One role bound to an engine, a registry and a turn budget.
pub struct Agent<'a> {
    role: AgentRole,
    engine: &'a dyn ReasoningEngine,
    registry: &'a ToolRegistry,
    budget: usize,
}

impl<'a> Agent<'a> {
    pub fn new(engine: &'a dyn ReasoningEngine, registry: &'a ToolRegistry, budget: usize) -> Self {
        Self {
            role: registry.role(),
            engine,
            registry,
            budget,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Drive the engine until it answers, a terminal tool succeeds, or the
    /// budget runs out.
    ///
    /// Tool failures go back to the engine as error results. A non-conforming
    /// answer (or `write_rca` payload) earns one correction; a second one
    /// fails the run.
    pub async fn run<F>(&self, mut transcript: Transcript, mut observe: F) -> Result<AgentRun, IncidentError>
    where
        F: FnMut(&TurnReport<'_>),
    {
        let schema = self.role.output_schema();
        let tools = self.registry.definitions();
        let mut records = Vec::new();
        let mut rejected = 0usize;

        info!(role = %self.role, engine = self.engine.name(), budget = self.budget, "Agent started");

        for turn in 1..=self.budget {
            let reply = self
                .engine
                .complete(CompletionRequest {
                    role: self.role,
                    transcript: &transcript,
                    tools: &tools,
                    schema,
                })
                .await?;

            match reply {
                EngineReply::Final(value) => {
                    observe(&TurnReport {
                        role: self.role,
                        turn,
                        calls: &[],
                        answered: true,
                        terminal: false,
                    });
                    match schema.check(&value) {
                        Ok(()) => {
                            info!(role = %self.role, turns = turn, "Agent answered");
                            return Ok(AgentRun {
                                output: value,
                                terminated_by: Termination::FinalAnswer,
                                turns: turn,
                                records,
                                transcript,
                            });
                        }
                        Err(reason) => {
                            self.reject(&mut rejected, &reason)?;
                            transcript.push(Message::Answer { value });
                            transcript.push(Message::Correction {
                                text: correction_text(&reason),
                            });
                        }
                    }
                }
                EngineReply::ToolCalls(calls) => {
                    if calls.is_empty() {
                        let reason = "reply contained neither tool calls nor an answer".to_string();
                        self.reject(&mut rejected, &reason)?;
                        transcript.push(Message::Correction {
                            text: correction_text(&reason),
                        });
                        continue;
                    }

                    transcript.push(Message::ToolCalls {
                        calls: calls.clone(),
                    });
                    let mut terminal: Option<(ToolName, Value)> = None;
                    let mut correction = None;

                    for call in &calls {
                        let (result, is_error) = match self.registry.execute(call) {
                            Ok(out) => {
                                if out.terminal {
                                    if let Ok(tool) = call.name.parse::<ToolName>() {
                                        terminal = Some((tool, out.value.clone()));
                                    }
                                }
                                (out.value, false)
                            }
                            // A report already landed in this batch; later bad
                            // drafts are reported back but cannot fail the run.
                            Err(ToolError::Schema(reason)) if terminal.is_some() => {
                                warn!(role = %self.role, error = %reason, "Ignoring invalid report after a stored one");
                                (json!({ "error": format!("report rejected: {}", reason) }), true)
                            }
                            Err(ToolError::Schema(reason)) => {
                                self.reject(&mut rejected, &reason)?;
                                correction = Some(correction_text(&reason));
                                (json!({ "error": format!("report rejected: {}", reason) }), true)
                            }
                            Err(e) => {
                                warn!(role = %self.role, tool = %call.name, error = %e, "Tool call failed");
                                (json!({ "error": e.to_string() }), true)
                            }
                        };
                        debug!(role = %self.role, turn, tool = %call.name, is_error, "Tool call recorded");
                        records.push(ToolCallRecord {
                            turn,
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                            result: result.clone(),
                            is_error,
                        });
                        transcript.push(Message::ToolResult {
                            call: call.clone(),
                            result,
                            is_error,
                        });
                    }

                    // Tool results must directly follow the calls that produced them.
                    if let Some(text) = correction {
                        transcript.push(Message::Correction { text });
                    }

                    observe(&TurnReport {
                        role: self.role,
                        turn,
                        calls: &calls,
                        answered: false,
                        terminal: terminal.is_some(),
                    });

                    if let Some((tool, output)) = terminal {
                        info!(role = %self.role, turns = turn, %tool, "Agent finished via terminal tool");
                        return Ok(AgentRun {
                            output,
                            terminated_by: Termination::Tool(tool),
                            turns: turn,
                            records,
                            transcript,
                        });
                    }
                }
            }
        }

        warn!(role = %self.role, budget = self.budget, "Agent exhausted its turn budget");
        Err(IncidentError::BudgetExceeded {
            role: self.role,
            turns: self.budget,
        })
    }

    fn reject(&self, rejected: &mut usize, reason: &str) -> Result<(), IncidentError> {
        *rejected += 1;
        if *rejected > 1 {
            return Err(IncidentError::SchemaValidation {
                role: self.role,
                reason: reason.to_string(),
            });
        }
        warn!(role = %self.role, %reason, "Answer rejected, asking for a correction");
        Ok(())
    }
}

fn correction_text(reason: &str) -> String {
    format!(
        "Your previous answer was rejected: {}. Reply again with an answer that matches the required schema.",
        reason
    )
}
