//! Tools the agents may call, and the per-role registry that executes them.
//!
//! Every tool reads from the run's [`MockWorld`]. Only `write_rca` has a side
//! effect; it persists the report through the run's [`RcaStore`] and marks
//! the call as terminal.

pub mod changes;
pub mod logs;
pub mod metrics;

use crate::agent::AgentRole;
use crate::context::IncidentContext;
use crate::mock::MockWorld;
use crate::report::{RcaReport, RcaStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The closed set of tools known to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    QueryMetric,
    CompareBaseline,
    FetchLogs,
    SearchLogs,
    GetMetricDetails,
    GetLogDetails,
    ListRecentDeploys,
    GetCodeDiff,
    WriteRca,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::QueryMetric => "query_metric",
            ToolName::CompareBaseline => "compare_baseline",
            ToolName::FetchLogs => "fetch_logs",
            ToolName::SearchLogs => "search_logs",
            ToolName::GetMetricDetails => "get_metric_details",
            ToolName::GetLogDetails => "get_log_details",
            ToolName::ListRecentDeploys => "list_recent_deploys",
            ToolName::GetCodeDiff => "get_code_diff",
            ToolName::WriteRca => "write_rca",
        }
    }

    /// Whether a successful call ends the agent's loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolName::WriteRca)
    }

    pub fn definition(&self) -> ToolDefinition {
        let window = |subject: &str| {
            json!({
                "type": "object",
                "properties": {
                    subject: { "type": "string" },
                    "start": { "type": "string", "format": "date-time" },
                    "end": { "type": "string", "format": "date-time" }
                },
                "required": [subject, "start", "end"]
            })
        };
        let (description, parameters) = match self {
            ToolName::QueryMetric => (
                "Query raw timeseries points for a metric between start and end (RFC 3339).",
                window("metric_name"),
            ),
            ToolName::CompareBaseline => (
                "Compare a metric's mean between start and end against its mean before start, as percent deviation.",
                window("metric_name"),
            ),
            ToolName::FetchLogs => (
                "Fetch log lines for one service between start and end, filtered by level (default ERROR).",
                json!({
                    "type": "object",
                    "properties": {
                        "service": { "type": "string" },
                        "start": { "type": "string", "format": "date-time" },
                        "end": { "type": "string", "format": "date-time" },
                        "level": { "type": "string", "enum": ["ERROR", "WARN", "INFO", ""] }
                    },
                    "required": ["service", "start", "end"]
                }),
            ),
            ToolName::SearchLogs => (
                "Search every service's logs between start and end for a case-insensitive pattern. Returns at most 20 matches.",
                window("pattern"),
            ),
            ToolName::GetMetricDetails => (
                "Detailed statistics for a metric in a window: current and baseline means, deviation, peak, trend.",
                window("metric_name"),
            ),
            ToolName::GetLogDetails => (
                "Error and warning counts plus the most frequent errors for a service in a window.",
                window("service"),
            ),
            ToolName::ListRecentDeploys => (
                "List deployment events between start and end, oldest first.",
                json!({
                    "type": "object",
                    "properties": {
                        "start": { "type": "string", "format": "date-time" },
                        "end": { "type": "string", "format": "date-time" }
                    },
                    "required": ["start", "end"]
                }),
            ),
            ToolName::GetCodeDiff => (
                "Fetch the code or config diff shipped by a deploy.",
                json!({
                    "type": "object",
                    "properties": {
                        "service": { "type": "string" },
                        "commit_sha": { "type": "string" }
                    },
                    "required": ["service", "commit_sha"]
                }),
            ),
            ToolName::WriteRca => (
                "Persist the final RCA report. Call exactly once when the investigation is complete.",
                json!({
                    "type": "object",
                    "properties": { "report": RcaReport::json_schema() },
                    "required": ["report"]
                }),
            ),
        };
        ToolDefinition {
            name: self.as_str().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query_metric" => Ok(ToolName::QueryMetric),
            "compare_baseline" => Ok(ToolName::CompareBaseline),
            "fetch_logs" => Ok(ToolName::FetchLogs),
            "search_logs" => Ok(ToolName::SearchLogs),
            "get_metric_details" => Ok(ToolName::GetMetricDetails),
            "get_log_details" => Ok(ToolName::GetLogDetails),
            "list_recent_deploys" => Ok(ToolName::ListRecentDeploys),
            "get_code_diff" => Ok(ToolName::GetCodeDiff),
            "write_rca" => Ok(ToolName::WriteRca),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// Tool description handed to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// OpenAI function-calling format.
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

/// A tool invocation requested by the engine. The name is kept as text since
/// engines can ask for tools that do not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: ToolName, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.as_str().to_string(),
            arguments,
        }
    }

    pub fn is(&self, name: ToolName) -> bool {
        self.name == name.as_str()
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool} is not available to the {role} agent")]
    NotPermitted { tool: ToolName, role: AgentRole },

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: ToolName, reason: String },

    #[error("{tool} failed: {reason}")]
    Execution { tool: ToolName, reason: String },

    /// The `write_rca` payload does not conform to the report schema.
    #[error("report rejected: {0}")]
    Schema(String),
}

impl ToolError {
    pub(crate) fn execution(tool: ToolName, reason: impl Into<String>) -> Self {
        ToolError::Execution {
            tool,
            reason: reason.into(),
        }
    }
}

/// Result of a successful tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    /// Set by `write_rca`; the agent loop stops after this turn.
    pub terminal: bool,
}

impl ToolOutput {
    fn read(value: Value) -> Self {
        Self {
            value,
            terminal: false,
        }
    }
}

/// Deserialize tool arguments into their typed form.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: ToolName, args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::InvalidArguments {
        tool,
        reason: e.to_string(),
    })
}

/// Where `write_rca` sends its report.
#[derive(Clone)]
pub struct ReportSink {
    pub store: Arc<RcaStore>,
    pub incident_id: String,
}

#[derive(Deserialize)]
struct WriteRcaArgs {
    report: Value,
}

/// Executes tool calls for one agent role against one run's data.
#[derive(Clone)]
pub struct ToolRegistry {
    role: AgentRole,
    world: Arc<MockWorld>,
    context: Option<Arc<IncidentContext>>,
    sink: Option<ReportSink>,
}

impl ToolRegistry {
    pub fn new(role: AgentRole, world: Arc<MockWorld>) -> Self {
        Self {
            role,
            world,
            context: None,
            sink: None,
        }
    }

    pub fn with_context(mut self, context: Arc<IncidentContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_sink(mut self, sink: ReportSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.role.tools().iter().map(|t| t.definition()).collect()
    }

    /// Run one tool call. Errors are meant to be shown to the agent, not to
    /// end the run.
    pub fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let tool: ToolName = call.name.parse()?;
        if !self.role.tools().contains(&tool) {
            return Err(ToolError::NotPermitted {
                tool,
                role: self.role,
            });
        }
        debug!(role = %self.role, %tool, id = %call.id, args = %call.arguments, "Executing tool call");

        let world = self.world.as_ref();
        let args = &call.arguments;
        let value = match tool {
            ToolName::QueryMetric => metrics::query_metric(world, args)?,
            ToolName::CompareBaseline => metrics::compare_baseline(world, args)?,
            ToolName::GetMetricDetails => {
                metrics::get_metric_details(world, self.context.as_deref(), args)?
            }
            ToolName::FetchLogs => logs::fetch_logs(world, args)?,
            ToolName::SearchLogs => logs::search_logs(world, args)?,
            ToolName::GetLogDetails => logs::get_log_details(world, args)?,
            ToolName::ListRecentDeploys => {
                changes::list_recent_deploys(world, self.context.as_deref(), args)?
            }
            ToolName::GetCodeDiff => changes::get_code_diff(world, args)?,
            ToolName::WriteRca => return self.write_rca(args),
        };
        Ok(ToolOutput::read(value))
    }

    fn write_rca(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| ToolError::execution(ToolName::WriteRca, "no report store attached"))?;

        // Accept both `{"report": {...}}` and a bare report object.
        let payload = match parse_args::<WriteRcaArgs>(ToolName::WriteRca, args) {
            Ok(wrapped) => wrapped.report,
            Err(_) => args.clone(),
        };
        let report = RcaReport::from_value(&payload)
            .map_err(|e| ToolError::Schema(e.to_string()))?
            .with_incident_id(&sink.incident_id);

        let path = sink
            .store
            .write(&report)
            .map_err(|e| ToolError::execution(ToolName::WriteRca, e.to_string()))?;
        info!(incident_id = %sink.incident_id, path = %path.display(), "RCA written");

        Ok(ToolOutput {
            value: json!({
                "path": path.display().to_string(),
                "incident_id": sink.incident_id,
                "report": report,
            }),
            terminal: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use crate::mock::DEFAULT_METRICS;
    use chrono::Utc;

    fn registry(role: AgentRole) -> ToolRegistry {
        let metrics: Vec<String> = DEFAULT_METRICS.iter().map(|m| m.to_string()).collect();
        let world = MockWorld::generate(Utc::now(), &metrics, &MockConfig::default());
        ToolRegistry::new(role, Arc::new(world))
    }

    #[test]
    fn test_tool_names_round_trip() {
        for tool in AgentRole::Commander
            .tools()
            .iter()
            .chain(AgentRole::Metrics.tools())
            .chain(AgentRole::Logs.tools())
        {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), *tool);
            assert_eq!(tool.definition().name, tool.as_str());
        }
    }

    #[test]
    fn test_unknown_tool_is_reported() {
        let err = registry(AgentRole::Metrics)
            .execute(&ToolCall {
                id: "1".into(),
                name: "drop_database".into(),
                arguments: json!({}),
            })
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref n) if n == "drop_database"));
    }

    #[test]
    fn test_role_cannot_call_foreign_tools() {
        let err = registry(AgentRole::Logs)
            .execute(&ToolCall::new("1", ToolName::WriteRca, json!({})))
            .unwrap_err();
        assert!(matches!(err, ToolError::NotPermitted { tool: ToolName::WriteRca, .. }));
    }

    #[test]
    fn test_malformed_arguments_are_rejected() {
        let err = registry(AgentRole::Metrics)
            .execute(&ToolCall::new("1", ToolName::QueryMetric, json!({ "metric_name": 5 })))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { tool: ToolName::QueryMetric, .. }));
    }

    #[test]
    fn test_write_rca_without_store_fails_softly() {
        let err = registry(AgentRole::Commander)
            .execute(&ToolCall::new("1", ToolName::WriteRca, json!({ "report": {} })))
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { tool: ToolName::WriteRca, .. }));
    }

    #[test]
    fn test_openai_format_wraps_function() {
        let def = ToolName::SearchLogs.definition();
        let v = def.to_openai_format();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "search_logs");
        assert_eq!(v["function"]["parameters"]["required"][0], "pattern");
    }
}
