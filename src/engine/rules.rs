//! Deterministic offline engine.
//!
//! Each reply is a pure function of the transcript: the engine looks at which
//! tools have already been called, issues the next batch, and answers once
//! the evidence is in. The commander's conclusions come from
//! [`CorrelationEngine`], which encodes the investigation priors as rules.

use super::{CompletionRequest, EngineError, EngineReply, ReasoningEngine, Transcript};
use crate::agent::logs::LogsTask;
use crate::agent::metrics::MetricsTask;
use crate::agent::AgentRole;
use crate::analysis::{CorrelationEngine, Evidence};
use crate::context::{IncidentContext, LogSummary, Timeframe};
use crate::mock::{service_for, CodeDiff, DeployEvent};
use crate::tools::{ToolCall, ToolName};
use async_trait::async_trait;
use chrono::Duration;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// How far back the commander looks for deploys.
const DEPLOY_LOOKBACK_HOURS: i64 = 6;
/// Log lines kept in a summary.
const MAX_SUMMARY_ENTRIES: usize = 10;
/// What the logs agent searches for across services.
const FAILURE_PATTERN: &str = "timeout|exhausted|OutOfMemory|OOMKilled";

#[derive(Default)]
pub struct RuleBasedEngine {
    correlation: CorrelationEngine,
}

impl RuleBasedEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn task<T: DeserializeOwned>(t: &Transcript) -> Result<T, EngineError> {
    let data = t
        .task_data()
        .ok_or_else(|| EngineError::Malformed("task carries no structured data".to_string()))?;
    serde_json::from_value(data.clone()).map_err(|e| EngineError::Malformed(e.to_string()))
}

fn calls(t: &Transcript, batch: Vec<(ToolName, Value)>) -> EngineReply {
    let base = t.len();
    EngineReply::ToolCalls(
        batch
            .into_iter()
            .enumerate()
            .map(|(i, (tool, args))| ToolCall::new(format!("call_{}_{}", base, i), tool, args))
            .collect(),
    )
}

fn results<T: DeserializeOwned>(t: &Transcript, tool: ToolName) -> Vec<T> {
    t.results_for(tool)
        .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
        .collect()
}

#[async_trait]
impl ReasoningEngine for RuleBasedEngine {
    fn name(&self) -> &str {
        "rules"
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<EngineReply, EngineError> {
        let t = request.transcript;
        match request.role {
            AgentRole::Metrics => self.metrics(t),
            AgentRole::Logs => self.logs(t),
            AgentRole::Commander => self.commander(t),
        }
    }
}

impl RuleBasedEngine {
    fn metrics(&self, t: &Transcript) -> Result<EngineReply, EngineError> {
        let task: MetricsTask = task(t)?;

        let mut by_metric: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for a in &task.anomalies {
            by_metric.entry(a.metric_name.as_str()).or_default().push(a);
        }
        if by_metric.is_empty() {
            return Ok(EngineReply::Final(json!("No anomalies to triage.")));
        }

        if !t.has_called(ToolName::CompareBaseline) {
            let batch = by_metric
                .iter()
                .filter_map(|(metric, list)| {
                    let (first, last) = (list.first()?, list.last()?);
                    Some((
                        ToolName::CompareBaseline,
                        json!({ "metric_name": metric, "start": first.timestamp, "end": last.timestamp }),
                    ))
                })
                .collect();
            return Ok(calls(t, batch));
        }

        let deviations: BTreeMap<String, f64> = t
            .results_for(ToolName::CompareBaseline)
            .filter_map(|(call, v)| {
                let metric = call.arguments.get("metric_name")?.as_str()?.to_string();
                Some((metric, v.get("deviation_percent")?.as_f64()?))
            })
            .collect();

        let services: std::collections::BTreeSet<&str> =
            by_metric.keys().map(|m| service_for(m)).collect();
        let mut summary = format!(
            "{} anomalous metric(s) across {} service(s).",
            by_metric.len(),
            services.len()
        );
        for (metric, list) in &by_metric {
            let peak = list
                .iter()
                .copied()
                .max_by(|a, b| a.value.total_cmp(&b.value));
            let Some(peak) = peak else { continue };
            let _ = write!(
                summary,
                "\n- {} ({}): {} anomalies, peak {:.2} against threshold {:.2}",
                metric,
                service_for(metric),
                list.len(),
                peak.value,
                peak.threshold
            );
            if let Some(trend) = peak.trend {
                let _ = write!(summary, ", {}", trend);
            }
            match deviations.get(*metric) {
                Some(d) => {
                    let _ = write!(summary, ", {:+.1}% versus baseline.", d);
                }
                None => summary.push_str(", baseline comparison unavailable."),
            }
        }
        Ok(EngineReply::Final(Value::String(summary)))
    }

    fn logs(&self, t: &Transcript) -> Result<EngineReply, EngineError> {
        let task: LogsTask = task(t)?;
        let tf = task.timeframe;

        if !t.has_called(ToolName::FetchLogs) {
            let mut batch: Vec<_> = task
                .services
                .iter()
                .map(|svc| {
                    (
                        ToolName::FetchLogs,
                        json!({ "service": svc, "start": tf.start, "end": tf.end, "level": "ERROR" }),
                    )
                })
                .collect();
            batch.push((
                ToolName::SearchLogs,
                json!({ "pattern": FAILURE_PATTERN, "start": tf.start, "end": tf.end }),
            ));
            return Ok(calls(t, batch));
        }

        let signature = Regex::new(&format!("(?i){}", FAILURE_PATTERN))
            .map_err(|e| EngineError::Malformed(e.to_string()))?;

        let mut per_service: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (call, v) in t.results_for(ToolName::FetchLogs) {
            let service = call
                .arguments
                .get("service")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();
            let lines: Vec<String> = serde_json::from_value(v.clone()).unwrap_or_default();
            per_service.entry(service).or_default().extend(lines);
        }
        let matches: Vec<String> = results::<Vec<String>>(t, ToolName::SearchLogs)
            .into_iter()
            .flatten()
            .collect();

        let mut entries: Vec<String> = Vec::new();
        for line in per_service.values().flatten().chain(matches.iter()) {
            if !entries.contains(line) {
                entries.push(line.clone());
            }
        }
        // Failure signatures first; order otherwise preserved.
        entries.sort_by_key(|l| !signature.is_match(l));
        entries.truncate(MAX_SUMMARY_ENTRIES);

        let summary = summarize_logs(&per_service, matches.len());
        let answer = LogSummary {
            timeframe_start: tf.start,
            timeframe_end: tf.end,
            entries,
            summary,
        };
        serde_json::to_value(answer)
            .map(EngineReply::Final)
            .map_err(|e| EngineError::Malformed(e.to_string()))
    }

    fn commander(&self, t: &Transcript) -> Result<EngineReply, EngineError> {
        let ctx: IncidentContext = task(t)?;
        let window = Timeframe::before(ctx.triggered_at);

        // INVESTIGATE: metrics first.
        if !t.has_called(ToolName::GetMetricDetails) {
            let batch = ctx
                .metrics()
                .into_iter()
                .map(|m| {
                    (
                        ToolName::GetMetricDetails,
                        json!({ "metric_name": m, "start": window.start, "end": window.end }),
                    )
                })
                .collect();
            return Ok(calls(t, batch));
        }

        // Then logs and change history.
        if !t.has_called(ToolName::ListRecentDeploys) {
            let mut batch: Vec<_> = ctx
                .affected_services()
                .into_iter()
                .map(|svc| {
                    (
                        ToolName::GetLogDetails,
                        json!({ "service": svc, "start": window.start, "end": window.end }),
                    )
                })
                .collect();
            batch.push((
                ToolName::ListRecentDeploys,
                json!({
                    "start": ctx.triggered_at - Duration::hours(DEPLOY_LOOKBACK_HOURS),
                    "end": ctx.triggered_at,
                }),
            ));
            return Ok(calls(t, batch));
        }

        let deploys: Vec<DeployEvent> = results::<Vec<DeployEvent>>(t, ToolName::ListRecentDeploys)
            .into_iter()
            .flatten()
            .collect();

        // Diffs for every suspect deploy not yet inspected.
        let pending: Vec<_> = self
            .correlation
            .suspect_deploys(&ctx, &deploys)
            .into_iter()
            .filter(|d| !diff_requested(t, &d.commit_sha))
            .map(|d| {
                (
                    ToolName::GetCodeDiff,
                    json!({ "service": d.service, "commit_sha": d.commit_sha }),
                )
            })
            .collect();
        if !pending.is_empty() {
            return Ok(calls(t, pending));
        }

        // DECIDE and ACT.
        let mut log_text = format!("{}\n{}", ctx.log_summary.summary, ctx.log_summary.entries.join("\n"));
        for (_, details) in t.results_for(ToolName::GetLogDetails) {
            log_text.push('\n');
            log_text.push_str(&details.to_string());
        }
        let evidence = Evidence {
            deploys,
            diffs: results::<CodeDiff>(t, ToolName::GetCodeDiff),
            log_text,
        };
        let report = self.correlation.report(&ctx, &evidence);
        Ok(calls(t, vec![(ToolName::WriteRca, json!({ "report": report }))]))
    }
}

fn diff_requested(t: &Transcript, sha: &str) -> bool {
    t.messages().iter().any(|m| match m {
        super::Message::ToolCalls { calls } => calls.iter().any(|c| {
            c.is(ToolName::GetCodeDiff)
                && c.arguments.get("commit_sha").and_then(|s| s.as_str()) == Some(sha)
        }),
        _ => false,
    })
}

fn summarize_logs(per_service: &BTreeMap<String, Vec<String>>, search_hits: usize) -> String {
    if per_service.values().all(|lines| lines.is_empty()) && search_hits == 0 {
        return "No error logs found in the timeframe.".to_string();
    }
    let counts: Vec<String> = per_service
        .iter()
        .map(|(svc, lines)| format!("{} {}", svc, lines.len()))
        .collect();
    let mut summary = format!("ERROR lines per service: {}.", counts.join(", "));

    let mut signals = Vec::new();
    for (svc, lines) in per_service {
        let text = lines.join("\n");
        if text.contains("pool exhausted") || text.contains("acquire DB connection") {
            signals.push(format!("DB connection pool exhaustion on {}", svc));
        }
        if text.contains("OutOfMemoryError") || text.contains("OOMKilled") {
            signals.push(format!("heap exhaustion and OOM kills on {}", svc));
        }
    }
    if !signals.is_empty() {
        let _ = write!(summary, " Signals: {}.", signals.join("; "));
    }
    let _ = write!(summary, " {} timeout or exhaustion matches across services.", search_hits);
    summary
}
