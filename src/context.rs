//! Artifacts passed between the investigation phases.
//!
//! Each phase produces an immutable value consumed by the next: the log
//! summary from the logs agent, then the [`IncidentContext`] the commander
//! reads. Nothing here is mutated after construction.

use crate::detect::{MetricAnomaly, Trend};
use crate::error::IncidentError;
use crate::mock::service_for;
use crate::report::not_blank;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use validator::{Validate, ValidationError};

/// Look-back used for the logs agent and the commander's evidence windows.
pub const INVESTIGATION_LOOKBACK_MINUTES: i64 = 30;

/// Closed interval the log investigation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timeframe {
    /// The look-back window ending at `triggered_at`.
    pub fn before(triggered_at: DateTime<Utc>) -> Self {
        Self {
            start: triggered_at - Duration::minutes(INVESTIGATION_LOOKBACK_MINUTES),
            end: triggered_at,
        }
    }
}

/// The latest anomaly timestamp; the moment the incident is declared.
pub fn trigger_time(anomalies: &[MetricAnomaly]) -> Option<DateTime<Utc>> {
    anomalies.iter().map(|a| a.timestamp).max()
}

fn ordered_timeframe(summary: &LogSummary) -> Result<(), ValidationError> {
    if summary.timeframe_end < summary.timeframe_start {
        return Err(ValidationError::new("timeframe").with_message("timeframe_end precedes timeframe_start".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "ordered_timeframe"))]
pub struct LogSummary {
    pub timeframe_start: DateTime<Utc>,
    pub timeframe_end: DateTime<Utc>,
    /// Most relevant log lines, in the order the agent ranked them.
    #[serde(default)]
    pub entries: Vec<String>,
    #[validate(custom(function = "not_blank"))]
    pub summary: String,
}

impl LogSummary {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let summary: Self = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        summary.validate().map_err(|e| e.to_string())?;
        Ok(summary)
    }

    pub fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "timeframe_start": { "type": "string", "format": "date-time" },
                "timeframe_end": { "type": "string", "format": "date-time" },
                "entries": { "type": "array", "items": { "type": "string" } },
                "summary": { "type": "string", "minLength": 1 }
            },
            "required": ["timeframe_start", "timeframe_end", "entries", "summary"]
        })
    }
}

/// Everything the commander knows when it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentContext {
    pub anomalies: Vec<MetricAnomaly>,
    pub metrics_summary: String,
    pub log_summary: LogSummary,
    pub triggered_at: DateTime<Utc>,
}

impl IncidentContext {
    /// Combine the detector and agent outputs. An incident needs at least one anomaly.
    pub fn assemble(
        anomalies: Vec<MetricAnomaly>,
        metrics_summary: String,
        log_summary: LogSummary,
    ) -> Result<Self, IncidentError> {
        let triggered_at = trigger_time(&anomalies).ok_or_else(|| {
            IncidentError::InvalidInput("incident context requires at least one anomaly".to_string())
        })?;
        Ok(Self {
            anomalies,
            metrics_summary,
            log_summary,
            triggered_at,
        })
    }

    /// Distinct anomalous metrics in first-seen order.
    pub fn metrics(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.anomalies
            .iter()
            .map(|a| a.metric_name.as_str())
            .filter(|m| seen.insert(*m))
            .collect()
    }

    /// Services owning an anomalous metric, sorted.
    pub fn affected_services(&self) -> Vec<String> {
        self.anomalies
            .iter()
            .map(|a| service_for(&a.metric_name).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn trend_of(&self, metric: &str) -> Option<Trend> {
        self.anomalies
            .iter()
            .find(|a| a.metric_name == metric)
            .and_then(|a| a.trend)
    }

    /// First anomaly on any metric owned by `service`.
    pub fn onset_for(&self, service: &str) -> Option<DateTime<Utc>> {
        self.anomalies
            .iter()
            .filter(|a| service_for(&a.metric_name) == service)
            .map(|a| a.timestamp)
            .min()
    }

    /// Opening briefing for the commander.
    pub fn briefing(&self) -> String {
        let mut out = format!(
            "An incident was detected at {}.\n\n## Metric anomalies\n",
            self.triggered_at.to_rfc3339()
        );
        for a in &self.anomalies {
            let _ = writeln!(
                out,
                "- {}: value={:.2}, threshold={:.2}, at={}, trend={}",
                a.metric_name,
                a.value,
                a.threshold,
                a.timestamp.to_rfc3339(),
                a.trend.map(|t| t.to_string()).unwrap_or_else(|| "unknown".to_string()),
            );
        }
        let _ = write!(
            out,
            "\n## Metrics triage\n{}\n\n## Log summary ({} to {})\n{}\n\nKey log entries:\n",
            self.metrics_summary,
            self.log_summary.timeframe_start.to_rfc3339(),
            self.log_summary.timeframe_end.to_rfc3339(),
            self.log_summary.summary,
        );
        for entry in self.log_summary.entries.iter().take(10) {
            let _ = writeln!(out, "  {}", entry);
        }
        out.push_str(
            "\nInvestigate this incident with the available tools, then call write_rca with your findings.",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomaly(metric: &str, minutes_ago: i64) -> MetricAnomaly {
        MetricAnomaly {
            metric_name: metric.to_string(),
            value: 10.0,
            threshold: 5.0,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            window_seconds: 300,
            trend: Some(Trend::SuddenSpike),
        }
    }

    fn summary() -> LogSummary {
        let tf = Timeframe::before(Utc::now());
        LogSummary {
            timeframe_start: tf.start,
            timeframe_end: tf.end,
            entries: vec!["[ERROR] x".to_string()],
            summary: "errors".to_string(),
        }
    }

    #[test]
    fn test_empty_anomalies_rejected() {
        let err = IncidentContext::assemble(vec![], String::new(), summary()).unwrap_err();
        assert!(matches!(err, IncidentError::InvalidInput(_)));
    }

    #[test]
    fn test_trigger_is_latest_anomaly() {
        let a = anomaly("cpu_usage", 20);
        let b = anomaly("heap_usage_mb", 5);
        let ctx = IncidentContext::assemble(vec![b.clone(), a.clone()], "s".into(), summary()).unwrap();
        assert_eq!(ctx.triggered_at, b.timestamp);
        assert_eq!(ctx.onset_for("api-gateway"), Some(a.timestamp));
        assert_eq!(ctx.affected_services(), vec!["api-gateway", "worker-service"]);
        assert_eq!(ctx.metrics(), vec!["heap_usage_mb", "cpu_usage"]);
    }

    #[test]
    fn test_log_summary_validation() {
        let mut v = serde_json::to_value(summary()).unwrap();
        assert!(LogSummary::from_value(&v).is_ok());

        v["summary"] = json!("");
        assert!(LogSummary::from_value(&v).is_err());

        let mut reversed = serde_json::to_value(summary()).unwrap();
        reversed["timeframe_end"] = json!("2001-01-01T00:00:00Z");
        assert!(LogSummary::from_value(&reversed).is_err());
    }

    #[test]
    fn test_briefing_lists_anomalies_and_logs() {
        let ctx = IncidentContext::assemble(vec![anomaly("cpu_usage", 1)], "cpu hot".into(), summary())
            .unwrap();
        let text = ctx.briefing();
        assert!(text.contains("cpu_usage: value=10.00"));
        assert!(text.contains("trend=sudden_spike"));
        assert!(text.contains("cpu hot"));
        assert!(text.contains("[ERROR] x"));
    }
}
